use rand::Rng;
use std::collections::BTreeMap;

use crate::{
    backend::VectorOps,
    error::{Error, Result},
    params::CkksParameters,
    ring::{AutoMap, RnsPoly},
    rlwe::{sample_gaussian_coeffs, Ciphertext, ClientKey},
    utils::DefaultSecureRng,
};

/// Gadget switching key from some secret `s'` to the ring secret `s`: one
/// `(b_t, a_t)` pair per decomposition group, living in the extended `QP`
/// basis with `b_t = -a_t s + e_t + P u_t s'`.
#[derive(Debug, Clone)]
pub struct SwitchingKey {
    pub(crate) b: Vec<(RnsPoly, RnsPoly)>,
    pub(crate) a: Vec<(RnsPoly, RnsPoly)>,
}

/// Public evaluation material: relinearization, conjugation and per-index
/// rotation keys. Read-only after generation; missing entries surface as
/// [`Error::MissingKey`] when first requested.
#[derive(Debug, Default)]
pub struct EvaluationKeys {
    pub(crate) relin: Option<SwitchingKey>,
    pub(crate) conj: Option<SwitchingKey>,
    pub(crate) rot: BTreeMap<usize, SwitchingKey>,
}

impl EvaluationKeys {
    pub(crate) fn relin_key(&self) -> Result<&SwitchingKey> {
        self.relin
            .as_ref()
            .ok_or_else(|| Error::MissingKey("relinearization".to_string()))
    }

    pub(crate) fn conjugation_key(&self) -> Result<&SwitchingKey> {
        self.conj
            .as_ref()
            .ok_or_else(|| Error::MissingKey("conjugate".to_string()))
    }

    pub(crate) fn rotation_key(&self, k: usize) -> Result<&SwitchingKey> {
        self.rot
            .get(&k)
            .ok_or_else(|| Error::MissingKey(format!("rotation {k}")))
    }

    pub fn rotation_indices(&self) -> Vec<usize> {
        self.rot.keys().cloned().collect()
    }
}

fn sample_uniform_qp(params: &CkksParameters, rng: &mut DefaultSecureRng) -> (RnsPoly, RnsPoly) {
    let rns = params.rns();
    let mut q = rns.zero_q(params.max_level(), true);
    for (row, &qi) in q.rows.iter_mut().zip(rns.moduli_q()) {
        for v in row.iter_mut() {
            *v = rng.gen_range(0..qi);
        }
    }
    let mut p = rns.zero_p(true);
    for (row, &pj) in p.rows.iter_mut().zip(rns.moduli_p()) {
        for v in row.iter_mut() {
            *v = rng.gen_range(0..pj);
        }
    }
    (q, p)
}

/// Generates the switching key from `target` to the client secret. The
/// gadget term `P u_t s'` vanishes over the auxiliary basis, so only the
/// `Q`-basis image of the source secret is needed.
fn gen_switching_key(
    ck: &ClientKey,
    target_q: &RnsPoly,
    rng: &mut DefaultSecureRng,
) -> SwitchingKey {
    let params = &**ck.params();
    let rns = params.rns();
    let top = params.max_level();
    let beta = rns.beta(top);

    let mut b = Vec::with_capacity(beta);
    let mut a = Vec::with_capacity(beta);
    for t in 0..beta {
        let (a_q, a_p) = sample_uniform_qp(params, rng);

        let e = sample_gaussian_coeffs(params.degree(), params.sigma(), rng);
        let mut b_q = rns.from_f64_coeffs(&e, top);
        rns.ntt_q(&mut b_q);
        let mut b_p = rns.from_f64_coeffs_p(&e);
        rns.ntt_p(&mut b_p);

        // b = e - a * s
        let mut as_q = a_q.clone();
        rns.mul_assign_q(&mut as_q, &ck.sk.s_q);
        rns.sub_assign_q(&mut b_q, &as_q);
        let mut as_p = a_p.clone();
        rns.mul_assign_p(&mut as_p, &ck.sk.s_p);
        rns.sub_assign_p(&mut b_p, &as_p);

        // b += P u_t s' (zero over the P basis)
        let mut gadget = target_q.clone();
        let factors = rns.pu_mod_qi(t);
        for (i, row) in gadget.rows.iter_mut().enumerate() {
            rns.modop_q(i).elwise_scalar_mul_mut(row, &factors[i]);
        }
        rns.add_assign_q(&mut b_q, &gadget);

        b.push((b_q, b_p));
        a.push((a_q, a_p));
    }
    SwitchingKey { b, a }
}

impl ClientKey {
    /// Relinearization key: switches the `s^2` component of a tensored
    /// ciphertext back under `s`.
    pub fn gen_relinearization_key(&self, rng: &mut DefaultSecureRng) -> SwitchingKey {
        let rns = self.params().rns();
        let mut s2_q = self.sk.s_q.clone();
        rns.mul_assign_q(&mut s2_q, &self.sk.s_q);
        gen_switching_key(self, &s2_q, rng)
    }

    fn gen_galois_key(&self, gal_el: usize, rng: &mut DefaultSecureRng) -> SwitchingKey {
        let params = &**self.params();
        let rns = params.rns();
        let map = AutoMap::new(params.degree(), gal_el);

        let mut s_q = self.sk.s_q.clone();
        rns.intt_q(&mut s_q);
        let mut rot_q = rns.zero_q(params.max_level(), false);
        rns.apply_auto_q(&s_q, &map, &mut rot_q);
        rns.ntt_q(&mut rot_q);

        gen_switching_key(self, &rot_q, rng)
    }

    /// Rotation key for a left-rotation by `k` slots.
    pub fn gen_rotation_key(&self, k: usize, rng: &mut DefaultSecureRng) -> SwitchingKey {
        self.gen_galois_key(self.params().galois_element_rotation(k as i64), rng)
    }

    pub fn gen_conjugation_key(&self, rng: &mut DefaultSecureRng) -> SwitchingKey {
        self.gen_galois_key(self.params().galois_element_conjugation(), rng)
    }

    /// Generates the full evaluation key set for the given rotation indices.
    pub fn gen_evaluation_keys(
        &self,
        rotations: &[usize],
        rng: &mut DefaultSecureRng,
    ) -> EvaluationKeys {
        let mut rot = BTreeMap::new();
        for &k in rotations {
            if k == 0 {
                continue;
            }
            rot.entry(k)
                .or_insert_with(|| self.gen_rotation_key(k, rng));
        }
        EvaluationKeys {
            relin: Some(self.gen_relinearization_key(rng)),
            conj: Some(self.gen_conjugation_key(rng)),
            rot,
        }
    }
}

/// Accumulated gadget inner product, still in the extended `QP` basis (one
/// `mod_down` away from a ciphertext component pair).
#[derive(Debug)]
pub(crate) struct KeySwitchOut {
    pub(crate) c0_q: RnsPoly,
    pub(crate) c0_p: RnsPoly,
    pub(crate) c1_q: RnsPoly,
    pub(crate) c1_p: RnsPoly,
}

/// Inner product of decomposed components against a switching key; all
/// operands in the NTT domain, the accumulators at `level`.
pub(crate) fn keyswitch_raw(
    params: &CkksParameters,
    decomp: &[(RnsPoly, RnsPoly)],
    key: &SwitchingKey,
    level: usize,
) -> KeySwitchOut {
    let rns = params.rns();
    let mut c0_q = rns.zero_q(level, true);
    let mut c0_p = rns.zero_p(true);
    let mut c1_q = rns.zero_q(level, true);
    let mut c1_p = rns.zero_p(true);

    for (t, (d_q, d_p)) in decomp.iter().enumerate() {
        rns.fma_assign_q(&mut c0_q, d_q, &key.b[t].0);
        rns.fma_assign_p(&mut c0_p, d_p, &key.b[t].1);
        rns.fma_assign_q(&mut c1_q, d_q, &key.a[t].0);
        rns.fma_assign_p(&mut c1_p, d_p, &key.a[t].1);
    }
    KeySwitchOut {
        c0_q,
        c0_p,
        c1_q,
        c1_p,
    }
}

/// Hoisted state of a ciphertext: `c0` and the gadget decomposition of `c1`
/// in the coefficient domain, shared by every rotation applied to it.
#[derive(Debug)]
pub(crate) struct HoistedCt {
    pub(crate) c0_coeff: RnsPoly,
    pub(crate) comps: Vec<(RnsPoly, RnsPoly)>,
    pub(crate) scale: f64,
}

pub(crate) fn hoist(params: &CkksParameters, ct: &Ciphertext) -> HoistedCt {
    let rns = params.rns();
    let mut c0_coeff = ct.c0.clone();
    rns.intt_q(&mut c0_coeff);
    HoistedCt {
        c0_coeff,
        comps: rns.decompose_coeff(&ct.c1),
        scale: ct.scale,
    }
}

/// Rotated `c0` (plain `Q` basis) plus the key-switch product of the rotated
/// decomposition, left in `QP` (double-hoisting form).
pub(crate) struct HoistedRot {
    pub(crate) c0_rot: RnsPoly,
    pub(crate) ks: KeySwitchOut,
}

pub(crate) fn rotate_hoisted_no_moddown(
    params: &CkksParameters,
    hoisted: &HoistedCt,
    gal_el: usize,
    key: &SwitchingKey,
) -> HoistedRot {
    let rns = params.rns();
    let level = hoisted.c0_coeff.level();
    let map = AutoMap::new(params.degree(), gal_el);

    let mut c0_rot = rns.zero_q(level, false);
    rns.apply_auto_q(&hoisted.c0_coeff, &map, &mut c0_rot);
    rns.ntt_q(&mut c0_rot);

    let rotated: Vec<(RnsPoly, RnsPoly)> = hoisted
        .comps
        .iter()
        .map(|(d_q, d_p)| {
            let mut r_q = rns.zero_q(d_q.level(), false);
            rns.apply_auto_q(d_q, &map, &mut r_q);
            rns.ntt_q(&mut r_q);
            let mut r_p = rns.zero_p(false);
            rns.apply_auto_p(d_p, &map, &mut r_p);
            rns.ntt_p(&mut r_p);
            (r_q, r_p)
        })
        .collect();

    let ks = keyswitch_raw(params, &rotated, key, level);
    HoistedRot { c0_rot, ks }
}

/// Completes a hoisted rotation into a ciphertext.
pub(crate) fn finish_hoisted_rot(
    params: &CkksParameters,
    rot: HoistedRot,
    scale: f64,
) -> Ciphertext {
    let rns = params.rns();
    let HoistedRot { c0_rot, mut ks } = rot;
    rns.mod_down_ntt(&mut ks.c0_q, &ks.c0_p);
    rns.mod_down_ntt(&mut ks.c1_q, &ks.c1_p);
    rns.add_assign_q(&mut ks.c0_q, &c0_rot);
    Ciphertext {
        c0: ks.c0_q,
        c1: ks.c1_q,
        scale,
    }
}

/// Applies the Galois automorphism `X -> X^{gal_el}` homomorphically.
pub(crate) fn apply_galois(
    params: &CkksParameters,
    ct: &Ciphertext,
    gal_el: usize,
    key: &SwitchingKey,
) -> Ciphertext {
    let hoisted = hoist(params, ct);
    let rot = rotate_hoisted_no_moddown(params, &hoisted, gal_el, key);
    finish_hoisted_rot(params, rot, ct.scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rlwe::tests::{random_values, test_params};
    use crate::utils::tests::Stats;

    #[test]
    fn rotation_key_switching_preserves_message() {
        let params = test_params();
        let mut rng = DefaultSecureRng::new_seeded(20);
        let ck = ClientKey::new_with_rng(&params, &mut rng);

        let s = params.slots();
        let v = random_values(21, s);
        let ct = ck.encrypt(&v, &mut rng).unwrap();

        for k in [1usize, 5, 16] {
            let key = ck.gen_rotation_key(k, &mut rng);
            let rot = apply_galois(
                &params,
                &ct,
                params.galois_element_rotation(k as i64),
                &key,
            );
            let w = ck.decrypt_to_values(&rot, params.log_slots());
            let want: Vec<_> = (0..s).map(|j| v[(j + k) % s]).collect();
            let mut stats = Stats::default();
            stats.add_more(&w, &want);
            assert!(stats.min_precision() > 20.0, "rot {k}: {}", stats.min_precision());
        }
    }

    #[test]
    fn conjugation_key_switching() {
        let params = test_params();
        let mut rng = DefaultSecureRng::new_seeded(22);
        let ck = ClientKey::new_with_rng(&params, &mut rng);

        let v = random_values(23, params.slots());
        let ct = ck.encrypt(&v, &mut rng).unwrap();
        let key = ck.gen_conjugation_key(&mut rng);
        let conj = apply_galois(&params, &ct, params.galois_element_conjugation(), &key);
        let w = ck.decrypt_to_values(&conj, params.log_slots());
        let want: Vec<_> = v.iter().map(|z| z.conj()).collect();
        let mut stats = Stats::default();
        stats.add_more(&w, &want);
        assert!(stats.min_precision() > 20.0);
    }

    #[test]
    fn hoisted_matches_direct_rotation() {
        let params = test_params();
        let mut rng = DefaultSecureRng::new_seeded(24);
        let ck = ClientKey::new_with_rng(&params, &mut rng);

        let v = random_values(25, params.slots());
        let ct = ck.encrypt(&v, &mut rng).unwrap();
        let k = 3usize;
        let key = ck.gen_rotation_key(k, &mut rng);
        let gal = params.galois_element_rotation(k as i64);

        let direct = apply_galois(&params, &ct, gal, &key);
        let hoisted = hoist(&params, &ct);
        let via_hoist = finish_hoisted_rot(
            &params,
            rotate_hoisted_no_moddown(&params, &hoisted, gal, &key),
            ct.scale(),
        );
        // same algorithm, same inputs: identical ciphertexts
        assert_eq!(direct.c0, via_hoist.c0);
        assert_eq!(direct.c1, via_hoist.c1);

        let w = ck.decrypt_to_values(&via_hoist, params.log_slots());
        let want: Vec<_> = (0..params.slots())
            .map(|j| v[(j + k) % params.slots()])
            .collect();
        let mut stats = Stats::default();
        stats.add_more(&w, &want);
        assert!(stats.min_precision() > 20.0);
    }

    #[test]
    fn missing_keys_are_reported() {
        let keys = EvaluationKeys::default();
        assert_eq!(
            keys.conjugation_key().unwrap_err(),
            Error::MissingKey("conjugate".to_string())
        );
        assert_eq!(
            keys.rotation_key(7).unwrap_err(),
            Error::MissingKey("rotation 7".to_string())
        );
        assert_eq!(
            keys.relin_key().unwrap_err(),
            Error::MissingKey("relinearization".to_string())
        );
    }
}
