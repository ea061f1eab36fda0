use num_complex::Complex64;
use std::sync::Arc;

use crate::{
    error::{Error, Result},
    params::CkksParameters,
    ring::RnsPoly,
    rlwe::{
        check_scales_match,
        keyswitch::{
            apply_galois, hoist, keyswitch_raw, rotate_hoisted_no_moddown, EvaluationKeys,
            HoistedCt, HoistedRot,
        },
        Ciphertext,
    },
};

/// Leveled CKKS evaluator. Holds the read-only evaluation keys; all scale
/// bookkeeping is explicit and deterministic.
pub struct Evaluator {
    params: Arc<CkksParameters>,
    keys: Arc<EvaluationKeys>,
    /// NTT image of X^{N/2}; multiplying by it rotates every slot by i
    /// exactly, without touching scale or level.
    xpow_half: RnsPoly,
}

impl Evaluator {
    pub fn new(params: &Arc<CkksParameters>, keys: &Arc<EvaluationKeys>) -> Self {
        let rns = params.rns();
        let mut coeffs = vec![0.0f64; params.degree()];
        coeffs[params.degree() / 2] = 1.0;
        let mut xpow_half = rns.from_f64_coeffs(&coeffs, params.max_level());
        rns.ntt_q(&mut xpow_half);
        Evaluator {
            params: params.clone(),
            keys: keys.clone(),
            xpow_half,
        }
    }

    pub fn params(&self) -> &Arc<CkksParameters> {
        &self.params
    }

    pub fn keys(&self) -> &Arc<EvaluationKeys> {
        &self.keys
    }

    fn aligned(&self, a: &Ciphertext, b: &Ciphertext) -> Ciphertext {
        let level = a.level().min(b.level());
        let mut out = a.clone();
        out.c0.truncate_level(level);
        out.c1.truncate_level(level);
        out
    }

    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        check_scales_match(a, b)?;
        let rns = self.params.rns();
        let mut out = self.aligned(a, b);
        rns.add_assign_q(&mut out.c0, &b.c0);
        rns.add_assign_q(&mut out.c1, &b.c1);
        Ok(out)
    }

    pub fn sub(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        check_scales_match(a, b)?;
        let rns = self.params.rns();
        let mut out = self.aligned(a, b);
        rns.sub_assign_q(&mut out.c0, &b.c0);
        rns.sub_assign_q(&mut out.c1, &b.c1);
        Ok(out)
    }

    pub fn neg(&self, a: &Ciphertext) -> Ciphertext {
        let rns = self.params.rns();
        let mut out = a.clone();
        rns.neg_assign_q(&mut out.c0);
        rns.neg_assign_q(&mut out.c1);
        out
    }

    /// Adds the constant `c` to every slot, encoded at the ciphertext scale.
    pub fn add_const(&self, ct: &mut Ciphertext, c: Complex64) {
        let rns = self.params.rns();
        let n = self.params.degree();
        let mut coeffs = vec![0.0f64; n];
        coeffs[0] = (c.re * ct.scale).round();
        coeffs[n / 2] = (c.im * ct.scale).round();
        let mut poly = rns.from_f64_coeffs(&coeffs, ct.level());
        rns.ntt_q(&mut poly);
        rns.add_assign_q(&mut ct.c0, &poly);
    }

    /// Multiplies every slot by `c` encoded at `const_scale`; the ciphertext
    /// scale becomes `scale * const_scale`. No rescale is performed.
    pub fn mul_const(&self, ct: &mut Ciphertext, c: Complex64, const_scale: f64) {
        let rns = self.params.rns();
        if c.im == 0.0 {
            let factor = (c.re * const_scale).round() as i128;
            rns.mul_scalar_i128_assign_q(&mut ct.c0, factor);
            rns.mul_scalar_i128_assign_q(&mut ct.c1, factor);
        } else {
            let n = self.params.degree();
            let mut coeffs = vec![0.0f64; n];
            coeffs[0] = (c.re * const_scale).round();
            coeffs[n / 2] = (c.im * const_scale).round();
            let mut poly = rns.from_f64_coeffs(&coeffs, ct.level());
            rns.ntt_q(&mut poly);
            rns.mul_assign_q(&mut ct.c0, &poly);
            rns.mul_assign_q(&mut ct.c1, &poly);
        }
        ct.scale *= const_scale;
    }

    /// Exact multiplication by the imaginary unit (monomial X^{N/2}).
    pub fn mul_by_i(&self, ct: &mut Ciphertext) {
        let rns = self.params.rns();
        rns.mul_assign_q(&mut ct.c0, &self.xpow_half);
        rns.mul_assign_q(&mut ct.c1, &self.xpow_half);
    }

    /// Exact division by the imaginary unit (monomial -X^{N/2}).
    pub fn div_by_i(&self, ct: &mut Ciphertext) {
        let rns = self.params.rns();
        self.mul_by_i(ct);
        rns.neg_assign_q(&mut ct.c0);
        rns.neg_assign_q(&mut ct.c1);
    }

    /// Relinearized product; the output scale is the product of the operand
    /// scales and no rescale is performed.
    pub fn mul_relin(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        let rns = self.params.rns();
        let level = a.level().min(b.level());
        let relin = self.keys.relin_key()?;

        let clamp = |p: &RnsPoly| {
            let mut c = p.clone();
            c.truncate_level(level);
            c
        };
        let (a0, a1) = (clamp(&a.c0), clamp(&a.c1));
        let (b0, b1) = (clamp(&b.c0), clamp(&b.c1));

        // d0 = a0 b0, d1 = a0 b1 + a1 b0, d2 = a1 b1
        let mut d0 = a0.clone();
        rns.mul_assign_q(&mut d0, &b0);
        let mut d1 = a0.clone();
        rns.mul_assign_q(&mut d1, &b1);
        rns.fma_assign_q(&mut d1, &a1, &b0);
        let mut d2 = a1.clone();
        rns.mul_assign_q(&mut d2, &b1);

        let decomp = rns.decompose_ntt(&d2);
        let mut ks = keyswitch_raw(&self.params, &decomp, relin, level);
        rns.mod_down_ntt(&mut ks.c0_q, &ks.c0_p);
        rns.mod_down_ntt(&mut ks.c1_q, &ks.c1_p);
        rns.add_assign_q(&mut d0, &ks.c0_q);
        rns.add_assign_q(&mut d1, &ks.c1_q);

        Ok(Ciphertext {
            c0: d0,
            c1: d1,
            scale: a.scale * b.scale,
        })
    }

    pub fn square_relin(&self, a: &Ciphertext) -> Result<Ciphertext> {
        self.mul_relin(a, a)
    }

    /// Divides by the last prime of the level, dropping it.
    pub fn rescale(&self, ct: &mut Ciphertext) -> Result<()> {
        let level = ct.level();
        if level == 0 {
            return Err(Error::LevelUnderflow { have: 0, need: 1 });
        }
        let rns = self.params.rns();
        let ql = rns.moduli_q()[level];
        ct.c0 = rns.div_round_by_last_modulus_ntt(&ct.c0);
        ct.c1 = rns.div_round_by_last_modulus_ntt(&ct.c1);
        ct.scale /= ql as f64;
        Ok(())
    }

    pub fn drop_level(&self, ct: &mut Ciphertext, levels: usize) -> Result<()> {
        if ct.level() < levels {
            return Err(Error::LevelUnderflow {
                have: ct.level(),
                need: levels,
            });
        }
        let target = ct.level() - levels;
        ct.c0.truncate_level(target);
        ct.c1.truncate_level(target);
        Ok(())
    }

    /// Multiplies by the integer closest to `target_scale / scale`, bringing
    /// the ciphertext scale near the target without consuming a level.
    pub fn scale_up(&self, ct: &mut Ciphertext, target_scale: f64) -> Result<()> {
        let factor = (target_scale / ct.scale).round();
        if factor < 1.0 {
            return Err(Error::ScaleMismatch(format!(
                "cannot raise scale {:.3e} to {:.3e}",
                ct.scale, target_scale
            )));
        }
        let rns = self.params.rns();
        rns.mul_scalar_i128_assign_q(&mut ct.c0, factor as i128);
        rns.mul_scalar_i128_assign_q(&mut ct.c1, factor as i128);
        ct.scale *= factor;
        Ok(())
    }

    /// Left-rotation of the slots by `k`.
    pub fn rotate(&self, ct: &Ciphertext, k: usize) -> Result<Ciphertext> {
        if k == 0 {
            return Ok(ct.clone());
        }
        let key = self.keys.rotation_key(k)?;
        let gal = self.params.galois_element_rotation(k as i64);
        Ok(apply_galois(&self.params, ct, gal, key))
    }

    pub fn conjugate(&self, ct: &Ciphertext) -> Result<Ciphertext> {
        let key = self.keys.conjugation_key()?;
        let gal = self.params.galois_element_conjugation();
        Ok(apply_galois(&self.params, ct, gal, key))
    }

    /// Shares one gadget decomposition across many rotations of `ct`.
    pub(crate) fn hoist(&self, ct: &Ciphertext) -> HoistedCt {
        hoist(&self.params, ct)
    }

    /// Double-hoisting entry point: the key-switch product is returned in
    /// the extended basis so plaintext multiplications can accumulate there.
    pub(crate) fn rotate_hoisted_no_moddown(
        &self,
        hoisted: &HoistedCt,
        k: usize,
    ) -> Result<HoistedRot> {
        let key = self.keys.rotation_key(k)?;
        let gal = self.params.galois_element_rotation(k as i64);
        Ok(rotate_hoisted_no_moddown(&self.params, hoisted, gal, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rlwe::tests::{random_values, test_params};
    use crate::rlwe::ClientKey;
    use crate::utils::tests::Stats;
    use crate::utils::DefaultSecureRng;

    fn setup() -> (Arc<CkksParameters>, ClientKey, Evaluator, DefaultSecureRng) {
        let params = test_params();
        let mut rng = DefaultSecureRng::new_seeded(30);
        let ck = ClientKey::new_with_rng(&params, &mut rng);
        let keys = Arc::new(ck.gen_evaluation_keys(&[1, 2], &mut rng));
        let eval = Evaluator::new(&params, &keys);
        (params, ck, eval, rng)
    }

    #[test]
    fn add_sub_and_const() {
        let (params, ck, eval, mut rng) = setup();
        let s = params.slots();
        let va = random_values(31, s);
        let vb = random_values(32, s);
        let ca = ck.encrypt(&va, &mut rng).unwrap();
        let cb = ck.encrypt(&vb, &mut rng).unwrap();

        let mut sum = eval.add(&ca, &cb).unwrap();
        eval.add_const(&mut sum, Complex64::new(0.5, -0.25));
        let w = ck.decrypt_to_values(&sum, params.log_slots());
        let want: Vec<_> = va
            .iter()
            .zip(vb.iter())
            .map(|(a, b)| a + b + Complex64::new(0.5, -0.25))
            .collect();
        let mut stats = Stats::default();
        stats.add_more(&w, &want);
        assert!(stats.min_precision() > 20.0);
    }

    #[test]
    fn mul_relin_rescale() {
        let (params, ck, eval, mut rng) = setup();
        let s = params.slots();
        let va = random_values(33, s);
        let vb = random_values(34, s);
        let ca = ck.encrypt(&va, &mut rng).unwrap();
        let cb = ck.encrypt(&vb, &mut rng).unwrap();

        let mut prod = eval.mul_relin(&ca, &cb).unwrap();
        eval.rescale(&mut prod).unwrap();
        assert_eq!(prod.level(), params.max_level() - 1);
        // after rescale the scale is within one prime drift of the default
        let ratio = prod.scale() / params.scale();
        assert!(ratio > 0.5 && ratio < 2.0);

        let w = ck.decrypt_to_values(&prod, params.log_slots());
        let want: Vec<_> = va.iter().zip(vb.iter()).map(|(a, b)| a * b).collect();
        let mut stats = Stats::default();
        stats.add_more(&w, &want);
        assert!(stats.min_precision() > 15.0, "{}", stats.min_precision());
    }

    #[test]
    fn mul_by_i_is_exact() {
        let (params, ck, eval, mut rng) = setup();
        let v = random_values(35, params.slots());
        let mut ct = ck.encrypt(&v, &mut rng).unwrap();
        let scale_before = ct.scale();
        eval.mul_by_i(&mut ct);
        assert_eq!(ct.scale(), scale_before);
        let w = ck.decrypt_to_values(&ct, params.log_slots());
        let want: Vec<_> = v.iter().map(|z| z * Complex64::new(0.0, 1.0)).collect();
        let mut stats = Stats::default();
        stats.add_more(&w, &want);
        assert!(stats.min_precision() > 20.0);

        eval.div_by_i(&mut ct);
        let w = ck.decrypt_to_values(&ct, params.log_slots());
        let mut stats = Stats::default();
        stats.add_more(&w, &v);
        assert!(stats.min_precision() > 20.0);
    }

    #[test]
    fn scale_mismatch_is_rejected() {
        let (_params, ck, eval, mut rng) = setup();
        let v = random_values(36, eval.params().slots());
        let ca = ck.encrypt(&v, &mut rng).unwrap();
        let mut cb = ck.encrypt(&v, &mut rng).unwrap();
        eval.mul_const(&mut cb, Complex64::new(1.0, 0.0), 2.0);
        assert!(matches!(
            eval.add(&ca, &cb),
            Err(Error::ScaleMismatch(_))
        ));
    }

    #[test]
    fn level_underflow_on_rescale() {
        let (_params, ck, eval, mut rng) = setup();
        let v = random_values(37, eval.params().slots());
        let mut ct = ck.encrypt(&v, &mut rng).unwrap();
        let levels = ct.level();
        eval.drop_level(&mut ct, levels).unwrap();
        assert_eq!(ct.level(), 0);
        assert!(matches!(
            eval.rescale(&mut ct),
            Err(Error::LevelUnderflow { .. })
        ));
    }
}
