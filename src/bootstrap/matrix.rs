use num_complex::Complex64;
use std::collections::BTreeMap;

use crate::{
    backend::VectorOps,
    bootstrap::dft::RawDiagMap,
    encoding::Encoder,
    error::{Error, Result},
    evaluator::Evaluator,
    params::CkksParameters,
    ring::RnsPoly,
    rlwe::{
        keyswitch::{HoistedRot, KeySwitchOut},
        Ciphertext,
    },
};

/// Fixed multiplicand of the linear transform: one encoded diagonal in both
/// bases, NTT domain, with Shoup precomputation.
#[derive(Debug, Clone)]
pub(crate) struct PtDiagPoly {
    pub(crate) q: RnsPoly,
    pub(crate) q_shoup: RnsPoly,
    pub(crate) p: RnsPoly,
    pub(crate) p_shoup: RnsPoly,
}

/// Encoded factor of a linear map in the diagonal basis, with its
/// baby-step/giant-step split.
#[derive(Debug, Clone)]
pub(crate) struct PtDiagMatrix {
    pub(crate) log_dslots: usize,
    pub(crate) level: usize,
    pub(crate) scale: f64,
    pub(crate) n1: usize,
    pub(crate) vec: BTreeMap<usize, PtDiagPoly>,
}

impl PtDiagMatrix {
    /// Rotation indices the evaluation requires: non-zero baby-step residues
    /// and non-zero giant steps.
    pub(crate) fn rotation_indices(&self) -> Vec<usize> {
        let mut out = Vec::new();
        for &k in self.vec.keys() {
            let baby = k % self.n1;
            let giant = k - baby;
            if baby != 0 {
                out.push(baby);
            }
            if giant != 0 {
                out.push(giant);
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// Smallest power-of-two inner loop size such that the cheap (hoisted)
/// baby-step rotations outnumber the expensive giant-step ones by at least
/// `max_ratio`. Falls back to 1 when no split qualifies.
pub(crate) fn find_best_n1(map: &RawDiagMap, dslots: usize, max_ratio: f64) -> usize {
    let mut n1 = 1usize;
    while n1 < dslots {
        let mut babies = std::collections::BTreeSet::new();
        let mut giants = std::collections::BTreeSet::new();
        for &k in map.keys() {
            babies.insert(k % n1);
            giants.insert(k / n1);
        }
        let hoisted = babies.len().saturating_sub(1);
        let normal = giants.len().saturating_sub(1);
        if normal == 0 || (hoisted as f64) >= max_ratio * (normal as f64) {
            return n1;
        }
        n1 <<= 1;
    }
    1
}

/// Encodes a raw diagonal map at `(level, scale)`: chooses N1, pre-rotates
/// every diagonal to compensate its giant step, and encodes into NTT +
/// Shoup form over both bases.
pub(crate) fn encode_diag_matrix(
    params: &CkksParameters,
    raw: &RawDiagMap,
    log_dslots: usize,
    level: usize,
    scale: f64,
    max_ratio: f64,
) -> Result<PtDiagMatrix> {
    let dslots = 1usize << log_dslots;
    let rns = params.rns();
    let encoder = Encoder::new(params);
    let n1 = find_best_n1(raw, dslots, max_ratio);

    let mut vec = BTreeMap::new();
    for (&k, diag) in raw.iter() {
        if k >= dslots {
            return Err(Error::Setup(format!(
                "rotation {k} outside the 2^{log_dslots}-slot group"
            )));
        }
        let giant = k - (k % n1);
        // compensate the outer rotation of the accumulated inner sum
        let rotated: Vec<Complex64> = (0..dslots)
            .map(|u| diag[(u + dslots - giant % dslots) % dslots])
            .collect();

        let coeffs = encoder.encode_raw(&rotated, log_dslots, scale)?;
        let mut q = rns.from_f64_coeffs(&coeffs, level);
        rns.ntt_q(&mut q);
        let q_shoup = rns.shoup_repr_q(&q);
        let mut p = rns.from_f64_coeffs_p(&coeffs);
        rns.ntt_p(&mut p);
        let p_shoup = rns.shoup_repr_p(&p);

        vec.insert(
            k,
            PtDiagPoly {
                q,
                q_shoup,
                p,
                p_shoup,
            },
        );
    }

    Ok(PtDiagMatrix {
        log_dslots,
        level,
        scale,
        n1,
        vec,
    })
}

/// Applies an encoded diagonal matrix with double hoisting: one gadget
/// decomposition of the input is shared by all baby-step rotations, whose
/// key-switch products stay in the extended basis while the plaintext
/// multiplications accumulate; each giant step pays a single `mod_down`
/// followed by one ordinary keyed rotation. The result is rescaled once, so
/// its scale returns to the input's (one modulus drop).
pub(crate) fn multiply_by_diag_matrix(
    eval: &Evaluator,
    ct: &Ciphertext,
    mat: &PtDiagMatrix,
) -> Result<Ciphertext> {
    let params = eval.params();
    let rns = params.rns();
    let level = mat.level;
    if ct.level() < level {
        return Err(Error::LevelUnderflow {
            have: ct.level(),
            need: level,
        });
    }
    let mut ct_in = ct.clone();
    ct_in.c0.truncate_level(level);
    ct_in.c1.truncate_level(level);

    let hoisted = eval.hoist(&ct_in);

    // pre-rotate the input once per baby-step residue
    let mut babies: Vec<usize> = mat.vec.keys().map(|&k| k % mat.n1).collect();
    babies.sort_unstable();
    babies.dedup();

    let mut rotated: BTreeMap<usize, HoistedRot> = BTreeMap::new();
    for &i in &babies {
        let rot = if i == 0 {
            // identity: c1 enters the extended-basis accumulators scaled by P
            let mut c1_p_scaled = ct_in.c1.clone();
            for (r, row) in c1_p_scaled.rows.iter_mut().enumerate() {
                rns.modop_q(r).elwise_scalar_mul_mut(row, &rns.p_mod_qi()[r]);
            }
            HoistedRot {
                c0_rot: ct_in.c0.clone(),
                ks: KeySwitchOut {
                    c0_q: rns.zero_q(level, true),
                    c0_p: rns.zero_p(true),
                    c1_q: c1_p_scaled,
                    c1_p: rns.zero_p(true),
                },
            }
        } else {
            eval.rotate_hoisted_no_moddown(&hoisted, i)?
        };
        rotated.insert(i, rot);
    }

    let mut giants: Vec<usize> = mat.vec.keys().map(|&k| k - (k % mat.n1)).collect();
    giants.sort_unstable();
    giants.dedup();

    let out_scale = ct_in.scale * mat.scale;
    let mut out: Option<Ciphertext> = None;
    for &g in &giants {
        let mut acc0_plain = rns.zero_q(level, true);
        let mut acc0_q = rns.zero_q(level, true);
        let mut acc0_p = rns.zero_p(true);
        let mut acc1_q = rns.zero_q(level, true);
        let mut acc1_p = rns.zero_p(true);

        for (&k, pt) in mat.vec.range(g..g + mat.n1) {
            let rot = &rotated[&(k % mat.n1)];
            rns.shoup_fma_assign_q(&mut acc0_plain, &rot.c0_rot, &pt.q, &pt.q_shoup);
            rns.shoup_fma_assign_q(&mut acc0_q, &rot.ks.c0_q, &pt.q, &pt.q_shoup);
            rns.shoup_fma_assign_p(&mut acc0_p, &rot.ks.c0_p, &pt.p, &pt.p_shoup);
            rns.shoup_fma_assign_q(&mut acc1_q, &rot.ks.c1_q, &pt.q, &pt.q_shoup);
            rns.shoup_fma_assign_p(&mut acc1_p, &rot.ks.c1_p, &pt.p, &pt.p_shoup);
        }

        rns.mod_down_ntt(&mut acc0_q, &acc0_p);
        rns.mod_down_ntt(&mut acc1_q, &acc1_p);
        rns.add_assign_q(&mut acc0_q, &acc0_plain);
        let inner = Ciphertext {
            c0: acc0_q,
            c1: acc1_q,
            scale: out_scale,
        };

        let contribution = if g == 0 { inner } else { eval.rotate(&inner, g)? };
        out = Some(match out {
            None => contribution,
            Some(acc) => eval.add(&acc, &contribution)?,
        });
    }

    let mut out = out.ok_or_else(|| Error::Setup("empty diagonal matrix".to_string()))?;
    eval.rescale(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::dft::apply_map;
    use crate::rlwe::tests::random_values;
    use crate::rlwe::ClientKey;
    use crate::utils::tests::Stats;
    use crate::utils::DefaultSecureRng;
    use std::sync::Arc;

    fn diag_test_map(dslots: usize, keys: &[usize], seed: u64) -> RawDiagMap {
        use rand::{Rng, SeedableRng};
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
        let mut map = RawDiagMap::new();
        for &k in keys {
            map.insert(
                k,
                (0..dslots)
                    .map(|_| Complex64::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
                    .collect(),
            );
        }
        map
    }

    #[test]
    fn n1_split_invariant() {
        let map = diag_test_map(64, &[0, 1, 2, 3, 15, 16, 31, 32, 48, 63], 50);
        for ratio in [1.0, 4.0, 16.0] {
            let n1 = find_best_n1(&map, 64, ratio);
            assert!(n1.is_power_of_two());
            for &k in map.keys() {
                assert_eq!(n1 * (k / n1) + (k % n1), k);
            }
        }
    }

    #[test]
    fn encoded_matrix_matches_plaintext_application() {
        let params = Arc::new(
            crate::CkksParameters::builder()
                .log_n(8)
                .log_slots(5)
                .log_scale(40)
                .hamming_weight(32)
                .moduli_q_sizes(&[50, 40, 40])
                .moduli_p_sizes(&[55, 55])
                .build()
                .unwrap(),
        );
        let mut rng = DefaultSecureRng::new_seeded(51);
        let ck = ClientKey::new_with_rng(&params, &mut rng);

        let log_dslots = params.log_slots();
        let dslots = 1usize << log_dslots;
        let raw = diag_test_map(dslots, &[0, 1, 2, 8, 9, 16], 52);

        let level = params.max_level();
        let mat_scale = params.rns().moduli_q()[level] as f64;
        let mat = encode_diag_matrix(&params, &raw, log_dslots, level, mat_scale, 2.0).unwrap();

        let mut rotations = mat.rotation_indices();
        rotations.push(0);
        let keys = Arc::new(ck.gen_evaluation_keys(&rotations, &mut rng));
        let eval = Evaluator::new(&params, &keys);

        let v = random_values(53, dslots);
        let ct = ck.encrypt(&v, &mut rng).unwrap();
        let out = multiply_by_diag_matrix(&eval, &ct, &mat).unwrap();

        assert_eq!(out.level(), level - 1);
        let have = ck.decrypt_to_values(&out, log_dslots);
        let want = apply_map(&raw, &v);
        let mut stats = Stats::default();
        stats.add_more(&have, &want);
        assert!(stats.min_precision() > 12.0, "{}", stats.min_precision());
    }
}
