//! Bootstrapping: refreshes a level-0 ciphertext back to a high level by
//! raising the modulus, homomorphically encoding the coefficients into the
//! slots, reducing each slot mod q0 with a scaled-sine approximation, and
//! decoding back.

use num_complex::Complex64;
use std::sync::Arc;

pub(crate) mod dft;
pub(crate) mod keys;
pub(crate) mod matrix;
pub(crate) mod poly;
pub(crate) mod sine;

pub use keys::rotations_for_bootstrapping;

use crate::{
    error::{Error, Result},
    evaluator::Evaluator,
    params::{BootstrapParameters, CkksParameters, SineType},
    rlwe::{keyswitch::EvaluationKeys, Ciphertext},
};
use dft::{coeffs_to_slots_maps, slots_to_coeffs_maps};
use matrix::{encode_diag_matrix, multiply_by_diag_matrix, PtDiagMatrix};
use poly::evaluate_polynomial;
use sine::{generate_mod1_poly, Mod1Poly};

/// One bootstrapping instance: owns the encoded factorizations, the mod-1
/// polynomial and the intermediate state of a single in-flight bootstrap.
/// The key set is shared and read-only; concurrent bootstraps need distinct
/// instances.
pub struct Bootstrapper {
    params: Arc<CkksParameters>,
    boot: BootstrapParameters,
    eval: Evaluator,

    cts_matrices: Vec<PtDiagMatrix>,
    stc_matrices: Vec<PtDiagMatrix>,
    mod1: Mod1Poly,
    rotations: Vec<usize>,

    /// working scale of the sine evaluation, a power of two near the sine
    /// section primes
    sine_scale: f64,
    /// q0 / message_ratio: scale the input is raised to before ModUp
    prescale: f64,
    /// value factor folded into the SlotsToCoeffs matrices, returning the
    /// message to the default scale
    diff_stc: f64,
}

impl Bootstrapper {
    pub fn new(
        params: &Arc<CkksParameters>,
        boot: &BootstrapParameters,
        keys: &Arc<EvaluationKeys>,
    ) -> Result<Self> {
        boot.validate()?;
        let log_slots = params.log_slots();
        let log_n = params.log_n();
        if boot.cts_depth > log_slots || boot.stc_depth > log_slots {
            return Err(Error::Setup(format!(
                "factorization depths ({}, {}) exceed log_slots = {log_slots}",
                boot.cts_depth, boot.stc_depth
            )));
        }
        let top = params.max_level();
        if boot.depth() + 1 > top {
            return Err(Error::LevelUnderflow {
                have: top,
                need: boot.depth() + 1,
            });
        }

        let rotations = rotations_for_bootstrapping(params, boot)?;
        keys::check_keys(keys, &rotations)?;
        let eval = Evaluator::new(params, keys);

        let sparse = log_slots < log_n - 1;
        let log_dslots = if sparse { log_slots + 1 } else { log_slots };
        let moduli = params.rns().moduli_q().to_vec();

        // level layout, consumed from the top of the chain
        let cts_start = top;
        let sine_start = cts_start - boot.cts_depth;
        let stc_start = sine_start - boot.sine_depth();

        let q0 = params.q0() as f64;
        let prescale = q0 / boot.message_ratio();
        let sine_scale = 2.0f64.powf((moduli[sine_start] as f64).log2().round());

        // nominal runtime scales, used to fold the output factor at setup
        let m1 = (prescale / params.scale()).round().max(1.0);
        let msg_ratio_exact = q0 / (params.scale() * m1);
        let diff_stc = params.scale() * msg_ratio_exact / sine_scale;

        // CoeffsToSlots folds the conjugation split, the trace redundancy
        // and the Chebyshev interval into its diagonals
        let trace_gain = (1usize << (log_n - 1 - log_slots)) as f64;
        let diff_cts = 1.0 / (2.0 * boot.k as f64 * trace_gain);

        let mut cts_matrices = Vec::with_capacity(boot.cts_depth);
        for (i, raw) in coeffs_to_slots_maps(log_slots, log_n, boot.cts_depth, diff_cts)
            .iter()
            .enumerate()
        {
            let level = cts_start - i;
            cts_matrices.push(encode_diag_matrix(
                params,
                raw,
                log_dslots,
                level,
                moduli[level] as f64,
                boot.max_n1_n2_ratio,
            )?);
        }
        let mut stc_matrices = Vec::with_capacity(boot.stc_depth);
        for (i, raw) in slots_to_coeffs_maps(log_slots, log_n, boot.stc_depth, diff_stc)
            .iter()
            .enumerate()
        {
            let level = stc_start - i;
            stc_matrices.push(encode_diag_matrix(
                params,
                raw,
                log_dslots,
                level,
                moduli[level] as f64,
                boot.max_n1_n2_ratio,
            )?);
        }

        let mod1 = generate_mod1_poly(boot, params.q0())?;

        Ok(Bootstrapper {
            params: params.clone(),
            boot: boot.clone(),
            eval,
            cts_matrices,
            stc_matrices,
            mod1,
            rotations,
            sine_scale,
            prescale,
            diff_stc,
        })
    }

    /// Level of the ciphertexts returned by [`Self::bootstrap`].
    pub fn output_level(&self) -> usize {
        self.params.max_level() - self.boot.depth()
    }

    pub fn rotations(&self) -> &[usize] {
        &self.rotations
    }

    /// Refreshes `ct` to [`Self::output_level`]. Inputs above level 1 are
    /// transparently dropped to level 1 and treated as carrying the
    /// prescale `q0 / message_ratio`; level-0 inputs may arrive at any
    /// smaller scale and are multiplied up to it. The output scale is the
    /// default scale snapped to a power of two.
    pub fn bootstrap(&mut self, ct: &Ciphertext) -> Result<Ciphertext> {
        let eval = &self.eval;
        let rns = self.params.rns();
        let log_slots = self.params.log_slots();
        let log_n = self.params.log_n();
        let sparse = log_slots < log_n - 1;

        // 1. ScaleDown: a level-1 arrival has its scale assigned the
        // prescale outright before the last drop; only a level-0 input
        // multiplies by the nearest integer factor
        let mut ct = ct.clone();
        if ct.level() > 1 {
            let extra = ct.level() - 1;
            eval.drop_level(&mut ct, extra)?;
        }
        if ct.level() == 1 {
            ct.scale = self.prescale;
            eval.drop_level(&mut ct, 1)?;
        } else {
            if ct.scale() <= 0.0 || (self.prescale / ct.scale()).round() < 1.0 {
                return Err(Error::ScaleMismatch(format!(
                    "input scale {:.3e} above the prescale {:.3e}",
                    ct.scale(),
                    self.prescale
                )));
            }
            eval.scale_up(&mut ct, self.prescale)?;
        }
        // exact ratio between q0 and the achieved prescale; its integer part
        // must vanish under the sine
        let msg_ratio = self.params.q0() as f64 / ct.scale();

        // 2. ModUp: centered lift to the full chain
        let mut ct = Ciphertext {
            c0: rns.mod_up_q0_to_full(&ct.c0),
            c1: rns.mod_up_q0_to_full(&ct.c1),
            scale: ct.scale(),
        };

        // 3. ScaleUp: align the scale for the sine evaluation
        let sigma_target = self.sine_scale / msg_ratio;
        if (sigma_target / ct.scale()).round() >= 1.0 {
            eval.scale_up(&mut ct, sigma_target)?;
        }

        // 4. Trace: zero the coefficients outside the packed positions
        if sparse {
            for i in log_slots..log_n - 1 {
                let rot = eval.rotate(&ct, 1usize << i)?;
                ct = eval.add(&ct, &rot)?;
            }
        }

        // 5. CoeffsToSlots, then split real and imaginary parts
        for mat in &self.cts_matrices {
            ct = multiply_by_diag_matrix(eval, &ct, mat)?;
        }
        let conj = eval.conjugate(&ct)?;
        let mut ct0 = eval.add(&ct, &conj)?;
        let mut ct1 = eval.sub(&ct, &conj)?;
        eval.div_by_i(&mut ct1);

        let mut ct1 = if sparse {
            // repack: imaginary parts into the upper half of ct0
            let mut rot = eval.rotate(&ct1, 1usize << log_slots)?;
            eval.mul_by_i(&mut rot);
            ct0 = eval.add(&ct0, &rot)?;
            None
        } else {
            Some(ct1)
        };

        // 6. EvalMod on each part
        ct0 = self.eval_mod(&ct0, msg_ratio)?;
        if let Some(ct1_in) = ct1.take() {
            ct1 = Some(self.eval_mod(&ct1_in, msg_ratio)?);
        }

        // 7. SlotsToCoeffs
        let mut ct = match ct1 {
            Some(mut ct1) => {
                eval.mul_by_i(&mut ct1);
                eval.add(&ct0, &ct1)?
            }
            None => ct0,
        };
        for mat in &self.stc_matrices {
            ct = multiply_by_diag_matrix(eval, &ct, mat)?;
        }

        // the StC diagonals multiplied the message back onto the default
        // scale; snap the tracked scale to the nearest power of two
        ct.scale *= self.diff_stc;
        ct.scale = 2.0f64.powf(ct.scale.log2().round());

        debug_assert_eq!(ct.level(), self.output_level());
        Ok(ct)
    }

    /// Homomorphic `x mod 1`: Chebyshev sine/cosine evaluation, double-angle
    /// iterations and the optional arcsine correction. The input arrives
    /// with the slots holding `(I + frac) / K`; the declared-scale
    /// multiplication by the message ratio exposes `I` as an exact integer.
    fn eval_mod(&self, ct: &Ciphertext, msg_ratio: f64) -> Result<Ciphertext> {
        let eval = &self.eval;
        let mut ct = ct.clone();
        ct.scale *= msg_ratio;

        // change of variable onto the interpolation interval
        let (a, b) = (self.mod1.poly.a, self.mod1.poly.b);
        let shift = match self.mod1.sine_type {
            SineType::Sin => (-a - b) / (b - a),
            SineType::Cos1 | SineType::Cos2 => (-a - b - 0.5 / self.mod1.sc_fac) / (b - a),
        };
        eval.add_const(&mut ct, Complex64::new(shift, 0.0));

        let mut ct = evaluate_polynomial(eval, &ct, &self.mod1.poly, self.sine_scale)?;

        // double angle: squaring walks the half-angle cosine back up
        let mut sqrt2pi = self.mod1.sqrt2pi;
        for _ in 0..self.double_angle_iterations() {
            sqrt2pi *= sqrt2pi;
            let sq = eval.mul_relin(&ct, &ct)?;
            ct = eval.add(&sq, &sq)?;
            eval.add_const(&mut ct, Complex64::new(-sqrt2pi, 0.0));
            eval.rescale(&mut ct)?;
        }

        if let Some(arcsine) = &self.mod1.arcsine {
            ct = evaluate_polynomial(eval, &ct, arcsine, self.sine_scale)?;
        }

        // the slots now hold frac = v / msg_ratio
        ct.scale /= msg_ratio;
        Ok(ct)
    }

    fn double_angle_iterations(&self) -> usize {
        match self.mod1.sine_type {
            SineType::Sin => 0,
            SineType::Cos1 | SineType::Cos2 => self.boot.double_angle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::BootstrapParameterSet;
    use crate::rlwe::ClientKey;
    use crate::utils::tests::Stats;
    use crate::utils::DefaultSecureRng;
    use num_complex::Complex64;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn setup(
        set: &BootstrapParameterSet,
        seed: u64,
    ) -> (Arc<CkksParameters>, ClientKey, Bootstrapper, DefaultSecureRng) {
        let params = Arc::new(set.ckks_parameters().unwrap());
        let mut rng = DefaultSecureRng::new_seeded(seed);
        let ck = ClientKey::new_with_rng(&params, &mut rng);
        let rotations = rotations_for_bootstrapping(&params, &set.boot).unwrap();
        let keys = Arc::new(ck.gen_evaluation_keys(&rotations, &mut rng));
        let bootstrapper = Bootstrapper::new(&params, &set.boot, &keys).unwrap();
        (params, ck, bootstrapper, rng)
    }

    fn random_unit_values(seed: u64, s: usize) -> Vec<Complex64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..s)
            .map(|_| Complex64::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
            .collect()
    }

    #[test]
    fn bootstrap_round_trip_full_packing() {
        let set = BootstrapParameterSet::toy();
        let (params, ck, mut bootstrapper, mut rng) = setup(&set, 90);

        let v = random_unit_values(91, params.slots());
        let ct = ck
            .encrypt_at(&v, params.log_slots(), 0, params.scale(), &mut rng)
            .unwrap();
        let out = bootstrapper.bootstrap(&ct).unwrap();

        // level advance: everything above the consumed depth remains
        assert_eq!(out.level(), bootstrapper.output_level());
        assert_eq!(
            out.level(),
            params.max_level() - set.boot.depth()
        );

        // the output scale is exactly a power of two
        assert_eq!(out.scale(), 2.0f64.powf(out.scale().log2().round()));

        let w = ck.decrypt_to_values(&out, params.log_slots());
        let mut stats = Stats::default();
        stats.add_more(&w, &v);
        assert!(
            stats.min_precision() > 10.0,
            "bootstrap precision {:.2} bits",
            stats.min_precision()
        );
    }

    #[test]
    fn bootstrap_round_trip_sparse_packing() {
        let set = BootstrapParameterSet::toy_sparse();
        let (params, ck, mut bootstrapper, mut rng) = setup(&set, 92);

        let s = params.slots();
        // real ramp with a zero imaginary part
        let v: Vec<Complex64> = (0..s)
            .map(|j| Complex64::new(j as f64 / s as f64, 0.0))
            .collect();
        let ct = ck
            .encrypt_at(&v, params.log_slots(), 0, params.scale(), &mut rng)
            .unwrap();
        let out = bootstrapper.bootstrap(&ct).unwrap();
        assert_eq!(out.level(), bootstrapper.output_level());

        let w = ck.decrypt_to_values(&out, params.log_slots());
        let mut stats = Stats::default();
        stats.add_more(&w, &v);
        assert!(
            stats.min_precision() > 10.0,
            "sparse bootstrap precision {:.2} bits",
            stats.min_precision()
        );
        // the imaginary slots stay empty
        for z in &w {
            assert!(z.im.abs() < 2.0f64.powi(-10));
        }
    }

    #[test]
    fn bootstrap_accepts_inputs_above_level_one() {
        let set = BootstrapParameterSet::toy();
        let (params, ck, mut bootstrapper, mut rng) = setup(&set, 93);

        // a ciphertext arriving above level 0 carries the prescale; the
        // bootstrapper drops it to level 1 and snaps the scale exactly
        let prescale = params.q0() as f64 / set.boot.message_ratio();
        let v = random_unit_values(94, params.slots());
        let ct = ck
            .encrypt_at(&v, params.log_slots(), 3, prescale, &mut rng)
            .unwrap();
        let out = bootstrapper.bootstrap(&ct).unwrap();
        assert_eq!(out.level(), bootstrapper.output_level());

        let w = ck.decrypt_to_values(&out, params.log_slots());
        let mut stats = Stats::default();
        stats.add_more(&w, &v);
        assert!(stats.min_precision() > 10.0);
    }

    #[test]
    fn bootstrap_refuses_missing_keys() {
        let set = BootstrapParameterSet::toy();
        let params = Arc::new(set.ckks_parameters().unwrap());
        let mut rng = DefaultSecureRng::new_seeded(95);
        let ck = ClientKey::new_with_rng(&params, &mut rng);
        let rotations = rotations_for_bootstrapping(&params, &set.boot).unwrap();

        let mut keys = ck.gen_evaluation_keys(&rotations, &mut rng);
        keys.conj = None;
        let keys = Arc::new(keys);
        match Bootstrapper::new(&params, &set.boot, &keys) {
            Err(e) => assert_eq!(e, Error::MissingKey("conjugate".to_string())),
            Ok(_) => panic!("bootstrapper accepted an incomplete key set"),
        }
    }

    #[test]
    fn trace_zeroes_unpacked_coefficients() {
        let set = BootstrapParameterSet::toy_sparse();
        let (params, ck, bootstrapper, mut rng) = setup(&set, 96);
        let eval = &bootstrapper.eval;

        // a full-packing ciphertext has energy in every coefficient
        let full = random_unit_values(97, params.degree() / 2);
        let mut ct = ck
            .encrypt_at(
                &full,
                params.log_n() - 1,
                params.max_level(),
                params.scale(),
                &mut rng,
            )
            .unwrap();

        for i in params.log_slots()..params.log_n() - 1 {
            let rot = eval.rotate(&ct, 1usize << i).unwrap();
            ct = eval.add(&ct, &rot).unwrap();
        }

        let pt = ck.decrypt(&ct);
        let rns = params.rns();
        let mut poly = pt.poly.clone();
        rns.intt_q(&mut poly);
        let coeffs = rns.to_f64_centered(&poly);
        let gap = params.degree() / (2 * params.slots());
        // the trace multiplied kept coefficients by N/(2s); noise stays small
        let bound = params.scale() * 2.0f64.powi(-20);
        for (i, c) in coeffs.iter().enumerate() {
            if i % gap != 0 {
                assert!(c.abs() < bound, "coefficient {i} = {c} not cleared");
            }
        }
    }

    #[test]
    fn production_sets_build_their_factorizations() {
        // structural check of the default table without running N = 2^16:
        // depths, rotation budgets and N1 splits must be consistent
        for set in crate::params::default_bootstrap_params() {
            set.validate().unwrap();
            let log_slots = set.log_slots;
            let sparse = log_slots < set.log_n - 1;
            let dslots = if sparse { 2usize << log_slots } else { 1usize << log_slots };
            let maps = dft::coeffs_to_slots_maps(log_slots, set.log_n, set.boot.cts_depth, 1.0);
            assert_eq!(maps.len(), set.boot.cts_depth);
            for map in &maps {
                let n1 = matrix::find_best_n1(map, dslots, set.boot.max_n1_n2_ratio);
                assert!(n1.is_power_of_two() && n1 <= dslots);
                for &k in map.keys() {
                    assert!(k < dslots);
                    assert_eq!(n1 * (k / n1) + (k % n1), k);
                }
            }
        }
    }
}
