use num_complex::Complex64;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;

use crate::{
    encoding::{Encoder, Plaintext},
    error::{Error, Result},
    params::CkksParameters,
    ring::RnsPoly,
    utils::{fill_random_ternary_secret_with_hamming_weight, DefaultSecureRng},
};

pub mod keyswitch;

/// RLWE ciphertext `(c0, c1)` with decryption `c0 + c1 * s`. Both polynomials
/// are kept in the NTT domain; `scale` tracks the plaintext scaling factor.
#[derive(Debug, Clone)]
pub struct Ciphertext {
    pub(crate) c0: RnsPoly,
    pub(crate) c1: RnsPoly,
    pub(crate) scale: f64,
}

impl Ciphertext {
    pub fn level(&self) -> usize {
        self.c0.level()
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub(crate) fn zero(params: &CkksParameters, level: usize, scale: f64) -> Self {
        let rns = params.rns();
        Ciphertext {
            c0: rns.zero_q(level, true),
            c1: rns.zero_q(level, true),
            scale,
        }
    }
}

/// Ternary secret with fixed Hamming weight, stored in the NTT domain over
/// both the main and the auxiliary basis.
#[derive(Debug)]
pub(crate) struct SecretKey {
    pub(crate) s_q: RnsPoly,
    pub(crate) s_p: RnsPoly,
}

impl SecretKey {
    fn generate(params: &CkksParameters, rng: &mut DefaultSecureRng) -> Self {
        let n = params.degree();
        let rns = params.rns();
        let mut coeffs = vec![0i64; n];
        fill_random_ternary_secret_with_hamming_weight(
            &mut coeffs,
            params.hamming_weight(),
            rng,
        );
        let coeffs_f64: Vec<f64> = coeffs.iter().map(|&v| v as f64).collect();

        let mut s_q = rns.from_f64_coeffs(&coeffs_f64, params.max_level());
        rns.ntt_q(&mut s_q);
        let mut s_p = rns.from_f64_coeffs_p(&coeffs_f64);
        rns.ntt_p(&mut s_p);
        SecretKey { s_q, s_p }
    }
}

pub(crate) fn sample_gaussian_coeffs(
    n: usize,
    sigma: f64,
    rng: &mut DefaultSecureRng,
) -> Vec<f64> {
    let normal = Normal::new(0.0, sigma).expect("valid sigma");
    (0..n).map(|_| normal.sample(rng).round()).collect()
}

pub(crate) fn sample_uniform_poly(
    params: &CkksParameters,
    level: usize,
    rng: &mut DefaultSecureRng,
) -> RnsPoly {
    let rns = params.rns();
    let mut poly = rns.zero_q(level, true);
    for (row, &q) in poly.rows.iter_mut().zip(rns.moduli_q()) {
        for v in row.iter_mut() {
            *v = rng.gen_range(0..q);
        }
    }
    poly
}

/// Secret-key holder: encryption, decryption and generation of the public
/// evaluation material.
pub struct ClientKey {
    params: Arc<CkksParameters>,
    pub(crate) sk: SecretKey,
}

impl ClientKey {
    pub fn new(params: &Arc<CkksParameters>) -> Self {
        let mut rng = DefaultSecureRng::new();
        Self::new_with_rng(params, &mut rng)
    }

    pub fn new_with_rng(params: &Arc<CkksParameters>, rng: &mut DefaultSecureRng) -> Self {
        let sk = SecretKey::generate(params, rng);
        ClientKey {
            params: params.clone(),
            sk,
        }
    }

    pub fn params(&self) -> &Arc<CkksParameters> {
        &self.params
    }

    pub fn encrypt_plaintext(&self, pt: &Plaintext, rng: &mut DefaultSecureRng) -> Ciphertext {
        let params = &*self.params;
        let rns = params.rns();
        let level = pt.level();

        let c1 = sample_uniform_poly(params, level, rng);

        let e = sample_gaussian_coeffs(params.degree(), params.sigma(), rng);
        let mut c0 = rns.from_f64_coeffs(&e, level);
        rns.ntt_q(&mut c0);

        // c0 = m + e - c1 * s
        rns.add_assign_q(&mut c0, &pt.poly);
        let mut c1s = c1.clone();
        rns.mul_assign_q(&mut c1s, &self.sk.s_q);
        rns.sub_assign_q(&mut c0, &c1s);

        Ciphertext {
            c0,
            c1,
            scale: pt.scale(),
        }
    }

    /// Encodes and encrypts at an explicit packing, level and scale.
    pub fn encrypt_at(
        &self,
        values: &[Complex64],
        log_slots: usize,
        level: usize,
        scale: f64,
        rng: &mut DefaultSecureRng,
    ) -> Result<Ciphertext> {
        let encoder = Encoder::new(&self.params);
        let pt = encoder.encode(values, log_slots, level, scale)?;
        Ok(self.encrypt_plaintext(&pt, rng))
    }

    /// Encodes and encrypts with the parameter-set defaults at the top level.
    pub fn encrypt(&self, values: &[Complex64], rng: &mut DefaultSecureRng) -> Result<Ciphertext> {
        self.encrypt_at(
            values,
            self.params.log_slots(),
            self.params.max_level(),
            self.params.scale(),
            rng,
        )
    }

    pub fn decrypt(&self, ct: &Ciphertext) -> Plaintext {
        let rns = self.params.rns();
        let mut m = ct.c1.clone();
        rns.mul_assign_q(&mut m, &self.sk.s_q);
        rns.add_assign_q(&mut m, &ct.c0);
        Plaintext {
            poly: m,
            scale: ct.scale,
        }
    }

    /// Decrypts and decodes `2^log_slots` values.
    pub fn decrypt_to_values(&self, ct: &Ciphertext, log_slots: usize) -> Vec<Complex64> {
        let encoder = Encoder::new(&self.params);
        let pt = self.decrypt(ct);
        encoder.decode(&pt, log_slots)
    }
}

impl crate::Encryptor<[Complex64], Ciphertext> for ClientKey {
    fn encrypt(&self, m: &[Complex64]) -> Result<Ciphertext> {
        let mut rng = DefaultSecureRng::new();
        ClientKey::encrypt(self, m, &mut rng)
    }
}

impl crate::Decryptor<Vec<Complex64>, Ciphertext> for ClientKey {
    fn decrypt(&self, c: &Ciphertext) -> Vec<Complex64> {
        self.decrypt_to_values(c, self.params.log_slots())
    }
}

pub(crate) fn check_scales_match(a: &Ciphertext, b: &Ciphertext) -> Result<()> {
    let rel = (a.scale - b.scale).abs() / a.scale.max(b.scale);
    // prime sizes drift from the nominal scale by a few units in 2^-30; a
    // genuine mismatch is orders of magnitude larger
    if rel > 2.0_f64.powi(-20) {
        return Err(Error::ScaleMismatch(format!(
            "operand scales {:.3e} and {:.3e} differ",
            a.scale, b.scale
        )));
    }
    Ok(())
}
