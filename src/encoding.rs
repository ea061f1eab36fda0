use num_complex::Complex64;

use crate::{
    error::{Error, Result},
    params::CkksParameters,
    ring::RnsPoly,
};

/// Encoded message: polynomial in the NTT domain plus the scale it was
/// encoded at. The level is carried by the polynomial itself.
#[derive(Debug, Clone)]
pub struct Plaintext {
    pub(crate) poly: RnsPoly,
    pub(crate) scale: f64,
}

impl Plaintext {
    pub fn level(&self) -> usize {
        self.poly.level()
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }
}

fn root(m: usize, g: usize) -> Complex64 {
    let angle = 2.0 * std::f64::consts::PI * (g as f64) / (m as f64);
    Complex64::new(angle.cos(), angle.sin())
}

/// Evaluation of the canonical embedding restricted to the 5-power orbit:
/// v_j = sum_t w_t * zeta^{5^j t} with zeta a primitive 4s-th root. The
/// radix-2 split follows the orbit structure (5^{s/2} = 2s + 1 mod 4s), so
/// slot rotations correspond exactly to the Galois automorphisms X -> X^{5^k}.
pub(crate) fn special_fft(v: &mut [Complex64]) {
    let s = v.len();
    if s == 1 {
        return;
    }
    let half = s / 2;
    let mut even: Vec<Complex64> = (0..half).map(|i| v[2 * i]).collect();
    let mut odd: Vec<Complex64> = (0..half).map(|i| v[2 * i + 1]).collect();
    special_fft(&mut even);
    special_fft(&mut odd);

    let m = 4 * s;
    let mut g = 1usize;
    for j in 0..half {
        let b = odd[j] * root(m, g);
        v[j] = even[j] + b;
        v[j + half] = even[j] - b;
        g = (g * 5) % m;
    }
}

/// Inverse of [`special_fft`].
pub(crate) fn special_ifft(v: &mut [Complex64]) {
    let s = v.len();
    if s == 1 {
        return;
    }
    let half = s / 2;
    let m = 4 * s;

    let mut even = Vec::with_capacity(half);
    let mut odd = Vec::with_capacity(half);
    let mut g = 1usize;
    for j in 0..half {
        let tw = root(m, g).conj();
        even.push((v[j] + v[j + half]) * 0.5);
        odd.push((v[j] - v[j + half]) * 0.5 * tw);
        g = (g * 5) % m;
    }
    special_ifft(&mut even);
    special_ifft(&mut odd);
    for i in 0..half {
        v[2 * i] = even[i];
        v[2 * i + 1] = odd[i];
    }
}

/// Canonical-embedding encoder over `C^{N/2}` and its packed subsets.
pub struct Encoder<'a> {
    params: &'a CkksParameters,
}

impl<'a> Encoder<'a> {
    pub fn new(params: &'a CkksParameters) -> Self {
        Encoder { params }
    }

    /// Scaled real coefficient vector of `values` packed into `2^log_slots`
    /// slots; length is the ring degree. Shared by plaintext encoding and
    /// the diagonal-matrix encoding of the bootstrap.
    pub(crate) fn encode_raw(
        &self,
        values: &[Complex64],
        log_slots: usize,
        scale: f64,
    ) -> Result<Vec<f64>> {
        let n = self.params.degree();
        let slots = 1usize << log_slots;
        if values.len() != slots || log_slots > self.params.log_n() - 1 {
            return Err(Error::Setup(format!(
                "cannot pack {} values into 2^{log_slots} slots of a degree-{n} ring",
                values.len()
            )));
        }
        if scale <= 0.0 {
            return Err(Error::ScaleMismatch("encoding at non-positive scale".to_string()));
        }

        let mut w = values.to_vec();
        special_ifft(&mut w);

        let gap = n / (2 * slots);
        let mut coeffs = vec![0.0f64; n];
        for (t, wt) in w.iter().enumerate() {
            coeffs[t * gap] = (wt.re * scale).round();
            coeffs[t * gap + n / 2] = (wt.im * scale).round();
        }
        Ok(coeffs)
    }

    pub fn encode(
        &self,
        values: &[Complex64],
        log_slots: usize,
        level: usize,
        scale: f64,
    ) -> Result<Plaintext> {
        let coeffs = self.encode_raw(values, log_slots, scale)?;
        let rns = self.params.rns();
        let mut poly = rns.from_f64_coeffs(&coeffs, level);
        rns.ntt_q(&mut poly);
        Ok(Plaintext { poly, scale })
    }

    /// Encodes at the default packing and scale of the parameter set.
    pub fn encode_default(&self, values: &[Complex64], level: usize) -> Result<Plaintext> {
        self.encode(
            values,
            self.params.log_slots(),
            level,
            self.params.scale(),
        )
    }

    pub fn decode(&self, pt: &Plaintext, log_slots: usize) -> Vec<Complex64> {
        let n = self.params.degree();
        let slots = 1usize << log_slots;
        let rns = self.params.rns();

        let mut poly = pt.poly.clone();
        rns.intt_q(&mut poly);
        let coeffs = rns.to_f64_centered(&poly);

        let gap = n / (2 * slots);
        let mut w: Vec<Complex64> = (0..slots)
            .map(|t| {
                Complex64::new(coeffs[t * gap], coeffs[t * gap + n / 2]) / pt.scale
            })
            .collect();
        special_fft(&mut w);
        w
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::AutoMap;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn test_params() -> CkksParameters {
        CkksParameters::builder()
            .log_n(8)
            .log_slots(7)
            .log_scale(40)
            .hamming_weight(32)
            .moduli_q_sizes(&[50, 40])
            .moduli_p_sizes(&[55])
            .build()
            .unwrap()
    }

    fn random_values(rng: &mut ChaCha8Rng, s: usize) -> Vec<Complex64> {
        (0..s)
            .map(|_| Complex64::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
            .collect()
    }

    #[test]
    fn special_fft_round_trip() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for log_s in 0..=6 {
            let v = random_values(&mut rng, 1 << log_s);
            let mut w = v.clone();
            special_ifft(&mut w);
            special_fft(&mut w);
            for (a, b) in v.iter().zip(w.iter()) {
                assert!((a - b).norm() < 1e-10);
            }
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let params = test_params();
        let encoder = Encoder::new(&params);
        let mut rng = ChaCha8Rng::seed_from_u64(8);

        for log_slots in [3, 7] {
            let v = random_values(&mut rng, 1 << log_slots);
            let pt = encoder.encode(&v, log_slots, 1, params.scale()).unwrap();
            let w = encoder.decode(&pt, log_slots);
            for (a, b) in v.iter().zip(w.iter()) {
                assert!((a - b).norm() < 1e-9, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn rotation_automorphism_shifts_slots() {
        let params = test_params();
        let encoder = Encoder::new(&params);
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let log_slots = 5usize;
        let s = 1 << log_slots;
        let v = random_values(&mut rng, s);

        for k in [1usize, 3, 7] {
            let pt = encoder.encode(&v, log_slots, 1, params.scale()).unwrap();
            let rns = params.rns();
            let mut poly = pt.poly.clone();
            rns.intt_q(&mut poly);
            let map = AutoMap::new(params.degree(), params.galois_element_rotation(k as i64));
            let mut rotated = rns.zero_q(poly.level(), false);
            rns.apply_auto_q(&poly, &map, &mut rotated);
            rns.ntt_q(&mut rotated);
            let rot_pt = Plaintext {
                poly: rotated,
                scale: pt.scale,
            };
            let w = encoder.decode(&rot_pt, log_slots);
            for j in 0..s {
                let want = v[(j + k) % s];
                assert!((w[j] - want).norm() < 1e-9, "slot {j} after rot {k}");
            }
        }
    }

    #[test]
    fn conjugation_automorphism_conjugates_slots() {
        let params = test_params();
        let encoder = Encoder::new(&params);
        let mut rng = ChaCha8Rng::seed_from_u64(10);
        let log_slots = 5usize;
        let v = random_values(&mut rng, 1 << log_slots);

        let pt = encoder.encode(&v, log_slots, 1, params.scale()).unwrap();
        let rns = params.rns();
        let mut poly = pt.poly.clone();
        rns.intt_q(&mut poly);
        let map = AutoMap::new(params.degree(), params.galois_element_conjugation());
        let mut conj = rns.zero_q(poly.level(), false);
        rns.apply_auto_q(&poly, &map, &mut conj);
        rns.ntt_q(&mut conj);
        let conj_pt = Plaintext {
            poly: conj,
            scale: pt.scale,
        };
        let w = encoder.decode(&conj_pt, log_slots);
        for (a, b) in v.iter().zip(w.iter()) {
            assert!((a.conj() - b).norm() < 1e-9);
        }
    }
}
