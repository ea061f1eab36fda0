use rand::{CryptoRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Default CSPRNG handed to key generation and encryption when the caller
/// does not bring their own.
pub struct DefaultSecureRng(ChaCha20Rng);

impl DefaultSecureRng {
    pub fn new() -> Self {
        DefaultSecureRng(ChaCha20Rng::from_entropy())
    }

    pub fn new_seeded(seed: u64) -> Self {
        DefaultSecureRng(ChaCha20Rng::seed_from_u64(seed))
    }
}

impl Default for DefaultSecureRng {
    fn default() -> Self {
        Self::new()
    }
}

impl RngCore for DefaultSecureRng {
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }
    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest)
    }
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.0.try_fill_bytes(dest)
    }
}

impl CryptoRng for DefaultSecureRng {}

/// Fills `out` with a ternary secret of exactly `hamming_weight` non-zero
/// entries, signs balanced at random.
pub(crate) fn fill_random_ternary_secret_with_hamming_weight<R: RngCore>(
    out: &mut [i64],
    hamming_weight: usize,
    rng: &mut R,
) {
    assert!(hamming_weight <= out.len());
    out.fill(0);
    let n = out.len();
    let mut placed = 0;
    while placed < hamming_weight {
        let idx = (rng.next_u64() as usize) % n;
        if out[idx] == 0 {
            out[idx] = if rng.next_u64() & 1 == 1 { 1 } else { -1 };
            placed += 1;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use num_complex::Complex64;

    /// Accumulates log2 error statistics of a decoded vector against its
    /// reference.
    #[derive(Default)]
    pub(crate) struct Stats {
        samples: Vec<f64>,
    }

    impl Stats {
        pub(crate) fn add_more(&mut self, have: &[Complex64], want: &[Complex64]) {
            assert_eq!(have.len(), want.len());
            for (h, w) in have.iter().zip(want.iter()) {
                self.samples.push((h - w).norm());
            }
        }

        pub(crate) fn max_err(&self) -> f64 {
            self.samples.iter().cloned().fold(0.0, f64::max)
        }

        pub(crate) fn mean_err(&self) -> f64 {
            self.samples.iter().sum::<f64>() / self.samples.len() as f64
        }

        /// -log2 of the worst-case error, i.e. bits of precision.
        pub(crate) fn min_precision(&self) -> f64 {
            -self.max_err().log2()
        }
    }

    #[test]
    fn ternary_secret_has_requested_weight() {
        use super::*;
        let mut rng = DefaultSecureRng::new_seeded(0);
        let mut s = vec![0i64; 1 << 10];
        fill_random_ternary_secret_with_hamming_weight(&mut s, 192, &mut rng);
        assert_eq!(s.iter().filter(|&&v| v != 0).count(), 192);
        assert!(s.iter().all(|&v| v == -1 || v == 0 || v == 1));
    }
}
