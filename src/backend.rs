use itertools::izip;

pub trait ModInit {
    fn new(q: u64) -> Self;
}

pub trait GetModulus {
    fn modulus(&self) -> u64;
}

pub trait ArithmeticOps {
    type Element;

    fn add(&self, a: &Self::Element, b: &Self::Element) -> Self::Element;
    fn sub(&self, a: &Self::Element, b: &Self::Element) -> Self::Element;
    fn neg(&self, a: &Self::Element) -> Self::Element;
    fn mul(&self, a: &Self::Element, b: &Self::Element) -> Self::Element;
}

pub trait VectorOps {
    type Element;

    fn elwise_add_mut(&self, a: &mut [Self::Element], b: &[Self::Element]);
    fn elwise_sub_mut(&self, a: &mut [Self::Element], b: &[Self::Element]);
    fn elwise_neg_mut(&self, a: &mut [Self::Element]);
    fn elwise_mul_mut(&self, a: &mut [Self::Element], b: &[Self::Element]);
    /// a_i += b_i * c_i
    fn elwise_fma_mut(&self, a: &mut [Self::Element], b: &[Self::Element], c: &[Self::Element]);
    fn elwise_scalar_mul_mut(&self, a: &mut [Self::Element], c: &Self::Element);
}

/// Multiplication against fixed operands with a precomputed Shoup
/// representation `w' = floor(w * 2^64 / q)`.
pub trait ShoupOps {
    fn shoup_repr(&self, w: u64) -> u64;
    fn shoup_mul(&self, a: u64, w: u64, w_shoup: u64) -> u64;
    /// acc_i += a_i * w_i, with `w` in Shoup form.
    fn elwise_shoup_fma_mut(&self, acc: &mut [u64], a: &[u64], w: &[u64], w_shoup: &[u64]);
}

/// Arithmetic modulo a prime `q < 2^62` with Barrett reduction of both the
/// double-word products and arbitrary single words.
#[derive(Debug, Clone, PartialEq)]
pub struct ModulusOpsU64 {
    q: u64,
    /// bit length of q
    logq: u32,
    /// floor(2^{2 logq} / q)
    mu: u128,
    /// floor(2^64 / q), constant of the single-word reduction
    mu_word: u64,
}

impl ModInit for ModulusOpsU64 {
    fn new(q: u64) -> Self {
        assert!(q > 1 && q < (1u64 << 62), "unsupported modulus {q}");
        let logq = 64 - q.leading_zeros();
        let mu = (1u128 << (2 * logq)) / (q as u128);
        let mu_word = ((1u128 << 64) / (q as u128)) as u64;
        ModulusOpsU64 {
            q,
            logq,
            mu,
            mu_word,
        }
    }
}

impl GetModulus for ModulusOpsU64 {
    fn modulus(&self) -> u64 {
        self.q
    }
}

impl ModulusOpsU64 {
    /// Reduces `x < q^2`.
    #[inline]
    pub fn barrett_reduce(&self, x: u128) -> u64 {
        let s = self.logq;
        let qhat = ((x >> (s - 1)) * self.mu) >> (s + 1);
        let mut r = (x - qhat * self.q as u128) as u64;
        while r >= self.q {
            r -= self.q;
        }
        r
    }

    /// Reduces an arbitrary unsigned word: one high-word multiply against
    /// floor(2^64 / q) followed by conditional subtractions.
    #[inline]
    pub fn barrett_reduce_add(&self, x: u64) -> u64 {
        let qhat = ((x as u128 * self.mu_word as u128) >> 64) as u64;
        let mut r = x - qhat * self.q;
        while r >= self.q {
            r -= self.q;
        }
        r
    }

    pub fn pow(&self, base: u64, mut exp: u64) -> u64 {
        let mut base = self.barrett_reduce_add(base);
        let mut out = 1u64;
        while exp > 0 {
            if exp & 1 == 1 {
                out = self.mul(&out, &base);
            }
            base = self.mul(&base, &base);
            exp >>= 1;
        }
        out
    }

    /// Inverse by Fermat; valid because every modulus in the chain is prime.
    pub fn inv(&self, a: u64) -> u64 {
        debug_assert!(a % self.q != 0);
        self.pow(a, self.q - 2)
    }
}

impl ArithmeticOps for ModulusOpsU64 {
    type Element = u64;

    #[inline]
    fn add(&self, a: &u64, b: &u64) -> u64 {
        let mut o = a + b;
        if o >= self.q {
            o -= self.q;
        }
        o
    }

    #[inline]
    fn sub(&self, a: &u64, b: &u64) -> u64 {
        if a >= b {
            a - b
        } else {
            (a + self.q) - b
        }
    }

    #[inline]
    fn neg(&self, a: &u64) -> u64 {
        if *a == 0 {
            0
        } else {
            self.q - a
        }
    }

    #[inline]
    fn mul(&self, a: &u64, b: &u64) -> u64 {
        self.barrett_reduce((*a as u128) * (*b as u128))
    }
}

impl VectorOps for ModulusOpsU64 {
    type Element = u64;

    fn elwise_add_mut(&self, a: &mut [u64], b: &[u64]) {
        izip!(a.iter_mut(), b.iter()).for_each(|(ai, bi)| *ai = self.add(ai, bi));
    }

    fn elwise_sub_mut(&self, a: &mut [u64], b: &[u64]) {
        izip!(a.iter_mut(), b.iter()).for_each(|(ai, bi)| *ai = self.sub(ai, bi));
    }

    fn elwise_neg_mut(&self, a: &mut [u64]) {
        a.iter_mut().for_each(|ai| *ai = self.neg(ai));
    }

    fn elwise_mul_mut(&self, a: &mut [u64], b: &[u64]) {
        izip!(a.iter_mut(), b.iter()).for_each(|(ai, bi)| *ai = self.mul(ai, bi));
    }

    fn elwise_fma_mut(&self, a: &mut [u64], b: &[u64], c: &[u64]) {
        izip!(a.iter_mut(), b.iter(), c.iter())
            .for_each(|(ai, bi, ci)| *ai = self.add(ai, &self.mul(bi, ci)));
    }

    fn elwise_scalar_mul_mut(&self, a: &mut [u64], c: &u64) {
        a.iter_mut().for_each(|ai| *ai = self.mul(ai, c));
    }
}

impl ShoupOps for ModulusOpsU64 {
    fn shoup_repr(&self, w: u64) -> u64 {
        debug_assert!(w < self.q);
        (((w as u128) << 64) / (self.q as u128)) as u64
    }

    #[inline]
    fn shoup_mul(&self, a: u64, w: u64, w_shoup: u64) -> u64 {
        let hi = ((a as u128 * w_shoup as u128) >> 64) as u64;
        let mut r = a.wrapping_mul(w).wrapping_sub(hi.wrapping_mul(self.q));
        if r >= self.q {
            r -= self.q;
        }
        r
    }

    fn elwise_shoup_fma_mut(&self, acc: &mut [u64], a: &[u64], w: &[u64], w_shoup: &[u64]) {
        izip!(acc.iter_mut(), a.iter(), w.iter(), w_shoup.iter()).for_each(
            |(o, ai, wi, wsi)| {
                *o = self.add(o, &self.shoup_mul(*ai, *wi, *wsi));
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    const Q: u64 = 0x7fffffffe0001; // 51-bit NTT-friendly prime

    #[test]
    fn barrett_matches_native() {
        let modop = ModulusOpsU64::new(Q);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for _ in 0..1000 {
            let a = rng.gen_range(0..Q);
            let b = rng.gen_range(0..Q);
            assert_eq!(modop.mul(&a, &b), ((a as u128 * b as u128) % Q as u128) as u64);
            assert_eq!(modop.add(&a, &b), ((a + b) % Q) as u64);
            assert_eq!(modop.sub(&a, &b), ((a + Q - b) % Q) as u64);
        }
    }

    #[test]
    fn word_reduction_matches_native() {
        let modop = ModulusOpsU64::new(Q);
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        for _ in 0..1000 {
            let x: u64 = rng.gen();
            assert_eq!(modop.barrett_reduce_add(x), x % Q);
        }
        assert_eq!(modop.barrett_reduce_add(0), 0);
        assert_eq!(modop.barrett_reduce_add(Q), 0);
        assert_eq!(modop.barrett_reduce_add(u64::MAX), u64::MAX % Q);
    }

    #[test]
    fn shoup_matches_barrett() {
        let modop = ModulusOpsU64::new(Q);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..1000 {
            let a = rng.gen_range(0..Q);
            let w = rng.gen_range(0..Q);
            let ws = modop.shoup_repr(w);
            assert_eq!(modop.shoup_mul(a, w, ws), modop.mul(&a, &w));
        }
    }

    #[test]
    fn inverse() {
        let modop = ModulusOpsU64::new(Q);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        for _ in 0..100 {
            let a = rng.gen_range(1..Q);
            assert_eq!(modop.mul(&a, &modop.inv(a)), 1);
        }
    }
}
