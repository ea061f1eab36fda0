use crate::backend::{ArithmeticOps, GetModulus, ModInit, ModulusOpsU64};

pub trait NttInit {
    /// `q` must be prime with `q = 1 mod 2n` and `n` a power of two; both are
    /// validated at parameter construction.
    fn new(q: u64, n: usize) -> Self;
}

pub trait Ntt {
    type Element;

    fn forward(&self, v: &mut [Self::Element]);
    fn backward(&self, v: &mut [Self::Element]);
}

/// Negacyclic number-theoretic transform over `Z_q[X]/(X^n + 1)`.
///
/// Powers of the primitive 2n-th root are merged into the butterflies, so
/// forward/backward are exact negacyclic transforms without separate
/// twisting passes.
#[derive(Debug, Clone)]
pub struct NttBackendU64 {
    n: usize,
    modop: ModulusOpsU64,
    /// psi^{bitrev(i)} for the forward pass
    psi_powers_bo: Vec<u64>,
    /// psi^{-bitrev(i)} for the backward pass
    psi_inv_powers_bo: Vec<u64>,
    n_inv: u64,
}

fn bit_reverse(v: usize, bits: u32) -> usize {
    v.reverse_bits() >> (usize::BITS - bits)
}

/// Finds a primitive 2n-th root of unity of `Z_q^*`. Candidates are raised to
/// `(q-1)/2n`; primitivity holds iff the n-th power is -1.
fn find_primitive_root(modop: &ModulusOpsU64, n: usize) -> u64 {
    let q = modop.modulus();
    assert!((q - 1) % (2 * n as u64) == 0, "q = {q} is not 1 mod 2n");
    let exp = (q - 1) / (2 * n as u64);
    for x in 2..q {
        let cand = modop.pow(x, exp);
        if modop.pow(cand, n as u64) == q - 1 {
            return cand;
        }
    }
    unreachable!("no primitive 2n-th root mod {q}")
}

impl NttInit for NttBackendU64 {
    fn new(q: u64, n: usize) -> Self {
        assert!(n.is_power_of_two());
        let modop = ModulusOpsU64::new(q);
        let psi = find_primitive_root(&modop, n);
        let psi_inv = modop.inv(psi);
        let bits = n.trailing_zeros();

        let mut psi_powers_bo = vec![0u64; n];
        let mut psi_inv_powers_bo = vec![0u64; n];
        let mut pow = 1u64;
        let mut pow_inv = 1u64;
        for i in 0..n {
            let r = bit_reverse(i, bits);
            psi_powers_bo[r] = pow;
            psi_inv_powers_bo[r] = pow_inv;
            pow = modop.mul(&pow, &psi);
            pow_inv = modop.mul(&pow_inv, &psi_inv);
        }

        let n_inv = modop.inv(n as u64);
        NttBackendU64 {
            n,
            modop,
            psi_powers_bo,
            psi_inv_powers_bo,
            n_inv,
        }
    }
}

impl Ntt for NttBackendU64 {
    type Element = u64;

    fn forward(&self, v: &mut [u64]) {
        debug_assert!(v.len() == self.n);
        let modop = &self.modop;
        let mut t = self.n;
        let mut m = 1;
        while m < self.n {
            t >>= 1;
            for i in 0..m {
                let j1 = 2 * i * t;
                let s = self.psi_powers_bo[m + i];
                for j in j1..j1 + t {
                    let u = v[j];
                    let w = modop.mul(&v[j + t], &s);
                    v[j] = modop.add(&u, &w);
                    v[j + t] = modop.sub(&u, &w);
                }
            }
            m <<= 1;
        }
    }

    fn backward(&self, v: &mut [u64]) {
        debug_assert!(v.len() == self.n);
        let modop = &self.modop;
        let mut t = 1;
        let mut m = self.n;
        while m > 1 {
            let h = m >> 1;
            let mut j1 = 0;
            for i in 0..h {
                let s = self.psi_inv_powers_bo[h + i];
                for j in j1..j1 + t {
                    let u = v[j];
                    let w = v[j + t];
                    v[j] = modop.add(&u, &w);
                    v[j + t] = modop.mul(&modop.sub(&u, &w), &s);
                }
                j1 += 2 * t;
            }
            t <<= 1;
            m = h;
        }
        v.iter_mut()
            .for_each(|x| *x = modop.mul(x, &self.n_inv));
    }
}

impl NttBackendU64 {
    pub fn modulus(&self) -> u64 {
        self.modop.modulus()
    }
}
