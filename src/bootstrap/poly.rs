use std::collections::BTreeMap;

use crate::{
    error::{Error, Result},
    evaluator::Evaluator,
    rlwe::Ciphertext,
};
use num_complex::Complex64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Basis {
    Monomial,
    Chebyshev,
}

/// Polynomial in monomial or Chebyshev basis over `[a, b]`. `max_deg` and
/// `lead` track the position of this factor inside the recursive split so
/// the evaluator can pick the optimal power for the outermost products.
#[derive(Debug, Clone)]
pub(crate) struct Polynomial {
    pub(crate) basis: Basis,
    pub(crate) coeffs: Vec<f64>,
    pub(crate) a: f64,
    pub(crate) b: f64,
    pub(crate) max_deg: usize,
    pub(crate) lead: bool,
}

fn ceil_log2(v: usize) -> usize {
    assert!(v > 0);
    (usize::BITS - (v - 1).leading_zeros()) as usize
}

impl Polynomial {
    pub(crate) fn chebyshev(coeffs: Vec<f64>, a: f64, b: f64) -> Self {
        let max_deg = coeffs.len() - 1;
        Polynomial {
            basis: Basis::Chebyshev,
            coeffs,
            a,
            b,
            max_deg,
            lead: true,
        }
    }

    pub(crate) fn monomial(coeffs: Vec<f64>) -> Self {
        let max_deg = coeffs.len() - 1;
        Polynomial {
            basis: Basis::Monomial,
            coeffs,
            a: -1.0,
            b: 1.0,
            max_deg,
            lead: true,
        }
    }

    pub(crate) fn degree(&self) -> usize {
        self.coeffs.len() - 1
    }

    /// Levels consumed by the evaluation.
    pub(crate) fn depth(&self) -> usize {
        ceil_log2(self.degree() + 1)
    }

    /// Plaintext evaluation, the reference for tests and precision budgets.
    pub(crate) fn evaluate_f64(&self, x: f64) -> f64 {
        match self.basis {
            Basis::Monomial => {
                let mut acc = 0.0;
                for &c in self.coeffs.iter().rev() {
                    acc = acc * x + c;
                }
                acc
            }
            Basis::Chebyshev => {
                let t = (2.0 * x - self.a - self.b) / (self.b - self.a);
                let mut tm1 = 1.0;
                let mut tm = t;
                let mut acc = self.coeffs[0];
                for &c in &self.coeffs[1..] {
                    acc += c * tm;
                    let next = 2.0 * t * tm - tm1;
                    tm1 = tm;
                    tm = next;
                }
                acc
            }
        }
    }

    /// Splits `p = q * B_split + r` where `B` is `T_split` (Chebyshev,
    /// using `T_i = 2 T_split T_{i-split} - T_{2 split - i}`) or `X^split`.
    fn split_at(&self, split: usize) -> (Polynomial, Polynomial) {
        let d = self.degree();
        debug_assert!(split <= d && d < 2 * split);
        let mut r_coeffs = self.coeffs[..split].to_vec();
        let mut q_coeffs = vec![0.0; d - split + 1];
        q_coeffs[0] = self.coeffs[split];
        match self.basis {
            Basis::Chebyshev => {
                for i in split + 1..=d {
                    q_coeffs[i - split] = 2.0 * self.coeffs[i];
                    r_coeffs[2 * split - i] -= self.coeffs[i];
                }
            }
            Basis::Monomial => {
                for i in split + 1..=d {
                    q_coeffs[i - split] = self.coeffs[i];
                }
            }
        }

        let q = Polynomial {
            basis: self.basis,
            coeffs: q_coeffs,
            a: self.a,
            b: self.b,
            max_deg: self.max_deg,
            lead: self.lead,
        };
        let r = Polynomial {
            basis: self.basis,
            coeffs: r_coeffs,
            a: self.a,
            b: self.b,
            max_deg: self.max_deg.saturating_sub(d - split + 1),
            lead: false,
        };
        (q, r)
    }
}

/// Cache of the powers `T_1, T_2, ..` (or `X^i`) of a ciphertext.
pub(crate) struct PowerBasis {
    basis: Basis,
    pub(crate) values: BTreeMap<usize, Ciphertext>,
}

impl PowerBasis {
    pub(crate) fn new(ct: &Ciphertext, basis: Basis) -> Self {
        let mut values = BTreeMap::new();
        values.insert(1usize, ct.clone());
        PowerBasis { basis, values }
    }

    /// Computes the `n`-th power. `lazy` defers the final rescale of
    /// non-power-of-two entries so it merges into the enclosing product.
    pub(crate) fn gen_power(&mut self, n: usize, lazy: bool, eval: &Evaluator) -> Result<()> {
        if self.values.contains_key(&n) {
            return Ok(());
        }
        let is_pow2 = n.is_power_of_two();
        let (a, b) = if is_pow2 {
            (n / 2, n / 2)
        } else {
            // asymmetric split minimizing the power-basis depth
            let half = 1usize << (ceil_log2(n) - 1);
            match self.basis {
                Basis::Chebyshev => (half - 1, n + 1 - half),
                Basis::Monomial => (half, n - half),
            }
        };
        let c = a.max(b) - a.min(b);

        self.gen_power(a, lazy, eval)?;
        self.gen_power(b, lazy, eval)?;
        if self.basis == Basis::Chebyshev && c > 0 {
            self.gen_power(c, lazy, eval)?;
        }

        let mut t = eval.mul_relin(&self.values[&a], &self.values[&b])?;
        if is_pow2 || !lazy {
            eval.rescale(&mut t)?;
        }
        if self.basis == Basis::Chebyshev {
            // T_n = 2 T_a T_b - T_c
            t = eval.add(&t, &t)?;
            if c == 0 {
                eval.add_const(&mut t, Complex64::new(-1.0, 0.0));
            } else if (t.scale() / self.values[&c].scale()) > 2.0 {
                // deferred rescale: raise T_c onto the product scale first
                let mut tc = self.values[&c].clone();
                eval.scale_up(&mut tc, t.scale())?;
                t = eval.sub(&t, &tc)?;
            } else {
                t = eval.sub(&t, &self.values[&c])?;
            }
        }
        self.values.insert(n, t);
        Ok(())
    }
}

/// Evaluates a flat chunk (degree below the baby-step bound) directly from
/// the power basis. Every term is scaled individually onto
/// `target_scale * q_level`, so the single trailing rescale lands exactly on
/// `target_scale`.
fn eval_from_power_basis(
    eval: &Evaluator,
    pol: &Polynomial,
    pb: &PowerBasis,
    target_scale: f64,
) -> Result<Ciphertext> {
    let params = eval.params();
    let level = pol
        .coeffs
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, c)| c.abs() > f64::EPSILON)
        .map(|(i, _)| pb.values[&i].level())
        .min()
        .unwrap_or(params.max_level());
    let q_level = params.rns().moduli_q()[level] as f64;
    let common = target_scale * q_level;

    let mut acc: Option<Ciphertext> = None;
    for (i, &c) in pol.coeffs.iter().enumerate().skip(1) {
        if c.abs() <= f64::EPSILON {
            continue;
        }
        let mut term = pb.values[&i].clone();
        let factor = common / term.scale();
        eval.mul_const(&mut term, Complex64::new(c, 0.0), factor);
        term.scale = common;
        acc = Some(match acc {
            None => term,
            Some(prev) => eval.add(&prev, &term)?,
        });
    }

    let mut acc = match acc {
        Some(acc) => acc,
        None => Ciphertext::zero(params, level, common),
    };
    if pol.coeffs[0].abs() > f64::EPSILON {
        eval.add_const(&mut acc, Complex64::new(pol.coeffs[0], 0.0));
    }
    eval.rescale(&mut acc)?;
    Ok(acc)
}

fn recurse(
    eval: &Evaluator,
    pol: &Polynomial,
    pb: &PowerBasis,
    log_split: usize,
    target_scale: f64,
) -> Result<Ciphertext> {
    let d = pol.degree();
    if d < (1 << log_split) {
        // an outermost residual chunk may still deserve its own optimal split
        if pol.lead && log_split > 1 && pol.max_deg % (1 << (log_split + 1)) > (1 << (log_split - 1))
        {
            let log_split = ceil_log2(d + 1) / 2;
            return recurse(eval, pol, pb, log_split.max(1), target_scale);
        }
        return eval_from_power_basis(eval, pol, pb, target_scale);
    }

    let mut next_power = 1usize << log_split;
    while next_power < (d + 1) >> 1 {
        next_power <<= 1;
    }
    let (q, r) = pol.split_at(next_power);

    let x_pow = &pb.values[&next_power];
    let q_actual = eval.params().rns().moduli_q()[x_pow.level()] as f64;
    let target_scale_q = target_scale * q_actual / x_pow.scale();

    let res_q = recurse(eval, &q, pb, log_split, target_scale_q)?;
    let mut res = eval.mul_relin(&res_q, x_pow)?;
    eval.rescale(&mut res)?;

    let res_r = recurse(eval, &r, pb, log_split, target_scale)?;
    eval.add(&res, &res_r)
}

/// Evaluates `pol` on a ciphertext already expressed in the polynomial's
/// variable (the interval change of variable is the caller's business). The
/// result lands exactly on `target_scale`.
pub(crate) fn evaluate_polynomial(
    eval: &Evaluator,
    ct: &Ciphertext,
    pol: &Polynomial,
    target_scale: f64,
) -> Result<Ciphertext> {
    let d = pol.degree();
    if d == 0 {
        return Err(Error::Setup("constant polynomial".to_string()));
    }
    let log_degree = ceil_log2(d + 1);
    let log_split = log_degree / 2;

    let mut pb = PowerBasis::new(ct, pol.basis);
    for i in 1..log_degree {
        pb.gen_power(1 << i, false, eval)?;
    }
    for i in 3..(1usize << log_split) {
        pb.gen_power(i, false, eval)?;
    }

    recurse(eval, pol, &pb, log_split, target_scale)
}
