use itertools::izip;
use num_bigint_dig::{BigInt, BigUint, ModInverse};
use num_traits::{One, ToPrimitive, Zero};

use crate::{
    backend::{ArithmeticOps, GetModulus, ModInit, ModulusOpsU64, ShoupOps, VectorOps},
    error::{Error, Result},
    ntt::{Ntt, NttBackendU64, NttInit},
};

/// Polynomial in RNS representation: one residue row per prime of the active
/// basis. For the main basis `Q` the number of rows is `level + 1`; auxiliary
/// `P`-basis polynomials carry `alpha` rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RnsPoly {
    pub(crate) rows: Vec<Vec<u64>>,
    pub(crate) is_ntt: bool,
}

impl RnsPoly {
    pub(crate) fn zero(rows: usize, n: usize, is_ntt: bool) -> Self {
        RnsPoly {
            rows: vec![vec![0u64; n]; rows],
            is_ntt,
        }
    }

    pub fn level(&self) -> usize {
        self.rows.len() - 1
    }

    /// Drops residue rows above `level`.
    pub(crate) fn truncate_level(&mut self, level: usize) {
        self.rows.truncate(level + 1);
    }
}

/// Index/sign maps of the Galois automorphism `X -> X^k` over
/// `Z[X]/(X^n + 1)`, applied in the coefficient domain.
#[derive(Debug, Clone)]
pub struct AutoMap {
    pub(crate) index: Vec<usize>,
    pub(crate) sign: Vec<bool>,
}

impl AutoMap {
    pub fn new(ring_size: usize, k: usize) -> Self {
        assert!(k & 1 == 1, "automorphism exponent {k} must be odd");
        let (index, sign): (Vec<usize>, Vec<bool>) = (0..ring_size)
            .map(|i| {
                let mut to_index = (i * k) % (2 * ring_size);
                let mut sign = true;
                if to_index >= ring_size {
                    to_index -= ring_size;
                    sign = false;
                }
                (to_index, sign)
            })
            .unzip();
        AutoMap { index, sign }
    }
}

/// Basis-extension table for one source prime set `C` onto every other prime
/// of the chain: `chat_inv[j] = (C/c_j)^{-1} mod c_j`, `chat_mod[t][j] =
/// (C/c_j) mod d_t`, `c_mod[t] = C mod d_t`, targets ordered as all of `Q`
/// then all of `P`.
#[derive(Debug, Clone)]
struct ExtendTable {
    chat_inv: Vec<u64>,
    chat_inv_f64: Vec<f64>,
    chat_mod: Vec<Vec<u64>>,
    c_mod: Vec<u64>,
}

#[derive(Debug)]
pub struct RnsContext {
    n: usize,
    moduli_q: Vec<u64>,
    moduli_p: Vec<u64>,
    modops_q: Vec<ModulusOpsU64>,
    modops_p: Vec<ModulusOpsU64>,
    ntts_q: Vec<NttBackendU64>,
    ntts_p: Vec<NttBackendU64>,
    alpha: usize,

    /// `[l][i]`: q_l^{-1} mod q_i for i < l (rescale)
    qlinv_mod_qi: Vec<Vec<u64>>,
    /// `[l][i]`: floor(q_l / 2) mod q_i for i < l (rescale rounding)
    qlhalf_mod_qi: Vec<Vec<u64>>,

    /// P^{-1} mod q_i
    pinv_mod_qi: Vec<u64>,
    /// P mod q_i
    p_mod_qi: Vec<u64>,
    /// floor(P / 2) mod q_i and mod p_j (mod-down rounding)
    phalf_mod_qi: Vec<u64>,
    phalf_mod_pj: Vec<u64>,
    /// extension table of the full P basis onto Q (mod-down)
    p_to_q: ExtendTable,

    /// `[t][s-1]`: extension table of decomposition group `t` holding `s`
    /// primes, onto the rest of the chain (hoisted decomposition)
    group_tables: Vec<Vec<ExtendTable>>,

    /// `[l][i]`: garner constant (Q_l/q_i) * ((Q_l/q_i)^{-1} mod q_i), for
    /// centered CRT reconstruction at level l
    garner: Vec<Vec<BigUint>>,
    big_q: Vec<BigUint>,

    /// `[t][i]`: P * u_t mod q_i, with u_t the CRT idempotent of
    /// decomposition group t over the full chain (key-switching gadget)
    pu_mod_qi: Vec<Vec<u64>>,
}

fn build_extend_table(
    source: &[u64],
    targets_q: &[u64],
    targets_p: &[u64],
    modops_src: &[ModulusOpsU64],
) -> ExtendTable {
    let big_c: BigUint = source.iter().fold(BigUint::one(), |acc, &c| acc * c);
    let chat: Vec<BigUint> = source.iter().map(|&c| &big_c / c).collect();

    let chat_inv: Vec<u64> = izip!(source.iter(), chat.iter(), modops_src.iter())
        .map(|(&c, ch, modop)| {
            let r = (ch % c).to_u64().unwrap();
            modop.inv(r)
        })
        .collect();
    let chat_inv_f64: Vec<f64> = source.iter().map(|&c| 1.0 / c as f64).collect();

    let mut chat_mod = Vec::new();
    let mut c_mod = Vec::new();
    for &d in targets_q.iter().chain(targets_p.iter()) {
        chat_mod.push(chat.iter().map(|ch| (ch % d).to_u64().unwrap()).collect());
        c_mod.push((&big_c % d).to_u64().unwrap());
    }

    ExtendTable {
        chat_inv,
        chat_inv_f64,
        chat_mod,
        c_mod,
    }
}

impl RnsContext {
    pub fn new(n: usize, moduli_q: &[u64], moduli_p: &[u64]) -> Result<Self> {
        if !n.is_power_of_two() || n < 16 {
            return Err(Error::Setup(format!(
                "ring degree {n} must be a power of two >= 16"
            )));
        }
        if moduli_q.is_empty() || moduli_p.is_empty() {
            return Err(Error::Setup("empty modulus chain".to_string()));
        }
        let mut all: Vec<u64> = moduli_q.iter().chain(moduli_p.iter()).cloned().collect();
        all.sort_unstable();
        all.dedup();
        if all.len() != moduli_q.len() + moduli_p.len() {
            return Err(Error::Setup("duplicate moduli in the chain".to_string()));
        }
        for &q in all.iter() {
            if (q - 1) % (2 * n as u64) != 0 {
                return Err(Error::Setup(format!("modulus {q} is not 1 mod 2N")));
            }
        }

        let modops_q: Vec<_> = moduli_q.iter().map(|&q| ModulusOpsU64::new(q)).collect();
        let modops_p: Vec<_> = moduli_p.iter().map(|&p| ModulusOpsU64::new(p)).collect();
        let ntts_q: Vec<_> = moduli_q.iter().map(|&q| NttBackendU64::new(q, n)).collect();
        let ntts_p: Vec<_> = moduli_p.iter().map(|&p| NttBackendU64::new(p, n)).collect();
        let alpha = moduli_p.len();
        let levels = moduli_q.len();

        // rescale constants
        let mut qlinv_mod_qi = vec![Vec::new(); levels];
        let mut qlhalf_mod_qi = vec![Vec::new(); levels];
        for l in 1..levels {
            let ql = moduli_q[l];
            let half = ql >> 1;
            for i in 0..l {
                qlinv_mod_qi[l].push(modops_q[i].inv(modops_q[i].barrett_reduce_add(ql)));
                qlhalf_mod_qi[l].push(modops_q[i].barrett_reduce_add(half));
            }
        }

        // mod-down constants
        let big_p: BigUint = moduli_p.iter().fold(BigUint::one(), |acc, &p| acc * p);
        let phalf: BigUint = &big_p >> 1;
        let pinv_mod_qi: Vec<u64> = izip!(moduli_q.iter(), modops_q.iter())
            .map(|(&q, modop)| modop.inv((&big_p % q).to_u64().unwrap()))
            .collect();
        let p_mod_qi: Vec<u64> = moduli_q.iter().map(|&q| (&big_p % q).to_u64().unwrap()).collect();
        let phalf_mod_qi: Vec<u64> = moduli_q.iter().map(|&q| (&phalf % q).to_u64().unwrap()).collect();
        let phalf_mod_pj: Vec<u64> = moduli_p.iter().map(|&p| (&phalf % p).to_u64().unwrap()).collect();
        let p_to_q = build_extend_table(moduli_p, moduli_q, &[], &modops_p);

        // decomposition-group extension tables
        let beta_max = (levels + alpha - 1) / alpha;
        let mut group_tables = Vec::with_capacity(beta_max);
        for t in 0..beta_max {
            let start = t * alpha;
            let max_size = alpha.min(levels - start);
            let mut per_size = Vec::with_capacity(max_size);
            for s in 1..=max_size {
                let source = &moduli_q[start..start + s];
                let modops_src = &modops_q[start..start + s];
                per_size.push(build_extend_table(source, moduli_q, moduli_p, modops_src));
            }
            group_tables.push(per_size);
        }

        // key-switching gadget: P * u_t mod q_i, u_t = (Q/C_t) * ((Q/C_t)^{-1} mod C_t)
        let big_q_full: BigUint = moduli_q.iter().fold(BigUint::one(), |acc, &q| acc * q);
        let mut pu_mod_qi = Vec::with_capacity(beta_max);
        for t in 0..beta_max {
            let start = t * alpha;
            let size = alpha.min(levels - start);
            let big_c: BigUint = moduli_q[start..start + size]
                .iter()
                .fold(BigUint::one(), |acc, &c| acc * c);
            let qhat = &big_q_full / &big_c;
            let qhat_inv = (&qhat % &big_c)
                .mod_inverse(&big_c)
                .expect("chain primes are coprime")
                .to_biguint()
                .expect("inverse is reduced");
            let pu = &big_p * qhat * qhat_inv;
            pu_mod_qi.push(
                moduli_q
                    .iter()
                    .map(|&q| (&pu % q).to_u64().unwrap())
                    .collect(),
            );
        }

        // centered-CRT garner constants per level
        let mut garner = Vec::with_capacity(levels);
        let mut big_q = Vec::with_capacity(levels);
        let mut acc = BigUint::one();
        for l in 0..levels {
            acc *= moduli_q[l];
            big_q.push(acc.clone());
            let mut g_l = Vec::with_capacity(l + 1);
            for i in 0..=l {
                let qhat = &acc / moduli_q[i];
                let qhat_inv = modops_q[i].inv((&qhat % moduli_q[i]).to_u64().unwrap());
                g_l.push(&qhat * qhat_inv);
            }
            garner.push(g_l);
        }

        Ok(RnsContext {
            n,
            moduli_q: moduli_q.to_vec(),
            moduli_p: moduli_p.to_vec(),
            modops_q,
            modops_p,
            ntts_q,
            ntts_p,
            alpha,
            qlinv_mod_qi,
            qlhalf_mod_qi,
            pinv_mod_qi,
            p_mod_qi,
            phalf_mod_qi,
            phalf_mod_pj,
            p_to_q,
            group_tables,
            garner,
            big_q,
            pu_mod_qi,
        })
    }

    pub fn max_level(&self) -> usize {
        self.moduli_q.len() - 1
    }

    pub fn alpha(&self) -> usize {
        self.alpha
    }

    /// Number of decomposition groups covering levels `0..=level`.
    pub fn beta(&self, level: usize) -> usize {
        (level + 1 + self.alpha - 1) / self.alpha
    }

    pub fn moduli_q(&self) -> &[u64] {
        &self.moduli_q
    }

    pub fn moduli_p(&self) -> &[u64] {
        &self.moduli_p
    }

    pub(crate) fn modop_q(&self, i: usize) -> &ModulusOpsU64 {
        &self.modops_q[i]
    }

    /// Key-switching gadget factor of decomposition group `t` at prime `i`.
    pub(crate) fn pu_mod_qi(&self, t: usize) -> &[u64] {
        &self.pu_mod_qi[t]
    }

    pub(crate) fn p_mod_qi(&self) -> &[u64] {
        &self.p_mod_qi
    }

    // ------------------------------------------------------------------
    // polynomial constructors and transforms
    // ------------------------------------------------------------------

    pub(crate) fn zero_q(&self, level: usize, is_ntt: bool) -> RnsPoly {
        RnsPoly::zero(level + 1, self.n, is_ntt)
    }

    pub(crate) fn zero_p(&self, is_ntt: bool) -> RnsPoly {
        RnsPoly::zero(self.alpha, self.n, is_ntt)
    }

    pub(crate) fn ntt_q(&self, poly: &mut RnsPoly) {
        debug_assert!(!poly.is_ntt);
        izip!(poly.rows.iter_mut(), self.ntts_q.iter()).for_each(|(row, ntt)| ntt.forward(row));
        poly.is_ntt = true;
    }

    pub(crate) fn intt_q(&self, poly: &mut RnsPoly) {
        debug_assert!(poly.is_ntt);
        izip!(poly.rows.iter_mut(), self.ntts_q.iter()).for_each(|(row, ntt)| ntt.backward(row));
        poly.is_ntt = false;
    }

    pub(crate) fn ntt_p(&self, poly: &mut RnsPoly) {
        debug_assert!(!poly.is_ntt);
        izip!(poly.rows.iter_mut(), self.ntts_p.iter()).for_each(|(row, ntt)| ntt.forward(row));
        poly.is_ntt = true;
    }

    // ------------------------------------------------------------------
    // element-wise arithmetic (rows clamped to the shorter operand)
    // ------------------------------------------------------------------

    pub(crate) fn add_assign_q(&self, a: &mut RnsPoly, b: &RnsPoly) {
        debug_assert_eq!(a.is_ntt, b.is_ntt);
        izip!(a.rows.iter_mut(), b.rows.iter(), self.modops_q.iter())
            .for_each(|(ar, br, modop)| modop.elwise_add_mut(ar, br));
    }

    pub(crate) fn sub_assign_q(&self, a: &mut RnsPoly, b: &RnsPoly) {
        debug_assert_eq!(a.is_ntt, b.is_ntt);
        izip!(a.rows.iter_mut(), b.rows.iter(), self.modops_q.iter())
            .for_each(|(ar, br, modop)| modop.elwise_sub_mut(ar, br));
    }

    pub(crate) fn neg_assign_q(&self, a: &mut RnsPoly) {
        izip!(a.rows.iter_mut(), self.modops_q.iter())
            .for_each(|(ar, modop)| modop.elwise_neg_mut(ar));
    }

    pub(crate) fn mul_assign_q(&self, a: &mut RnsPoly, b: &RnsPoly) {
        debug_assert!(a.is_ntt && b.is_ntt);
        izip!(a.rows.iter_mut(), b.rows.iter(), self.modops_q.iter())
            .for_each(|(ar, br, modop)| modop.elwise_mul_mut(ar, br));
    }

    /// a += b * c, all in the NTT domain.
    pub(crate) fn fma_assign_q(&self, a: &mut RnsPoly, b: &RnsPoly, c: &RnsPoly) {
        debug_assert!(a.is_ntt && b.is_ntt && c.is_ntt);
        izip!(
            a.rows.iter_mut(),
            b.rows.iter(),
            c.rows.iter(),
            self.modops_q.iter()
        )
        .for_each(|(ar, br, cr, modop)| modop.elwise_fma_mut(ar, br, cr));
    }

    pub(crate) fn mul_assign_p(&self, a: &mut RnsPoly, b: &RnsPoly) {
        debug_assert!(a.is_ntt && b.is_ntt);
        izip!(a.rows.iter_mut(), b.rows.iter(), self.modops_p.iter())
            .for_each(|(ar, br, modop)| modop.elwise_mul_mut(ar, br));
    }

    pub(crate) fn sub_assign_p(&self, a: &mut RnsPoly, b: &RnsPoly) {
        debug_assert_eq!(a.is_ntt, b.is_ntt);
        izip!(a.rows.iter_mut(), b.rows.iter(), self.modops_p.iter())
            .for_each(|(ar, br, modop)| modop.elwise_sub_mut(ar, br));
    }

    /// a += b * c over the auxiliary basis, all in the NTT domain.
    pub(crate) fn fma_assign_p(&self, a: &mut RnsPoly, b: &RnsPoly, c: &RnsPoly) {
        debug_assert!(a.is_ntt && b.is_ntt && c.is_ntt);
        izip!(
            a.rows.iter_mut(),
            b.rows.iter(),
            c.rows.iter(),
            self.modops_p.iter()
        )
        .for_each(|(ar, br, cr, modop)| modop.elwise_fma_mut(ar, br, cr));
    }

    /// a += b * w with `w` a fixed operand in Shoup form, Q basis.
    pub(crate) fn shoup_fma_assign_q(
        &self,
        a: &mut RnsPoly,
        b: &RnsPoly,
        w: &RnsPoly,
        w_shoup: &RnsPoly,
    ) {
        izip!(
            a.rows.iter_mut(),
            b.rows.iter(),
            w.rows.iter(),
            w_shoup.rows.iter(),
            self.modops_q.iter()
        )
        .for_each(|(ar, br, wr, wsr, modop)| modop.elwise_shoup_fma_mut(ar, br, wr, wsr));
    }

    pub(crate) fn shoup_fma_assign_p(
        &self,
        a: &mut RnsPoly,
        b: &RnsPoly,
        w: &RnsPoly,
        w_shoup: &RnsPoly,
    ) {
        izip!(
            a.rows.iter_mut(),
            b.rows.iter(),
            w.rows.iter(),
            w_shoup.rows.iter(),
            self.modops_p.iter()
        )
        .for_each(|(ar, br, wr, wsr, modop)| modop.elwise_shoup_fma_mut(ar, br, wr, wsr));
    }

    /// Multiplies every residue by an integer scalar (reduced per prime).
    pub(crate) fn mul_scalar_i128_assign_q(&self, a: &mut RnsPoly, scalar: i128) {
        izip!(a.rows.iter_mut(), self.modops_q.iter()).for_each(|(row, modop)| {
            let q = modop.modulus() as i128;
            let mut r = (scalar % q) as i64;
            if r < 0 {
                r += q as i64;
            }
            modop.elwise_scalar_mul_mut(row, &(r as u64));
        });
    }

    pub(crate) fn shoup_repr_q(&self, a: &RnsPoly) -> RnsPoly {
        let rows = izip!(a.rows.iter(), self.modops_q.iter())
            .map(|(row, modop)| row.iter().map(|&w| modop.shoup_repr(w)).collect())
            .collect();
        RnsPoly {
            rows,
            is_ntt: a.is_ntt,
        }
    }

    pub(crate) fn shoup_repr_p(&self, a: &RnsPoly) -> RnsPoly {
        let rows = izip!(a.rows.iter(), self.modops_p.iter())
            .map(|(row, modop)| row.iter().map(|&w| modop.shoup_repr(w)).collect())
            .collect();
        RnsPoly {
            rows,
            is_ntt: a.is_ntt,
        }
    }

    /// Applies the automorphism map in the coefficient domain.
    pub(crate) fn apply_auto_q(&self, a: &RnsPoly, map: &AutoMap, out: &mut RnsPoly) {
        debug_assert!(!a.is_ntt);
        out.is_ntt = false;
        izip!(out.rows.iter_mut(), a.rows.iter(), self.modops_q.iter()).for_each(
            |(or, ar, modop)| {
                izip!(ar.iter(), map.index.iter(), map.sign.iter()).for_each(
                    |(v, &to, &sign)| {
                        or[to] = if sign { *v } else { modop.neg(v) };
                    },
                );
            },
        );
    }

    pub(crate) fn apply_auto_p(&self, a: &RnsPoly, map: &AutoMap, out: &mut RnsPoly) {
        debug_assert!(!a.is_ntt);
        out.is_ntt = false;
        izip!(out.rows.iter_mut(), a.rows.iter(), self.modops_p.iter()).for_each(
            |(or, ar, modop)| {
                izip!(ar.iter(), map.index.iter(), map.sign.iter()).for_each(
                    |(v, &to, &sign)| {
                        or[to] = if sign { *v } else { modop.neg(v) };
                    },
                );
            },
        );
    }

    // ------------------------------------------------------------------
    // basis conversion kernels
    // ------------------------------------------------------------------

    /// Approximate CRT conversion of coefficient-domain residues `source`
    /// (primes of `table`) onto the target prime `target_idx` (index into
    /// Q ++ P ordering). The float correction removes the `v * C` overshoot.
    fn convert_row(
        &self,
        table: &ExtendTable,
        source: &[&[u64]],
        target_idx: usize,
        target_modop: &ModulusOpsU64,
        out: &mut [u64],
    ) {
        let chat_mod = &table.chat_mod[target_idx];
        let c_mod = table.c_mod[target_idx];
        let s = source.len();
        for (coeff, o) in out.iter_mut().enumerate() {
            let mut acc = 0u128;
            let mut vf = 0.5f64;
            for j in 0..s {
                // y_j = [x_j * (C/c_j)^{-1}]_{c_j}, premultiplied by the caller
                let y = source[j][coeff];
                acc += (y as u128) * (chat_mod[j] as u128);
                vf += y as f64 * table.chat_inv_f64[j];
            }
            let v = vf as u64;
            let correction = target_modop.barrett_reduce((v as u128) * (c_mod as u128));
            let acc_red = (acc % target_modop.modulus() as u128) as u64;
            *o = target_modop.sub(&acc_red, &correction);
        }
    }

    /// Scales the source residues by `(C/c_j)^{-1} mod c_j` in place,
    /// producing the `y_j` inputs of `convert_row`.
    fn premultiply_chat_inv(&self, table: &ExtendTable, rows: &mut [Vec<u64>], modops: &[&ModulusOpsU64]) {
        izip!(rows.iter_mut(), table.chat_inv.iter(), modops.iter())
            .for_each(|(row, cinv, modop)| modop.elwise_scalar_mul_mut(row, cinv));
    }

    /// Rescale: divides by the last prime of the level with rounding.
    /// Input in the NTT domain; output at `level - 1`, NTT domain.
    pub(crate) fn div_round_by_last_modulus_ntt(&self, poly: &RnsPoly) -> RnsPoly {
        debug_assert!(poly.is_ntt);
        let l = poly.level();
        debug_assert!(l >= 1);
        let ql = self.moduli_q[l];
        let half = ql >> 1;
        let modop_l = &self.modops_q[l];

        // last row back to coefficients, add q_l/2 for rounding
        let mut last = poly.rows[l].clone();
        self.ntts_q[l].backward(&mut last);
        last.iter_mut().for_each(|x| *x = modop_l.add(x, &half));

        let mut out = RnsPoly::zero(l, self.n, true);
        for i in 0..l {
            let modop = &self.modops_q[i];
            // [x_l + q_l/2] reduced into q_i, forward to NTT
            let mut t: Vec<u64> = last.iter().map(|&x| modop.barrett_reduce_add(x)).collect();
            self.ntts_q[i].forward(&mut t);

            let half_i = self.qlhalf_mod_qi[l][i];
            let inv = self.qlinv_mod_qi[l][i];
            izip!(out.rows[i].iter_mut(), poly.rows[i].iter(), t.iter()).for_each(
                |(o, &xi, &ti)| {
                    let num = modop.sub(&modop.add(&xi, &half_i), &ti);
                    *o = modop.mul(&num, &inv);
                },
            );
        }
        out
    }

    /// Divides a `(Q_level, P)` pair by `P` with rounding; the result
    /// overwrites `q_part`. Both inputs in the NTT domain.
    pub(crate) fn mod_down_ntt(&self, q_part: &mut RnsPoly, p_part: &RnsPoly) {
        debug_assert!(q_part.is_ntt && p_part.is_ntt);
        let level = q_part.level();

        // p rows to coefficients, add P/2 for rounding
        let mut p_coeff: Vec<Vec<u64>> = p_part.rows.clone();
        izip!(p_coeff.iter_mut(), self.ntts_p.iter()).for_each(|(row, ntt)| ntt.backward(row));
        izip!(p_coeff.iter_mut(), self.phalf_mod_pj.iter(), self.modops_p.iter()).for_each(
            |(row, half, modop)| {
                row.iter_mut().for_each(|x| *x = modop.add(x, half));
            },
        );

        // premultiply by (P/p_j)^{-1}
        let modops: Vec<&ModulusOpsU64> = self.modops_p.iter().collect();
        self.premultiply_chat_inv(&self.p_to_q, &mut p_coeff, &modops);
        let sources: Vec<&[u64]> = p_coeff.iter().map(|r| r.as_slice()).collect();

        for i in 0..=level {
            let modop = &self.modops_q[i];
            let mut conv = vec![0u64; self.n];
            self.convert_row(&self.p_to_q, &sources, i, modop, &mut conv);
            self.ntts_q[i].forward(&mut conv);

            let half_i = self.phalf_mod_qi[i];
            let inv = self.pinv_mod_qi[i];
            q_part.rows[i].iter_mut().zip(conv.iter()).for_each(|(x, &c)| {
                let num = modop.sub(&modop.add(x, &half_i), &c);
                *x = modop.mul(&num, &inv);
            });
        }
    }

    /// Hoisted decomposition: splits an NTT-domain polynomial at `level`
    /// into `beta` gadget components, each extended to the full
    /// `Q_level ++ P` basis in the NTT domain.
    pub(crate) fn decompose_ntt(&self, poly: &RnsPoly) -> Vec<(RnsPoly, RnsPoly)> {
        let mut out = self.decompose_coeff(poly);
        for (part_q, part_p) in out.iter_mut() {
            self.ntt_q(part_q);
            self.ntt_p(part_p);
        }
        out
    }

    /// Same decomposition with the components left in the coefficient
    /// domain, so a rotation can permute them before its own NTT pass.
    pub(crate) fn decompose_coeff(&self, poly: &RnsPoly) -> Vec<(RnsPoly, RnsPoly)> {
        debug_assert!(poly.is_ntt);
        let level = poly.level();
        let beta = self.beta(level);

        let mut coeff = poly.clone();
        self.intt_q(&mut coeff);

        let mut out = Vec::with_capacity(beta);
        for t in 0..beta {
            let start = t * self.alpha;
            let size = self.alpha.min(level + 1 - start);
            let table = &self.group_tables[t][size - 1];

            // y_j = [x_j * (C/c_j)^{-1}]_{c_j}
            let mut y: Vec<Vec<u64>> = (0..size)
                .map(|j| coeff.rows[start + j].clone())
                .collect();
            let modops: Vec<&ModulusOpsU64> =
                (0..size).map(|j| &self.modops_q[start + j]).collect();
            self.premultiply_chat_inv(table, &mut y, &modops);
            let sources: Vec<&[u64]> = y.iter().map(|r| r.as_slice()).collect();

            let mut part_q = RnsPoly::zero(level + 1, self.n, false);
            let mut part_p = RnsPoly::zero(self.alpha, self.n, false);

            for i in 0..=level {
                if i >= start && i < start + size {
                    // inside the group: exact residue
                    part_q.rows[i].copy_from_slice(&coeff.rows[i]);
                } else {
                    let modop = &self.modops_q[i];
                    let mut conv = vec![0u64; self.n];
                    self.convert_row(table, &sources, i, modop, &mut conv);
                    part_q.rows[i] = conv;
                }
            }
            for j in 0..self.alpha {
                let modop = &self.modops_p[j];
                let mut conv = vec![0u64; self.n];
                self.convert_row(table, &sources, self.moduli_q.len() + j, modop, &mut conv);
                part_p.rows[j] = conv;
            }

            out.push((part_q, part_p));
        }
        out
    }

    /// Bootstrap ModUp: centered lift of a level-0 polynomial to the full
    /// chain. Input and output in the NTT domain.
    pub(crate) fn mod_up_q0_to_full(&self, poly: &RnsPoly) -> RnsPoly {
        debug_assert!(poly.is_ntt && poly.level() == 0);
        let q0 = self.moduli_q[0];
        let half = q0 >> 1;
        let top = self.max_level();

        let mut base = poly.rows[0].clone();
        self.ntts_q[0].backward(&mut base);

        let mut out = RnsPoly::zero(top + 1, self.n, false);
        out.rows[0].copy_from_slice(&base);
        for i in 1..=top {
            let modop = &self.modops_q[i];
            izip!(out.rows[i].iter_mut(), base.iter()).for_each(|(o, &v)| {
                // centered lift of the q0 residue, reduced per prime by the
                // Barrett word reduction
                *o = if v >= half {
                    modop.neg(&modop.barrett_reduce_add(q0 - v))
                } else {
                    modop.barrett_reduce_add(v)
                };
            });
        }
        self.ntt_q(&mut out);
        out
    }

    /// Centered CRT reconstruction of every coefficient to f64. The input
    /// must be in the coefficient domain.
    pub(crate) fn to_f64_centered(&self, poly: &RnsPoly) -> Vec<f64> {
        debug_assert!(!poly.is_ntt);
        let level = poly.level();
        if level == 0 {
            let q = self.moduli_q[0];
            let half = q >> 1;
            return poly.rows[0]
                .iter()
                .map(|&v| {
                    if v >= half {
                        v as f64 - q as f64
                    } else {
                        v as f64
                    }
                })
                .collect();
        }
        let big_q = &self.big_q[level];
        let half: BigUint = big_q >> 1;
        let garner = &self.garner[level];
        (0..self.n)
            .map(|c| {
                let mut acc = BigUint::zero();
                for i in 0..=level {
                    acc += garner[i].clone() * poly.rows[i][c];
                }
                acc %= big_q;
                if acc >= half {
                    -(BigInt::from(big_q - &acc)).to_f64().unwrap()
                } else {
                    BigInt::from(acc).to_f64().unwrap()
                }
            })
            .collect()
    }

    /// Encodes signed f64 coefficients (already scaled) into RNS residues at
    /// `level`, coefficient domain. The reduction happens on the exact
    /// integer value of the float, so the residues stay CRT-consistent for
    /// magnitudes far beyond 2^53 (scales up to products of two primes).
    pub(crate) fn from_f64_coeffs(&self, coeffs: &[f64], level: usize) -> RnsPoly {
        let mut out = RnsPoly::zero(level + 1, self.n, false);
        for i in 0..=level {
            let q = self.moduli_q[i] as i128;
            izip!(out.rows[i].iter_mut(), coeffs.iter()).for_each(|(o, &v)| {
                debug_assert!(v.abs() < 2.0f64.powi(126));
                let r = (v.round() as i128).rem_euclid(q);
                *o = r as u64;
            });
        }
        out
    }

    /// Same, targeting the auxiliary P basis.
    pub(crate) fn from_f64_coeffs_p(&self, coeffs: &[f64]) -> RnsPoly {
        let mut out = RnsPoly::zero(self.alpha, self.n, false);
        for j in 0..self.alpha {
            let p = self.moduli_p[j] as i128;
            izip!(out.rows[j].iter_mut(), coeffs.iter()).for_each(|(o, &v)| {
                let r = (v.round() as i128).rem_euclid(p);
                *o = r as u64;
            });
        }
        out
    }
}
