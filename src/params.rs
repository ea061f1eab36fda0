use num_bigint_dig::{prime::probably_prime, BigUint};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    ring::RnsContext,
};

/// Target function of the homomorphic modular reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SineType {
    /// (1/2pi) sin(2pi x), plain Chebyshev interpolation, no double angle.
    Sin,
    /// cos(2pi (x - 1/4) / 2^r) with discrete (input-aware) node placement.
    Cos1,
    /// Same cosine target, standard Chebyshev interpolation.
    Cos2,
}

/// Recipe for the homomorphic mod-q0 evaluation and the two matrix
/// factorizations. Depths are in consumed levels, one per factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapParameters {
    pub cts_depth: usize,
    pub stc_depth: usize,
    pub sine_type: SineType,
    /// message ratio q0 / |m| = 2^log_message_ratio
    pub log_message_ratio: usize,
    /// Chebyshev interpolation range [-K, K]
    pub k: usize,
    pub sine_deg: usize,
    /// number of double-angle iterations r (Cos variants only)
    pub double_angle: usize,
    /// 0 disables the arcsine correction
    pub arc_sine_deg: usize,
    pub max_n1_n2_ratio: f64,
}

fn ceil_log2(v: usize) -> usize {
    assert!(v > 0);
    (usize::BITS - (v - 1).leading_zeros()) as usize
}

impl BootstrapParameters {
    pub fn message_ratio(&self) -> f64 {
        (1u64 << self.log_message_ratio) as f64
    }

    /// Levels consumed by the sine step: polynomial evaluation plus the
    /// double-angle iterations plus the optional arcsine.
    pub fn sine_depth(&self) -> usize {
        let double_angle = match self.sine_type {
            SineType::Sin => 0,
            SineType::Cos1 | SineType::Cos2 => self.double_angle,
        };
        let arcsine = if self.arc_sine_deg > 0 {
            ceil_log2(self.arc_sine_deg + 1)
        } else {
            0
        };
        ceil_log2(self.sine_deg + 1) + double_angle + arcsine
    }

    /// Total levels consumed by one bootstrap.
    pub fn depth(&self) -> usize {
        self.cts_depth + self.sine_depth() + self.stc_depth
    }

    pub fn validate(&self) -> Result<()> {
        if self.cts_depth == 0 || self.stc_depth == 0 {
            return Err(Error::Setup(
                "CoeffsToSlots and SlotsToCoeffs need at least one factor each".to_string(),
            ));
        }
        if self.sine_deg == 0 {
            return Err(Error::Setup("sine degree must be positive".to_string()));
        }
        if self.k == 0 {
            return Err(Error::Setup("interpolation range K must be positive".to_string()));
        }
        if self.sine_type == SineType::Cos1 && self.sine_deg < 2 * self.k - 1 {
            return Err(Error::PolynomialDegreeInfeasible {
                deg: self.sine_deg,
                k: self.k,
            });
        }
        if self.max_n1_n2_ratio <= 0.0 {
            return Err(Error::Setup("max_n1_n2_ratio must be positive".to_string()));
        }
        Ok(())
    }
}

/// Static parameters of a CKKS instance: ring degree, modulus chains, default
/// packing and scale, secret distribution.
#[derive(Debug)]
pub struct CkksParameters {
    log_n: usize,
    n: usize,
    log_slots: usize,
    scale: f64,
    h: usize,
    sigma: f64,
    rns: RnsContext,
}

impl CkksParameters {
    pub fn builder() -> CkksParametersBuilder {
        CkksParametersBuilder::default()
    }

    pub fn log_n(&self) -> usize {
        self.log_n
    }

    pub fn degree(&self) -> usize {
        self.n
    }

    pub fn log_slots(&self) -> usize {
        self.log_slots
    }

    pub fn slots(&self) -> usize {
        1 << self.log_slots
    }

    /// Default scale Delta.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn hamming_weight(&self) -> usize {
        self.h
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn max_level(&self) -> usize {
        self.rns.max_level()
    }

    pub fn rns(&self) -> &RnsContext {
        &self.rns
    }

    pub fn q0(&self) -> u64 {
        self.rns.moduli_q()[0]
    }

    /// Galois exponent of the rotation by `k` slots: 5^k mod 2N.
    pub fn galois_element_rotation(&self, k: i64) -> usize {
        let two_n = (2 * self.n) as u64;
        let period = (self.n / 2) as i64;
        let k = k.rem_euclid(period) as u64;
        let mut g = 1u64;
        let mut base = 5u64 % two_n;
        let mut e = k;
        while e > 0 {
            if e & 1 == 1 {
                g = (g * base) % two_n;
            }
            base = (base * base) % two_n;
            e >>= 1;
        }
        g as usize
    }

    /// Galois exponent of complex conjugation: 2N - 1.
    pub fn galois_element_conjugation(&self) -> usize {
        2 * self.n - 1
    }
}

#[derive(Debug, Clone, Default)]
pub struct CkksParametersBuilder {
    log_n: usize,
    log_slots: usize,
    log_scale: usize,
    h: usize,
    sigma: Option<f64>,
    moduli_q_sizes: Vec<usize>,
    moduli_p_sizes: Vec<usize>,
}

impl CkksParametersBuilder {
    pub fn log_n(mut self, v: usize) -> Self {
        self.log_n = v;
        self
    }

    pub fn log_slots(mut self, v: usize) -> Self {
        self.log_slots = v;
        self
    }

    pub fn log_scale(mut self, v: usize) -> Self {
        self.log_scale = v;
        self
    }

    pub fn hamming_weight(mut self, v: usize) -> Self {
        self.h = v;
        self
    }

    pub fn sigma(mut self, v: f64) -> Self {
        self.sigma = Some(v);
        self
    }

    pub fn moduli_q_sizes(mut self, v: &[usize]) -> Self {
        self.moduli_q_sizes = v.to_vec();
        self
    }

    pub fn moduli_p_sizes(mut self, v: &[usize]) -> Self {
        self.moduli_p_sizes = v.to_vec();
        self
    }

    pub fn build(self) -> Result<CkksParameters> {
        if self.log_n < 4 || self.log_n > 17 {
            return Err(Error::Setup(format!("log_n = {} out of range", self.log_n)));
        }
        let n = 1usize << self.log_n;
        if self.log_slots == 0 || self.log_slots > self.log_n - 1 {
            return Err(Error::Setup(format!(
                "log_slots = {} must be in [1, log_n - 1]",
                self.log_slots
            )));
        }
        if self.log_scale == 0 || self.log_scale > 60 {
            return Err(Error::Setup(format!(
                "log_scale = {} out of range",
                self.log_scale
            )));
        }
        if self.h == 0 || self.h >= n {
            return Err(Error::Setup(format!(
                "secret hamming weight {} out of range",
                self.h
            )));
        }
        if self.moduli_q_sizes.is_empty() || self.moduli_p_sizes.is_empty() {
            return Err(Error::Setup("empty modulus size lists".to_string()));
        }
        for &s in self.moduli_q_sizes.iter().chain(self.moduli_p_sizes.iter()) {
            if !(20..=61).contains(&s) {
                return Err(Error::Setup(format!("modulus size {s} out of [20, 61]")));
            }
        }

        let moduli_q = generate_ntt_primes(n, &self.moduli_q_sizes)?;
        let mut all = moduli_q.clone();
        let mut moduli_p = Vec::with_capacity(self.moduli_p_sizes.len());
        for &s in &self.moduli_p_sizes {
            let p = generate_ntt_primes_avoiding(n, s, &all)?;
            all.push(p);
            moduli_p.push(p);
        }

        let rns = RnsContext::new(n, &moduli_q, &moduli_p)?;
        Ok(CkksParameters {
            log_n: self.log_n,
            n,
            log_slots: self.log_slots,
            scale: (1u64 << self.log_scale) as f64,
            h: self.h,
            sigma: self.sigma.unwrap_or(3.2),
            rns,
        })
    }
}

fn is_prime_u64(v: u64) -> bool {
    probably_prime(&BigUint::from(v), 20)
}

/// Generates one NTT-friendly prime (1 mod 2n) of `size` bits, as close to
/// 2^size as possible, distinct from everything in `avoid`.
pub(crate) fn generate_ntt_primes_avoiding(n: usize, size: usize, avoid: &[u64]) -> Result<u64> {
    let two_n = 2 * n as u64;
    let base = (1u64 << size) / two_n * two_n + 1;
    let mut down = base;
    let mut up = base + two_n;
    let lo = 1u64 << (size - 1);
    let hi = 1u64 << (size + 1);
    loop {
        if down > lo {
            if is_prime_u64(down) && !avoid.contains(&down) {
                return Ok(down);
            }
            down -= two_n;
        }
        if up < hi {
            if is_prime_u64(up) && !avoid.contains(&up) {
                return Ok(up);
            }
            up += two_n;
        }
        if down <= lo && up >= hi {
            return Err(Error::Setup(format!(
                "no NTT prime of {size} bits for degree {n}"
            )));
        }
    }
}

/// Generates a chain of distinct NTT-friendly primes with the requested bit
/// sizes, in order.
pub(crate) fn generate_ntt_primes(n: usize, sizes: &[usize]) -> Result<Vec<u64>> {
    let mut out: Vec<u64> = Vec::with_capacity(sizes.len());
    for &s in sizes {
        let p = generate_ntt_primes_avoiding(n, s, &out)?;
        out.push(p);
    }
    Ok(out)
}

/// One named entry of the default bootstrapping table: the modulus-chain
/// layout in level order (q0, residual, StC, sine, CtS) plus the bootstrap
/// recipe itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapParameterSet {
    pub log_n: usize,
    pub log_slots: usize,
    pub log_scale: usize,
    pub h: usize,
    pub q0_size: usize,
    pub residual_sizes: Vec<usize>,
    pub stc_sizes: Vec<usize>,
    pub sine_sizes: Vec<usize>,
    pub cts_sizes: Vec<usize>,
    pub p_sizes: Vec<usize>,
    pub boot: BootstrapParameters,
}

impl BootstrapParameterSet {
    /// Number of levels left after a bootstrap.
    pub fn residual_levels(&self) -> usize {
        self.residual_sizes.len()
    }

    /// Assembles the CKKS parameters with the chain laid out so that the
    /// bootstrap consumes CtS primes first (top of the chain), then sine
    /// primes, then StC primes, landing on the residual levels.
    pub fn ckks_parameters(&self) -> Result<CkksParameters> {
        self.validate()?;
        let mut q_sizes = vec![self.q0_size];
        q_sizes.extend_from_slice(&self.residual_sizes);
        q_sizes.extend_from_slice(&self.stc_sizes);
        q_sizes.extend_from_slice(&self.sine_sizes);
        q_sizes.extend_from_slice(&self.cts_sizes);

        CkksParameters::builder()
            .log_n(self.log_n)
            .log_slots(self.log_slots)
            .log_scale(self.log_scale)
            .hamming_weight(self.h)
            .moduli_q_sizes(&q_sizes)
            .moduli_p_sizes(&self.p_sizes)
            .build()
    }

    pub fn validate(&self) -> Result<()> {
        self.boot.validate()?;
        if self.cts_sizes.len() != self.boot.cts_depth {
            return Err(Error::Setup(format!(
                "{} CtS primes for depth {}",
                self.cts_sizes.len(),
                self.boot.cts_depth
            )));
        }
        if self.stc_sizes.len() != self.boot.stc_depth {
            return Err(Error::Setup(format!(
                "{} StC primes for depth {}",
                self.stc_sizes.len(),
                self.boot.stc_depth
            )));
        }
        if self.sine_sizes.len() != self.boot.sine_depth() {
            return Err(Error::Setup(format!(
                "{} sine primes for depth {}",
                self.sine_sizes.len(),
                self.boot.sine_depth()
            )));
        }
        if self.residual_sizes.is_empty() {
            return Err(Error::Setup("no residual levels".to_string()));
        }
        Ok(())
    }

    /// Full packing, N = 2^16. Matches the precision target of roughly 20
    /// bits after a bootstrap at scale 2^40.
    pub fn set1() -> Self {
        BootstrapParameterSet {
            log_n: 16,
            log_slots: 15,
            log_scale: 40,
            h: 192,
            q0_size: 55,
            residual_sizes: vec![40; 9],
            stc_sizes: vec![39; 3],
            sine_sizes: vec![60; 8],
            cts_sizes: vec![56; 4],
            p_sizes: vec![61; 4],
            boot: BootstrapParameters {
                cts_depth: 4,
                stc_depth: 3,
                sine_type: SineType::Cos1,
                log_message_ratio: 8,
                k: 25,
                sine_deg: 63,
                double_angle: 2,
                arc_sine_deg: 0,
                max_n1_n2_ratio: 16.0,
            },
        }
    }

    /// Sparse packing variant of set1.
    pub fn set2() -> Self {
        let mut set = Self::set1();
        set.log_slots = 14;
        set
    }

    /// N = 2^15, shallow residual budget, scale 2^25.
    pub fn set3() -> Self {
        BootstrapParameterSet {
            log_n: 15,
            log_slots: 14,
            log_scale: 25,
            h: 192,
            q0_size: 55,
            residual_sizes: vec![25, 25],
            stc_sizes: vec![30; 2],
            sine_sizes: vec![55; 8],
            cts_sizes: vec![48; 3],
            p_sizes: vec![56; 3],
            boot: BootstrapParameters {
                cts_depth: 3,
                stc_depth: 2,
                sine_type: SineType::Cos1,
                log_message_ratio: 4,
                k: 25,
                sine_deg: 63,
                double_angle: 2,
                arc_sine_deg: 0,
                max_n1_n2_ratio: 16.0,
            },
        }
    }

    /// Reduced-dimension set for tests: full packing at N = 2^8.
    pub fn toy() -> Self {
        BootstrapParameterSet {
            log_n: 8,
            log_slots: 7,
            log_scale: 34,
            h: 32,
            q0_size: 50,
            residual_sizes: vec![34; 2],
            stc_sizes: vec![34; 2],
            sine_sizes: vec![50; 8],
            cts_sizes: vec![50; 2],
            p_sizes: vec![55; 2],
            boot: BootstrapParameters {
                cts_depth: 2,
                stc_depth: 2,
                sine_type: SineType::Cos2,
                log_message_ratio: 8,
                k: 12,
                sine_deg: 44,
                double_angle: 2,
                arc_sine_deg: 0,
                max_n1_n2_ratio: 4.0,
            },
        }
    }

    /// Sparse toy set: 2^4 slots in a 2^8 ring.
    pub fn toy_sparse() -> Self {
        let mut set = Self::toy();
        set.log_slots = 4;
        set
    }
}

/// Read-only default table, in the order the sets are documented.
pub fn default_bootstrap_params() -> Vec<BootstrapParameterSet> {
    vec![
        BootstrapParameterSet::set1(),
        BootstrapParameterSet::set2(),
        BootstrapParameterSet::set3(),
    ]
}
