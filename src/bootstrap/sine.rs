use std::f64::consts::PI;

use crate::{
    bootstrap::poly::Polynomial,
    error::Result,
    params::{BootstrapParameters, SineType},
};

/// Homomorphic mod-1 recipe: the scaled sine/cosine interpolant, the optional
/// arcsine correction, and the double-angle bookkeeping constants.
#[derive(Debug, Clone)]
pub(crate) struct Mod1Poly {
    pub(crate) sine_type: SineType,
    pub(crate) poly: Polynomial,
    pub(crate) arcsine: Option<Polynomial>,
    /// 2^r for the cosine variants, 1 for Sin
    pub(crate) sc_fac: f64,
    /// (1/2pi)^{1/sc_fac}; squared once per double-angle iteration
    pub(crate) sqrt2pi: f64,
}

/// Chebyshev interpolation of `f` at `deg + 1` nodes over `[a, b]`.
pub(crate) fn chebyshev_interpolate(f: impl Fn(f64) -> f64, deg: usize, a: f64, b: f64) -> Vec<f64> {
    let n = deg + 1;
    let values: Vec<f64> = (0..n)
        .map(|j| {
            let t = (PI * (j as f64 + 0.5) / n as f64).cos();
            f((a + b) / 2.0 + (b - a) / 2.0 * t)
        })
        .collect();

    let mut coeffs = vec![0.0f64; n];
    for (k, c) in coeffs.iter_mut().enumerate() {
        let mut acc = 0.0;
        for (j, v) in values.iter().enumerate() {
            acc += v * (PI * k as f64 * (j as f64 + 0.5) / n as f64).cos();
        }
        *c = acc * 2.0 / n as f64;
    }
    coeffs[0] /= 2.0;
    coeffs
}

/// Solves the dense symmetric system `m x = y` by Gaussian elimination with
/// partial pivoting. Small (degree-sized) systems only.
fn solve_dense(mut m: Vec<Vec<f64>>, mut y: Vec<f64>) -> Vec<f64> {
    let n = y.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| m[i][col].abs().partial_cmp(&m[j][col].abs()).unwrap())
            .unwrap();
        m.swap(col, pivot);
        y.swap(col, pivot);
        let div = m[col][col];
        for row in col + 1..n {
            let factor = m[row][col] / div;
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                m[row][k] -= factor * m[col][k];
            }
            y[row] -= factor * y[col];
        }
    }
    let mut x = vec![0.0f64; n];
    for row in (0..n).rev() {
        let mut acc = y[row];
        for k in row + 1..n {
            acc -= m[row][k] * x[k];
        }
        x[row] = acc / m[row][row];
    }
    x
}

/// Discrete (input-aware) Chebyshev fit: least squares over node clusters of
/// width `2 / message_ratio` centered on the points the reduced ciphertext
/// actually lands on, one cluster per integer in `[-(K-1), K-1]`.
fn discrete_cosine_fit(
    f: impl Fn(f64) -> f64,
    deg: usize,
    a: f64,
    b: f64,
    k: usize,
    sc_fac: f64,
    message_ratio: f64,
) -> Vec<f64> {
    let clusters = 2 * k - 1;
    let per_cluster = ((4 * (deg + 1)) / clusters + 2).max(4);
    let radius = 2.0 / message_ratio;

    let mut ts = Vec::with_capacity(clusters * per_cluster);
    let mut ys = Vec::with_capacity(clusters * per_cluster);
    for i in 0..clusters {
        let center = (i as f64 - (k as f64 - 1.0) - 0.25) / sc_fac;
        for j in 0..per_cluster {
            let off = radius / sc_fac * (PI * (j as f64 + 0.5) / per_cluster as f64).cos();
            let x = center + off;
            ts.push((2.0 * x - a - b) / (b - a));
            ys.push(f(x));
        }
    }

    // design matrix in the Chebyshev basis
    let n = deg + 1;
    let rows: Vec<Vec<f64>> = ts
        .iter()
        .map(|&t| {
            let mut row = Vec::with_capacity(n);
            let mut tm1 = 1.0;
            let mut tm = t;
            row.push(1.0);
            for _ in 1..n {
                row.push(tm);
                let next = 2.0 * t * tm - tm1;
                tm1 = tm;
                tm = next;
            }
            row
        })
        .collect();

    // normal equations
    let mut ata = vec![vec![0.0f64; n]; n];
    let mut aty = vec![0.0f64; n];
    for (row, &y) in rows.iter().zip(ys.iter()) {
        for i in 0..n {
            aty[i] += row[i] * y;
            for j in i..n {
                ata[i][j] += row[i] * row[j];
            }
        }
    }
    for i in 0..n {
        for j in 0..i {
            ata[i][j] = ata[j][i];
        }
    }
    solve_dense(ata, aty)
}

/// Odd monomial arcsine correction: c_1 = q_diff / 2pi, then
/// c_{2k+1} = c_{2k-1} (2k-1)^2 / ((2k+1) 2k).
fn arcsine_poly(deg: usize, q_diff: f64) -> Polynomial {
    let mut coeffs = vec![0.0f64; deg + 1];
    let mut c = q_diff / (2.0 * PI);
    coeffs[1] = c;
    let mut k = 1usize;
    while 2 * k + 1 <= deg {
        c *= ((2 * k - 1) * (2 * k - 1)) as f64 / ((2 * k + 1) * 2 * k) as f64;
        coeffs[2 * k + 1] = c;
        k += 1;
    }
    Polynomial::monomial(coeffs)
}

/// Generates the mod-1 polynomial set for a bootstrap parameter choice.
/// `q0` fixes the power-of-two drift compensated by the arcsine step.
pub(crate) fn generate_mod1_poly(boot: &BootstrapParameters, q0: u64) -> Result<Mod1Poly> {
    boot.validate()?;
    let k = boot.k;
    let message_ratio = boot.message_ratio();

    let (sc_fac, a, b) = match boot.sine_type {
        SineType::Sin => (1.0, -(k as f64), k as f64),
        SineType::Cos1 | SineType::Cos2 => {
            let sc = (1u64 << boot.double_angle) as f64;
            (sc, -(k as f64) / sc, k as f64 / sc)
        }
    };
    let sqrt2pi = (1.0 / (2.0 * PI)).powf(1.0 / sc_fac);

    let coeffs = match boot.sine_type {
        SineType::Sin => chebyshev_interpolate(
            |x| (2.0 * PI * x).sin() / (2.0 * PI),
            boot.sine_deg,
            a,
            b,
        ),
        SineType::Cos1 => discrete_cosine_fit(
            |x| sqrt2pi * (2.0 * PI * x).cos(),
            boot.sine_deg,
            a,
            b,
            k,
            sc_fac,
            message_ratio,
        ),
        SineType::Cos2 => {
            chebyshev_interpolate(|x| sqrt2pi * (2.0 * PI * x).cos(), boot.sine_deg, a, b)
        }
    };

    let arcsine = if boot.arc_sine_deg > 0 {
        let q_diff = q0 as f64 / 2.0f64.powf((q0 as f64).log2().round());
        Some(arcsine_poly(boot.arc_sine_deg, q_diff))
    } else {
        None
    };

    Ok(Mod1Poly {
        sine_type: boot.sine_type,
        poly: Polynomial::chebyshev(coeffs, a, b),
        arcsine,
        sc_fac,
        sqrt2pi,
    })
}

impl Mod1Poly {
    /// Plaintext reference of the full sine step including the double-angle
    /// iterations: maps `y = I + frac` to roughly `sin(2 pi y) / 2 pi`.
    pub(crate) fn evaluate_f64(&self, y: f64) -> f64 {
        match self.sine_type {
            SineType::Sin => self.poly.evaluate_f64(y),
            SineType::Cos1 | SineType::Cos2 => {
                let x = (y - 0.25) / self.sc_fac;
                let mut z = self.poly.evaluate_f64(x);
                let mut sqrt2pi = self.sqrt2pi;
                for _ in 0..(self.sc_fac as usize).trailing_zeros() {
                    sqrt2pi *= sqrt2pi;
                    z = 2.0 * z * z - sqrt2pi;
                }
                z
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn boot_params(sine_type: SineType, k: usize, deg: usize, r: usize) -> BootstrapParameters {
        BootstrapParameters {
            cts_depth: 2,
            stc_depth: 2,
            sine_type,
            log_message_ratio: 8,
            k,
            sine_deg: deg,
            double_angle: r,
            arc_sine_deg: 0,
            max_n1_n2_ratio: 16.0,
        }
    }

    #[test]
    fn sin_interpolant_matches_scaled_sine() {
        let boot = boot_params(SineType::Sin, 4, 63, 0);
        let mod1 = generate_mod1_poly(&boot, 1 << 50).unwrap();
        for i in 0..1000 {
            let y = -4.0 + 8.0 * (i as f64) / 999.0;
            let want = (2.0 * PI * y).sin() / (2.0 * PI);
            let have = mod1.evaluate_f64(y);
            assert!((want - have).abs() < 2.0f64.powi(-30), "y = {y}");
        }
    }

    #[test]
    fn cos2_with_double_angle_recovers_fractional_part() {
        let boot = boot_params(SineType::Cos2, 12, 44, 2);
        let mod1 = generate_mod1_poly(&boot, 1 << 50).unwrap();
        let mr = boot.message_ratio();
        let mut rng = ChaCha8Rng::seed_from_u64(70);
        for _ in 0..2000 {
            let i = rng.gen_range(-11i64..=11) as f64;
            let frac = rng.gen_range(-1.0..1.0) / mr;
            let y = i + frac;
            let have = mod1.evaluate_f64(y) * mr;
            let want = (2.0 * PI * y).sin() / (2.0 * PI) * mr;
            assert!((have - want).abs() < 2.0f64.powi(-16), "y = {y}");
            // the scaled sine itself reduces mod 1
            assert!((want - frac * mr).abs() < 0.1);
        }
    }

    #[test]
    fn cos1_discrete_fit_is_accurate_on_inputs() {
        let boot = boot_params(SineType::Cos1, 12, 44, 2);
        let mod1 = generate_mod1_poly(&boot, 1 << 50).unwrap();
        let mr = boot.message_ratio();
        let mut rng = ChaCha8Rng::seed_from_u64(71);
        for _ in 0..2000 {
            let i = rng.gen_range(-11i64..=11) as f64;
            let frac = rng.gen_range(-1.0..1.0) / mr;
            let y = i + frac;
            let have = mod1.evaluate_f64(y) * mr;
            let want = (2.0 * PI * y).sin() / (2.0 * PI) * mr;
            assert!((have - want).abs() < 2.0f64.powi(-12), "y = {y}");
        }
    }

    #[test]
    fn cos1_requires_enough_degree() {
        let boot = boot_params(SineType::Cos1, 325, 63, 2);
        assert_eq!(
            generate_mod1_poly(&boot, 1 << 50).unwrap_err(),
            Error::PolynomialDegreeInfeasible { deg: 63, k: 325 }
        );
    }

    #[test]
    fn arcsine_coefficients_follow_the_series() {
        let pol = arcsine_poly(7, 1.0);
        let c1 = 1.0 / (2.0 * PI);
        assert!((pol.coeffs[1] - c1).abs() < 1e-15);
        assert!((pol.coeffs[3] - c1 / 6.0).abs() < 1e-15);
        assert!((pol.coeffs[5] - c1 * 3.0 / 40.0).abs() < 1e-15);
        assert_eq!(pol.coeffs[2], 0.0);
        assert_eq!(pol.coeffs[4], 0.0);
    }
}
