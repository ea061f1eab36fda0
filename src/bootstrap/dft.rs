use num_complex::Complex64;
use std::collections::BTreeMap;

/// One factor of the homomorphic (inverse) DFT: a map from rotation index to
/// the diagonal value vector, length `dslots`.
pub(crate) type RawDiagMap = BTreeMap<usize, Vec<Complex64>>;

fn root(m: usize, g: usize) -> Complex64 {
    let angle = 2.0 * std::f64::consts::PI * (g as f64) / (m as f64);
    Complex64::new(angle.cos(), angle.sin())
}

/// Twiddles of the radix-2 stage of block size `l`: w_j = zeta_{4l}^{5^j}.
fn stage_twiddles(l: usize) -> Vec<Complex64> {
    let m = 4 * l;
    let mut g = 1usize;
    (0..l / 2)
        .map(|_| {
            let tw = root(m, g);
            g = (g * 5) % m;
            tw
        })
        .collect()
}

fn insert_diag(map: &mut RawDiagMap, rot: usize, vec: Vec<Complex64>) {
    let dslots = vec.len();
    let rot = rot % dslots;
    map.entry(rot)
        .and_modify(|v| {
            for (a, b) in v.iter_mut().zip(vec.iter()) {
                *a += b;
            }
        })
        .or_insert(vec);
}

/// Forward butterfly stage (SlotsToCoeffs direction); the `u mod l` pattern
/// repeats across the `dslots` entries, which duplicates sparse packings.
///
/// Within each block of size `l`: out_u = in_u + w_u in_{u+l/2} for the lower
/// half, out_u = in_{u-l/2} - w_{u-l/2} in_u for the upper half.
fn forward_stage(ell: usize, dslots: usize) -> RawDiagMap {
    let l = 1usize << ell;
    let tw = stage_twiddles(l);
    let mut d0 = vec![Complex64::new(0.0, 0.0); dslots];
    let mut dp = vec![Complex64::new(0.0, 0.0); dslots];
    let mut dm = vec![Complex64::new(0.0, 0.0); dslots];
    for u in 0..dslots {
        let pos = u % l;
        if pos < l / 2 {
            d0[u] = Complex64::new(1.0, 0.0);
            dp[u] = tw[pos];
        } else {
            d0[u] = -tw[pos - l / 2];
            dm[u] = Complex64::new(1.0, 0.0);
        }
    }
    let mut map = RawDiagMap::new();
    insert_diag(&mut map, 0, d0);
    insert_diag(&mut map, l / 2, dp);
    insert_diag(&mut map, dslots - l / 2, dm);
    map
}

/// Inverse butterfly stage (CoeffsToSlots direction); the halving is kept in
/// the stage so the product of all stages is the exact inverse transform.
fn inverse_stage(ell: usize, dslots: usize) -> RawDiagMap {
    let l = 1usize << ell;
    let tw = stage_twiddles(l);
    let mut d0 = vec![Complex64::new(0.0, 0.0); dslots];
    let mut dp = vec![Complex64::new(0.0, 0.0); dslots];
    let mut dm = vec![Complex64::new(0.0, 0.0); dslots];
    for u in 0..dslots {
        let pos = u % l;
        if pos < l / 2 {
            d0[u] = Complex64::new(0.5, 0.0);
            dp[u] = Complex64::new(0.5, 0.0);
        } else {
            let w = tw[pos - l / 2].conj() * 0.5;
            d0[u] = -w;
            dm[u] = w;
        }
    }
    let mut map = RawDiagMap::new();
    insert_diag(&mut map, 0, d0);
    insert_diag(&mut map, l / 2, dp);
    insert_diag(&mut map, dslots - l / 2, dm);
    map
}

/// Composition `second(first(x))` of two diagonal maps: rotations add, value
/// vectors multiply pointwise after rotating the inner one.
pub(crate) fn merge_maps(second: &RawDiagMap, first: &RawDiagMap, dslots: usize) -> RawDiagMap {
    let mut out = RawDiagMap::new();
    for (&k2, v2) in second.iter() {
        for (&k1, v1) in first.iter() {
            let vec: Vec<Complex64> = (0..dslots)
                .map(|u| v2[u] * v1[(u + k2) % dslots])
                .collect();
            insert_diag(&mut out, k1 + k2, vec);
        }
    }
    out
}

fn scale_map(map: &mut RawDiagMap, factor: f64) {
    for v in map.values_mut() {
        for x in v.iter_mut() {
            *x *= factor;
        }
    }
}

/// Partition of `stages` radix-2 layers into `depth` merged matrices by the
/// rule `ceil(remaining / (depth - i))`.
fn partition(stages: usize, depth: usize) -> Vec<usize> {
    assert!(depth >= 1 && depth <= stages);
    let mut sizes = Vec::with_capacity(depth);
    let mut remaining = stages;
    for i in 0..depth {
        let take = (remaining + (depth - i) - 1) / (depth - i);
        sizes.push(take);
        remaining -= take;
    }
    sizes
}

/// CoeffsToSlots factors: the inverse-DFT stages, largest block first, merged
/// into `depth` matrices; the trailing bit-reversal is omitted (it cancels
/// against SlotsToCoeffs). Every matrix is scaled by `diff_scale^{1/depth}`.
/// For sparse packings the last matrix zeroes the upper half so the doubled
/// representation collapses.
pub(crate) fn coeffs_to_slots_maps(
    log_slots: usize,
    log_n: usize,
    depth: usize,
    diff_scale: f64,
) -> Vec<RawDiagMap> {
    let s_logical = 1usize << log_slots;
    let sparse = log_slots < log_n - 1;
    let dslots = if sparse { 2 * s_logical } else { s_logical };

    let sizes = partition(log_slots, depth);
    let per_matrix = diff_scale.powf(1.0 / depth as f64);

    let mut ell = log_slots; // stages log_slots down to 1
    let mut out = Vec::with_capacity(depth);
    for take in sizes {
        let mut merged: Option<RawDiagMap> = None;
        for _ in 0..take {
            let stage = inverse_stage(ell, dslots);
            merged = Some(match merged {
                None => stage,
                // the new stage is applied after the already-merged ones
                Some(prev) => merge_maps(&stage, &prev, dslots),
            });
            ell -= 1;
        }
        let mut m = merged.expect("at least one stage per matrix");
        scale_map(&mut m, per_matrix);
        out.push(m);
    }

    if sparse {
        // zero the upper half of the doubled representation
        let mask: Vec<Complex64> = (0..dslots)
            .map(|u| {
                if u < s_logical {
                    Complex64::new(1.0, 0.0)
                } else {
                    Complex64::new(0.0, 0.0)
                }
            })
            .collect();
        let mut mask_map = RawDiagMap::new();
        insert_diag(&mut mask_map, 0, mask);
        let last = out.pop().expect("depth >= 1");
        out.push(merge_maps(&mask_map, &last, dslots));
    }
    out
}

/// SlotsToCoeffs factors: forward stages, smallest block first, expecting the
/// bit-reversed input CoeffsToSlots leaves behind. For sparse packings the
/// first matrix absorbs the `(1, i)` mask recombining the real and imaginary
/// halves.
pub(crate) fn slots_to_coeffs_maps(
    log_slots: usize,
    log_n: usize,
    depth: usize,
    diff_scale: f64,
) -> Vec<RawDiagMap> {
    let s_logical = 1usize << log_slots;
    let sparse = log_slots < log_n - 1;
    let dslots = if sparse { 2 * s_logical } else { s_logical };

    // partition sizes mirrored relative to CoeffsToSlots
    let mut sizes = partition(log_slots, depth);
    sizes.reverse();
    let per_matrix = diff_scale.powf(1.0 / depth as f64);

    let mut ell = 1usize; // stages 1 up to log_slots
    let mut out = Vec::with_capacity(depth);
    for take in sizes {
        let mut merged: Option<RawDiagMap> = None;
        for _ in 0..take {
            let stage = forward_stage(ell, dslots);
            merged = Some(match merged {
                None => stage,
                Some(prev) => merge_maps(&stage, &prev, dslots),
            });
            ell += 1;
        }
        let mut m = merged.expect("at least one stage per matrix");
        scale_map(&mut m, per_matrix);
        out.push(m);
    }

    if sparse {
        // (1, i) mask: w_t = u_t + i u_{t + s}
        let ones = vec![Complex64::new(1.0, 0.0); dslots];
        let i_ones = vec![Complex64::new(0.0, 1.0); dslots];
        let mut mask_map = RawDiagMap::new();
        insert_diag(&mut mask_map, 0, ones);
        insert_diag(&mut mask_map, s_logical, i_ones);
        let first = out.remove(0);
        out.insert(0, merge_maps(&first, &mask_map, dslots));
    }
    out
}

/// Plaintext application of a diagonal map, used by tests and by the
/// factorization checks: out_u = sum_k d_k[u] * in_{(u + k) mod dslots}.
pub(crate) fn apply_map(map: &RawDiagMap, v: &[Complex64]) -> Vec<Complex64> {
    let dslots = v.len();
    let mut out = vec![Complex64::new(0.0, 0.0); dslots];
    for (&k, d) in map.iter() {
        for u in 0..dslots {
            out[u] += d[u] * v[(u + k) % dslots];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{special_fft, special_ifft};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_values(rng: &mut ChaCha8Rng, s: usize) -> Vec<Complex64> {
        (0..s)
            .map(|_| Complex64::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
            .collect()
    }

    fn bit_reverse_vec(v: &[Complex64]) -> Vec<Complex64> {
        let n = v.len();
        let bits = n.trailing_zeros();
        (0..n)
            .map(|i| v[(i.reverse_bits() >> (usize::BITS - bits)) as usize])
            .collect()
    }

    #[test]
    fn partition_rule() {
        assert_eq!(partition(7, 3), vec![3, 2, 2]);
        assert_eq!(partition(15, 4), vec![4, 4, 4, 3]);
        assert_eq!(partition(4, 4), vec![1, 1, 1, 1]);
    }

    #[test]
    fn cts_factors_invert_the_embedding_fft() {
        // full packing: applying the CtS factors to F(w) recovers w in
        // bit-reversed order
        let log_slots = 4usize;
        let s = 1 << log_slots;
        let mut rng = ChaCha8Rng::seed_from_u64(40);
        let w = random_values(&mut rng, s);

        let mut v = w.clone();
        special_fft(&mut v);

        for depth in [1usize, 2, 4] {
            let maps = coeffs_to_slots_maps(log_slots, log_slots + 1, depth, 1.0);
            assert_eq!(maps.len(), depth);
            let mut x = v.clone();
            for m in maps.iter() {
                x = apply_map(m, &x);
            }
            let want = bit_reverse_vec(&w);
            for (a, b) in x.iter().zip(want.iter()) {
                assert!((a - b).norm() < 1e-9, "depth {depth}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn stc_factors_apply_the_embedding_fft() {
        let log_slots = 4usize;
        let s = 1 << log_slots;
        let mut rng = ChaCha8Rng::seed_from_u64(41);
        let w = random_values(&mut rng, s);

        let mut want = w.clone();
        special_fft(&mut want);

        for depth in [1usize, 3] {
            let maps = slots_to_coeffs_maps(log_slots, log_slots + 1, depth, 1.0);
            let mut x = bit_reverse_vec(&w);
            for m in maps.iter() {
                x = apply_map(m, &x);
            }
            for (a, b) in x.iter().zip(want.iter()) {
                assert!((a - b).norm() < 1e-9, "depth {depth}");
            }
        }
    }

    #[test]
    fn cts_then_stc_is_identity_full_pack() {
        let log_slots = 5usize;
        let s = 1 << log_slots;
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let v = random_values(&mut rng, s);

        let cts = coeffs_to_slots_maps(log_slots, log_slots + 1, 2, 1.0);
        let stc = slots_to_coeffs_maps(log_slots, log_slots + 1, 2, 1.0);

        let mut x = v.clone();
        for m in cts.iter().chain(stc.iter()) {
            x = apply_map(m, &x);
        }
        for (a, b) in x.iter().zip(v.iter()) {
            assert!((a - b).norm() < 1e-9);
        }
    }

    #[test]
    fn diff_scale_is_distributed() {
        let log_slots = 3usize;
        let s = 1 << log_slots;
        let mut rng = ChaCha8Rng::seed_from_u64(43);
        let v = random_values(&mut rng, s);

        let scale = 0.125f64;
        let cts = coeffs_to_slots_maps(log_slots, log_slots + 1, 3, scale);
        let mut x = v.clone();
        for m in cts.iter() {
            x = apply_map(m, &x);
        }
        // compare against the unscaled factorization
        let cts_unit = coeffs_to_slots_maps(log_slots, log_slots + 1, 3, 1.0);
        let mut y = v.clone();
        for m in cts_unit.iter() {
            y = apply_map(m, &y);
        }
        for (a, b) in x.iter().zip(y.iter()) {
            assert!((a - b * scale).norm() < 1e-9);
        }
    }

    #[test]
    fn sparse_pipeline_repacks_and_restores() {
        // sparse: CtS output carries w in the lower half (zeros above); the
        // (1, i) mask of StC recombines and the forward stages restore F(w)
        // duplicated over both halves.
        let log_slots = 3usize;
        let log_n = 6usize;
        let s = 1 << log_slots;
        let dslots = 2 * s;
        let mut rng = ChaCha8Rng::seed_from_u64(44);

        // doubled-view content: v duplicated, as the trace leaves it
        let w = random_values(&mut rng, s);
        let mut v = w.clone();
        special_fft(&mut v);
        let mut doubled: Vec<Complex64> = Vec::with_capacity(dslots);
        doubled.extend_from_slice(&v);
        doubled.extend_from_slice(&v);

        let cts = coeffs_to_slots_maps(log_slots, log_n, 2, 1.0);
        let mut x = doubled;
        for m in cts.iter() {
            x = apply_map(m, &x);
        }
        // lower half holds bit-reversed w, upper half zeroed
        let want = bit_reverse_vec(&w);
        for u in 0..s {
            assert!((x[u] - want[u]).norm() < 1e-9);
            assert!(x[u + s].norm() < 1e-9);
        }

        // simulate the repack: real parts low, imaginary parts high
        let mut repacked: Vec<Complex64> = vec![Complex64::new(0.0, 0.0); dslots];
        for u in 0..s {
            repacked[u] = Complex64::new(x[u].re, 0.0);
            repacked[u + s] = Complex64::new(x[u].im, 0.0);
        }

        let stc = slots_to_coeffs_maps(log_slots, log_n, 2, 1.0);
        let mut y = repacked;
        for m in stc.iter() {
            y = apply_map(m, &y);
        }
        for u in 0..dslots {
            assert!((y[u] - v[u % s]).norm() < 1e-9, "slot {u}");
        }
    }
}
