use crate::{
    bootstrap::{
        dft::{coeffs_to_slots_maps, slots_to_coeffs_maps, RawDiagMap},
        matrix::find_best_n1,
    },
    error::Result,
    params::{BootstrapParameters, CkksParameters},
    rlwe::keyswitch::EvaluationKeys,
};

fn indices_of_map(map: &RawDiagMap, dslots: usize, max_ratio: f64, out: &mut Vec<usize>) {
    let n1 = find_best_n1(map, dslots, max_ratio);
    for &k in map.keys() {
        let baby = k % n1;
        let giant = k - baby;
        if baby != 0 {
            out.push(baby);
        }
        if giant != 0 {
            out.push(giant);
        }
    }
}

/// Every rotation index a bootstrap will ask a switching key for: the
/// baby/giant residues of both factorizations plus the powers of two of the
/// sparse trace (which include the repack rotation by the slot count).
pub fn rotations_for_bootstrapping(
    params: &CkksParameters,
    boot: &BootstrapParameters,
) -> Result<Vec<usize>> {
    boot.validate()?;
    let log_slots = params.log_slots();
    let log_n = params.log_n();
    let sparse = log_slots < log_n - 1;
    let dslots = if sparse {
        2usize << log_slots
    } else {
        1usize << log_slots
    };

    let mut out = Vec::new();
    for map in coeffs_to_slots_maps(log_slots, log_n, boot.cts_depth, 1.0) {
        indices_of_map(&map, dslots, boot.max_n1_n2_ratio, &mut out);
    }
    for map in slots_to_coeffs_maps(log_slots, log_n, boot.stc_depth, 1.0) {
        indices_of_map(&map, dslots, boot.max_n1_n2_ratio, &mut out);
    }
    if sparse {
        for i in log_slots..log_n - 1 {
            out.push(1usize << i);
        }
    }

    out.sort_unstable();
    out.dedup();
    Ok(out)
}

/// Verifies the key set covers a bootstrap before the first call: the
/// relinearization and conjugation keys plus every derived rotation index.
pub(crate) fn check_keys(keys: &EvaluationKeys, rotations: &[usize]) -> Result<()> {
    keys.relin_key()?;
    keys.conjugation_key()?;
    for &k in rotations {
        keys.rotation_key(k)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::params::BootstrapParameterSet;
    use crate::rlwe::ClientKey;
    use crate::utils::DefaultSecureRng;
    use std::sync::Arc;

    #[test]
    fn indices_are_unique_and_in_range() {
        for set in [BootstrapParameterSet::toy(), BootstrapParameterSet::toy_sparse()] {
            let params = set.ckks_parameters().unwrap();
            let rotations = rotations_for_bootstrapping(&params, &set.boot).unwrap();
            let mut sorted = rotations.clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted, rotations, "duplicates in the index set");
            let half = params.degree() / 2;
            assert!(rotations.iter().all(|&k| k > 0 && k < half));
        }
    }

    #[test]
    fn sparse_set_includes_trace_powers() {
        let set = BootstrapParameterSet::toy_sparse();
        let params = set.ckks_parameters().unwrap();
        let rotations = rotations_for_bootstrapping(&params, &set.boot).unwrap();
        for i in params.log_slots()..params.log_n() - 1 {
            assert!(rotations.contains(&(1usize << i)), "missing 2^{i}");
        }
    }

    #[test]
    fn check_keys_reports_missing_conjugation() {
        let set = BootstrapParameterSet::toy();
        let params = Arc::new(set.ckks_parameters().unwrap());
        let mut rng = DefaultSecureRng::new_seeded(80);
        let ck = ClientKey::new_with_rng(&params, &mut rng);
        let rotations = rotations_for_bootstrapping(&params, &set.boot).unwrap();

        let mut keys = ck.gen_evaluation_keys(&rotations, &mut rng);
        keys.conj = None;
        assert_eq!(
            check_keys(&keys, &rotations).unwrap_err(),
            Error::MissingKey("conjugate".to_string())
        );
    }
}
