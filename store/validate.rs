// ========================================================================================
//                           Cross-store consistency check
// ========================================================================================
//
// Stores are concatenated along the permutation axis only, so every store must
// describe exactly the same markers and LD pairs. Each store is compared against the
// first one; all disagreements are collected before failing.

use super::StoreTables;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Mismatch {
    #[error("marker identifiers of {store} differ from {reference}")]
    MarkerIds { store: PathBuf, reference: PathBuf },
    #[error("chromosome labels of {store} differ from {reference}")]
    Chromosomes { store: PathBuf, reference: PathBuf },
    #[error("marker positions of {store} differ from {reference}")]
    Positions { store: PathBuf, reference: PathBuf },
    #[error("LD snp_a list of {store} differs from {reference}")]
    LdSnpA { store: PathBuf, reference: PathBuf },
    #[error("LD snp_b list of {store} differs from {reference}")]
    LdSnpB { store: PathBuf, reference: PathBuf },
    #[error("{store} spans several chromosomes ({}); a scan covers exactly one", labels.join(", "))]
    MultipleChromosomes { store: PathBuf, labels: Vec<String> },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("{} inconsistencies between input stores", .0.len())]
    Mismatched(Vec<Mismatch>),
}

fn chromosome_set(tables: &StoreTables) -> BTreeSet<&str> {
    tables
        .markers
        .chromosomes()
        .iter()
        .map(String::as_str)
        .collect()
}

/// Checks that every store agrees with the first on markers and LD pairs, and that
/// no store spans more than one chromosome. Each mismatch is logged as it is found.
pub fn check_consistency(stores: &[(&Path, &StoreTables)]) -> Result<(), ConsistencyError> {
    let mut mismatches = Vec::new();

    for &(store, tables) in stores {
        let labels = chromosome_set(tables);
        if labels.len() > 1 {
            mismatches.push(Mismatch::MultipleChromosomes {
                store: store.to_path_buf(),
                labels: labels.into_iter().map(str::to_string).collect(),
            });
        }
    }

    if let Some((&(reference, first), rest)) = stores.split_first() {
        let reference_labels = chromosome_set(first);
        for &(store, tables) in rest {
            let pair = || (store.to_path_buf(), reference.to_path_buf());
            if tables.markers.ids() != first.markers.ids() {
                let (store, reference) = pair();
                mismatches.push(Mismatch::MarkerIds { store, reference });
            }
            if chromosome_set(tables) != reference_labels {
                let (store, reference) = pair();
                mismatches.push(Mismatch::Chromosomes { store, reference });
            }
            if tables.markers.positions() != first.markers.positions() {
                let (store, reference) = pair();
                mismatches.push(Mismatch::Positions { store, reference });
            }
            if tables.ld.snp_a != first.ld.snp_a {
                let (store, reference) = pair();
                mismatches.push(Mismatch::LdSnpA { store, reference });
            }
            if tables.ld.snp_b != first.ld.snp_b {
                let (store, reference) = pair();
                mismatches.push(Mismatch::LdSnpB { store, reference });
            }
        }
    }

    if mismatches.is_empty() {
        log::info!("{} store(s) passed the consistency check", stores.len());
        return Ok(());
    }
    for mismatch in &mismatches {
        log::error!("{mismatch}");
    }
    Err(ConsistencyError::Mismatched(mismatches))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LdPairs;
    use crate::types::MarkerIndex;

    fn tables(ids: &[&str], chrs: &[&str], positions: &[i32]) -> StoreTables {
        let strings = |values: &[&str]| -> Vec<String> {
            values.iter().map(|s| s.to_string()).collect()
        };
        let mut ld = LdPairs::default();
        ld.push(ids[0].to_string(), ids[1].to_string(), 0.4);
        StoreTables::new(
            MarkerIndex::new(strings(ids), strings(chrs), positions.to_vec()).unwrap(),
            vec![0.0; ids.len()],
            ld,
        )
        .unwrap()
    }

    #[test]
    fn identical_stores_pass() {
        let a = tables(&["rs1", "rs2"], &["3", "3"], &[10, 20]);
        let b = a.clone();
        let stores = [(Path::new("a"), &a), (Path::new("b"), &b)];
        assert_eq!(check_consistency(&stores), Ok(()));
    }

    #[test]
    fn reordered_identifiers_are_reported_even_with_equal_positions() {
        let a = tables(&["rs1", "rs2"], &["3", "3"], &[10, 20]);
        let b = tables(&["rs2", "rs1"], &["3", "3"], &[10, 20]);
        let stores = [(Path::new("a"), &a), (Path::new("b"), &b)];
        let Err(ConsistencyError::Mismatched(found)) = check_consistency(&stores) else {
            panic!("reordered identifiers must be rejected");
        };
        assert!(found.contains(&Mismatch::MarkerIds {
            store: PathBuf::from("b"),
            reference: PathBuf::from("a"),
        }));
        assert!(found.contains(&Mismatch::LdSnpA {
            store: PathBuf::from("b"),
            reference: PathBuf::from("a"),
        }));
        assert!(!found.iter().any(|m| matches!(m, Mismatch::Positions { .. })));
    }

    #[test]
    fn every_disagreement_is_collected() {
        let a = tables(&["rs1", "rs2"], &["3", "3"], &[10, 20]);
        let b = tables(&["rs1", "rs2"], &["4", "4"], &[10, 25]);
        let c = tables(&["rs1", "rs9"], &["3", "3"], &[10, 20]);
        let stores = [(Path::new("a"), &a), (Path::new("b"), &b), (Path::new("c"), &c)];
        let Err(ConsistencyError::Mismatched(found)) = check_consistency(&stores) else {
            panic!("expected mismatches");
        };
        assert_eq!(found.len(), 4);
        assert!(matches!(
            &found[0],
            Mismatch::Chromosomes { store, .. } if store == Path::new("b")
        ));
        assert!(matches!(
            &found[1],
            Mismatch::Positions { store, .. } if store == Path::new("b")
        ));
        assert!(matches!(
            &found[2],
            Mismatch::MarkerIds { store, .. } if store == Path::new("c")
        ));
        assert!(matches!(
            &found[3],
            Mismatch::LdSnpB { store, .. } if store == Path::new("c")
        ));
    }

    #[test]
    fn a_single_store_must_cover_one_chromosome() {
        let a = tables(&["rs1", "rs2"], &["1", "2"], &[10, 20]);
        let stores = [(Path::new("a"), &a)];
        assert_eq!(
            check_consistency(&stores),
            Err(ConsistencyError::Mismatched(vec![Mismatch::MultipleChromosomes {
                store: PathBuf::from("a"),
                labels: vec!["1".to_string(), "2".to_string()],
            }]))
        );
    }
}
