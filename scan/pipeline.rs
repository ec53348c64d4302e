// ========================================================================================
//
//                               The scan orchestrator
//
// ========================================================================================
//
// One dispatching thread walks the window sets left to right. For every set it reads
// the permutation slab spanning the set, fans the windows out to scoped workers, and
// appends the set's results before touching the next set. Memory is bounded by one
// slab at a time.

use crate::config::{ConfigError, ScanConfig, ScanJob};
use crate::dispatch::{WindowTest, evaluate_window_set};
use crate::results::ScanResult;
use crate::slab::{PermutationSource, StackedSource};
use crate::store::validate::{ConsistencyError, check_consistency};
use crate::store::{PermutationStore, StoreError, StoreTables};
use crate::types::{MarkerIndexError, ScanInputs};
use crate::window::WindowPlan;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ========================================================================================
//                                    Error handling
// ========================================================================================

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("input stores are inconsistent: {0}")]
    Consistency(#[from] ConsistencyError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid scan inputs: {0}")]
    Inputs(#[from] MarkerIndexError),
    #[error("the input stores hold no permutations; a p-value needs at least one")]
    NoPermutations,
    #[error("could not write results to {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ScanError {
    /// Process exit status for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            ScanError::Config(_) => 2,
            ScanError::Consistency(_) => 3,
            ScanError::Store(_)
            | ScanError::Inputs(_)
            | ScanError::NoPermutations
            | ScanError::Output { .. } => 4,
        }
    }
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    let style = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    )
    .map(|style| style.progress_chars("█▉▊▋▌▍▎▏  "))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(message.to_string());

    pb
}

// ========================================================================================
//                                     The scan loop
// ========================================================================================

/// Runs the sliding-window permutation test over `inputs`, drawing replicates from
/// `source`.
pub fn run_scan<S: PermutationSource>(
    inputs: &ScanInputs,
    source: &S,
    config: &ScanConfig,
) -> Result<ScanResult, ScanError> {
    if source.n_markers() != inputs.markers.len() {
        return Err(StoreError::WidthMismatch {
            expected: inputs.markers.len(),
            found: source.n_markers(),
        }
        .into());
    }
    if source.n_permutations() == 0 {
        return Err(ScanError::NoPermutations);
    }

    let mut result = ScanResult::new();
    let Some(last_position) = inputs.markers.last_position() else {
        log::warn!("The marker table is empty; nothing to scan");
        return Ok(result);
    };

    let plan = WindowPlan::new(
        config.window_size,
        config.jump_size,
        config.window_set_size,
        last_position,
    );
    let test = WindowTest {
        top_k: config.top_k,
        ld_cutoff: config.ld_cutoff,
    };
    log::info!(
        "Scanning {} markers with {} permutations: {} window sets of up to {} windows",
        inputs.markers.len(),
        source.n_permutations(),
        plan.set_count(),
        config.window_set_size
    );

    let pb = create_progress_bar(plan.set_count() as u64, "Scanning window sets");
    for set in plan.window_sets(inputs.markers.positions()) {
        let Some(span) = set.marker_span() else {
            log::warn!(
                "Window set {} ({} windows starting at {}) contains no markers",
                set.ordinal,
                set.windows.len(),
                set.windows.first().map_or(0, |w| w.left)
            );
            pb.inc(1);
            continue;
        };

        let slab = source.fetch(span.columns())?;
        log::debug!(
            "Window set {}: {} of {} windows occupied, markers {span}",
            set.ordinal,
            set.occupied_windows(),
            set.windows.len()
        );
        result.extend_from_set(evaluate_window_set(&set, inputs, &slab, test));
        pb.inc(1);
    }
    pb.finish_with_message("Scan complete");

    log::info!("Computed p-values for {} windows", result.len());
    Ok(result)
}

// ========================================================================================
//                                   Store-backed scans
// ========================================================================================

/// The stores of one scan, cross-checked and stacked along the permutation axis.
pub type StoreSet = StackedSource<crate::store::ChunkedMatrix>;

fn open_stores(paths: &[PathBuf]) -> Result<Vec<PermutationStore>, ScanError> {
    if paths.is_empty() {
        return Err(ConfigError::NoStores.into());
    }
    let stores = paths
        .iter()
        .map(|path| PermutationStore::open(path))
        .collect::<Result<Vec<_>, _>>()?;
    let labelled: Vec<(&Path, &StoreTables)> =
        stores.iter().map(|s| (s.path(), s.tables())).collect();
    check_consistency(&labelled)?;
    Ok(stores)
}

/// Opens every store and runs the cross-store consistency check. Returns the total
/// number of permutations available.
pub fn check_stores(paths: &[PathBuf]) -> Result<usize, ScanError> {
    let stores = open_stores(paths)?;
    Ok(stores
        .iter()
        .map(|s| s.matrix().manifest().n_permutations)
        .sum())
}

/// Opens the job's stores, checks them against each other, scans them as one
/// permutation matrix and writes the result table.
pub fn run_scan_job(job: &ScanJob) -> Result<ScanResult, ScanError> {
    let config = &job.config;
    log::info!(
        "Opening {} store(s): {}",
        job.stores.len(),
        job.stores.iter().map(|p| p.display()).join(", ")
    );
    let stores = open_stores(&job.stores)?;

    for store in &stores {
        let manifest = store.matrix().manifest();
        if manifest.chunk_markers != config.chunk_markers
            || manifest.chunk_permutations != config.chunk_permutations
        {
            log::warn!(
                "{} is chunked as {} permutations x {} markers, not the requested {} x {}; using the stored layout",
                store.path().display(),
                manifest.chunk_permutations,
                manifest.chunk_markers,
                config.chunk_permutations,
                config.chunk_markers
            );
        }
    }

    let mut tables = None;
    let mut matrices = Vec::with_capacity(stores.len());
    for store in stores {
        let (store_tables, matrix) = store.into_parts();
        if tables.is_none() {
            tables = Some(store_tables);
        }
        matrices.push(matrix);
    }
    let inputs = tables
        .ok_or(ConfigError::NoStores)?
        .into_scan_inputs()?;
    let source: StoreSet = StackedSource::new(matrices, config.max_permutations)?;

    let result = run_scan(&inputs, &source, config)?;
    result
        .write_to_path(&job.output)
        .map_err(|source| ScanError::Output {
            path: job.output.clone(),
            source,
        })?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ld::LdTable;
    use crate::slab::DenseSource;
    use crate::types::MarkerIndex;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn config(
        window_size: i64,
        jump_size: i64,
        top_k: usize,
        window_set_size: usize,
    ) -> ScanConfig {
        ScanConfig {
            window_size,
            jump_size,
            top_k,
            window_set_size,
            ld_cutoff: 0.5,
            chunk_markers: 50,
            chunk_permutations: 10_000,
            max_permutations: None,
        }
    }

    fn inputs(positions: Vec<i32>, observed: Vec<f64>) -> ScanInputs {
        let n = positions.len();
        let markers = MarkerIndex::new(
            (0..n).map(|i| format!("m{i}")).collect(),
            vec!["2".to_string(); n],
            positions,
        )
        .unwrap();
        ScanInputs::new(markers, observed, LdTable::new()).unwrap()
    }

    #[test]
    fn worked_example_scans_windows_in_order() {
        let inputs = inputs(vec![10, 20, 30, 40, 50], vec![3.0, 2.0, 1.0, 0.5, 0.1]);
        let source = DenseSource::new(Array2::from_elem((10, 5), 0.2));
        let result = run_scan(&inputs, &source, &config(25, 25, 2, 1)).unwrap();

        // Only [1,26] fits: a window starting at 26 would end past the last marker.
        let midpoints: Vec<i64> = result.rows().iter().map(|r| r.midpoint).collect();
        assert_eq!(midpoints, [13]);
        assert!(result.rows().iter().all(|r| r.p_value == 0.0));
    }

    #[test]
    fn set_size_does_not_change_the_windows_of_a_scan() {
        let positions: Vec<i32> = (0..40).map(|i| 5 + i * 11).collect();
        let observed: Vec<f64> = (0..40).map(|i| ((i * 7) % 5) as f64 * 0.6).collect();
        let inputs = inputs(positions, observed);
        let source = DenseSource::new(Array2::from_shape_fn((64, 40), |(r, c)| {
            ((r * 13 + c * 29) % 17) as f64 / 6.0
        }));

        let one = run_scan(&inputs, &source, &config(60, 15, 3, 1)).unwrap();
        let many = run_scan(&inputs, &source, &config(60, 15, 3, 7)).unwrap();
        assert_eq!(one, many);
        assert!(!one.is_empty());
        for row in one.rows() {
            assert!((0.0..=1.0).contains(&row.p_value));
            assert_abs_diff_eq!(row.p_value * 64.0, (row.p_value * 64.0).round(), epsilon = 1e-9);
        }
    }

    #[test]
    fn gaps_without_markers_are_skipped() {
        let inputs = inputs(vec![5, 8, 500, 505], vec![1.0, 2.0, 3.0, 4.0]);
        let source = DenseSource::new(Array2::from_elem((3, 4), 10.0));
        let result = run_scan(&inputs, &source, &config(10, 10, 1, 2)).unwrap();
        assert_eq!(result.rows().first().map(|r| r.midpoint), Some(6));
        assert_eq!(result.rows().last().map(|r| r.midpoint), Some(496));
        assert!(result.rows().iter().all(|r| r.p_value == 1.0));
    }

    #[test]
    fn zero_permutations_are_fatal() {
        let inputs = inputs(vec![10, 20], vec![1.0, 2.0]);
        let source = DenseSource::new(Array2::zeros((0, 2)));
        let err = run_scan(&inputs, &source, &config(5, 5, 1, 1)).unwrap_err();
        assert!(matches!(err, ScanError::NoPermutations));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn exit_codes_follow_the_error_class() {
        assert_eq!(ScanError::from(ConfigError::TopK).exit_code(), 2);
        assert_eq!(
            ScanError::from(ConsistencyError::Mismatched(Vec::new())).exit_code(),
            3
        );
        assert_eq!(
            ScanError::from(StoreError::RowWidth {
                expected: 1,
                found: 2
            })
            .exit_code(),
            4
        );
    }
}
