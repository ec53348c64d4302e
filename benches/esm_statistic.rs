// ========================================================================================
//
//                        ESM_k PERMUTATION LOOP BENCHMARK
//
// ========================================================================================
//
// Measures the per-window work a scan worker does: pruning, the observed statistic,
// and the permutation p-value over every replicate row, for window widths typical of
// dense and sparse regions.
//
// ========================================================================================

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use esmk::ld::{LdTable, prune_window};
use esmk::statistic::{EsmStatistic, permutation_p_value};
use esmk::types::MarkerRange;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Replicate rows evaluated per window.
const PERMUTATIONS: usize = 10_000;
/// Markers per window.
const WINDOW_WIDTHS: [usize; 4] = [10, 50, 200, 1000];
const TOP_K: usize = 10;

fn bench_window_p_value(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let mut group = c.benchmark_group("window_p_value");
    group.sample_size(10);

    for &width in &WINDOW_WIDTHS {
        let replicates = Array2::from_shape_fn((PERMUTATIONS, width), |_| rng.gen_range(0.0..5.0));
        let observed: Vec<f64> = (0..width).map(|_| rng.gen_range(0.0..5.0)).collect();
        let mut ld = LdTable::new();
        for marker in 0..width.saturating_sub(1) {
            ld.insert(marker, marker + 1, rng.gen_range(0.0..1.0));
        }
        let Some(range) = MarkerRange::new(0, width - 1) else {
            continue;
        };

        group.throughput(Throughput::Elements((PERMUTATIONS * width) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                let mask = prune_window(range, &ld, 0.5);
                let statistic = EsmStatistic::new(width, TOP_K);
                let mut scratch = Vec::with_capacity(width);
                let esm = statistic.evaluate_masked(&observed, &mask, &mut scratch);
                black_box(permutation_p_value(
                    replicates.view(),
                    &mask,
                    &statistic,
                    esm,
                ))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_window_p_value);
criterion_main!(benches);
