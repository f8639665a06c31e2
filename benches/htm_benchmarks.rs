//! Benchmarks for the hot paths of the HTM engine.
//!
//! Each group compares the sequential strategy against the rayon-backed one
//! where both exist.
//!
//! Run with: `cargo bench --bench htm_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use cortical::algorithms::{ActivityExecutor, ColumnExecutor};
use cortical::prelude::*;

fn random_input(size: usize, sparsity: f64, rng: &mut Random) -> Vec<u8> {
    (0..size).map(|_| u8::from(rng.get_real64() < sparsity)).collect()
}

fn sp_config(input_size: usize, column_count: usize) -> HtmConfig {
    let mut config = HtmConfig::new(&[input_size], &[column_count]);
    config.potential_radius = (input_size / 2) as i32;
    config.global_inhibition = true;
    config.local_area_density = 0.02;
    config.stimulus_threshold = 1.0;
    config
}

// =============================================================================
// SPATIAL POOLER BENCHMARKS
// =============================================================================

fn bench_spatial_pooler_compute(c: &mut Criterion) {
    let mut group = c.benchmark_group("sp_compute");
    group.sample_size(50);

    for (input_size, column_count) in &[(100, 2048), (1024, 2048), (2048, 4096)] {
        let mut rng = Random::new(42);
        let input = random_input(*input_size, 0.05, &mut rng);

        let mut mem = Connections::new(sp_config(*input_size, *column_count)).unwrap();
        let mut sp = SpatialPooler::init(&mut mem).unwrap();

        group.throughput(Throughput::Elements(*column_count as u64));
        group.bench_function(
            BenchmarkId::new(format!("in_{}_cols_{}", input_size, column_count), column_count),
            |b| b.iter(|| black_box(sp.compute(&mut mem, &input, false).unwrap())),
        );
    }

    group.finish();
}

/// Overlap computation with both strategies.
fn bench_sp_overlaps(c: &mut Criterion) {
    let mut group = c.benchmark_group("sp_overlaps");

    let mut rng = Random::new(42);
    let input = random_input(1024, 0.05, &mut rng);
    let mut mem = Connections::new(sp_config(1024, 4096)).unwrap();
    SpatialPooler::init(&mut mem).unwrap();

    group.bench_function("sequential", |b| {
        b.iter(|| black_box(Sequential.compute_overlaps(mem.columns(), &input, 1.0)));
    });
    group.bench_function("parallel", |b| {
        b.iter(|| black_box(Parallel.compute_overlaps(mem.columns(), &input, 1.0)));
    });

    group.finish();
}

fn bench_sp_learning(c: &mut Criterion) {
    let mut group = c.benchmark_group("sp_learning");
    group.sample_size(30);

    let mut rng = Random::new(42);
    let inputs: Vec<Vec<u8>> = (0..16).map(|_| random_input(1024, 0.05, &mut rng)).collect();

    let mut mem = Connections::new(sp_config(1024, 2048)).unwrap();
    let mut sp = SpatialPooler::init(&mut mem).unwrap();
    group.bench_function("sequential", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % inputs.len();
            black_box(sp.compute(&mut mem, &inputs[i], true).unwrap())
        });
    });

    let mut mem = Connections::new(sp_config(1024, 2048)).unwrap();
    let mut sp = SpatialPoolerMt::with_executor(&mut mem, Parallel).unwrap();
    group.bench_function("parallel", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % inputs.len();
            black_box(sp.compute(&mut mem, &inputs[i], true).unwrap())
        });
    });

    group.finish();
}

// =============================================================================
// TEMPORAL MEMORY BENCHMARKS
// =============================================================================

fn tm_network(column_count: usize) -> (Connections, Vec<Vec<ColumnIdx>>) {
    let mut config = HtmConfig::new(&[64], &[column_count]);
    config.cells_per_column = 16;
    config.activation_threshold = 8;
    config.min_threshold = 6;
    config.initial_permanence = 0.51;

    let mut rng = Random::new(42);
    let sequence: Vec<Vec<ColumnIdx>> = (0..10)
        .map(|_| {
            let all: Vec<ColumnIdx> = (0..column_count as ColumnIdx).collect();
            let mut active = rng.sample(all, column_count / 50);
            active.sort_unstable();
            active
        })
        .collect();

    (Connections::new(config).unwrap(), sequence)
}

fn bench_temporal_memory_compute(c: &mut Criterion) {
    let mut group = c.benchmark_group("tm_compute");
    group.sample_size(30);

    for column_count in [1024, 2048] {
        let (mut mem, sequence) = tm_network(column_count);
        let tm = TemporalMemory::init(&mut mem).unwrap();
        for pattern in sequence.iter().cycle().take(50) {
            tm.compute(&mut mem, pattern, true).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("sequential", column_count), &sequence, |b, sequence| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % sequence.len();
                black_box(tm.compute(&mut mem, &sequence[i], true).unwrap())
            });
        });

        let (mut mem, sequence) = tm_network(column_count);
        let tm = TemporalMemoryMt::with_executor(&mut mem, Parallel).unwrap();
        for pattern in sequence.iter().cycle().take(50) {
            tm.compute(&mut mem, pattern, true).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("parallel", column_count), &sequence, |b, sequence| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % sequence.len();
                black_box(tm.compute(&mut mem, &sequence[i], true).unwrap())
            });
        });
    }

    group.finish();
}

// =============================================================================
// CONNECTIONS BENCHMARKS
// =============================================================================

fn bench_connections_activity(c: &mut Criterion) {
    let mut group = c.benchmark_group("connections_activity");

    let mut config = HtmConfig::new(&[64], &[2048]);
    config.cells_per_column = 16;
    let mut mem = Connections::new(config).unwrap();
    let num_cells = mem.num_cells() as CellIdx;

    let mut rng = Random::new(42);
    for _ in 0..20_000 {
        let cell = rng.get_usize(num_cells as usize) as CellIdx;
        let segment = mem.create_distal_segment(cell).unwrap();
        for _ in 0..20 {
            let source = rng.get_usize(num_cells as usize) as CellIdx;
            mem.create_synapse(segment, source, rng.get_real64()).unwrap();
        }
    }
    let all: Vec<CellIdx> = (0..num_cells).collect();
    let mut active = rng.sample(all, 640);
    active.sort_unstable();

    group.throughput(Throughput::Elements(active.len() as u64));
    group.bench_function("sequential", |b| {
        b.iter(|| black_box(Sequential.compute_activity(&mem, &active, 0.5)));
    });
    group.bench_function("parallel", |b| {
        b.iter(|| black_box(Parallel.compute_activity(&mem, &active, 0.5)));
    });

    group.finish();
}

// =============================================================================
// HOMEOSTATIC PLASTICITY BENCHMARKS
// =============================================================================

fn bench_homeostatic_compute(c: &mut Criterion) {
    let mut group = c.benchmark_group("homeostatic_compute");

    let mut rng = Random::new(42);
    let inputs: Vec<Vec<u8>> = (0..32).map(|_| random_input(1024, 0.05, &mut rng)).collect();
    let outputs: Vec<Vec<u8>> = (0..32).map(|_| random_input(2048, 0.02, &mut rng)).collect();

    let mut config = HtmConfig::default();
    let mut controller = HomeostaticPlasticityController::detached(100);
    group.bench_function("2048_columns", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % inputs.len();
            black_box(controller.compute(&mut config, &inputs[i], &outputs[i]))
        });
    });

    group.finish();
}

criterion_group!(
    sp_benches,
    bench_spatial_pooler_compute,
    bench_sp_overlaps,
    bench_sp_learning,
);

criterion_group!(tm_benches, bench_temporal_memory_compute,);

criterion_group!(connections_benches, bench_connections_activity,);

criterion_group!(homeostatic_benches, bench_homeostatic_compute,);

criterion_main!(sp_benches, tm_benches, connections_benches, homeostatic_benches);
