use annmat::{io, AnnData, AxisIndex, CompressedMatrix, DenseMatrix, MatrixFormat, ReadOptions, Selector, Table};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

const ROWS: usize = 20_000;
const COLS: usize = 200;

fn sample(format: MatrixFormat) -> AnnData {
    let mut rng = StdRng::seed_from_u64(1);
    let values: Vec<f32> = (0..ROWS * COLS)
        .map(|_| if rng.gen_bool(0.05) { rng.gen_range(1.0..50.0) } else { 0.0 })
        .collect();
    let dense = DenseMatrix::new(ROWS, COLS, values).expect("valid shape");
    let obs = Table::new(AxisIndex::new((0..ROWS).map(|i| format!("cell{i}"))));
    let var = Table::new(AxisIndex::new((0..COLS).map(|i| format!("gene{i}"))));
    match format {
        MatrixFormat::Dense => AnnData::new(dense, obs, var),
        sparse => AnnData::new(CompressedMatrix::from_dense(&dense, sparse), obs, var),
    }
    .expect("consistent container")
}

fn bench_views(c: &mut Criterion) {
    let data = sample(MatrixFormat::Csr);
    let mut rng = StdRng::seed_from_u64(2);
    let rows: Vec<usize> = (0..1_000).map(|_| rng.gen_range(0..ROWS)).collect();

    c.bench_function("select_chained_view", |b| {
        b.iter(|| {
            let view = data.select(Selector::Range(1_000..15_000), ..).expect("select");
            black_box(view.select(Selector::Range(100..5_000), ..).expect("select"))
        })
    });

    c.bench_function("read_random_rows_in_memory", |b| {
        b.iter(|| {
            let view = data.select(rows.clone(), ..).expect("select");
            black_box(view.read_x().expect("read"))
        })
    });
}

fn bench_backed(c: &mut Criterion) {
    let dir = TempDir::new().expect("temp dir");
    let mut group = c.benchmark_group("backed_read");
    let mut rng = StdRng::seed_from_u64(3);
    let rows: Vec<usize> = (0..1_000).map(|_| rng.gen_range(0..ROWS)).collect();

    for format in [MatrixFormat::Dense, MatrixFormat::Csr, MatrixFormat::Csc] {
        let path = dir.path().join(format!("{format}.annm"));
        sample(format).write(&path).expect("write");
        let mut backed = io::open(&path).expect("open");

        for chunk_size in [64, 4_096] {
            backed.set_read_options(ReadOptions::default().with_chunk_size(chunk_size));
            group.bench_with_input(
                BenchmarkId::new(format.to_string(), chunk_size),
                &chunk_size,
                |b, _| {
                    b.iter(|| {
                        let view = backed.select(rows.clone(), ..).expect("select");
                        black_box(view.read_x().expect("read"))
                    })
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_views, bench_backed);
criterion_main!(benches);
