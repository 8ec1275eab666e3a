use criterion::{black_box, criterion_group, criterion_main, Criterion};
use meg_daq::geometry::{nearest, project_with_workers, SurfaceMesh};
use meg_daq::protocol::{decode_samples, swap_f32};
use rand::prelude::*;

fn benchmark(c: &mut Criterion) {
    let mut rng = rand::thread_rng();

    // A data-socket message worth of 306 channels x 100 instants
    let mut dummy_message = vec![0u8; 1 + 4 * 306 * 100];
    rng.fill(&mut dummy_message[1..]);
    dummy_message[0] = 4;

    c.bench_function("decode samples", |b| {
        b.iter(|| decode_samples(black_box(&dummy_message), black_box(306)).unwrap())
    });

    c.bench_function("byte swap", |b| {
        b.iter(|| swap_f32(black_box(1.5f32)))
    });

    let rows: Vec<[f64; 3]> = (0..10_000)
        .map(|_| [rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()])
        .collect();
    let mesh = SurfaceMesh::from_rows(&rows);
    let sensors: Vec<[f64; 3]> = (0..306)
        .map(|_| [rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()])
        .collect();

    c.bench_function("nearest vertex scan", |b| {
        b.iter(|| nearest(black_box(&mesh), black_box(&sensors)))
    });

    c.bench_function("nearest vertex 4 workers", |b| {
        b.iter(|| project_with_workers(black_box(&mesh), black_box(&sensors), black_box(4)))
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
