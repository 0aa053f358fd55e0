use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use meshloc::{Mesh, PointLocator, SpatialIndex};
use rand::prelude::*;

pub fn create_spatial_index(c: &mut Criterion) {
    let (xmin, xmax) = (0., 10.);
    let (ymin, ymax) = (0., 10.);

    for n in [5, 50, 200] {
        let mesh = Mesh::grid(xmin, xmax, ymin, ymax, n, n).unwrap();

        c.bench_with_input(
            BenchmarkId::new("Create spatial index", n),
            &mesh,
            |b, m| {
                b.iter(|| SpatialIndex::new(m).unwrap());
            },
        );
    }
}

pub fn locate_points(c: &mut Criterion) {
    let (xmin, xmax) = (0., 10.);
    let (ymin, ymax) = (0., 10.);

    for n in [5, 50, 200] {
        let mesh = Mesh::grid(xmin, xmax, ymin, ymax, n, n).unwrap();
        let index = SpatialIndex::new(&mesh).unwrap();

        let mut rng = rand::thread_rng();
        let query: Vec<_> = (0..42_000)
            .map(|_| [rng.gen::<f64>() * xmax, rng.gen::<f64>() * ymax])
            .collect();

        c.bench_with_input(BenchmarkId::new("Locate points", n), &query, |b, q| {
            b.iter(|| index.locate_many(q));
        });
        c.bench_with_input(
            BenchmarkId::new("Locate points in parallel", n),
            &query,
            |b, q| {
                b.iter(|| index.par_locate_many(q));
            },
        );
    }
}

criterion_group!(benches, create_spatial_index, locate_points);
criterion_main!(benches);
