use criterion::{black_box, criterion_group, criterion_main, Criterion};
use projection_alignment::*;

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");
    for (width, height) in [(128, 64), (512, 256)] {
        let scan = SyntheticScan::new(width, height).with_truth(width as f64 / 2.0 + 1.3, 0.2);
        let (first, last) = scan.render().unwrap();
        let model = AlignmentModel::new(first, last, CropBorders::new(16, 8, 8)).unwrap();
        let params = AlignmentParameters::new(width as f64 / 2.0, 0.1);

        group.bench_function(format!("{}x{}", width, height), |b| {
            b.iter(|| model.evaluate(black_box(&params)).unwrap())
        });
    }
    group.finish();
}

fn bench_ncc(c: &mut Criterion) {
    let (first, last) = SyntheticScan::new(512, 256).render().unwrap();
    c.bench_function("ncc_512x256", |b| {
        b.iter(|| NormalizedCrossCorrelation::compute(black_box(&first), black_box(&last)).unwrap())
    });
}

criterion_group!(benches, bench_evaluate, bench_ncc);
criterion_main!(benches);
