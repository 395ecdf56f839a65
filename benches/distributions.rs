use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use involutive_mh::changepoint::{initial_trace, ChangePointConfig, ChangePointKernel, MoveSettings};
use involutive_mh::distributions::{BroadcastedNormal, Gamma, MvNormal, Normal};
use involutive_mh::jacobian::{Analytic, ForwardDiff};
use involutive_mh::{Distribution, Kernel};
use ndarray::{Array1, Array2};
use rand::rngs::SmallRng;
use rand::SeedableRng;

fn changepoint_events() -> Vec<f64> {
    let mut events: Vec<f64> = (0..200).map(|i| 0.0125 + 0.025 * i as f64).collect();
    events.extend((0..20).map(|i| 5.1 + 0.24 * i as f64));
    events
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("normal logp grad", |b| {
        b.iter(|| Normal.log_density_grad(black_box(&0.3), black_box(&(1., 2.))))
    });
    c.bench_function("gamma logp grad", |b| {
        b.iter(|| Gamma.log_density_grad(black_box(&0.3), black_box(&(1.5, 2.))))
    });

    let x = Array2::from_shape_fn((100, 10), |(i, j)| (i as f64 - j as f64) * 0.01).into_dyn();
    let params = (
        Array1::linspace(-1., 1., 100).into_dyn(),
        Array2::from_elem((1, 10), 1.5).into_dyn(),
    );
    c.bench_function("broadcasted normal 100x10", |b| {
        b.iter(|| BroadcastedNormal.log_density_grad(black_box(&x), black_box(&params)))
    });

    let cov = Array2::from_shape_fn((10, 10), |(i, j)| if i == j { 2. } else { 0.3 });
    let params = (vec![0.; 10], cov);
    let value = vec![0.5; 10];
    c.bench_function("mv normal logp 10", |b| {
        b.iter(|| MvNormal.log_density(black_box(&value), black_box(&params)))
    });

    let config = ChangePointConfig {
        start: 0.,
        end: 10.,
        ..ChangePointConfig::default()
    };
    let mut rng = SmallRng::seed_from_u64(42);
    let trace = initial_trace(config, changepoint_events(), &mut rng).unwrap();

    let analytic = ChangePointKernel::new(config, MoveSettings::default(), Analytic);
    c.bench_function("changepoint kernel analytic", |b| {
        b.iter_batched(
            || SmallRng::seed_from_u64(42),
            |mut rng| analytic.step(&mut rng, black_box(&trace)).unwrap(),
            BatchSize::SmallInput,
        )
    });

    let forward = ChangePointKernel::new(config, MoveSettings::default(), ForwardDiff);
    c.bench_function("changepoint kernel forward diff", |b| {
        b.iter_batched(
            || SmallRng::seed_from_u64(42),
            |mut rng| forward.step(&mut rng, black_box(&trace)).unwrap(),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
