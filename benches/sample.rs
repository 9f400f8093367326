use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use los_sampler::{
    test_logps::NormalLogp, EnsembleSampler, ImgStack, LosModel, RandomSource, Rect, StepOptions,
};

fn make_stack(n_images: usize) -> ImgStack {
    let rect = Rect::new([4., 0.], [19., 5.], [120, 500]).unwrap();
    let image = rect.raster_from_fn(|x, y| {
        let ridge = 0.02 * x as f64;
        let diff = (y as f64 * 0.01 - ridge) / 0.1;
        (-0.5 * diff * diff).exp()
    });
    ImgStack::from_images(rect, vec![image; n_images]).unwrap()
}

fn criterion_benchmark(c: &mut Criterion) {
    let stack = make_stack(100);
    let profile: Vec<f64> = (0..=30).map(|i| 0.08 * i as f64).collect();
    let mut out = vec![0.; stack.len()];
    c.bench_function("line integral 100 images", |b| {
        b.iter(|| stack.line_integral_into(black_box(&profile), 30, &mut out).unwrap())
    });

    let model = LosModel::new(&stack, 30, 1e-5, -1.).unwrap();
    c.bench_function("log posterior 100 images", |b| {
        b.iter(|| model.log_posterior(black_box(&profile)))
    });

    c.bench_function("los ensemble 10 steps", |b| {
        b.iter_batched(
            || {
                let mut rng = RandomSource::seed_from_u64(42);
                EnsembleSampler::new(&model, 31 * 4, 2, &mut rng).unwrap()
            },
            |mut sampler| sampler.step(&StepOptions::burn_in(10, 1.)).unwrap(),
            BatchSize::LargeInput,
        )
    });

    let target = NormalLogp::new(vec![3.; 10], 1.);
    let mut rng = RandomSource::seed_from_u64(42);
    let mut sampler = EnsembleSampler::new(&target, 40, 2, &mut rng).unwrap();
    c.bench_function("normal 10 ensemble step", |b| {
        b.iter(|| sampler.step(&StepOptions::burn_in(1, 1.)).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
