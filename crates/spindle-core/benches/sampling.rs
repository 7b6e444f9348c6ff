use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use spindle_core::generation::{
    pipeline::ScoreTransformPipeline,
    repetition::RepetitionGuard,
    sampler::{apply_top_k, apply_top_p, softmax, TokenSelector},
    GenerationState,
};
use spindle_core::policy::{GenerationPolicy, PolicyParams};

const VOCAB_SIZES: [usize; 3] = [1_000, 32_000, 128_000];

fn scores(vocab: usize) -> Vec<f32> {
    (0..vocab).map(|i| ((i * 7919) % 1000) as f32 / 100.0 - 5.0).collect()
}

fn bench_softmax(c: &mut Criterion) {
    let mut group = c.benchmark_group("softmax");
    for vocab in VOCAB_SIZES {
        let input = scores(vocab);
        group.bench_with_input(BenchmarkId::from_parameter(vocab), &input, |b, input| {
            b.iter(|| softmax(black_box(input)))
        });
    }
    group.finish();
}

fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection");
    for vocab in VOCAB_SIZES {
        let input = scores(vocab);

        group.bench_with_input(BenchmarkId::new("argmax", vocab), &input, |b, input| {
            let selector = TokenSelector::new([0, 1, 2, 3], Some(0));
            b.iter(|| selector.argmax(black_box(input)))
        });

        group.bench_with_input(BenchmarkId::new("top_k_50", vocab), &input, |b, input| {
            b.iter(|| {
                let mut filtered = input.clone();
                apply_top_k(&mut filtered, 50).map(|_| filtered)
            })
        });

        group.bench_with_input(BenchmarkId::new("top_p_0.9", vocab), &input, |b, input| {
            b.iter(|| {
                let mut filtered = input.clone();
                apply_top_p(&mut filtered, 0.9).map(|_| filtered)
            })
        });

        group.bench_with_input(BenchmarkId::new("sample", vocab), &input, |b, input| {
            let mut selector = TokenSelector::new([], Some(7));
            b.iter(|| selector.sample(black_box(input)))
        });
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let policy = GenerationPolicy::create(PolicyParams {
        temperature: 0.8,
        repetition_penalty: 1.2,
        min_output_tokens: 4,
        banned_sequences: Some(vec![vec![17], vec![100, 200, 300], vec![5, 6]]),
        ..Default::default()
    })
    .expect("valid policy");
    let pipeline = ScoreTransformPipeline::new(&policy, 2);

    let mut state = GenerationState::new();
    for token in (0..256u32).map(|i| (i * 31) % 1000) {
        state.push(token);
    }

    let input = scores(32_000);
    c.bench_function("pipeline_32k", |b| {
        b.iter(|| {
            let mut step = input.clone();
            pipeline.apply(&mut step, black_box(&state)).map(|_| step)
        })
    });
}

fn bench_repetition_guard(c: &mut Criterion) {
    let history: Vec<u32> = (0..512u32).map(|i| (i * 13) % 97).collect();
    c.bench_function("repetition_guard_512", |b| {
        b.iter(|| {
            let mut guard = RepetitionGuard::new(5, 3).expect("valid guard");
            for end in 1..=history.len() {
                black_box(guard.check(&history[..end]));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_softmax,
    bench_selection,
    bench_pipeline,
    bench_repetition_guard
);
criterion_main!(benches);
