use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reflex_core::reactive::JobQueue;
use reflex_core::{Object, Reaction, ReactionOptions, Reactive, Runtime};

/// `n` reactions that all read `state.n`.
fn fan_out(
    rt: &Runtime,
    state: &Reactive,
    n: usize,
    options: impl Fn() -> ReactionOptions,
) -> Vec<Reaction<()>> {
    (0..n)
        .map(|_| {
            let reader = state.clone();
            rt.create_reaction(
                move || {
                    black_box(reader.get("n"));
                },
                options(),
            )
        })
        .collect()
}

fn bench_sync_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_fan_out");
    for n in [1usize, 16, 256] {
        let rt = Runtime::new();
        let state = rt.reactive(Object::from([("n", 0)]));
        let _reactions = fan_out(&rt, &state, n, ReactionOptions::new);

        let mut value = 0i64;
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                value += 1;
                state.set("n", value);
            })
        });
    }
    group.finish();
}

fn bench_coalesced_burst(c: &mut Criterion) {
    let rt = Runtime::new();
    let state = rt.reactive(Object::from([("n", 0)]));
    let queue = JobQueue::new(&rt);
    let _reactions = fan_out(&rt, &state, 64, || {
        ReactionOptions::new().with_scheduler(queue.clone())
    });

    let mut value = 0i64;
    c.bench_function("coalesced_burst_64x10", |b| {
        b.iter(|| {
            for _ in 0..10 {
                value += 1;
                state.set("n", value);
            }
            black_box(rt.run_microtasks().unwrap_or_default());
        })
    });
}

criterion_group!(benches, bench_sync_fan_out, bench_coalesced_burst);
criterion_main!(benches);
