use criterion::{criterion_group, criterion_main, Criterion};
use frame_triple_buffer::{Options, TripleBuffer};
use std::hint::black_box;

pub fn benchmark(c: &mut Criterion) {
    for (mode, options) in [("lossy", Options::lossy()), ("lossless", Options::lossless())] {
        let (mut producer, mut consumer) =
            TripleBuffer::new(options, &vec![0u8; 1920 * 1080], || {}).split();
        let mut group = c.benchmark_group(mode);

        group.bench_function("offer and take", |b| {
            b.iter(|| {
                producer.frame_mut()[0] = 42;
                black_box(producer.offer());
                black_box(consumer.take()[0]);
            })
        });

        if !options.wait_consumer {
            group.bench_function("offer over pending frame", |b| {
                b.iter(|| black_box(producer.offer()))
            });
            group.bench_function("try take", |b| b.iter(|| black_box(consumer.try_take().is_some())));
        }

        group.finish();
    }
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
