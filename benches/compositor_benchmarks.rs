//! Performance benchmarks for the mosaic compositor
//!
//! Covers the per-frame CPU work: projection math, the frame hand-off slot,
//! test-pattern rendering and draining remote commands.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use mosaic::decode::{Pattern, TestPatternSource};
use mosaic::renderer::Projection;
use mosaic::{Compositor, CompositorSettings, FrameSink, Size, StreamSpec, VideoFrame};

/// Benchmark projection derivation and user transforms
fn bench_projection(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection");
    let viewport = Size::new(1280, 720);

    for source in [Size::new(1920, 1080), Size::new(1080, 1920), Size::new(640, 480)] {
        group.bench_function(format!("derive_{}", source), |b| {
            b.iter(|| black_box(Projection::derive(black_box(source), viewport)))
        });
    }

    group.bench_function("translate_scale_clip", |b| {
        b.iter_batched(
            || Projection::derive(Size::new(1080, 1920), viewport).unwrap(),
            |mut projection| {
                projection.scale(0.5, 0.5).unwrap();
                projection.translate(0.1, -0.1).unwrap();
                black_box(projection.clip_matrix())
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

/// Benchmark the single-slot frame hand-off
fn bench_frame_sink(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_sink");
    let frame = VideoFrame::solid(1920, 1080, [16, 32, 64, 255]).unwrap();

    group.bench_function("submit_then_take", |b| {
        let sink = FrameSink::new();
        let producer = sink.attach(frame.size()).unwrap();
        b.iter(|| {
            producer.submit(frame.clone()).unwrap();
            black_box(sink.latest_frame())
        });
    });

    group.bench_function("submit_replacing_pending", |b| {
        let sink = FrameSink::new();
        let producer = sink.attach(frame.size()).unwrap();
        b.iter(|| producer.submit(black_box(frame.clone())).unwrap());
    });

    group.finish();
}

/// Benchmark synthetic frame generation
fn bench_test_patterns(c: &mut Criterion) {
    let mut group = c.benchmark_group("test_patterns");

    for pattern in [Pattern::Bars, Pattern::Gradient, Pattern::Solid([255, 0, 0])] {
        let source = TestPatternSource::new("bench", Size::new(640, 360), 30.0, pattern);
        group.bench_function(format!("{:?}", pattern), |b| {
            let mut index = 0;
            b.iter(|| {
                index += 1;
                black_box(source.render(index).unwrap())
            });
        });
    }

    group.finish();
}

/// Benchmark draining queued remote commands
fn bench_remote_commands(c: &mut Criterion) {
    let mut group = c.benchmark_group("remote_commands");

    for stream_count in [4usize, 16, 64] {
        group.bench_function(format!("drain_{}_streams", stream_count), |b| {
            b.iter_batched(
                || {
                    let mut compositor = Compositor::new(&CompositorSettings::default());
                    compositor.on_viewport_resized(Size::new(1280, 720));
                    let remote = compositor.remote();
                    for _ in 0..stream_count {
                        let handle = remote.add_stream(StreamSpec::new(Size::new(1920, 1080))).unwrap();
                        handle.set_alpha(0.5).unwrap();
                    }
                    compositor
                },
                |mut compositor| black_box(compositor.process_commands()),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_projection,
    bench_frame_sink,
    bench_test_patterns,
    bench_remote_commands
);

criterion_main!(benches);
