// Decode pipeline integration tests
//
// Drives decoder tasks into frame sinks without a compositor or GPU.

use mosaic::decode::{Pattern, TestPatternSource};
use mosaic::{
    DecodeError, DecodeOutcome, DecoderPool, FrameSink, FrameSource, Size, VideoFrame,
};
use std::time::Duration;

fn pattern_source(name: &str, fps: f64) -> TestPatternSource {
    TestPatternSource::new(name, Size::new(16, 9), fps, Pattern::Bars)
}

/// Yields a few frames, then fails.
struct FlakySource {
    remaining: u32,
}

impl FrameSource for FlakySource {
    fn name(&self) -> &str {
        "flaky"
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_millis(2)
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, DecodeError> {
        if self.remaining == 0 {
            return Err(DecodeError::Source {
                name: "flaky".to_string(),
                message: "corrupt packet".to_string(),
            });
        }
        self.remaining -= 1;
        Ok(Some(VideoFrame::solid(4, 4, [0, 255, 0, 255])?))
    }
}

#[tokio::test]
async fn test_end_of_stream_reports_frame_count() {
    let pool = DecoderPool::new(2);
    let sink = FrameSink::new();
    let producer = sink.attach(Size::new(16, 9)).unwrap();

    let handle = pool.spawn(pattern_source("eos", 500.0).with_frame_limit(5), producer);
    let outcome = handle.join().await.unwrap();

    assert_eq!(outcome, DecodeOutcome::EndOfStream { frames: 5 });
    assert_eq!(sink.stats().submitted, 5);

    // Only the newest frame is kept for the draw thread
    let frame = sink.latest_frame().unwrap();
    assert_eq!(frame.size(), Size::new(16, 9));
    assert!(sink.latest_frame().is_none());
}

#[tokio::test]
async fn test_stop_cancels_running_decoder() {
    let pool = DecoderPool::new(2);
    let sink = FrameSink::new();
    let producer = sink.attach(Size::new(16, 9)).unwrap();

    let handle = pool.spawn(pattern_source("live", 200.0), producer);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());

    let outcome = handle.stop().await.unwrap();
    assert!(matches!(outcome, DecodeOutcome::Cancelled { .. }));
    assert_eq!(outcome.frames(), sink.stats().submitted);
    assert_eq!(pool.available_workers(), 2);
}

#[tokio::test]
async fn test_detached_sink_ends_decoder() {
    let pool = DecoderPool::default();
    let sink = FrameSink::new();
    let producer = sink.attach(Size::new(16, 9)).unwrap();

    let handle = pool.spawn(pattern_source("detached", 200.0), producer);
    tokio::time::sleep(Duration::from_millis(30)).await;
    sink.detach();

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("decoder did not notice the detached sink")
        .unwrap();
    assert!(matches!(outcome, DecodeOutcome::SinkDetached { .. }));
    assert!(sink.latest_frame().is_none());
}

#[tokio::test]
async fn test_source_failure_is_returned() {
    let pool = DecoderPool::new(1);
    let sink = FrameSink::new();
    let producer = sink.attach(Size::new(4, 4)).unwrap();

    let handle = pool.spawn(FlakySource { remaining: 3 }, producer);
    let result = handle.join().await;

    assert!(matches!(result, Err(DecodeError::Source { ref message, .. }) if message == "corrupt packet"));
    // Frames decoded before the failure stay visible
    assert_eq!(sink.stats().submitted, 3);
    assert!(sink.latest_frame().is_some());
    // The worker is returned to the pool
    assert_eq!(pool.available_workers(), 1);
}

#[tokio::test]
async fn test_pool_bounds_concurrent_decoders() {
    let pool = DecoderPool::new(1);

    let first_sink = FrameSink::new();
    let second_sink = FrameSink::new();
    let first = pool.spawn(
        pattern_source("first", 200.0),
        first_sink.attach(Size::new(16, 9)).unwrap(),
    );
    let second = pool.spawn(
        pattern_source("second", 200.0).with_frame_limit(3),
        second_sink.attach(Size::new(16, 9)).unwrap(),
    );

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(pool.available_workers(), 0);
    assert!(first_sink.stats().submitted > 0);
    // Queued behind the first decoder
    assert_eq!(second_sink.stats().submitted, 0);

    first.stop().await.unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), second.join())
        .await
        .expect("second decoder never got a worker")
        .unwrap();
    assert_eq!(outcome, DecodeOutcome::EndOfStream { frames: 3 });
}

#[tokio::test]
async fn test_cancel_while_waiting_for_worker() {
    let pool = DecoderPool::new(1);

    let busy_sink = FrameSink::new();
    let busy = pool.spawn(
        pattern_source("busy", 100.0),
        busy_sink.attach(Size::new(16, 9)).unwrap(),
    );

    let waiting_sink = FrameSink::new();
    let waiting = pool.spawn(
        pattern_source("waiting", 100.0),
        waiting_sink.attach(Size::new(16, 9)).unwrap(),
    );

    let outcome = waiting.stop().await.unwrap();
    assert_eq!(outcome, DecodeOutcome::Cancelled { frames: 0 });
    assert_eq!(waiting_sink.stats().submitted, 0);

    busy.stop().await.unwrap();
}
