//! Decoder pool
//!
//! Decoding happens off the draw thread, in tokio tasks bounded by a
//! semaphore. Each task paces a [`FrameSource`] at the source's frame
//! interval, runs the (blocking) decode step on the blocking pool and submits
//! the result to the stream's [`FrameProducer`]. Tasks are cancelled through
//! their [`DecodeHandle`]; dropping the handle cancels as well.

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::frame_sink::{FrameProducer, FrameSinkError, VideoFrame};

pub mod test_pattern;

pub use test_pattern::{Pattern, TestPatternSource};

/// Default upper bound on concurrently running decoders.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Shortest pacing interval a source can ask for.
const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1);

/// Errors that end a decode task.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("source {name} failed: {message}")]
    Source { name: String, message: String },

    #[error("frame sink error: {0}")]
    Sink(#[from] FrameSinkError),

    #[error("decode worker failed: {0}")]
    Worker(String),

    #[error("decoder pool is closed")]
    PoolClosed,
}

/// Something that produces decoded frames, one call at a time.
///
/// `next_frame` may block; it always runs on tokio's blocking pool.
pub trait FrameSource: Send + 'static {
    fn name(&self) -> &str;

    /// Time between two frames.
    fn frame_interval(&self) -> Duration;

    /// Decodes the next frame. `Ok(None)` marks the end of the stream.
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, DecodeError>;
}

/// How a decode task finished, with the number of frames it submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    Cancelled { frames: u64 },
    EndOfStream { frames: u64 },
    SinkDetached { frames: u64 },
}

impl DecodeOutcome {
    pub fn frames(&self) -> u64 {
        match *self {
            DecodeOutcome::Cancelled { frames }
            | DecodeOutcome::EndOfStream { frames }
            | DecodeOutcome::SinkDetached { frames } => frames,
        }
    }
}

/// Fixed-size pool of decode workers.
#[derive(Debug, Clone)]
pub struct DecoderPool {
    permits: Arc<Semaphore>,
    max_workers: usize,
}

impl Default for DecoderPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}

impl DecoderPool {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        info!("🧵 Decoder pool with {} workers", max_workers);
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Workers not currently held by a decode task.
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Starts decoding `source` into `producer`. Must be called from within a
    /// tokio runtime; the task waits for a free worker before decoding.
    pub fn spawn<S: FrameSource>(&self, source: S, producer: FrameProducer) -> DecodeHandle {
        let name = source.name().to_string();
        let (cancel, cancelled) = watch::channel(false);
        let task = tokio::spawn(run_decoder(
            Box::new(source),
            producer,
            Arc::clone(&self.permits),
            cancelled,
        ));

        debug!("Spawned decoder {}", name);
        DecodeHandle { name, cancel, task }
    }
}

/// Handle to a running decode task.
pub struct DecodeHandle {
    name: String,
    cancel: watch::Sender<bool>,
    task: JoinHandle<Result<DecodeOutcome, DecodeError>>,
}

impl DecodeHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asks the task to stop before its next frame.
    pub fn cancel(&self) {
        // Fails only when the task already ended
        let _ = self.cancel.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the task and waits for it to end.
    pub async fn stop(self) -> Result<DecodeOutcome, DecodeError> {
        self.cancel();
        self.join().await
    }

    /// Waits for the task to end on its own.
    pub async fn join(self) -> Result<DecodeOutcome, DecodeError> {
        let name = self.name;
        let result = self
            .task
            .await
            .map_err(|e| DecodeError::Worker(format!("{}: {}", name, e)))?;

        match &result {
            Ok(outcome) => debug!("Decoder {} finished: {:?}", name, outcome),
            Err(e) => debug!("Decoder {} failed: {}", name, e),
        }
        result
    }
}

async fn run_decoder(
    mut source: Box<dyn FrameSource>,
    producer: FrameProducer,
    permits: Arc<Semaphore>,
    mut cancelled: watch::Receiver<bool>,
) -> Result<DecodeOutcome, DecodeError> {
    // A dropped handle counts as cancellation, same as an explicit cancel
    let _permit = tokio::select! {
        permit = permits.acquire_owned() => permit.map_err(|_| DecodeError::PoolClosed)?,
        _ = cancelled.changed() => return Ok(DecodeOutcome::Cancelled { frames: 0 }),
    };

    let mut ticker = tokio::time::interval(source.frame_interval().max(MIN_FRAME_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frames = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancelled.changed() => return Ok(DecodeOutcome::Cancelled { frames }),
            _ = ticker.tick() => {}
        }

        let (returned, result) = tokio::task::spawn_blocking(move || {
            let result = source.next_frame();
            (source, result)
        })
        .await
        .map_err(|e| DecodeError::Worker(e.to_string()))?;
        source = returned;

        match result {
            Ok(Some(frame)) => match producer.submit(frame) {
                Ok(()) => frames += 1,
                Err(FrameSinkError::Detached) => {
                    debug!("Decoder {} sink detached after {} frames", source.name(), frames);
                    return Ok(DecodeOutcome::SinkDetached { frames });
                }
                Err(e) => return Err(e.into()),
            },
            Ok(None) => {
                info!("🏁 Decoder {} reached end of stream ({} frames)", source.name(), frames);
                return Ok(DecodeOutcome::EndOfStream { frames });
            }
            Err(e) => {
                warn!("⚠️ Decoder {} failed after {} frames: {}", source.name(), frames, e);
                return Err(e);
            }
        }
    }
}
