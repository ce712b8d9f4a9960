//! Frame hand-off between decoders and the draw loop
//!
//! Each stream owns one [`FrameSink`]. The decoder side holds the
//! [`FrameProducer`] returned by [`FrameSink::attach`] and submits frames from
//! its own thread; the draw thread calls [`FrameSink::latest_frame`] once per
//! refresh. The slot holds at most one pending frame: a newer submission
//! replaces an unconsumed one, so the compositor always shows the newest frame
//! and silently drops the ones it could not keep up with.

use log::{debug, trace};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::renderer::Size;

/// Errors raised by the frame hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameSinkError {
    #[error("frame sink already has a producer attached")]
    AlreadyAttached,

    #[error("frame sink has been detached")]
    Detached,

    #[error("frame data is {actual} bytes, expected {expected}")]
    InvalidFrame { expected: usize, actual: usize },

    #[error("frame size {width}x{height} has no pixels")]
    EmptyFrame { width: u32, height: u32 },
}

/// Pixel layout of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit RGBA, tightly packed, row-major
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// A decoded image ready to be uploaded into a stream texture.
///
/// Always non-empty, with exactly `width * height` pixels of data.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Arc<Vec<u8>>,
}

impl VideoFrame {
    /// Wraps RGBA8 pixels, checking the buffer matches the dimensions.
    pub fn rgba8(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameSinkError> {
        if width == 0 || height == 0 {
            return Err(FrameSinkError::EmptyFrame { width, height });
        }
        let expected = width as usize * height as usize * PixelFormat::Rgba8.bytes_per_pixel();
        if data.len() != expected {
            return Err(FrameSinkError::InvalidFrame {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            format: PixelFormat::Rgba8,
            data: Arc::new(data),
        })
    }

    /// A frame filled with a single colour.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self, FrameSinkError> {
        let pixels = width as usize * height as usize;
        Self::rgba8(width, height, rgba.repeat(pixels))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Tightly packed pixel rows.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Bytes per row of `data`.
    pub fn stride(&self) -> u32 {
        self.width * self.format.bytes_per_pixel() as u32
    }
}

/// Counters describing what went through a sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Frames accepted from the producer
    pub submitted: u64,
    /// Frames replaced before the draw thread consumed them
    pub dropped: u64,
    /// Frames handed to the draw thread
    pub consumed: u64,
}

#[derive(Debug, Default)]
struct Slot {
    pending: Mutex<Option<VideoFrame>>,
    size_hint: Mutex<Option<Size>>,
    attached: AtomicBool,
    detached: AtomicBool,
    submitted: AtomicU64,
    dropped: AtomicU64,
    consumed: AtomicU64,
}

/// Draw-side handle of a stream's frame slot.
///
/// Cloning is cheap and every clone refers to the same slot, which lets the
/// stream owner detach a sink the drawable is still holding.
#[derive(Debug, Clone, Default)]
pub struct FrameSink {
    slot: Arc<Slot>,
}

impl FrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the decoder side.
    ///
    /// Called once per sink with the size the stream expects to decode at.
    pub fn attach(&self, size_hint: Size) -> Result<FrameProducer, FrameSinkError> {
        if self.slot.detached.load(Ordering::Acquire) {
            return Err(FrameSinkError::Detached);
        }
        if self.slot.attached.swap(true, Ordering::AcqRel) {
            return Err(FrameSinkError::AlreadyAttached);
        }

        *self.slot.size_hint.lock() = Some(size_hint);
        debug!("Frame sink attached ({}x{})", size_hint.width, size_hint.height);

        Ok(FrameProducer {
            slot: Arc::clone(&self.slot),
        })
    }

    /// Takes the most recent completed frame, if one arrived since the last call.
    pub fn latest_frame(&self) -> Option<VideoFrame> {
        if self.slot.detached.load(Ordering::Acquire) {
            return None;
        }

        let frame = self.slot.pending.lock().take();
        if frame.is_some() {
            self.slot.consumed.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Invalidates the sink: pending frames are discarded and later
    /// submissions are refused.
    pub fn detach(&self) {
        if !self.slot.detached.swap(true, Ordering::AcqRel) {
            self.slot.pending.lock().take();
            debug!("Frame sink detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.slot.attached.load(Ordering::Acquire) && !self.is_detached()
    }

    pub fn is_detached(&self) -> bool {
        self.slot.detached.load(Ordering::Acquire)
    }

    /// Size passed to [`FrameSink::attach`].
    pub fn size_hint(&self) -> Option<Size> {
        *self.slot.size_hint.lock()
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            submitted: self.slot.submitted.load(Ordering::Relaxed),
            dropped: self.slot.dropped.load(Ordering::Relaxed),
            consumed: self.slot.consumed.load(Ordering::Relaxed),
        }
    }
}

/// Decoder-side handle used to submit frames.
#[derive(Debug)]
pub struct FrameProducer {
    slot: Arc<Slot>,
}

impl FrameProducer {
    /// Publishes a frame, replacing any frame the draw thread has not taken yet.
    pub fn submit(&self, frame: VideoFrame) -> Result<(), FrameSinkError> {
        if self.slot.detached.load(Ordering::Acquire) {
            return Err(FrameSinkError::Detached);
        }

        let replaced = self.slot.pending.lock().replace(frame);
        self.slot.submitted.fetch_add(1, Ordering::Relaxed);
        if replaced.is_some() {
            self.slot.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Dropped an unconsumed frame");
        }
        Ok(())
    }

    pub fn is_detached(&self) -> bool {
        self.slot.detached.load(Ordering::Acquire)
    }

    /// Size the draw side attached this producer with.
    pub fn size_hint(&self) -> Option<Size> {
        *self.slot.size_hint.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: u8) -> VideoFrame {
        VideoFrame::solid(2, 2, [n, 0, 0, 255]).unwrap()
    }

    #[test]
    fn test_latest_frame_empty_until_submit() {
        let sink = FrameSink::new();
        let producer = sink.attach(Size::new(2, 2)).unwrap();
        assert!(sink.latest_frame().is_none());

        producer.submit(numbered(1)).unwrap();
        assert_eq!(sink.latest_frame().unwrap().data()[0], 1);

        // Consumed: nothing new until the next submit
        assert!(sink.latest_frame().is_none());
    }

    #[test]
    fn test_only_newest_frame_survives() {
        let sink = FrameSink::new();
        let producer = sink.attach(Size::new(2, 2)).unwrap();

        for n in 1..=5 {
            producer.submit(numbered(n)).unwrap();
        }

        let frame = sink.latest_frame().unwrap();
        assert_eq!(frame.data()[0], 5);
        assert!(sink.latest_frame().is_none());

        let stats = sink.stats();
        assert_eq!(stats.submitted, 5);
        assert_eq!(stats.dropped, 4);
        assert_eq!(stats.consumed, 1);
    }

    #[test]
    fn test_attach_twice_fails() {
        let sink = FrameSink::new();
        let _producer = sink.attach(Size::new(4, 4)).unwrap();
        assert_eq!(
            sink.attach(Size::new(4, 4)).unwrap_err(),
            FrameSinkError::AlreadyAttached
        );
        assert_eq!(sink.size_hint(), Some(Size::new(4, 4)));
    }

    #[test]
    fn test_detach_discards_and_refuses() {
        let sink = FrameSink::new();
        let producer = sink.attach(Size::new(2, 2)).unwrap();
        producer.submit(numbered(1)).unwrap();

        sink.clone().detach();

        assert!(sink.latest_frame().is_none());
        assert!(producer.is_detached());
        assert_eq!(
            producer.submit(numbered(2)).unwrap_err(),
            FrameSinkError::Detached
        );
        assert_eq!(
            sink.attach(Size::new(2, 2)).unwrap_err(),
            FrameSinkError::Detached
        );
        assert!(!sink.is_attached());
    }

    #[test]
    fn test_rgba8_validates_length() {
        assert!(VideoFrame::rgba8(2, 2, vec![0; 16]).is_ok());
        assert_eq!(
            VideoFrame::rgba8(2, 2, vec![0; 15]).unwrap_err(),
            FrameSinkError::InvalidFrame {
                expected: 16,
                actual: 15
            }
        );
    }

    #[test]
    fn test_short_buffer_never_reaches_the_sink() {
        let sink = FrameSink::new();
        let _producer = sink.attach(Size::new(8, 8)).unwrap();

        assert_eq!(
            VideoFrame::rgba8(8, 8, vec![0; 3]).unwrap_err(),
            FrameSinkError::InvalidFrame {
                expected: 256,
                actual: 3
            }
        );
        assert!(sink.latest_frame().is_none());
        assert_eq!(sink.stats().submitted, 0);
    }

    #[test]
    fn test_empty_frames_rejected() {
        assert_eq!(
            VideoFrame::rgba8(0, 8, Vec::new()).unwrap_err(),
            FrameSinkError::EmptyFrame {
                width: 0,
                height: 8
            }
        );
        assert!(VideoFrame::solid(4, 0, [0, 0, 0, 255]).is_err());

        let frame = VideoFrame::solid(3, 2, [1, 2, 3, 4]).unwrap();
        assert_eq!(frame.size(), Size::new(3, 2));
        assert_eq!(frame.stride(), 12);
        assert_eq!(frame.data().len(), 24);
        assert_eq!(frame.format(), PixelFormat::Rgba8);
    }

    #[test]
    fn test_cross_thread_submit() {
        let sink = FrameSink::new();
        let producer = sink.attach(Size::new(2, 2)).unwrap();

        let worker = std::thread::spawn(move || {
            for n in 0..100u8 {
                producer.submit(numbered(n)).unwrap();
            }
        });
        worker.join().unwrap();

        assert_eq!(sink.latest_frame().unwrap().data()[0], 99);
        let stats = sink.stats();
        assert_eq!(stats.submitted, 100);
        assert_eq!(stats.dropped + stats.consumed, 100);
    }
}
