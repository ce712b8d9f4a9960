//! Synthetic frame source
//!
//! Stands in for a real decoder: renders colour bars, an animated gradient or
//! a solid colour at a fixed size and rate.

use std::time::Duration;

use super::{DecodeError, FrameSource};
use crate::frame_sink::{FrameSinkError, VideoFrame};
use crate::renderer::Size;

/// 75% colour bars, left to right.
const BARS: [[u8; 3]; 8] = [
    [191, 191, 191],
    [191, 191, 0],
    [0, 191, 191],
    [0, 191, 0],
    [191, 0, 191],
    [191, 0, 0],
    [0, 0, 191],
    [16, 16, 16],
];

/// What a [`TestPatternSource`] draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Colour bars scrolling left
    Bars,
    /// Horizontal red and vertical green ramps with a pulsing blue channel
    Gradient,
    Solid([u8; 3]),
}

#[derive(Debug, Clone)]
pub struct TestPatternSource {
    name: String,
    size: Size,
    fps: f64,
    pattern: Pattern,
    frame_limit: Option<u64>,
    frame_index: u64,
}

impl TestPatternSource {
    pub fn new(name: impl Into<String>, size: Size, fps: f64, pattern: Pattern) -> Self {
        Self {
            name: name.into(),
            size,
            fps,
            pattern,
            frame_limit: None,
            frame_index: 0,
        }
    }

    /// Ends the stream after `frames` frames.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    /// Renders frame `index` without advancing the source.
    pub fn render(&self, index: u64) -> Result<VideoFrame, FrameSinkError> {
        let (width, height) = (self.size.width, self.size.height);
        let span_x = width.saturating_sub(1).max(1);
        let span_y = height.saturating_sub(1).max(1);
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);

        for y in 0..height {
            for x in 0..width {
                let rgb = match self.pattern {
                    Pattern::Solid(rgb) => rgb,
                    Pattern::Bars => {
                        let shifted = (x as u64 + index * 4) % width as u64;
                        BARS[(shifted * BARS.len() as u64 / width as u64) as usize]
                    }
                    Pattern::Gradient => [
                        (x * 255 / span_x).min(255) as u8,
                        (y * 255 / span_y).min(255) as u8,
                        ((index * 4) % 256) as u8,
                    ],
                };
                data.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
            }
        }

        VideoFrame::rgba8(width, height, data)
    }
}

impl FrameSource for TestPatternSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn frame_interval(&self) -> Duration {
        if self.fps > 0.0 && self.fps.is_finite() {
            Duration::from_secs_f64(1.0 / self.fps)
        } else {
            Duration::from_millis(33)
        }
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, DecodeError> {
        if self.frame_limit.is_some_and(|limit| self.frame_index >= limit) {
            return Ok(None);
        }
        if self.size.is_empty() {
            return Err(DecodeError::Source {
                name: self.name.clone(),
                message: format!("cannot render a {} pattern", self.size),
            });
        }

        let frame = self.render(self.frame_index)?;
        self.frame_index += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_fills_every_pixel() {
        let source =
            TestPatternSource::new("solid", Size::new(3, 2), 30.0, Pattern::Solid([10, 20, 30]));
        let frame = source.render(0).unwrap();
        assert_eq!(frame.data().len(), 3 * 2 * 4);
        assert!(frame.data().chunks(4).all(|px| px == [10, 20, 30, 255]));
    }

    #[test]
    fn test_bars_scroll_between_frames() {
        let source = TestPatternSource::new("bars", Size::new(64, 1), 30.0, Pattern::Bars);
        let first = source.render(0).unwrap();
        let second = source.render(1).unwrap();
        assert_eq!(&first.data()[..4], &[191, 191, 191, 255]);
        assert_ne!(first.data(), second.data());
    }

    #[test]
    fn test_gradient_ramps() {
        let source =
            TestPatternSource::new("gradient", Size::new(16, 16), 30.0, Pattern::Gradient);
        let frame = source.render(0).unwrap();
        let last = (15 * 16 + 15) * 4;
        assert_eq!(&frame.data()[..3], &[0, 0, 0]);
        assert_eq!(&frame.data()[last..last + 2], &[255, 255]);
    }

    #[test]
    fn test_frame_limit_ends_stream() {
        let mut source = TestPatternSource::new("limited", Size::new(2, 2), 30.0, Pattern::Bars)
            .with_frame_limit(2);
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_frame_interval_from_fps() {
        let source = TestPatternSource::new("pace", Size::new(2, 2), 50.0, Pattern::Bars);
        assert_eq!(source.frame_interval(), Duration::from_millis(20));

        let bad = TestPatternSource::new("pace", Size::new(2, 2), 0.0, Pattern::Bars);
        assert_eq!(bad.frame_interval(), Duration::from_millis(33));
    }

    #[test]
    fn test_empty_size_is_a_source_error() {
        let mut source = TestPatternSource::new("empty", Size::new(0, 4), 30.0, Pattern::Bars);
        assert!(matches!(
            source.render(0),
            Err(FrameSinkError::EmptyFrame { width: 0, height: 4 })
        ));
        assert!(matches!(source.next_frame(), Err(DecodeError::Source { .. })));
    }
}
