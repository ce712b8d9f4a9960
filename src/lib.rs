//! # mosaic
//!
//! A real-time compositor for independently decoded video streams. Every
//! stream is drawn as an aspect-correct quad with its own translate, scale
//! and opacity; frames arrive from decoder tasks at their own pace and the
//! draw loop always shows the newest one.
//!
//! ## Architecture
//!
//! - `frame_sink`: single-slot frame hand-off from decoders to the draw loop
//! - `gpu`: wgpu device ownership and the draw-thread token
//! - `renderer`: projection math, the `Drawable` trait and the video drawable
//! - `compositor`: drawable list, per-frame draw and the cross-thread remote
//! - `decode`: bounded decoder pool and the test-pattern source
//! - `stream`: stream registration and ordered start/stop
//! - `config`: TOML configuration
//! - `logging`: `env_logger` setup
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mosaic::{Compositor, CompositorSettings, GpuContext, Size, StreamSpec};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let gpu = GpuContext::headless(wgpu::Backends::all(), wgpu::TextureFormat::Rgba8Unorm).await?;
//! let mut compositor = Compositor::new(&CompositorSettings::default());
//! compositor.on_surface_created(gpu.token());
//! compositor.on_viewport_resized(Size::new(1280, 720));
//! let stream = compositor.add_stream(StreamSpec::new(Size::new(1920, 1080)).with_alpha(0.8));
//! # let _ = stream;
//! # Ok(())
//! # }
//! ```

pub mod compositor;
pub mod config;
pub mod decode;
pub mod frame_sink;
pub mod gpu;
pub mod logging;
pub mod renderer;
pub mod stream;

// Re-export main types for easy access
pub use compositor::{Compositor, CompositorRemote, CompositorSettings, FrameReport};
pub use config::MosaicConfig;
pub use decode::{DecodeError, DecodeHandle, DecodeOutcome, DecoderPool, FrameSource};
pub use frame_sink::{FrameProducer, FrameSink, FrameSinkError, VideoFrame};
pub use gpu::{DrawToken, GpuContext};
pub use renderer::{
    DrawStatus, Drawable, DrawableBase, DrawableId, RenderError, ResizePolicy, Size, SkipReason,
    VideoDrawable,
};
pub use stream::{Stream, StreamHandle, StreamSpec};

/// Version information for mosaic
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
