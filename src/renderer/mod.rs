//! Per-stream rendering
//!
//! Every video stream is drawn by one [`Drawable`]: a textured quad whose
//! projection keeps the source aspect ratio on the shared surface, with its
//! own transform and opacity layered on top.
//!
//! # Pipeline
//!
//! 1. The compositor binds the drawable's texture on the draw thread
//! 2. `prepare` builds the program, derives the projection and uploads the
//!    newest decoded frame
//! 3. `record` issues the quad draw into the frame's render pass

use thiserror::Error;
use wgpu::{BufferAddress, VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode};

pub mod drawable;
pub mod offscreen;
pub mod projection;
pub mod video_drawable;

pub use drawable::{DrawStatus, Drawable, DrawableBase, DrawableId, SkipReason};
pub use offscreen::OffscreenTarget;
pub use projection::{AspectRatios, Projection, ProjectionState, ResizePolicy, Transform};
pub use video_drawable::VideoDrawable;

/// Errors that can occur while rendering streams.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to initialize renderer: {0}")]
    InitError(String),

    #[error("failed to build stream program: {0}")]
    ShaderBuild(String),

    #[error("projection for drawable {0} has not been derived yet")]
    ProjectionNotReady(DrawableId),

    #[error("invalid transform: {0}")]
    InvalidTransform(String),

    #[error("unknown drawable {0}")]
    UnknownDrawable(DrawableId),

    #[error("frame sink error: {0}")]
    FrameSink(#[from] crate::frame_sink::FrameSinkError),

    #[error("compositor is no longer running")]
    Disconnected,

    #[error("failed to read back frame: {0}")]
    Readback(String),

    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
}

/// Result type for render operations.
pub type Result<T> = std::result::Result<T, RenderError>;

/// Dimensions of a frame or surface, in pixels.
///
/// A size with a zero dimension is treated as not yet known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width over height.
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Vertex data for the stream quad
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct Vertex {
    position: [f32; 2],
    tex_coords: [f32; 2],
}

/// Triangle strip covering [-1,1]x[-1,1], texture v flipped so row 0 of the
/// frame is at the top.
pub(crate) const QUAD_VERTICES: [Vertex; 4] = [
    Vertex { position: [-1.0, -1.0], tex_coords: [0.0, 1.0] },
    Vertex { position: [1.0, -1.0], tex_coords: [1.0, 1.0] },
    Vertex { position: [-1.0, 1.0], tex_coords: [0.0, 0.0] },
    Vertex { position: [1.0, 1.0], tex_coords: [1.0, 0.0] },
];

impl Vertex {
    pub(crate) fn desc() -> VertexBufferLayout<'static> {
        VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as BufferAddress,
            step_mode: VertexStepMode::Vertex,
            attributes: &[
                VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: VertexFormat::Float32x2,
                },
                VertexAttribute {
                    offset: std::mem::size_of::<[f32; 2]>() as BufferAddress,
                    shader_location: 1,
                    format: VertexFormat::Float32x2,
                },
            ],
        }
    }
}

/// Uniform block shared with `stream_quad.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct StreamUniforms {
    pub matrix: [[f32; 4]; 4],
    pub alpha: f32,
    pub _padding: [f32; 3],
}
