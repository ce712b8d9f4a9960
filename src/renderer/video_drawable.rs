//! Drawable for a single decoded video stream
//!
//! Owns one RGBA texture the stream's frames are uploaded into, one program
//! (pipeline, uniforms, quad and sampler) and the projection state kept in
//! its [`DrawableBase`]. GPU objects are created lazily on the draw thread.

use log::{debug, error, info, warn};
use tokio::sync::oneshot;
use wgpu::util::DeviceExt;

use super::drawable::{DrawStatus, Drawable, DrawableBase, DrawableId, SkipReason};
use super::projection::ProjectionState;
use super::{RenderError, Result, Size, StreamUniforms, Vertex, QUAD_VERTICES};
use crate::frame_sink::{FrameProducer, FrameSink, VideoFrame};
use crate::gpu::DrawToken;

const STREAM_SHADER: &str = include_str!("stream_quad.wgsl");

/// Lazily built program of a drawable. `Failed` sticks until release.
enum ProgramState {
    Unbuilt,
    Ready(StreamProgram),
    Failed(String),
}

struct StreamProgram {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    vertex_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
}

struct StreamTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: Size,
    /// Rebuilt whenever the texture is recreated
    bind_group: Option<wgpu::BindGroup>,
}

/// A stream drawn as an aspect-fit textured quad.
pub struct VideoDrawable {
    base: DrawableBase,
    shader_source: Option<String>,
    program: ProgramState,
    texture: Option<StreamTexture>,
    texture_ready: Option<oneshot::Sender<FrameProducer>>,
    has_frame: bool,
    ready: bool,
    /// Last frame size warned about, so each bad size is logged once
    warned_size: Option<Size>,
}

impl VideoDrawable {
    /// Creates the drawable plus the receiver that yields its frame producer
    /// once the texture has been bound on the draw thread.
    pub fn new(base: DrawableBase) -> (Self, oneshot::Receiver<FrameProducer>) {
        let (tx, rx) = oneshot::channel();
        let drawable = Self {
            base,
            shader_source: None,
            program: ProgramState::Unbuilt,
            texture: None,
            texture_ready: Some(tx),
            has_frame: false,
            ready: false,
            warned_size: None,
        };
        (drawable, rx)
    }

    /// Replaces the built-in WGSL program.
    pub fn with_shader_source(mut self, source: impl Into<String>) -> Self {
        self.shader_source = Some(source.into());
        self
    }

    /// Drops the derived projection; the next `prepare` derives it again.
    pub fn invalidate(&mut self) {
        self.base.invalidate();
    }

    pub fn projection_state(&self) -> &ProjectionState {
        self.base.projection_state()
    }

    /// Error message of a failed program build.
    pub fn program_error(&self) -> Option<&str> {
        match &self.program {
            ProgramState::Failed(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn has_program(&self) -> bool {
        matches!(self.program, ProgramState::Ready(_))
    }

    fn texture_format(token: DrawToken<'_>) -> wgpu::TextureFormat {
        if token.format().is_srgb() {
            wgpu::TextureFormat::Rgba8UnormSrgb
        } else {
            wgpu::TextureFormat::Rgba8Unorm
        }
    }

    fn create_texture(&self, token: DrawToken<'_>, size: Size) -> StreamTexture {
        let texture = token.device().create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("Stream {} Texture", self.base.id())),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::texture_format(token),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        StreamTexture {
            texture,
            view,
            size,
            bind_group: None,
        }
    }

    fn build_program(&self, token: DrawToken<'_>) -> Result<StreamProgram> {
        let device = token.device();
        let id = self.base.id();
        let source = self.shader_source.as_deref().unwrap_or(STREAM_SHADER);

        // Capture validation errors instead of letting the device panic
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Stream Quad Shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Stream BGL"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Stream Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("Stream {} Pipeline", id)),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[Vertex::desc()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: token.format(),
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(RenderError::ShaderBuild(format!("stream {}: {}", id, err)));
        }

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Stream Uniforms"),
            size: std::mem::size_of::<StreamUniforms>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Stream Quad Vertices"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Stream Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Ok(StreamProgram {
            pipeline,
            bind_group_layout,
            uniform_buffer,
            vertex_buffer,
            sampler,
        })
    }

    /// Logs `message` once per offending frame size.
    fn warn_once(&mut self, size: Size, message: std::fmt::Arguments<'_>) {
        if self.warned_size != Some(size) {
            warn!("⚠️ Stream {}: {}", self.base.id(), message);
            self.warned_size = Some(size);
        }
    }

    /// Uploads a frame, recreating the texture if its size changed.
    ///
    /// Frames larger than the device allows are dropped. A frame whose size
    /// differs from the source size becomes the new source size under
    /// `Rederive`; under `Preserve` it is stretched into the old aspect.
    fn upload(&mut self, token: DrawToken<'_>, frame: &VideoFrame) {
        let size = frame.size();
        let max = token.device().limits().max_texture_dimension_2d;
        if size.width > max || size.height > max {
            self.warn_once(
                size,
                format_args!("dropping {} frame, device limit is {}", size, max),
            );
            return;
        }

        if !self.base.adopt_frame_size(size) {
            let source = self.base.source_size();
            self.warn_once(
                size,
                format_args!("{} frame drawn with the {} source aspect", size, source),
            );
        }

        let needs_new = self.texture.as_ref().map_or(true, |t| t.size != size);
        if needs_new {
            debug!("Stream {} texture resized to {}", self.base.id(), size);
            let replacement = self.create_texture(token, size);
            if let Some(old) = self.texture.replace(replacement) {
                old.texture.destroy();
            }
        }

        let Some(texture) = self.texture.as_ref() else {
            return;
        };
        token.queue().write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            frame.data(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(frame.stride()),
                rows_per_image: Some(frame.height()),
            },
            wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
        );
        self.has_frame = true;
    }

    fn skip(&mut self, reason: SkipReason) -> Result<DrawStatus> {
        self.ready = false;
        Ok(DrawStatus::Skipped(reason))
    }
}

impl Drawable for VideoDrawable {
    fn id(&self) -> DrawableId {
        self.base.id()
    }

    fn set_source_size(&mut self, size: Size) {
        self.base.set_source_size(size);
    }

    fn source_size(&self) -> Size {
        self.base.source_size()
    }

    fn set_viewport_size(&mut self, size: Size) {
        self.base.set_viewport_size(size);
    }

    fn viewport_size(&self) -> Size {
        self.base.viewport_size()
    }

    fn set_alpha(&mut self, alpha: f32) {
        self.base.set_alpha(alpha);
    }

    fn alpha(&self) -> f32 {
        self.base.alpha()
    }

    fn is_texture_bound(&self) -> bool {
        self.texture.is_some()
    }

    fn bind_texture(&mut self, token: DrawToken<'_>) -> Result<()> {
        if self.texture.is_some() {
            return Ok(());
        }
        let size = self.base.source_size();
        if size.is_empty() {
            debug!("Stream {} has no source size yet, not binding", self.base.id());
            return Ok(());
        }

        let producer = self.base.sink().attach(size)?;
        self.texture = Some(self.create_texture(token, size));
        info!("🎞️ Stream {} texture bound ({})", self.base.id(), size);

        if let Some(tx) = self.texture_ready.take() {
            if tx.send(producer).is_err() {
                debug!("Nobody is waiting for stream {}'s producer", self.base.id());
            }
        }
        Ok(())
    }

    fn frame_sink(&self) -> &FrameSink {
        self.base.sink()
    }

    fn translate(&mut self, dx: f32, dy: f32) -> Result<()> {
        self.base.translate(dx, dy)
    }

    fn scale(&mut self, sx: f32, sy: f32) -> Result<()> {
        self.base.scale(sx, sy)
    }

    fn prepare(&mut self, token: DrawToken<'_>) -> Result<DrawStatus> {
        if self.texture.is_none() {
            return self.skip(SkipReason::NoTexture);
        }

        match &self.program {
            ProgramState::Ready(_) => {}
            ProgramState::Failed(_) => return self.skip(SkipReason::ProgramFailed),
            ProgramState::Unbuilt => match self.build_program(token) {
                Ok(program) => {
                    debug!("Stream {} program built", self.base.id());
                    self.program = ProgramState::Ready(program);
                }
                Err(e) => {
                    error!("❌ {}", e);
                    self.program = ProgramState::Failed(e.to_string());
                    self.ready = false;
                    return Err(e);
                }
            },
        }

        if self.base.ensure_projection().is_none() {
            return self.skip(SkipReason::SizesUnknown);
        }

        if let Some(frame) = self.base.sink().latest_frame() {
            self.upload(token, &frame);
        }
        if !self.has_frame {
            return self.skip(SkipReason::NoFrame);
        }

        // Read after the upload, which may have re-derived for a new frame size
        let Some(matrix) = self.base.ensure_projection().map(|p| p.clip_matrix()) else {
            return self.skip(SkipReason::SizesUnknown);
        };

        let alpha = self.base.alpha();
        let written = match (&self.program, self.texture.as_mut()) {
            (ProgramState::Ready(program), Some(texture)) => {
                if texture.bind_group.is_none() {
                    texture.bind_group =
                        Some(token.device().create_bind_group(&wgpu::BindGroupDescriptor {
                            label: Some("Stream BindGroup"),
                            layout: &program.bind_group_layout,
                            entries: &[
                                wgpu::BindGroupEntry {
                                    binding: 0,
                                    resource: program.uniform_buffer.as_entire_binding(),
                                },
                                wgpu::BindGroupEntry {
                                    binding: 1,
                                    resource: wgpu::BindingResource::TextureView(&texture.view),
                                },
                                wgpu::BindGroupEntry {
                                    binding: 2,
                                    resource: wgpu::BindingResource::Sampler(&program.sampler),
                                },
                            ],
                        }));
                }

                let uniforms = StreamUniforms {
                    matrix: matrix.into(),
                    alpha,
                    _padding: [0.0; 3],
                };
                token
                    .queue()
                    .write_buffer(&program.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
                true
            }
            _ => false,
        };
        if !written {
            return self.skip(SkipReason::NoTexture);
        }

        self.ready = true;
        Ok(DrawStatus::Ready)
    }

    fn record<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>) {
        if !self.ready {
            return;
        }
        let ProgramState::Ready(program) = &self.program else {
            return;
        };
        let Some(bind_group) = self.texture.as_ref().and_then(|t| t.bind_group.as_ref()) else {
            warn!("Stream {} marked ready without a bind group", self.base.id());
            return;
        };

        pass.set_pipeline(&program.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.set_vertex_buffer(0, program.vertex_buffer.slice(..));
        pass.draw(0..QUAD_VERTICES.len() as u32, 0..1);
    }

    fn release(&mut self, _token: DrawToken<'_>) {
        self.ready = false;
        self.has_frame = false;
        self.program = ProgramState::Unbuilt;
        if let Some(texture) = self.texture.take() {
            texture.texture.destroy();
            debug!("Stream {} texture destroyed", self.base.id());
        }
        self.base.sink().detach();
        self.texture_ready = None;
        self.warned_size = None;
    }
}
