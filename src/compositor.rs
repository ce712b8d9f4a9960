//! Core compositor implementation
//!
//! The [`Compositor`] owns the ordered list of drawables and runs the
//! per-frame draw on the draw thread. Other threads reach it through a
//! [`CompositorRemote`]: their commands are queued and applied at the start
//! of the next frame, so the drawable list is only ever touched by the draw
//! thread and no lock is held across a draw.

use log::{debug, info, trace, warn};
use std::sync::mpsc;

use crate::gpu::DrawToken;
use crate::renderer::{
    DrawStatus, Drawable, DrawableId, RenderError, ResizePolicy, Result, Size, SkipReason,
};
use crate::stream::{StreamHandle, StreamSpec};

/// Settings the compositor is created with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositorSettings {
    /// RGBA clear color, each channel in [0,1]
    pub clear_color: [f64; 4],
    /// Policy for streams that do not pick their own
    pub resize_policy: ResizePolicy,
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 0.0],
            resize_policy: ResizePolicy::Rederive,
        }
    }
}

impl From<&crate::config::SurfaceConfig> for CompositorSettings {
    fn from(surface: &crate::config::SurfaceConfig) -> Self {
        Self {
            clear_color: surface.clear_color,
            resize_policy: surface.resize_policy(),
        }
    }
}

/// What happened during one call to [`Compositor::on_draw_frame`].
#[derive(Debug, Default)]
pub struct FrameReport {
    /// 1-based frame number
    pub frame: u64,
    /// Drawables recorded into the pass
    pub drawn: usize,
    pub skipped: Vec<(DrawableId, SkipReason)>,
    pub failures: Vec<(DrawableId, RenderError)>,
}

impl FrameReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn skip_reason(&self, id: DrawableId) -> Option<SkipReason> {
        self.skipped
            .iter()
            .find(|(skipped, _)| *skipped == id)
            .map(|(_, reason)| *reason)
    }
}

enum Command {
    Add(Box<dyn Drawable>),
    Remove(DrawableId),
    SetAlpha(DrawableId, f32),
    Translate(DrawableId, f32, f32),
    Scale(DrawableId, f32, f32),
}

/// Thread-safe handle for registering streams and adjusting them.
#[derive(Clone)]
pub struct CompositorRemote {
    commands: mpsc::Sender<Command>,
    resize_policy: ResizePolicy,
}

impl CompositorRemote {
    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| RenderError::Disconnected)
    }

    /// Registers a stream. Its drawable joins the compositor on the next frame.
    pub fn add_stream(&self, spec: StreamSpec) -> Result<StreamHandle> {
        let (drawable, handle) = spec.build(self.resize_policy, self.clone());
        self.send(Command::Add(Box::new(drawable)))?;
        Ok(handle)
    }

    /// Queues a drawable for release and removal on the draw thread.
    pub fn remove(&self, id: DrawableId) -> Result<()> {
        self.send(Command::Remove(id))
    }

    pub fn set_alpha(&self, id: DrawableId, alpha: f32) -> Result<()> {
        self.send(Command::SetAlpha(id, alpha))
    }

    pub fn translate(&self, id: DrawableId, dx: f32, dy: f32) -> Result<()> {
        self.send(Command::Translate(id, dx, dy))
    }

    pub fn scale(&self, id: DrawableId, sx: f32, sy: f32) -> Result<()> {
        self.send(Command::Scale(id, sx, sy))
    }
}

/// Composites every registered stream onto one surface.
pub struct Compositor {
    drawables: Vec<Box<dyn Drawable>>,
    viewport: Size,
    clear_color: wgpu::Color,
    commands: mpsc::Receiver<Command>,
    remote: CompositorRemote,
    /// Removals queued by the remote, applied once a draw token is at hand
    pending_removals: Vec<DrawableId>,
    frame: u64,
    surface_ready: bool,
}

impl Compositor {
    pub fn new(settings: &CompositorSettings) -> Self {
        let (tx, rx) = mpsc::channel();
        let [r, g, b, a] = settings.clear_color;

        info!("🏗️ Initializing mosaic compositor");
        Self {
            drawables: Vec::new(),
            viewport: Size::default(),
            clear_color: wgpu::Color { r, g, b, a },
            commands: rx,
            remote: CompositorRemote {
                commands: tx,
                resize_policy: settings.resize_policy,
            },
            pending_removals: Vec::new(),
            frame: 0,
            surface_ready: false,
        }
    }

    pub fn remote(&self) -> CompositorRemote {
        self.remote.clone()
    }

    /// Appends a drawable on top of the existing ones.
    pub fn add_drawable(&mut self, mut drawable: Box<dyn Drawable>) -> DrawableId {
        if !self.viewport.is_empty() {
            drawable.set_viewport_size(self.viewport);
        }
        let id = drawable.id();
        info!(
            "➕ Added drawable {} ({}), {} total",
            id,
            drawable.source_size(),
            self.drawables.len() + 1
        );
        self.drawables.push(drawable);
        id
    }

    /// Registers a stream directly on the draw thread.
    pub fn add_stream(&mut self, spec: StreamSpec) -> StreamHandle {
        let (drawable, handle) = spec.build(self.remote.resize_policy, self.remote());
        self.add_drawable(Box::new(drawable));
        handle
    }

    /// Releases a drawable's GPU resources and removes it.
    pub fn remove_drawable(&mut self, id: DrawableId, token: DrawToken<'_>) -> Result<()> {
        let index = self
            .position(id)
            .ok_or(RenderError::UnknownDrawable(id))?;
        let mut drawable = self.drawables.remove(index);
        drawable.release(token);
        info!("➖ Removed drawable {}, {} left", id, self.drawables.len());
        Ok(())
    }

    pub fn on_surface_created(&mut self, _token: DrawToken<'_>) {
        self.surface_ready = true;
        info!(
            "🖼️ Surface created, clearing to ({:.2}, {:.2}, {:.2}, {:.2})",
            self.clear_color.r, self.clear_color.g, self.clear_color.b, self.clear_color.a
        );
    }

    /// Stores the new viewport and pushes it to every drawable.
    pub fn on_viewport_resized(&mut self, size: Size) {
        if size == self.viewport {
            return;
        }
        debug!("📐 Viewport resized to {}", size);
        self.viewport = size;
        for drawable in &mut self.drawables {
            drawable.set_viewport_size(size);
        }
    }

    /// Draws every stream into `target` in insertion order.
    pub fn on_draw_frame(&mut self, token: DrawToken<'_>, target: &wgpu::TextureView) -> FrameReport {
        self.frame += 1;
        let mut report = FrameReport {
            frame: self.frame,
            ..Default::default()
        };

        self.process_commands();
        self.apply_removals(token);

        let mut ready = Vec::with_capacity(self.drawables.len());
        for drawable in &mut self.drawables {
            let id = drawable.id();

            if !drawable.is_texture_bound() {
                if let Err(e) = drawable.bind_texture(token) {
                    warn!("⚠️ Failed to bind texture for drawable {}: {}", id, e);
                    report.failures.push((id, e));
                    ready.push(false);
                    continue;
                }
            }

            match drawable.prepare(token) {
                Ok(DrawStatus::Ready) => ready.push(true),
                Ok(DrawStatus::Skipped(reason)) => {
                    trace!("Drawable {} skipped: {:?}", id, reason);
                    report.skipped.push((id, reason));
                    ready.push(false);
                }
                Err(e) => {
                    report.failures.push((id, e));
                    ready.push(false);
                }
            }
        }

        let mut encoder = token
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Mosaic Frame Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Mosaic Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            for (drawable, _) in self.drawables.iter().zip(&ready).filter(|(_, r)| **r) {
                drawable.record(&mut pass);
                report.drawn += 1;
            }
        }
        token.queue().submit(std::iter::once(encoder.finish()));

        trace!(
            "Frame {}: drew {}, skipped {}, failed {}",
            report.frame,
            report.drawn,
            report.skipped.len(),
            report.failures.len()
        );
        report
    }

    /// Applies queued remote commands that need no GPU access.
    ///
    /// Removals are held until the next frame or shutdown. Returns the number
    /// of commands taken from the queue.
    pub fn process_commands(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.commands.try_recv() {
            applied += 1;
            match command {
                Command::Add(drawable) => {
                    self.add_drawable(drawable);
                }
                Command::Remove(id) => self.pending_removals.push(id),
                Command::SetAlpha(id, alpha) => {
                    if let Err(e) = self.set_alpha(id, alpha) {
                        warn!("⚠️ Remote set_alpha failed: {}", e);
                    }
                }
                Command::Translate(id, dx, dy) => {
                    if let Err(e) = self.translate(id, dx, dy) {
                        warn!("⚠️ Remote translate failed: {}", e);
                    }
                }
                Command::Scale(id, sx, sy) => {
                    if let Err(e) = self.scale(id, sx, sy) {
                        warn!("⚠️ Remote scale failed: {}", e);
                    }
                }
            }
        }
        applied
    }

    fn apply_removals(&mut self, token: DrawToken<'_>) {
        for id in std::mem::take(&mut self.pending_removals) {
            if let Err(e) = self.remove_drawable(id, token) {
                warn!("⚠️ Remote remove failed: {}", e);
            }
        }
    }

    pub fn set_alpha(&mut self, id: DrawableId, alpha: f32) -> Result<()> {
        self.drawable_mut(id)?.set_alpha(alpha);
        Ok(())
    }

    pub fn translate(&mut self, id: DrawableId, dx: f32, dy: f32) -> Result<()> {
        self.drawable_mut(id)?.translate(dx, dy)
    }

    pub fn scale(&mut self, id: DrawableId, sx: f32, sy: f32) -> Result<()> {
        self.drawable_mut(id)?.scale(sx, sy)
    }

    /// Releases every drawable, including ones still queued by the remote.
    pub fn shutdown(&mut self, token: DrawToken<'_>) {
        info!("🛑 Shutting down compositor ({} drawables)", self.drawables.len());
        self.process_commands();
        self.pending_removals.clear();
        for drawable in &mut self.drawables {
            drawable.release(token);
        }
        self.drawables.clear();
        self.surface_ready = false;
    }

    fn position(&self, id: DrawableId) -> Option<usize> {
        self.drawables.iter().position(|d| d.id() == id)
    }

    fn drawable_mut(&mut self, id: DrawableId) -> Result<&mut Box<dyn Drawable>> {
        self.drawables
            .iter_mut()
            .find(|d| d.id() == id)
            .ok_or(RenderError::UnknownDrawable(id))
    }

    pub fn drawable(&self, id: DrawableId) -> Option<&dyn Drawable> {
        self.drawables
            .iter()
            .find(|d| d.id() == id)
            .map(|d| d.as_ref())
    }

    /// Ids in draw order, bottom first.
    pub fn drawable_ids(&self) -> Vec<DrawableId> {
        self.drawables.iter().map(|d| d.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.drawables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drawables.is_empty()
    }

    pub fn viewport(&self) -> Size {
        self.viewport
    }

    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    pub fn is_surface_ready(&self) -> bool {
        self.surface_ready
    }
}
