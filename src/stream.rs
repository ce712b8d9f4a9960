//! Stream registration and start/stop orchestration
//!
//! A stream is described by a [`StreamSpec`], registered with the compositor
//! (which hands back a [`StreamHandle`]), and then wired to a decoder with
//! [`Stream::start`]. [`Stream::stop`] tears it down in a fixed order: the
//! decoder is cancelled and awaited first, then the sink is detached, and only
//! then is the drawable queued for release on the draw thread.

use log::{debug, info};
use tokio::sync::oneshot;

use crate::compositor::CompositorRemote;
use crate::decode::{DecodeError, DecodeHandle, DecodeOutcome, DecoderPool, FrameSource};
use crate::frame_sink::{FrameProducer, FrameSink, FrameSinkError};
use crate::renderer::{
    DrawableBase, DrawableId, RenderError, ResizePolicy, Size, Transform, VideoDrawable,
};

/// Everything needed to register a stream with the compositor.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSpec {
    pub source_size: Size,
    pub alpha: f32,
    pub transform: Transform,
    /// Falls back to the compositor's policy when unset
    pub resize_policy: Option<ResizePolicy>,
    pub shader_source: Option<String>,
}

impl StreamSpec {
    pub fn new(source_size: Size) -> Self {
        Self {
            source_size,
            alpha: 1.0,
            transform: Transform::default(),
            resize_policy: None,
            shader_source: None,
        }
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// Offset applied once the projection is derived, in NDC units.
    pub fn with_translate(mut self, dx: f32, dy: f32) -> Self {
        self.transform.translate = (dx, dy);
        self
    }

    /// Scale applied once the projection is derived, before the offset.
    pub fn with_scale(mut self, sx: f32, sy: f32) -> Self {
        self.transform.scale = (sx, sy);
        self
    }

    pub fn with_resize_policy(mut self, policy: ResizePolicy) -> Self {
        self.resize_policy = Some(policy);
        self
    }

    /// Draws the stream with custom WGSL instead of the built-in program.
    pub fn with_shader_source(mut self, source: impl Into<String>) -> Self {
        self.shader_source = Some(source.into());
        self
    }

    pub(crate) fn build(
        self,
        default_policy: ResizePolicy,
        remote: CompositorRemote,
    ) -> (VideoDrawable, StreamHandle) {
        let id = DrawableId::next();
        let mut base = DrawableBase::new(id, self.source_size)
            .with_resize_policy(self.resize_policy.unwrap_or(default_policy))
            .with_initial_transform(self.transform);
        base.set_alpha(self.alpha);
        let sink = base.sink().clone();

        let (mut drawable, producer) = VideoDrawable::new(base);
        if let Some(source) = self.shader_source {
            drawable = drawable.with_shader_source(source);
        }

        let handle = StreamHandle {
            id,
            sink,
            remote,
            producer: Some(producer),
        };
        (drawable, handle)
    }
}

/// Handle to a registered stream, usable from any thread.
pub struct StreamHandle {
    id: DrawableId,
    sink: FrameSink,
    remote: CompositorRemote,
    producer: Option<oneshot::Receiver<FrameProducer>>,
}

impl StreamHandle {
    pub fn id(&self) -> DrawableId {
        self.id
    }

    /// The draw side of the stream's frame slot.
    pub fn sink(&self) -> &FrameSink {
        &self.sink
    }

    pub fn set_alpha(&self, alpha: f32) -> Result<(), RenderError> {
        self.remote.set_alpha(self.id, alpha)
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Result<(), RenderError> {
        self.remote.translate(self.id, dx, dy)
    }

    pub fn scale(&self, sx: f32, sy: f32) -> Result<(), RenderError> {
        self.remote.scale(self.id, sx, sy)
    }

    /// Queues the drawable for release and removal.
    pub fn remove(&self) -> Result<(), RenderError> {
        self.remote.remove(self.id)
    }

    /// Waits until the draw thread has bound the texture and returns the
    /// producer frames are submitted through.
    ///
    /// Fails with `Detached` if the drawable was released before binding,
    /// and with `AlreadyAttached` once the producer has been handed out.
    pub async fn producer(&mut self) -> Result<FrameProducer, FrameSinkError> {
        let rx = self
            .producer
            .take()
            .ok_or(FrameSinkError::AlreadyAttached)?;
        rx.await.map_err(|_| FrameSinkError::Detached)
    }

    /// Non-blocking variant of [`StreamHandle::producer`]. `Ok(None)` means
    /// the texture is not bound yet.
    pub fn try_producer(&mut self) -> Result<Option<FrameProducer>, FrameSinkError> {
        let Some(rx) = self.producer.as_mut() else {
            return Err(FrameSinkError::AlreadyAttached);
        };
        match rx.try_recv() {
            Ok(producer) => {
                self.producer = None;
                Ok(Some(producer))
            }
            Err(oneshot::error::TryRecvError::Empty) => Ok(None),
            Err(oneshot::error::TryRecvError::Closed) => {
                self.producer = None;
                Err(FrameSinkError::Detached)
            }
        }
    }
}

/// A registered stream fed by a running decoder.
pub struct Stream {
    handle: StreamHandle,
    decoder: DecodeHandle,
}

impl Stream {
    /// Waits for the stream's texture to be bound, then starts decoding into it.
    pub async fn start<S: FrameSource>(
        mut handle: StreamHandle,
        pool: &DecoderPool,
        source: S,
    ) -> Result<Self, FrameSinkError> {
        let producer = handle.producer().await?;
        let decoder = pool.spawn(source, producer);
        info!("▶️ Stream {} started ({})", handle.id(), decoder.name());
        Ok(Self { handle, decoder })
    }

    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }

    pub fn id(&self) -> DrawableId {
        self.handle.id()
    }

    pub fn is_decoding(&self) -> bool {
        !self.decoder.is_finished()
    }

    /// Stops decoding, detaches the sink and queues the drawable's release.
    pub async fn stop(self) -> Result<DecodeOutcome, DecodeError> {
        let id = self.handle.id();
        let outcome = self.decoder.stop().await;

        self.handle.sink().detach();
        if let Err(e) = self.handle.remove() {
            debug!("Stream {} removal not queued: {}", id, e);
        }

        info!("⏹️ Stream {} stopped", id);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::{Compositor, CompositorSettings};

    #[test]
    fn test_spec_builder() {
        let spec = StreamSpec::new(Size::new(1280, 720))
            .with_alpha(0.4)
            .with_translate(0.1, -0.1)
            .with_scale(0.5, 0.5)
            .with_resize_policy(ResizePolicy::Preserve);

        assert_eq!(spec.alpha, 0.4);
        assert_eq!(spec.transform.translate, (0.1, -0.1));
        assert_eq!(spec.transform.scale, (0.5, 0.5));
        assert_eq!(spec.resize_policy, Some(ResizePolicy::Preserve));
        assert!(spec.shader_source.is_none());
    }

    #[test]
    fn test_try_producer_before_bind() {
        let mut compositor = Compositor::new(&CompositorSettings::default());
        let mut handle = compositor.add_stream(StreamSpec::new(Size::new(4, 4)));

        assert!(matches!(handle.try_producer(), Ok(None)));
        assert!(!handle.sink().is_attached());
    }

    #[tokio::test]
    async fn test_producer_fails_when_drawable_dropped() {
        let mut compositor = Compositor::new(&CompositorSettings::default());
        let mut handle = compositor.add_stream(StreamSpec::new(Size::new(4, 4)));

        // Dropping the compositor drops the drawable and its ready signal
        drop(compositor);
        assert_eq!(handle.producer().await.unwrap_err(), FrameSinkError::Detached);
        assert_eq!(
            handle.producer().await.unwrap_err(),
            FrameSinkError::AlreadyAttached
        );
    }

    #[test]
    fn test_handle_commands_reach_compositor() {
        let mut compositor = Compositor::new(&CompositorSettings::default());
        let handle = compositor.add_stream(StreamSpec::new(Size::new(4, 4)));

        handle.set_alpha(0.3).unwrap();
        handle.remove().unwrap();
        assert_eq!(compositor.process_commands(), 2);
        assert_eq!(compositor.drawable(handle.id()).unwrap().alpha(), 0.3);
    }
}
