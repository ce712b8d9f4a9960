//! The capability every composited stream provides
//!
//! [`Drawable`] is what the compositor drives once per frame. It carries no
//! default methods; implementors that want the usual size, alpha and
//! projection bookkeeping embed a [`DrawableBase`] and forward to it.

use log::{debug, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::projection::{Projection, ProjectionState, ResizePolicy, Transform};
use super::{RenderError, Result, Size};
use crate::frame_sink::FrameSink;
use crate::gpu::DrawToken;

/// Process-unique identifier of a drawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawableId(u64);

static NEXT_DRAWABLE_ID: AtomicU64 = AtomicU64::new(1);

impl DrawableId {
    /// Allocates a fresh id.
    pub fn next() -> Self {
        Self(NEXT_DRAWABLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DrawableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a drawable did not draw this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The texture has not been bound on the draw thread yet
    NoTexture,
    /// Source or viewport size is still unknown
    SizesUnknown,
    /// No frame has been uploaded yet
    NoFrame,
    /// The program failed to build earlier
    ProgramFailed,
}

/// Outcome of [`Drawable::prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawStatus {
    Ready,
    Skipped(SkipReason),
}

impl DrawStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, DrawStatus::Ready)
    }
}

/// A stream the compositor can draw.
///
/// Methods taking a [`DrawToken`] run on the draw thread; everything else is
/// plain state and may be called at any time, in any order.
pub trait Drawable: Send {
    fn id(&self) -> DrawableId;

    fn set_source_size(&mut self, size: Size);
    fn source_size(&self) -> Size;

    /// Called by the compositor on add and on every resize.
    fn set_viewport_size(&mut self, size: Size);
    fn viewport_size(&self) -> Size;

    /// Opacity in [0,1], effective on the next draw.
    fn set_alpha(&mut self, alpha: f32);
    fn alpha(&self) -> f32;

    fn is_texture_bound(&self) -> bool;

    /// Creates the texture and attaches the frame sink. No-op when already
    /// bound or while the source size is unknown.
    fn bind_texture(&mut self, token: DrawToken<'_>) -> Result<()>;

    fn frame_sink(&self) -> &FrameSink;

    /// Moves the drawable by `dx`, `dy` in NDC units.
    fn translate(&mut self, dx: f32, dy: f32) -> Result<()>;

    /// Scales the drawable about its current origin.
    fn scale(&mut self, sx: f32, sy: f32) -> Result<()>;

    /// Gets everything ready for [`Drawable::record`]: program, projection,
    /// newest frame and uniforms.
    fn prepare(&mut self, token: DrawToken<'_>) -> Result<DrawStatus>;

    /// Records the draw. Only called after `prepare` returned `Ready`.
    fn record<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>);

    /// Frees every GPU resource and detaches the sink. Idempotent.
    fn release(&mut self, token: DrawToken<'_>);
}

/// State shared by every drawable implementation.
#[derive(Debug)]
pub struct DrawableBase {
    id: DrawableId,
    source_size: Size,
    viewport_size: Size,
    alpha: f32,
    projection: ProjectionState,
    resize_policy: ResizePolicy,
    initial_transform: Transform,
    sink: FrameSink,
}

impl DrawableBase {
    pub fn new(id: DrawableId, source_size: Size) -> Self {
        Self {
            id,
            source_size,
            viewport_size: Size::default(),
            alpha: 1.0,
            projection: ProjectionState::Uninitialized,
            resize_policy: ResizePolicy::default(),
            initial_transform: Transform::default(),
            sink: FrameSink::new(),
        }
    }

    pub fn with_resize_policy(mut self, policy: ResizePolicy) -> Self {
        self.resize_policy = policy;
        self
    }

    pub fn with_initial_transform(mut self, transform: Transform) -> Self {
        self.initial_transform = transform;
        self
    }

    pub fn with_sink(mut self, sink: FrameSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn id(&self) -> DrawableId {
        self.id
    }

    pub fn source_size(&self) -> Size {
        self.source_size
    }

    pub fn viewport_size(&self) -> Size {
        self.viewport_size
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn resize_policy(&self) -> ResizePolicy {
        self.resize_policy
    }

    pub fn sink(&self) -> &FrameSink {
        &self.sink
    }

    pub fn projection_state(&self) -> &ProjectionState {
        &self.projection
    }

    pub fn set_source_size(&mut self, size: Size) {
        if size == self.source_size {
            return;
        }
        self.source_size = size;
        self.sizes_changed();
    }

    pub fn set_viewport_size(&mut self, size: Size) {
        if size == self.viewport_size {
            return;
        }
        self.viewport_size = size;
        self.sizes_changed();
    }

    fn sizes_changed(&mut self) {
        if self.resize_policy == ResizePolicy::Preserve {
            return;
        }
        let (source, viewport) = (self.source_size, self.viewport_size);
        if let Some(projection) = self.projection.projection_mut() {
            if projection.rebase(source, viewport) {
                debug!(
                    "Drawable {} re-derived for {} on {}",
                    self.id, source, viewport
                );
            }
        }
    }

    /// Takes the size decoded frames actually arrive at as the source size.
    ///
    /// Returns `false` when the sizes differ and the policy is `Preserve`,
    /// which keeps the original source size and its aspect.
    pub fn adopt_frame_size(&mut self, size: Size) -> bool {
        if size == self.source_size {
            return true;
        }
        match self.resize_policy {
            ResizePolicy::Rederive => {
                debug!(
                    "Drawable {} frames arrive at {}, was {}",
                    self.id, size, self.source_size
                );
                self.set_source_size(size);
                true
            }
            ResizePolicy::Preserve => false,
        }
    }

    /// Clamps to [0,1]; NaN is ignored.
    pub fn set_alpha(&mut self, alpha: f32) {
        if alpha.is_nan() {
            warn!("Ignoring NaN alpha for drawable {}", self.id);
            return;
        }
        self.alpha = alpha.clamp(0.0, 1.0);
    }

    /// Derives the projection on first use once both sizes are known.
    pub fn ensure_projection(&mut self) -> Option<&Projection> {
        if let ProjectionState::Uninitialized = self.projection {
            let mut projection = Projection::derive(self.source_size, self.viewport_size)?;
            if let Err(e) = projection.apply(&self.initial_transform) {
                warn!("Initial transform for drawable {} rejected: {}", self.id, e);
            }

            debug!(
                "Drawable {} projection derived (ratios {:.3}/{:.3}, {} on {})",
                self.id,
                projection.width_ratio(),
                projection.height_ratio(),
                self.source_size,
                self.viewport_size
            );
            self.projection = ProjectionState::Derived(projection);
        }
        self.projection.projection()
    }

    pub fn translate(&mut self, dx: f32, dy: f32) -> Result<()> {
        let id = self.id;
        self.projection
            .projection_mut()
            .ok_or(RenderError::ProjectionNotReady(id))?
            .translate(dx, dy)
    }

    pub fn scale(&mut self, sx: f32, sy: f32) -> Result<()> {
        let id = self.id;
        self.projection
            .projection_mut()
            .ok_or(RenderError::ProjectionNotReady(id))?
            .scale(sx, sy)
    }

    /// Forgets the derived projection, user transforms included.
    pub fn invalidate(&mut self) {
        self.projection = ProjectionState::Uninitialized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derived_base() -> DrawableBase {
        let mut base = DrawableBase::new(DrawableId::next(), Size::new(1920, 1080));
        base.set_viewport_size(Size::new(1080, 1920));
        assert!(base.ensure_projection().is_some());
        base
    }

    #[test]
    fn test_ids_are_unique() {
        let a = DrawableId::next();
        let b = DrawableId::next();
        assert_ne!(a, b);
        assert_eq!(format!("{}", DrawableId(7)), "#7");
    }

    #[test]
    fn test_projection_waits_for_both_sizes() {
        let mut base = DrawableBase::new(DrawableId::next(), Size::default());
        assert!(base.ensure_projection().is_none());

        base.set_viewport_size(Size::new(800, 600));
        assert!(base.ensure_projection().is_none());

        base.set_source_size(Size::new(640, 480));
        assert!(base.ensure_projection().is_some());
    }

    #[test]
    fn test_transform_before_derivation_fails() {
        let mut base = DrawableBase::new(DrawableId::next(), Size::new(4, 4));
        let id = base.id();
        assert!(matches!(
            base.translate(0.1, 0.0),
            Err(RenderError::ProjectionNotReady(got)) if got == id
        ));
        assert!(matches!(
            base.scale(2.0, 2.0),
            Err(RenderError::ProjectionNotReady(_))
        ));
    }

    #[test]
    fn test_repeated_setters_keep_matrix() {
        let mut base = derived_base();
        base.translate(0.1, 0.2).unwrap();
        let before = *base.projection_state();

        base.set_viewport_size(Size::new(1080, 1920));
        base.set_source_size(Size::new(1920, 1080));
        base.ensure_projection();

        assert_eq!(*base.projection_state(), before);
    }

    #[test]
    fn test_preserve_policy_ignores_resize() {
        let mut base = DrawableBase::new(DrawableId::next(), Size::new(1920, 1080))
            .with_resize_policy(ResizePolicy::Preserve);
        base.set_viewport_size(Size::new(1920, 1080));
        base.ensure_projection();
        let before = *base.projection_state();

        base.set_viewport_size(Size::new(1080, 1920));
        assert_eq!(*base.projection_state(), before);
    }

    #[test]
    fn test_rederive_policy_follows_resize() {
        let mut base = DrawableBase::new(DrawableId::next(), Size::new(1920, 1080));
        base.set_viewport_size(Size::new(1920, 1080));
        base.ensure_projection();

        base.set_viewport_size(Size::new(1080, 1920));
        let projection = base.projection_state().projection().unwrap();
        assert_eq!(projection.viewport(), Size::new(1080, 1920));
        assert!(projection.height_ratio() > 3.0);
    }

    #[test]
    fn test_frames_of_a_new_size_rederive() {
        let mut base = derived_base();
        let before = base.projection_state().projection().unwrap().height_ratio();

        assert!(base.adopt_frame_size(Size::new(1080, 1920)));
        assert_eq!(base.source_size(), Size::new(1080, 1920));
        let projection = base.projection_state().projection().unwrap();
        assert_eq!(projection.source(), Size::new(1080, 1920));
        assert!(before > 3.0);
        assert!((projection.height_ratio() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_frames_of_a_new_size_kept_under_preserve() {
        let mut base = DrawableBase::new(DrawableId::next(), Size::new(1920, 1080))
            .with_resize_policy(ResizePolicy::Preserve);
        base.set_viewport_size(Size::new(1920, 1080));
        base.ensure_projection();
        let before = *base.projection_state();

        assert!(base.adopt_frame_size(Size::new(1920, 1080)));
        assert!(!base.adopt_frame_size(Size::new(640, 480)));
        assert_eq!(base.source_size(), Size::new(1920, 1080));
        assert_eq!(*base.projection_state(), before);
    }

    #[test]
    fn test_alpha_clamped_and_nan_ignored() {
        let mut base = DrawableBase::new(DrawableId::next(), Size::new(4, 4));
        base.set_alpha(1.5);
        assert_eq!(base.alpha(), 1.0);
        base.set_alpha(-0.5);
        assert_eq!(base.alpha(), 0.0);
        base.set_alpha(0.25);
        base.set_alpha(f32::NAN);
        assert_eq!(base.alpha(), 0.25);
    }

    #[test]
    fn test_initial_transform_applied_once() {
        let mut base = DrawableBase::new(DrawableId::next(), Size::new(100, 100))
            .with_initial_transform(Transform {
                translate: (0.25, 0.0),
                scale: (1.0, 1.0),
            });
        base.set_viewport_size(Size::new(100, 100));

        let (x, _) = base.ensure_projection().unwrap().project(0.0, 0.0);
        assert!((x - 0.5).abs() < 1e-4);

        // A second call must not stack the transform again
        let (x, _) = base.ensure_projection().unwrap().project(0.0, 0.0);
        assert!((x - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_invalidate_resets_user_transform() {
        let mut base = derived_base();
        base.translate(0.3, 0.0).unwrap();
        base.invalidate();
        assert!(!base.projection_state().is_derived());

        let (x, _) = base.ensure_projection().unwrap().project(0.0, 0.0);
        assert!(x.abs() < 1e-4);
    }
}
