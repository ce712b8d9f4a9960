//! Aspect-fit projection math
//!
//! A stream is drawn as a quad spanning [-1,1] on both axes. The base
//! projection is an orthographic volume widened along one axis so the quad
//! keeps the source aspect ratio inside the viewport; user translations and
//! scales are multiplied on top of it without touching the base.

use cgmath::{Matrix4, Point3, Vector3, Vector4};

use super::{RenderError, Result, Size};

/// Near plane of the orthographic volume.
pub const NEAR: f32 = 3.0;
/// Far plane of the orthographic volume.
pub const FAR: f32 = 5.0;
/// Eye distance along +Z, between the planes.
pub const EYE_Z: f32 = 4.9;

/// Converts OpenGL clip space (z in [-1,1]) to wgpu clip space (z in [0,1]).
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

/// Half extents of the orthographic volume.
///
/// At most one of the two exceeds 1.0; the other stays at 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectRatios {
    pub width: f32,
    pub height: f32,
}

impl Default for AspectRatios {
    fn default() -> Self {
        Self {
            width: 1.0,
            height: 1.0,
        }
    }
}

/// Computes the ratios that fit `source` inside `viewport` without
/// distortion. Returns `None` while either size is unknown.
pub fn aspect_fit(source: Size, viewport: Size) -> Option<AspectRatios> {
    if source.is_empty() || viewport.is_empty() {
        return None;
    }

    let source_ratio = source.aspect();
    let viewport_ratio = viewport.aspect();

    let ratios = if source_ratio > viewport_ratio {
        AspectRatios {
            width: 1.0,
            height: source_ratio / viewport_ratio,
        }
    } else {
        AspectRatios {
            width: viewport_ratio / source_ratio,
            height: 1.0,
        }
    };
    Some(ratios)
}

fn base_matrix(ratios: AspectRatios) -> Matrix4<f32> {
    let ortho = cgmath::ortho(
        -ratios.width,
        ratios.width,
        -ratios.height,
        ratios.height,
        NEAR,
        FAR,
    );
    let view = Matrix4::look_at_rh(
        Point3::new(0.0, 0.0, EYE_Z),
        Point3::new(0.0, 0.0, 0.0),
        Vector3::unit_y(),
    );
    ortho * view
}

/// What happens to a derived projection when the viewport changes size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizePolicy {
    /// Keep the matrix derived from the first viewport
    Preserve,
    /// Re-derive the base for the new viewport, keeping user transforms
    #[default]
    Rederive,
}

/// Transform applied once, right after the projection is first derived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translate: (f32, f32),
    pub scale: (f32, f32),
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translate: (0.0, 0.0),
            scale: (1.0, 1.0),
        }
    }
}

impl Transform {
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

/// A derived projection plus the user transform layered on top of it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    base: Matrix4<f32>,
    user: Matrix4<f32>,
    base_ratios: AspectRatios,
    /// Product of every scale applied so far
    accumulated_scale: (f32, f32),
    /// Sum of every translate applied so far, in NDC units (+y up)
    offset: (f32, f32),
    source: Size,
    viewport: Size,
}

impl Projection {
    /// Derives the base projection. `None` while either size is unknown.
    pub fn derive(source: Size, viewport: Size) -> Option<Self> {
        let base_ratios = aspect_fit(source, viewport)?;
        Some(Self {
            base: base_matrix(base_ratios),
            user: Matrix4::from_scale(1.0),
            base_ratios,
            accumulated_scale: (1.0, 1.0),
            offset: (0.0, 0.0),
            source,
            viewport,
        })
    }

    /// Rebuilds the user matrix for the current base ratios.
    ///
    /// Translation is applied after scaling, so scales act about the quad's
    /// current origin and offsets stay in NDC whatever the aspect correction.
    fn rebuild_user(&mut self) {
        let translation = Vector3::new(
            self.offset.0 * self.base_ratios.width,
            self.offset.1 * self.base_ratios.height,
            0.0,
        );
        let (sx, sy) = self.accumulated_scale;
        self.user =
            Matrix4::from_translation(translation) * Matrix4::from_nonuniform_scale(sx, sy, 1.0);
    }

    /// Base projection times user transform, in OpenGL clip conventions.
    pub fn matrix(&self) -> Matrix4<f32> {
        self.base * self.user
    }

    /// [`Projection::matrix`] converted for wgpu, as uploaded to the shader.
    pub fn clip_matrix(&self) -> Matrix4<f32> {
        OPENGL_TO_WGPU_MATRIX * self.matrix()
    }

    pub fn ratios(&self) -> AspectRatios {
        AspectRatios {
            width: self.base_ratios.width / self.accumulated_scale.0,
            height: self.base_ratios.height / self.accumulated_scale.1,
        }
    }

    pub fn width_ratio(&self) -> f32 {
        self.ratios().width
    }

    pub fn height_ratio(&self) -> f32 {
        self.ratios().height
    }

    pub fn source(&self) -> Size {
        self.source
    }

    pub fn viewport(&self) -> Size {
        self.viewport
    }

    /// Moves the quad by `dx`, `dy` in NDC units (+y down).
    pub fn translate(&mut self, dx: f32, dy: f32) -> Result<()> {
        if !dx.is_finite() || !dy.is_finite() {
            return Err(RenderError::InvalidTransform(format!(
                "translate({}, {}) is not finite",
                dx, dy
            )));
        }

        self.offset.0 += dx * 2.0;
        self.offset.1 -= dy * 2.0;
        self.rebuild_user();
        Ok(())
    }

    /// Scales the quad about its current origin.
    pub fn scale(&mut self, sx: f32, sy: f32) -> Result<()> {
        if !sx.is_finite() || !sy.is_finite() || sx == 0.0 || sy == 0.0 {
            return Err(RenderError::InvalidTransform(format!(
                "scale({}, {}) must be finite and non-zero",
                sx, sy
            )));
        }

        self.accumulated_scale.0 *= sx;
        self.accumulated_scale.1 *= sy;
        self.rebuild_user();
        Ok(())
    }

    /// Applies an initial transform: scale first, then translate.
    pub fn apply(&mut self, transform: &Transform) -> Result<()> {
        let (sx, sy) = transform.scale;
        if (sx, sy) != (1.0, 1.0) {
            self.scale(sx, sy)?;
        }
        let (dx, dy) = transform.translate;
        if (dx, dy) != (0.0, 0.0) {
            self.translate(dx, dy)?;
        }
        Ok(())
    }

    /// Re-derives the base for new sizes, keeping the user transform.
    /// Returns `false`, leaving the projection untouched, if a size is
    /// unknown or neither changed.
    pub fn rebase(&mut self, source: Size, viewport: Size) -> bool {
        if source == self.source && viewport == self.viewport {
            return false;
        }
        let Some(base_ratios) = aspect_fit(source, viewport) else {
            return false;
        };

        self.base = base_matrix(base_ratios);
        self.base_ratios = base_ratios;
        self.source = source;
        self.viewport = viewport;
        self.rebuild_user();
        true
    }

    /// Where a point of the [-1,1] quad lands in normalized device coordinates.
    pub fn project(&self, x: f32, y: f32) -> (f32, f32) {
        let p = self.clip_matrix() * Vector4::new(x, y, 0.0, 1.0);
        (p.x / p.w, p.y / p.w)
    }
}

/// Lazy derivation state of a drawable's projection.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ProjectionState {
    #[default]
    Uninitialized,
    Derived(Projection),
}

impl ProjectionState {
    pub fn projection(&self) -> Option<&Projection> {
        match self {
            ProjectionState::Uninitialized => None,
            ProjectionState::Derived(projection) => Some(projection),
        }
    }

    pub fn projection_mut(&mut self) -> Option<&mut Projection> {
        match self {
            ProjectionState::Uninitialized => None,
            ProjectionState::Derived(projection) => Some(projection),
        }
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, ProjectionState::Derived(_))
    }
}
