//! GPU context and the draw-thread token
//!
//! Every GPU resource in the compositor is created, used and destroyed through
//! a [`DrawToken`]. Tokens are borrowed from the [`GpuContext`], and neither
//! type is `Send` or `Sync`: the thread that created the context is the draw
//! thread, and no other thread can reach the device through them.

use log::{info, warn};
use std::marker::PhantomData;
use std::sync::Arc;
use wgpu::{Device, Queue, TextureFormat};

use crate::renderer::{RenderError, Result};

/// Owns the device and queue for the lifetime of a render surface.
pub struct GpuContext {
    device: Arc<Device>,
    queue: Arc<Queue>,
    /// Format of the target the compositor draws into
    format: TextureFormat,
    adapter_name: String,
    /// Pins the context to the thread that created it
    _draw_thread: PhantomData<*const ()>,
}

/// Proof that the caller is on the draw thread.
///
/// Only obtainable from [`GpuContext::token`], and cannot be sent elsewhere.
#[derive(Clone, Copy)]
pub struct DrawToken<'g> {
    gpu: &'g GpuContext,
}

impl<'g> DrawToken<'g> {
    pub fn device(&self) -> &'g Device {
        &self.gpu.device
    }

    pub fn queue(&self) -> &'g Queue {
        &self.gpu.queue
    }

    /// Format of the render target drawables must be compatible with.
    pub fn format(&self) -> TextureFormat {
        self.gpu.format
    }
}

/// Surface-backed context plus the configuration applied to the surface.
pub struct SurfaceGpu {
    pub gpu: GpuContext,
    pub config: wgpu::SurfaceConfiguration,
}

impl GpuContext {
    /// Create a headless context drawing into targets of `format`.
    pub async fn headless(backends: wgpu::Backends, format: TextureFormat) -> Result<Self> {
        info!("🎨 Creating headless GPU context (backends={:?})", backends);

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = request_adapter(&instance, None).await?;
        Self::from_adapter(&adapter, format).await
    }

    /// Create a context for an on-screen surface and configure it.
    ///
    /// The surface must come from `instance`.
    pub async fn for_surface(
        instance: &wgpu::Instance,
        surface: &wgpu::Surface<'_>,
        width: u32,
        height: u32,
        present_mode: &str,
    ) -> Result<SurfaceGpu> {
        info!("🎨 Creating GPU context for surface ({}x{})", width, height);

        let adapter = request_adapter(instance, Some(surface)).await?;
        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| RenderError::InitError("surface reports no formats".to_string()))?;

        let present_mode = select_present_mode(&caps.present_modes, present_mode);
        let alpha_mode = caps
            .alpha_modes
            .iter()
            .copied()
            .find(|m| matches!(m, wgpu::CompositeAlphaMode::Auto | wgpu::CompositeAlphaMode::Opaque))
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        info!(
            "🔧 Using format={:?}, present_mode={:?}, alpha_mode={:?}",
            format, present_mode, alpha_mode
        );

        let gpu = Self::from_adapter(&adapter, format).await?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&gpu.device, &config);

        Ok(SurfaceGpu { gpu, config })
    }

    async fn from_adapter(adapter: &wgpu::Adapter, format: TextureFormat) -> Result<Self> {
        let adapter_name = adapter.get_info().name;
        info!("🖥️ Using GPU: {}", adapter_name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Mosaic Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .map_err(|e| RenderError::InitError(format!("failed to create device: {}", e)))?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            format,
            adapter_name,
            _draw_thread: PhantomData,
        })
    }

    /// Borrow a token for GPU work on this (the draw) thread.
    pub fn token(&self) -> DrawToken<'_> {
        DrawToken { gpu: self }
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Reconfigure a surface after a resize or a lost swapchain.
    pub fn configure_surface(&self, surface: &wgpu::Surface<'_>, config: &wgpu::SurfaceConfiguration) {
        surface.configure(&self.device, config);
    }
}

async fn request_adapter(
    instance: &wgpu::Instance,
    surface: Option<&wgpu::Surface<'_>>,
) -> Result<wgpu::Adapter> {
    for power in [wgpu::PowerPreference::HighPerformance, wgpu::PowerPreference::LowPower] {
        for fallback in [false, true] {
            if let Some(adapter) = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: power,
                    compatible_surface: surface,
                    force_fallback_adapter: fallback,
                })
                .await
            {
                return Ok(adapter);
            }
        }
    }

    warn!("⚠️ No suitable GPU adapter found");
    Err(RenderError::InitError("failed to find suitable adapter".to_string()))
}

/// Map a configured present mode name onto what the surface supports.
pub fn select_present_mode(supported: &[wgpu::PresentMode], requested: &str) -> wgpu::PresentMode {
    let wanted = match requested {
        "fifo" => Some(wgpu::PresentMode::Fifo),
        "mailbox" => Some(wgpu::PresentMode::Mailbox),
        "immediate" => Some(wgpu::PresentMode::Immediate),
        _ => None,
    };

    match wanted {
        Some(mode) if supported.contains(&mode) => mode,
        Some(mode) => {
            warn!("Present mode {:?} not supported, falling back to Fifo", mode);
            wgpu::PresentMode::Fifo
        }
        None if supported.contains(&wgpu::PresentMode::Mailbox) => wgpu::PresentMode::Mailbox,
        None => wgpu::PresentMode::Fifo,
    }
}

/// Map a configured backend name onto wgpu backends.
pub fn backends_from_str(s: &str) -> wgpu::Backends {
    match s.to_lowercase().as_str() {
        "vulkan" => wgpu::Backends::VULKAN,
        "gl" => wgpu::Backends::GL,
        "metal" => wgpu::Backends::METAL,
        "dx12" => wgpu::Backends::DX12,
        _ => wgpu::Backends::all(),
    }
}
