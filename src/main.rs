//! # mosaic - multi-stream video compositor
//!
//! Host shell: opens a window (or an offscreen target with `--headless`),
//! registers one test-pattern stream per configured entry and drives the
//! compositor from the window's event loop.

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::WindowBuilder;

use mosaic::config::StreamConfig;
use mosaic::decode::TestPatternSource;
use mosaic::gpu::{backends_from_str, SurfaceGpu};
use mosaic::renderer::offscreen::{pixel_at, OffscreenTarget};
use mosaic::{
    logging, Compositor, CompositorSettings, DecoderPool, FrameReport, FrameSinkError, GpuContext,
    MosaicConfig, Size, Stream,
};

/// Pacing of the headless draw loop.
const HEADLESS_FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Parser)]
#[command(name = "mosaic")]
#[command(about = "A real-time multi-stream video compositor")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/mosaic/mosaic.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Select GPU backend: auto, vulkan, gl, metal, dx12
    #[arg(long)]
    backend: Option<String>,

    /// Render this many frames offscreen instead of opening a window
    #[arg(long, value_name = "FRAMES")]
    headless: Option<u64>,

    /// Replace the configured streams with this many test patterns
    #[arg(long, value_name = "N")]
    streams: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = MosaicConfig::load(&cli.config);
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => MosaicConfig::default(),
    };

    logging::init(cli.debug || config.general.debug, &config.general.log_level);

    info!("🚀 Starting mosaic - multi-stream video compositor");
    info!("📄 Version: {}", env!("CARGO_PKG_VERSION"));
    debug!(
        "Built {} for {}",
        env!("BUILD_DATE"),
        env!("TARGET_TRIPLE")
    );

    match loaded {
        Ok(_) => info!("✅ Configuration loaded from: {}", cli.config),
        Err(e) => {
            error!("❌ Failed to load configuration: {:#}", e);
            info!("📝 Using default configuration");
        }
    }

    if let Some(count) = cli.streams {
        config.streams = test_pattern_streams(count);
        info!("🎛️ Using {} test-pattern streams", count);
    }
    if let Some(backend) = cli.backend {
        config.surface.backend = backend;
    }
    config.validate()?;

    let backends = backends_from_str(&config.surface.backend);
    info!("🎛️ WGPU backend selection: {}", config.surface.backend);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("mosaic-decode")
        .build()
        .context("Failed to build tokio runtime")?;
    // Lets the draw thread spawn decoder tasks
    let _guard = runtime.enter();

    match cli.headless {
        Some(frames) => run_headless(&config, backends, frames, &runtime),
        None => run_windowed(&config, backends, &runtime),
    }
}

/// `count` overlapping test patterns, each a little offset and more transparent.
fn test_pattern_streams(count: usize) -> Vec<StreamConfig> {
    let patterns = ["bars", "gradient", "solid"];
    (0..count)
        .map(|i| StreamConfig {
            pattern: patterns[i % patterns.len()].to_string(),
            color: "#3050c0".to_string(),
            alpha: if i == 0 { 1.0 } else { 0.6 },
            translate: [0.1 * i as f32, 0.1 * i as f32],
            ..StreamConfig::default()
        })
        .collect()
}

/// Streams registered with the compositor, some possibly still waiting for
/// their texture to be bound.
struct RunningStreams {
    starting: Vec<JoinHandle<Result<Stream, FrameSinkError>>>,
}

impl RunningStreams {
    fn start(compositor: &mut Compositor, config: &MosaicConfig, runtime: &Runtime) -> Result<Self> {
        let pool = DecoderPool::new(config.decode.max_workers);
        let mut starting = Vec::with_capacity(config.streams.len());

        for (i, stream) in config.streams.iter().enumerate() {
            let source = TestPatternSource::new(
                format!("pattern-{}", i),
                stream.size(),
                stream.fps,
                stream.pattern()?,
            );
            let handle = compositor.add_stream(stream.spec());
            let pool = pool.clone();
            starting.push(runtime.spawn(async move { Stream::start(handle, &pool, source).await }));
        }

        info!("🎬 Registered {} streams", starting.len());
        Ok(Self { starting })
    }

    /// Stops every started stream: decoder first, then sink, then removal.
    fn stop_all(self, runtime: &Runtime) {
        runtime.block_on(async {
            for task in self.starting {
                if !task.is_finished() {
                    // Never bound; compositor shutdown releases the drawable
                    task.abort();
                    continue;
                }
                match task.await {
                    Ok(Ok(stream)) => {
                        let id = stream.id();
                        match stream.stop().await {
                            Ok(outcome) => debug!("Stream {} ended: {:?}", id, outcome),
                            Err(e) => warn!("⚠️ Stream {} ended with error: {}", id, e),
                        }
                    }
                    Ok(Err(e)) => warn!("⚠️ Stream never started: {}", e),
                    Err(e) => warn!("⚠️ Stream start task failed: {}", e),
                }
            }
        });
    }
}

fn log_report(report: &FrameReport) {
    for (id, e) in &report.failures {
        error!("❌ Drawable {} failed in frame {}: {}", id, report.frame, e);
    }
    if report.frame % 600 == 0 {
        info!(
            "📊 Frame {}: {} drawn, {} skipped",
            report.frame,
            report.drawn,
            report.skipped.len()
        );
    }
}

fn run_windowed(config: &MosaicConfig, backends: wgpu::Backends, runtime: &Runtime) -> Result<()> {
    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(config.surface.title.as_str())
            .with_inner_size(PhysicalSize::new(config.surface.width, config.surface.height))
            .build(&event_loop)?,
    );

    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends,
        ..Default::default()
    });
    let surface = instance.create_surface(Arc::clone(&window))?;
    let size = window.inner_size();

    let SurfaceGpu {
        gpu,
        config: mut surface_config,
    } = pollster::block_on(GpuContext::for_surface(
        &instance,
        &surface,
        size.width,
        size.height,
        &config.surface.present_mode,
    ))?;

    let mut compositor = Compositor::new(&CompositorSettings::from(&config.surface));
    compositor.on_surface_created(gpu.token());
    compositor.on_viewport_resized(Size::new(surface_config.width, surface_config.height));

    let mut streams = Some(RunningStreams::start(&mut compositor, config, runtime)?);
    info!("✨ mosaic is ready");

    event_loop.run(|event, elwt| match event {
        Event::WindowEvent { event, window_id } if window_id == window.id() => match event {
            WindowEvent::CloseRequested => {
                info!("📨 Window closed, shutting down");
                elwt.exit();
            }
            WindowEvent::Resized(new_size) => {
                if new_size.width > 0 && new_size.height > 0 {
                    surface_config.width = new_size.width;
                    surface_config.height = new_size.height;
                    gpu.configure_surface(&surface, &surface_config);
                    compositor.on_viewport_resized(Size::new(new_size.width, new_size.height));
                    window.request_redraw();
                }
            }
            WindowEvent::RedrawRequested => match surface.get_current_texture() {
                Ok(frame) => {
                    let view = frame
                        .texture
                        .create_view(&wgpu::TextureViewDescriptor::default());
                    let report = compositor.on_draw_frame(gpu.token(), &view);
                    log_report(&report);
                    frame.present();
                }
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    debug!("Surface lost or outdated, reconfiguring");
                    gpu.configure_surface(&surface, &surface_config);
                }
                Err(wgpu::SurfaceError::OutOfMemory) => {
                    error!("❌ Out of GPU memory, shutting down");
                    elwt.exit();
                }
                Err(e) => warn!("⚠️ Skipping frame: {}", e),
            },
            _ => {}
        },
        Event::AboutToWait => window.request_redraw(),
        Event::LoopExiting => {
            if let Some(streams) = streams.take() {
                streams.stop_all(runtime);
            }
            compositor.shutdown(gpu.token());
            info!("👋 mosaic shutting down");
        }
        _ => {}
    })?;

    Ok(())
}

fn run_headless(
    config: &MosaicConfig,
    backends: wgpu::Backends,
    frames: u64,
    runtime: &Runtime,
) -> Result<()> {
    info!("🖥️ Headless mode: rendering {} frames offscreen", frames);

    let gpu = pollster::block_on(GpuContext::headless(
        backends,
        wgpu::TextureFormat::Rgba8UnormSrgb,
    ))?;
    let size = config.surface.size();
    let target = OffscreenTarget::new(gpu.token(), size)?;

    let mut compositor = Compositor::new(&CompositorSettings::from(&config.surface));
    compositor.on_surface_created(gpu.token());
    compositor.on_viewport_resized(size);

    let streams = RunningStreams::start(&mut compositor, config, runtime)?;

    let (mut drawn, mut failures) = (0usize, 0usize);
    for _ in 0..frames {
        let report = compositor.on_draw_frame(gpu.token(), target.view());
        log_report(&report);
        drawn += report.drawn;
        failures += report.failures.len();

        gpu.token().device().poll(wgpu::Maintain::Poll);
        std::thread::sleep(HEADLESS_FRAME_INTERVAL);
    }

    let pixels = target.read_pixels(gpu.token())?;
    if let Some(center) = pixel_at(&pixels, size, size.width / 2, size.height / 2) {
        info!("🎯 Center pixel after {} frames: {:?}", frames, center);
    }

    streams.stop_all(runtime);
    compositor.shutdown(gpu.token());

    info!(
        "📊 Headless run finished: {} frames, {} draws, {} failures on {}",
        frames,
        drawn,
        failures,
        gpu.adapter_name()
    );
    Ok(())
}
