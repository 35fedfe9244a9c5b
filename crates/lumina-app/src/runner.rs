//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use lumina_gpu::{SharedDevice, VulkanDeviceBuilder};
use lumina_render::{DirectoryShaderSource, FrameOutcome, Renderer, RendererConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, DeviceId, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::LuminaApp;
use crate::config::AppConfig;
use crate::context::AppContext;

/// Run a [`LuminaApp`] with the given configuration.
///
/// Initializes logging, creates the window, device and renderer, and runs
/// the event loop until the application exits.
pub fn run_app<A: LuminaApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        failure: None,
    };
    event_loop.run_app(&mut runner)?;

    match runner.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Frame time statistics gathered over a run.
#[derive(Debug, Clone, Copy)]
pub struct FrameStats {
    pub min_fps: f64,
    pub max_fps: f64,
    fps_sum: f64,
    frames: u64,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self {
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
            frames: 0,
        }
    }
}

impl FrameStats {
    /// Record a frame that took `dt` seconds. Zero-length frames are ignored.
    pub fn record(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        let fps = 1.0 / f64::from(dt);
        self.min_fps = self.min_fps.min(fps);
        self.max_fps = self.max_fps.max(fps);
        self.fps_sum += fps;
        self.frames += 1;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn average_fps(&self) -> Option<f64> {
        (self.frames > 0).then(|| self.fps_sum / self.frames as f64)
    }
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: LuminaApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    failure: Option<anyhow::Error>,
}

/// Internal application state.
struct AppState<A: LuminaApp> {
    app: A,
    ctx: AppContext,
    target_frame_time: Option<Duration>,
    last_frame_time: Instant,
    stats: FrameStats,
}

impl<A: LuminaApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.failure = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else {
            return;
        };

        state.ctx.input.process_window_event(&event);
        // Let the app handle the event first
        if state.app.on_event(&mut state.ctx, &event) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                if state.app.on_close_requested(&mut state.ctx) {
                    info!("Close requested");
                    state.ctx.request_exit();
                } else {
                    info!("Close cancelled by the application");
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = state.render_frame() {
                    error!("Render error: {e:#}");
                    self.failure = Some(e);
                    state.ctx.request_exit();
                }
            }
            WindowEvent::Resized(size) => {
                if let Err(e) = state.handle_resize(size.width, size.height) {
                    error!("Resize error: {e:#}");
                }
            }
            _ => {}
        }

        if state.ctx.exit_requested() {
            if let Some(mut state) = self.state.take() {
                state.cleanup();
            }
            event_loop.exit();
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        device_id: DeviceId,
        event: DeviceEvent,
    ) {
        if let Some(state) = &mut self.state {
            state.ctx.input.process_device_event(&event);
            state.app.on_device_event(device_id, &event);
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }
}

impl<A: LuminaApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let device = VulkanDeviceBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation)
            .backend(self.config.backend)
            .build(window.as_ref())?;
        info!("GPU: {}", device.capabilities().summary());
        let device: SharedDevice = Arc::new(device);

        let size = window.inner_size();
        let renderer = Renderer::new(
            device,
            RendererConfig {
                width: size.width,
                height: size.height,
                frames_in_flight: self.config.frames_in_flight,
                settings: self.config.graphics.clone(),
            },
            Box::new(DirectoryShaderSource::new(&self.config.shader_dir)),
        )?;

        let mut ctx = AppContext::new(window, renderer);
        let app = A::init(&mut ctx)?;

        let target_frame_time = self
            .config
            .target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)));

        Ok(AppState {
            app,
            ctx,
            target_frame_time,
            last_frame_time: Instant::now(),
            stats: FrameStats::default(),
        })
    }
}

impl<A: LuminaApp> AppState<A> {
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();
        let dt = frame_start
            .duration_since(self.last_frame_time)
            .as_secs_f32();
        self.last_frame_time = frame_start;
        self.stats.record(dt);

        self.app.update(&mut self.ctx, dt);

        let ctx = &mut self.ctx;
        let outcome = ctx.renderer.render_frame(&mut ctx.scene, &ctx.camera)?;
        if matches!(outcome, FrameOutcome::Presented { .. }) {
            ctx.frame_count += 1;
        }
        self.app.on_frame(&mut self.ctx, outcome);
        self.ctx.input.end_frame();

        // Frame pacing
        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }
        Ok(())
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        // Zero sizes are flagged too; the renderer skips frames until restored
        self.ctx.renderer.resize(width, height);
        if width > 0 && height > 0 {
            self.ctx
                .camera
                .set_aspect(width as f32 / height as f32);
            self.app.on_resize(&mut self.ctx, width, height)?;
            info!("Resized to {width}x{height}");
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        if let Some(avg_fps) = self.stats.average_fps() {
            info!("FPS Statistics:");
            info!("  Min: {:.1}", self.stats.min_fps);
            info!("  Max: {:.1}", self.stats.max_fps);
            info!("  Avg: {avg_fps:.1}");
            info!("  Total frames: {}", self.ctx.frame_count);
        }

        info!("Starting cleanup...");
        if let Err(e) = self.ctx.renderer.device().wait_idle() {
            error!("Failed to wait idle: {e}");
        }
        self.app.cleanup(&mut self.ctx);
        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn frame_stats_track_extremes_and_average() {
        let mut stats = FrameStats::default();
        assert_eq!(stats.average_fps(), None);

        stats.record(0.0);
        stats.record(0.5);
        stats.record(0.25);
        assert_eq!(stats.frames(), 2);
        assert_relative_eq!(stats.min_fps, 2.0);
        assert_relative_eq!(stats.max_fps, 4.0);
        assert_relative_eq!(stats.average_fps().unwrap(), 3.0);
    }
}
