use anyhow::{Context, Result};
use raw_window_handle::HasWindowHandle;

use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use flipframe_engine::logging::{init_logging, LoggingConfig};
use flipframe_engine::{ClearColor, ErrorAction, Gpu, GpuError, GpuInit, SurfaceTarget};

#[cfg(windows)]
type Platform = flipframe_engine::hal::d3d12::D3d12;
#[cfg(not(windows))]
type Platform = flipframe_engine::hal::headless::Headless;

#[cfg(windows)]
fn platform(init: &GpuInit) -> Result<Platform, GpuError> {
    Platform::new(init.debug_layer)
}

#[cfg(not(windows))]
fn platform(_init: &GpuInit) -> Result<Platform, GpuError> {
    log::warn!("Direct3D 12 is unavailable on this platform; rendering with the headless backend");
    Ok(Platform::default())
}

const CLEAR: ClearColor = ClearColor::RED;

struct Viewer {
    gpu_init: GpuInit,

    // Dropped before the window it presents into.
    gpu: Option<Gpu<Platform>>,
    window: Option<Window>,

    rebuilt: bool,
}

impl Viewer {
    fn new(gpu_init: GpuInit) -> Self {
        Self {
            gpu_init,
            gpu: None,
            window: None,
            rebuilt: false,
        }
    }

    fn create_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title("flipframe")
            .with_inner_size(LogicalSize::new(800.0, 600.0));

        let window = event_loop
            .create_window(attrs)
            .context("failed to create window")?;

        self.gpu = Some(build_gpu(&window, &self.gpu_init)?);
        window.request_redraw();
        self.window = Some(window);
        Ok(())
    }

    /// Renders one frame. Returns `false` when the viewer should exit.
    fn redraw(&mut self) -> bool {
        let Some(gpu) = self.gpu.as_mut() else {
            return false;
        };

        let err = match gpu.render_frame(CLEAR) {
            Ok(report) => {
                log::debug!(
                    "presented buffer {} (fence {})",
                    report.back_buffer_index,
                    report.fence_value
                );
                return true;
            }
            Err(e) => e,
        };

        match err.action() {
            ErrorAction::Recreate if !self.rebuilt => {
                log::warn!("{err}; rebuilding the GPU context");
                self.rebuilt = true;
                // The old context must release the swap chain before a new
                // one binds to the same window.
                self.gpu = None;

                let Some(window) = self.window.as_ref() else {
                    return false;
                };
                match build_gpu(window, &self.gpu_init) {
                    Ok(gpu) => {
                        self.gpu = Some(gpu);
                        window.request_redraw();
                        true
                    }
                    Err(e) => {
                        log::error!("GPU rebuild failed: {e:#}");
                        false
                    }
                }
            }
            _ => {
                log::error!("frame failed: {err}");
                false
            }
        }
    }
}

fn build_gpu(window: &Window, init: &GpuInit) -> Result<Gpu<Platform>> {
    let handle = window
        .window_handle()
        .context("window has no native handle")?
        .as_raw();
    let size = window.inner_size();

    let backend = platform(init).context("failed to initialize the graphics backend")?;
    let target = SurfaceTarget::new(handle, size.width, size.height);

    Gpu::new(backend, target, init.clone()).context("GPU initialization failed")
}

impl ApplicationHandler for Viewer {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        if let Err(e) = self.create_window(event_loop) {
            log::error!("failed to create initial window: {e:#}");
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                self.gpu = None;
                self.window = None;
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if !self.redraw() {
                    self.gpu = None;
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut viewer = Viewer::new(GpuInit::default());
    event_loop
        .run_app(&mut viewer)
        .context("winit event loop terminated with error")?;

    Ok(())
}
