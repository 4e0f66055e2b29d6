use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use leapbox_render::{FrameOutcome, FullscreenOutcome, Renderer, RendererConfig, ShaderSource};
use leapbox_render_wgpu::{COLOR_SHADER, WgpuBackend};
use leapbox_scene::Scene;
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, ModifiersState, PhysicalKey};
use winit::window::{Window, WindowId};

const WINDOW_TITLE: &str = "leapBoxing 15";
const SHADER_FILE: &str = "shaders.wgsl";

#[derive(Parser)]
#[command(name = "leapbox-desktop", about = "leapbox desktop renderer")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Renderer configuration (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory shaders are loaded from
    #[arg(long, default_value = "./assets")]
    assets: PathBuf,

    /// Request a software adapter
    #[arg(long)]
    warp: bool,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,
}

/// Process-wide settings handed to the application at startup.
struct AppContext {
    assets: PathBuf,
    config: RendererConfig,
    initial_size: PhysicalSize<u32>,
}

impl AppContext {
    fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => RendererConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => RendererConfig::default(),
        };
        if cli.warp {
            config.use_warp_device = true;
        }
        Ok(Self {
            assets: cli.assets.clone(),
            config,
            initial_size: PhysicalSize::new(cli.width.unwrap_or(1280), cli.height.unwrap_or(720)),
        })
    }

    fn asset_path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.assets.join(name)
    }

    fn load_shader(&self) -> ShaderSource {
        let path = self.asset_path(SHADER_FILE);
        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(path = %path.display(), "shader not loaded ({e}), using built-in");
                COLOR_SHADER.to_string()
            }
        };
        ShaderSource {
            label: "shaders".into(),
            source,
        }
    }
}

/// GPU-side state, created once the event loop has resumed.
struct Gpu {
    // Dropped before the renderer so mesh and pipeline objects go first.
    scene: Scene<WgpuBackend>,
    renderer: Renderer<WgpuBackend>,
}

impl Gpu {
    fn window(&self) -> &Arc<Window> {
        self.renderer.backend().window()
    }
}

struct App {
    context: AppContext,
    gpu: Option<Gpu>,
    modifiers: ModifiersState,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(context: AppContext) -> Self {
        Self {
            context,
            gpu: None,
            modifiers: ModifiersState::empty(),
            fatal: None,
        }
    }

    fn init_gpu(&self, event_loop: &ActiveEventLoop) -> Result<Gpu> {
        let attrs = Window::default_attributes()
            .with_title(WINDOW_TITLE)
            .with_inner_size(self.context.initial_size);
        let window = Arc::new(event_loop.create_window(attrs)?);

        let backend = WgpuBackend::new(window, &self.context.config)?;
        let mut renderer = Renderer::new(backend, self.context.config.clone())?;
        let scene = Scene::demo(&mut renderer, self.context.load_shader())?;
        Ok(Gpu { scene, renderer })
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        tracing::error!("{err:#}");
        self.fatal = Some(err);
        self.shutdown(event_loop);
    }

    /// Drains the GPU, releases the scene and stops the loop. A failed drain
    /// becomes the exit error unless one is already recorded.
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(Gpu { scene, mut renderer }) = self.gpu.take() {
            let drained = renderer.shutdown();
            drop(scene);
            if let Err(e) = drained {
                let err = anyhow::Error::new(e).context("draining the GPU at exit failed");
                tracing::error!("{err:#}");
                if self.fatal.is_none() {
                    self.fatal = Some(err);
                }
            }
        }
        event_loop.exit();
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        match key {
            KeyCode::Escape => self.shutdown(event_loop),
            KeyCode::F11 => self.toggle_fullscreen(),
            KeyCode::Enter | KeyCode::NumpadEnter if self.modifiers.alt_key() => {
                self.toggle_fullscreen()
            }
            _ => {}
        }
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(gpu) = &mut self.gpu {
            match gpu.renderer.toggle_fullscreen() {
                FullscreenOutcome::Entered => tracing::info!("entered fullscreen"),
                FullscreenOutcome::Exited => tracing::info!("left fullscreen"),
                FullscreenOutcome::Failed => {}
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.gpu.is_some() {
            return;
        }
        match self.init_gpu(event_loop) {
            Ok(gpu) => self.gpu = Some(gpu),
            Err(e) => self.fail(event_loop, e.context("renderer setup failed")),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => self.shutdown(event_loop),
            WindowEvent::ModifiersChanged(modifiers) => self.modifiers = modifiers.state(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => self.handle_key(event_loop, key),
            WindowEvent::Resized(size) => {
                let Some(gpu) = &mut self.gpu else { return };
                let minimized = size.width == 0
                    || size.height == 0
                    || gpu.window().is_minimized().unwrap_or(false);
                if let Err(e) = gpu
                    .renderer
                    .set_window_size(size.width, size.height, minimized)
                {
                    self.fail(event_loop, anyhow::Error::new(e).context("resize failed"));
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(gpu) = &mut self.gpu else { return };
                match gpu.scene.render(&mut gpu.renderer) {
                    Ok(FrameOutcome::Presented { .. } | FrameOutcome::Skipped) => {}
                    Err(e) => self.fail(event_loop, anyhow::Error::new(e).context("frame failed")),
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(gpu) = &self.gpu {
            gpu.window().request_redraw();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    tracing::info!("leapbox-desktop starting");

    let context = AppContext::from_cli(&cli)?;
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(context);
    event_loop.run_app(&mut app)?;

    match app.fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("leapbox-desktop").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_to_720p_and_default_config() {
        let ctx = AppContext::from_cli(&cli(&[])).unwrap();
        assert_eq!(ctx.initial_size, PhysicalSize::new(1280, 720));
        assert_eq!(ctx.config, RendererConfig::default());
        assert_eq!(ctx.asset_path("x.wgsl"), PathBuf::from("./assets").join("x.wgsl"));
    }

    #[test]
    fn warp_flag_overrides_config() {
        let ctx = AppContext::from_cli(&cli(&["--warp"])).unwrap();
        assert!(ctx.config.use_warp_device);
    }

    #[test]
    fn shader_loads_from_assets_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SHADER_FILE), "// custom").unwrap();
        let ctx = AppContext::from_cli(&cli(&["--assets", dir.path().to_str().unwrap()])).unwrap();
        let shader = ctx.load_shader();
        assert_eq!(shader.label, "shaders");
        assert_eq!(shader.source, "// custom");
    }

    #[test]
    fn missing_shader_falls_back_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::from_cli(&cli(&["--assets", dir.path().to_str().unwrap()])).unwrap();
        assert_eq!(ctx.load_shader().source, COLOR_SHADER);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.yaml");
        assert!(AppContext::from_cli(&cli(&["--config", path.to_str().unwrap()])).is_err());
    }
}
