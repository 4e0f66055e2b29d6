use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use leapbox_common::Extent2D;
use leapbox_render::headless::{GpuPace, HeadlessBackend};
use leapbox_render::{Renderer, RendererConfig};
use tracing_subscriber::EnvFilter;

mod simulate;

use simulate::{ResizeStep, Simulation};

#[derive(Parser)]
#[command(name = "leapbox-cli", about = "Headless driver for the leapbox renderer")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Renderer configuration (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Render the demo scene on the simulated device
    Simulate {
        /// Number of frames to request
        #[arg(short, long, default_value = "120")]
        frames: u64,
        #[arg(long, default_value = "1280")]
        width: u32,
        #[arg(long, default_value = "720")]
        height: u32,
        /// How the simulated device retires work
        #[arg(long, value_enum, default_value_t = Pace::Manual)]
        pace: Pace,
        /// Window size change before a frame: FRAME:WxH or FRAME:min (repeatable)
        #[arg(long = "resize")]
        resizes: Vec<ResizeStep>,
        /// Toggle fullscreen before this frame (repeatable)
        #[arg(long = "fullscreen-at")]
        fullscreen_at: Vec<u64>,
        /// Bound every fence wait, in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Upload a byte pattern and read it back
    VerifyUpload {
        #[arg(short, long, default_value = "4096")]
        bytes: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Pace {
    Immediate,
    Manual,
    Hung,
}

impl From<Pace> for GpuPace {
    fn from(pace: Pace) -> Self {
        match pace {
            Pace::Immediate => GpuPace::Immediate,
            Pace::Manual => GpuPace::Manual,
            Pace::Hung => GpuPace::Hung,
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<RendererConfig> {
    match path {
        Some(path) => RendererConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(RendererConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Info => {
            println!("leapbox-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("render: {}", leapbox_render::crate_info());
            println!("scene: {}", leapbox_scene::crate_info());
            println!("frames in flight: {}", leapbox_render::FRAME_COUNT);
            println!("clear color: {:?}", config.clear_color);
        }
        Commands::Simulate {
            frames,
            width,
            height,
            pace,
            resizes,
            fullscreen_at,
            timeout_ms,
            json,
        } => {
            if timeout_ms.is_some() {
                config.wait_timeout_ms = timeout_ms;
            }
            let simulation = Simulation {
                frames,
                extent: Extent2D::new(width, height),
                pace: pace.into(),
                resizes,
                fullscreen_at,
                config,
            };
            let report = simulation.run()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Frames: requested={}, presented={}, skipped={}, waited={}",
                    report.frames_requested, report.presented, report.skipped, report.waited
                );
                println!(
                    "Swap chain: {}x{}, back buffer {}, visible={}",
                    report.swap_chain.width,
                    report.swap_chain.height,
                    report.swap_chain.current_back_buffer_index,
                    report.swap_chain.visible
                );
                println!(
                    "Sync: signals={}, frame waits={}, idle waits={}",
                    report.sync.signals, report.sync.frame_waits, report.sync.idle_waits
                );
                println!(
                    "Device: lists={}, presents={}, resizes={}, render targets={}",
                    report.device.executed_lists,
                    report.device.presents,
                    report.device.resizes,
                    report.device.render_targets_created
                );
                for resize in &report.resizes {
                    println!(
                        "Resize @{}: {}x{} -> {:?}",
                        resize.frame, resize.width, resize.height, resize.outcome
                    );
                }
            }
        }
        Commands::VerifyUpload { bytes } => {
            let pattern: Vec<u8> = (0..bytes).map(|i| (i % 251) as u8).collect();
            let backend = HeadlessBackend::with_pace(Extent2D::new(1280, 720), GpuPace::Manual);
            let mut renderer = Renderer::new(backend, config)?;

            let vertices = renderer.upload_vertex_data(&pattern)?;
            let indices = renderer.upload_index_data(&pattern)?;
            let vertex_ok = renderer.read_buffer(&vertices)? == pattern;
            let index_ok = renderer.read_buffer(&indices)? == pattern;

            println!("Uploaded {bytes} bytes twice");
            println!("Vertex buffer: {}", if vertex_ok { "OK" } else { "MISMATCH" });
            println!("Index buffer: {}", if index_ok { "OK" } else { "MISMATCH" });
            println!(
                "Live buffers after upload: {}",
                renderer.backend().live_buffers()
            );
            if !(vertex_ok && index_ok) {
                bail!("uploaded data did not round-trip");
            }
        }
    }

    Ok(())
}
