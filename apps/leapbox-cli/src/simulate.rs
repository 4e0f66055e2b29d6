//! Scripted frame loop against the headless device.

use std::str::FromStr;

use anyhow::{Context, Result};
use leapbox_common::Extent2D;
use leapbox_render::headless::{GpuPace, HeadlessBackend, HeadlessStats};
use leapbox_render::{
    Backend, FrameOutcome, FullscreenOutcome, RecorderStats, Renderer, RendererConfig,
    ResizeOutcome, ShaderSource, SwapChainState, SyncStats, UploadStats,
};
use leapbox_scene::Scene;
use serde::Serialize;

/// A window-size change applied before the given frame.
///
/// Parsed from `FRAME:WIDTHxHEIGHT` or `FRAME:min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeStep {
    pub frame: u64,
    pub width: u32,
    pub height: u32,
    pub minimized: bool,
}

impl FromStr for ResizeStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (frame, size) = s
            .split_once(':')
            .ok_or_else(|| format!("expected FRAME:WxH or FRAME:min, got {s:?}"))?;
        let frame = frame
            .parse()
            .map_err(|e| format!("bad frame number {frame:?}: {e}"))?;
        if size == "min" {
            return Ok(Self {
                frame,
                width: 0,
                height: 0,
                minimized: true,
            });
        }
        let (w, h) = size
            .split_once('x')
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {size:?}"))?;
        let width = w.parse().map_err(|e| format!("bad width {w:?}: {e}"))?;
        let height = h.parse().map_err(|e| format!("bad height {h:?}: {e}"))?;
        Ok(Self {
            frame,
            width,
            height,
            minimized: false,
        })
    }
}

pub struct Simulation {
    pub frames: u64,
    pub extent: Extent2D,
    pub pace: GpuPace,
    pub resizes: Vec<ResizeStep>,
    pub fullscreen_at: Vec<u64>,
    pub config: RendererConfig,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResizeRecord {
    pub frame: u64,
    pub width: u32,
    pub height: u32,
    pub outcome: ResizeOutcome,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub pace: GpuPace,
    pub frames_requested: u64,
    pub presented: u64,
    pub skipped: u64,
    /// Frames whose slot hand-off had to block on the fence.
    pub waited: u64,
    pub resizes: Vec<ResizeRecord>,
    pub fullscreen: Vec<FullscreenOutcome>,
    pub swap_chain: SwapChainState,
    pub sync: SyncStats,
    pub recorder: RecorderStats,
    pub uploads: UploadStats,
    pub device: HeadlessStats,
    /// Fullscreen state after shutdown.
    pub device_fullscreen: bool,
}

impl Simulation {
    pub fn run(&self) -> Result<SimulationReport> {
        let backend = HeadlessBackend::with_pace(self.extent, self.pace);
        let mut renderer =
            Renderer::new(backend, self.config.clone()).context("renderer setup failed")?;
        let shader = ShaderSource {
            label: "shaders".into(),
            // The headless device does not compile shaders.
            source: String::new(),
        };
        let scene = Scene::demo(&mut renderer, shader).context("building demo scene")?;

        let mut report = SimulationReport {
            pace: self.pace,
            frames_requested: self.frames,
            presented: 0,
            skipped: 0,
            waited: 0,
            resizes: Vec::new(),
            fullscreen: Vec::new(),
            swap_chain: renderer.swap_chain_state(),
            sync: renderer.sync_stats(),
            recorder: renderer.recorder_stats(),
            uploads: renderer.upload_stats(),
            device: renderer.backend().stats(),
            device_fullscreen: false,
        };

        for frame in 0..self.frames {
            for step in self.resizes.iter().filter(|s| s.frame == frame) {
                let outcome = renderer
                    .set_window_size(step.width, step.height, step.minimized)
                    .with_context(|| format!("resize before frame {frame}"))?;
                report.resizes.push(ResizeRecord {
                    frame,
                    width: step.width,
                    height: step.height,
                    outcome,
                });
            }
            if self.fullscreen_at.contains(&frame) {
                report.fullscreen.push(renderer.toggle_fullscreen());
            }

            match scene
                .render(&mut renderer)
                .with_context(|| format!("frame {frame}"))?
            {
                FrameOutcome::Presented { waited, .. } => {
                    report.presented += 1;
                    report.waited += u64::from(waited);
                }
                FrameOutcome::Skipped => report.skipped += 1,
            }
        }

        renderer.shutdown().context("draining the device")?;
        report.swap_chain = renderer.swap_chain_state();
        report.sync = renderer.sync_stats();
        report.recorder = renderer.recorder_stats();
        report.uploads = renderer.upload_stats();
        report.device = renderer.backend().stats();
        report.device_fullscreen = renderer.backend().fullscreen_state()?;
        Ok(report)
    }
}
