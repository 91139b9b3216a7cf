//! A single demo run: scene, live loop, shape drift and a final report.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use acton_reactive::prelude::*;
use anyhow::Context;
use rand::seq::IndexedRandom;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info};

use live_canvas_kernel::actors::{LoopEvent, LoopObserver};
use live_canvas_kernel::config::LiveConfig;
use live_canvas_kernel::kernel::LiveUpdateBuilder;
use live_canvas_kernel::messages::LoopStats;
use live_canvas_kernel::transport::Transport;

use crate::loopback::LoopbackService;
use crate::raster::ImageRasterizer;
use crate::scene::SceneCanvas;
use crate::ws_transport::WebSocketTransport;

/// Settings for one run.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub config: LiveConfig,
    /// How long to run
    pub duration: Duration,
    /// Where to write the final frame images, if anywhere
    pub output_dir: Option<PathBuf>,
    /// Use the in-process loopback service instead of the network
    pub offline: bool,
    /// Loopback answer latency
    pub loopback_latency: Duration,
    /// How often a random shape is nudged
    pub drift_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            config: LiveConfig::default(),
            duration: Duration::from_secs(10),
            output_dir: None,
            offline: false,
            loopback_latency: Duration::from_millis(80),
            drift_interval: Duration::from_secs(1),
        }
    }
}

/// What happened during a run.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Ticks sent by the driver
    pub ticks: u64,
    /// Loop counters from the last completed tick
    pub stats: LoopStats,
    /// Frames on the canvas at the end
    pub frames: usize,
    /// Frames that received at least one image
    pub frames_updated: usize,
    /// Images written to the output directory
    pub written: Vec<PathBuf>,
}

/// Run the demo scene.
pub async fn run_session(options: SessionOptions) -> anyhow::Result<SessionReport> {
    run_session_on(Arc::new(SceneCanvas::demo()), options).await
}

/// Run against a caller-provided canvas.
pub async fn run_session_on(
    canvas: Arc<SceneCanvas>,
    options: SessionOptions,
) -> anyhow::Result<SessionReport> {
    let config = options.config.clone();
    let transport: Arc<dyn Transport> = if options.offline {
        info!(latency_ms = options.loopback_latency.as_millis() as u64, "Using loopback service");
        Arc::new(LoopbackService::new(
            options.loopback_latency,
            options.loopback_latency / 2,
        ))
    } else {
        Arc::new(WebSocketTransport::new(config.connection_key.clone()))
    };
    let rasterizer = Arc::new(ImageRasterizer::new(&config.raster));

    let mut runtime = ActonApp::launch_async().await;

    let (tx, mut events) = mpsc::channel(1024);
    LoopObserver::new(tx).spawn(&mut runtime).await;

    let mut live = LiveUpdateBuilder::new(config, canvas.clone(), rasterizer, canvas.clone())
        .with_transport(transport)
        .spawn(&mut runtime)
        .await?;
    live.start_ticking();

    let deadline = tokio::time::sleep(options.duration);
    tokio::pin!(deadline);
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    let mut drift = tokio::time::interval_at(
        tokio::time::Instant::now() + options.drift_interval,
        options.drift_interval,
    );

    let mut stats = LoopStats::default();
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = &mut interrupted => {
                info!("Interrupted, shutting down");
                break;
            }
            _ = drift.tick() => drift_random_shape(&canvas),
            event = events.recv() => match event {
                Some(LoopEvent::Tick(complete)) => stats = complete.stats,
                Some(LoopEvent::Updated(updated)) => {
                    debug!(
                        region_id = %updated.region_id,
                        iteration = updated.iteration,
                        placeholder = updated.placeholder,
                        "Frame updated"
                    );
                }
                Some(LoopEvent::Dropped(dropped)) => {
                    debug!(
                        region_id = %dropped.region_id,
                        iteration = dropped.iteration,
                        reason = dropped.reason.as_str(),
                        "Result dropped"
                    );
                }
                None => break,
            }
        }
    }

    let ticks = live.stop().await;

    let written = match &options.output_dir {
        Some(dir) => canvas
            .write_images(dir)
            .context("Failed to write frame images")?,
        None => Vec::new(),
    };

    let frames = canvas.frames();
    let frames_updated = frames
        .iter()
        .filter(|frame| canvas.applied(frame.id).is_some())
        .count();

    let _ = runtime.shutdown_all().await;

    Ok(SessionReport {
        ticks,
        stats,
        frames: frames.len(),
        frames_updated,
        written,
    })
}

/// Nudge one random non-frame shape by a few page units.
pub fn drift_random_shape(canvas: &SceneCanvas) {
    let shapes: Vec<_> = canvas
        .shapes()
        .into_iter()
        .filter(|shape| !shape.is_frame())
        .collect();
    let mut rng = rand::rng();
    let Some(shape) = shapes.choose(&mut rng) else {
        return;
    };
    let dx = rng.random_range(-20.0..=20.0);
    let dy = rng.random_range(-20.0..=20.0);
    canvas.move_shape(shape.id, dx, dy);
    debug!(shape_id = %shape.id, dx, dy, "Shape drifted");
}
