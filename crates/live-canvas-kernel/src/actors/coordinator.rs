//! LiveUpdateCoordinator: drives the update pipeline of every region.
//!
//! The coordinator owns the iteration tracker, so all staleness decisions are
//! serialized through its mailbox. Slow work runs in spawned tasks that report
//! back with a message:
//!
//! ```text
//! Tick → Coordinator
//!   ├─ snapshot + change detection (every live region)
//!   ├─ begin iteration, commit fingerprint/label
//!   ├─ rasterize (spawned) ───────▶ RasterizeFinished → Coordinator
//!   │                                 ├─ stale → drop
//!   │                                 └─ subscribe(correlation_id) + send (spawned)
//!   │                                      └─ SendFailed → Coordinator
//!   ├─ result handler ────────────▶ InferenceArrived → Coordinator
//!   │                                 └─ orphaned/stale → drop, else apply + complete
//!   └─ TickComplete (broadcast)
//! ```

use std::sync::Arc;

use acton_reactive::prelude::*;
use mti::prelude::*;
use tracing::{debug, trace, warn};

use crate::canvas::{CanvasSurface, RegionImage};
use crate::config::LiveConfig;
use crate::connection::ConnectionManager;
use crate::error::{ConnectError, RasterizeError, SendError};
use crate::messages::{
    DropReason, InferenceArrived, LoopStats, RasterizeFinished, RegionUpdated, SendFailed, Tick,
    TickComplete, TickSummary, WorkDropped,
};
use crate::protocol::InferenceRequest;
use crate::raster::{RasterPlan, Rasterizer, VectorImage};
use crate::region::{Iteration, IterationTracker, RegionId};
use crate::snapshot::{ChangeDetector, Snapshot, SnapshotSource};

/// Outcome of one apply attempt, broadcast to observers.
enum Notice {
    Updated(RegionUpdated),
    Dropped(WorkDropped),
}

/// Reply that broadcasts each notice, then anything extra.
macro_rules! broadcast_notices {
    ($broker:ident, $notices:expr $(, $extra:expr)?) => {{
        let notices: Vec<Notice> = $notices;
        Reply::pending(async move {
            for notice in notices {
                match notice {
                    Notice::Updated(msg) => {
                        $broker.broadcast(msg).await;
                    }
                    Notice::Dropped(msg) => {
                        $broker.broadcast(msg).await;
                    }
                }
            }
            $($broker.broadcast($extra).await;)?
        })
    }};
}

/// Rasterization scheduled by a tick.
struct RasterJob {
    region_id: RegionId,
    iteration: Iteration,
    label: String,
    image: VectorImage,
    plan: RasterPlan,
}

/// Actor state for LiveUpdateCoordinator.
#[derive(Default, Clone)]
pub struct LiveUpdateState {
    /// Loop configuration
    config: Option<LiveConfig>,
    /// Read side of the canvas
    source: Option<Arc<dyn SnapshotSource>>,
    /// Vector-to-bitmap conversion
    rasterizer: Option<Arc<dyn Rasterizer>>,
    /// Write side of the canvas
    canvas: Option<Arc<dyn CanvasSurface>>,
    /// Shared inference connection
    connection: Option<ConnectionManager>,
    /// Per-region change and iteration bookkeeping
    tracker: IterationTracker,
    /// Running counters
    stats: LoopStats,
    /// Current tick number
    current_tick: u64,
}

impl std::fmt::Debug for LiveUpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveUpdateState")
            .field("config", &self.config.is_some())
            .field("source", &self.source.is_some())
            .field("rasterizer", &self.rasterizer.as_ref().map(|r| r.name().to_string()))
            .field("canvas", &self.canvas.is_some())
            .field("connection", &self.connection)
            .field("regions", &self.tracker.len())
            .field("current_tick", &self.current_tick)
            .finish()
    }
}

impl LiveUpdateState {
    /// Drop all bookkeeping for a region and stop listening for its results.
    fn forget_region(&mut self, id: RegionId) {
        let Some(mut record) = self.tracker.remove(id) else {
            return;
        };
        let pending = record.drain_requests();
        if let Some(connection) = &self.connection {
            for correlation_id in &pending {
                connection.unsubscribe(correlation_id);
            }
        }
        debug!(region_id = %id, in_flight = pending.len(), "Region forgotten");
    }

    /// Whether the region is still tracked and still on the canvas.
    fn region_exists(&self, id: RegionId) -> bool {
        self.tracker.contains(id)
            && self
                .source
                .as_ref()
                .is_some_and(|source| source.region_bounds(id).is_some())
    }

    fn drop_work(&mut self, id: RegionId, iteration: Iteration, reason: DropReason) -> Notice {
        match reason {
            DropReason::Stale => self.stats.stale_dropped += 1,
            DropReason::Orphaned => {
                self.stats.orphan_dropped += 1;
                self.forget_region(id);
            }
        }
        debug!(
            region_id = %id,
            iteration,
            reason = reason.as_str(),
            "Dropping work"
        );
        Notice::Dropped(WorkDropped {
            region_id: id,
            iteration,
            reason,
        })
    }

    /// Show `image` for `iteration` unless the region is gone or has moved on.
    fn apply(&mut self, id: RegionId, iteration: Iteration, image: RegionImage) -> Notice {
        if !self.region_exists(id) {
            return self.drop_work(id, iteration, DropReason::Orphaned);
        }
        if self.tracker.is_stale(id, iteration) {
            return self.drop_work(id, iteration, DropReason::Stale);
        }

        let placeholder = image.is_placeholder();
        if let Some(canvas) = &self.canvas {
            canvas.apply_image(id, image);
        }
        if placeholder {
            self.stats.placeholders += 1;
        } else {
            self.stats.applied += 1;
        }

        self.tracker.complete(id, iteration);

        // Older requests can no longer win; stop routing their results.
        let pruned = self
            .tracker
            .get_mut(id)
            .map(|record| record.prune_through(iteration))
            .unwrap_or_default();
        if let Some(connection) = &self.connection {
            for correlation_id in &pruned {
                connection.unsubscribe(correlation_id);
            }
        }

        debug!(
            region_id = %id,
            iteration,
            placeholder,
            pruned = pruned.len(),
            "Region image applied"
        );
        Notice::Updated(RegionUpdated {
            region_id: id,
            iteration,
            placeholder,
        })
    }
}

/// Central coordinator actor for the live update loop.
///
/// On every `Tick` it snapshots each live region, skips regions whose
/// overlapping content and label are unchanged, and starts a new iteration for
/// the rest. Results are applied only if the region still exists and no newer
/// iteration has already completed.
pub struct LiveUpdateCoordinator {
    pub config: LiveConfig,
    pub source: Arc<dyn SnapshotSource>,
    pub rasterizer: Arc<dyn Rasterizer>,
    pub canvas: Arc<dyn CanvasSurface>,
    pub connection: ConnectionManager,
}

impl LiveUpdateCoordinator {
    pub fn new(
        config: LiveConfig,
        source: Arc<dyn SnapshotSource>,
        rasterizer: Arc<dyn Rasterizer>,
        canvas: Arc<dyn CanvasSurface>,
        connection: ConnectionManager,
    ) -> Self {
        Self {
            config,
            source,
            rasterizer,
            canvas,
            connection,
        }
    }

    /// Spawn this coordinator.
    pub async fn spawn(self, runtime: &mut ActorRuntime) -> ActorHandle {
        let mut actor =
            runtime.new_actor_with_name::<LiveUpdateState>("LiveUpdateCoordinator".to_string());

        actor.model.config = Some(self.config);
        actor.model.source = Some(self.source);
        actor.model.rasterizer = Some(self.rasterizer);
        actor.model.canvas = Some(self.canvas);
        actor.model.connection = Some(self.connection);

        configure_handlers(&mut actor);

        actor.start().await
    }
}

/// Configure all message handlers for the coordinator.
fn configure_handlers(actor: &mut ManagedActor<Idle, LiveUpdateState>) {
    // Handle Tick - detect changes and start iterations
    actor.mutate_on::<Tick>(|actor, context| {
        let now_ms = context.message().now_ms;
        let handle = actor.handle().clone();
        let broker = actor.broker().clone();
        let state = &mut actor.model;

        state.current_tick += 1;
        state.stats.ticks += 1;
        let tick = state.current_tick;

        let (Some(config), Some(source), Some(rasterizer)) = (
            state.config.clone(),
            state.source.clone(),
            state.rasterizer.clone(),
        ) else {
            warn!("LiveUpdateCoordinator: not initialized");
            return Reply::ready();
        };

        let mut live = source.list_regions();
        live.sort();
        live.dedup();

        let mut summary = TickSummary {
            regions: live.len(),
            ..TickSummary::default()
        };

        for id in state.tracker.ids() {
            if live.binary_search(&id).is_err() {
                state.forget_region(id);
                summary.removed += 1;
            }
        }

        let mut jobs = Vec::new();
        let mut notices = Vec::new();

        for id in live {
            let Some(snapshot) = Snapshot::take(source.as_ref(), id) else {
                if state.tracker.contains(id) {
                    state.forget_region(id);
                    summary.removed += 1;
                }
                continue;
            };

            let record = state.tracker.ensure(id);
            if !ChangeDetector::should_update(record, &snapshot) {
                summary.unchanged += 1;
                continue;
            }

            // Commit before any async work so later ticks compare against it.
            ChangeDetector::commit(record, &snapshot);
            let Some(iteration) = state.tracker.begin(id) else {
                continue;
            };
            summary.started += 1;

            trace!(
                region_id = %id,
                iteration,
                fingerprint = %snapshot.fingerprint,
                label = %snapshot.label,
                "Iteration started"
            );

            let prepared = RasterPlan::for_region(&snapshot.bounds, config.raster.target_size)
                .and_then(|plan| {
                    source
                        .render_region(id)
                        .map(|image| (image, plan))
                        .ok_or_else(|| {
                            RasterizeError::Environment("region has no vector content".to_string())
                        })
                });

            match prepared {
                Ok((image, plan)) => jobs.push(RasterJob {
                    region_id: id,
                    iteration,
                    label: snapshot.label,
                    image,
                    plan,
                }),
                Err(error) => {
                    warn!(
                        region_id = %id,
                        iteration,
                        error = %error,
                        "Cannot rasterize region, showing placeholder"
                    );
                    state.stats.raster_failures += 1;
                    notices.push(state.apply(id, iteration, RegionImage::Placeholder));
                }
            }
        }

        state.stats.unchanged += summary.unchanged as u64;
        state.stats.started += summary.started as u64;

        if summary.started > 0 || summary.removed > 0 {
            debug!(
                tick,
                now_ms,
                regions = summary.regions,
                started = summary.started,
                unchanged = summary.unchanged,
                removed = summary.removed,
                "Tick processed"
            );
        }

        for job in jobs {
            let rasterizer = rasterizer.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                let outcome = rasterizer.rasterize(job.image, job.plan).await;
                handle
                    .send(RasterizeFinished {
                        region_id: job.region_id,
                        iteration: job.iteration,
                        label: job.label,
                        outcome,
                    })
                    .await;
            });
        }

        let complete = TickComplete {
            tick,
            summary,
            stats: state.stats,
        };

        broadcast_notices!(broker, notices, complete)
    });

    // Handle RasterizeFinished - send the bitmap unless a newer result already landed
    actor.mutate_on::<RasterizeFinished>(|actor, context| {
        let msg = context.message().clone();
        let handle = actor.handle().clone();
        let broker = actor.broker().clone();
        let state = &mut actor.model;
        let region_id = msg.region_id;
        let iteration = msg.iteration;

        if !state.tracker.contains(region_id) {
            let notice = state.drop_work(region_id, iteration, DropReason::Orphaned);
            return broadcast_notices!(broker, vec![notice]);
        }
        if state.tracker.is_stale(region_id, iteration) {
            let notice = state.drop_work(region_id, iteration, DropReason::Stale);
            return broadcast_notices!(broker, vec![notice]);
        }

        let outcome = msg.outcome.and_then(|bitmap| {
            if bitmap.is_empty() {
                Err(RasterizeError::EmptyArea {
                    width: bitmap.width,
                    height: bitmap.height,
                })
            } else {
                Ok(bitmap)
            }
        });

        let bitmap = match outcome {
            Ok(bitmap) => bitmap,
            Err(error) => {
                warn!(
                    region_id = %region_id,
                    iteration,
                    error = %error,
                    "Rasterization failed, showing placeholder"
                );
                state.stats.raster_failures += 1;
                let notice = state.apply(region_id, iteration, RegionImage::Placeholder);
                return broadcast_notices!(broker, vec![notice]);
            }
        };
        state.stats.rasterized += 1;

        let (Some(config), Some(connection)) = (state.config.as_ref(), state.connection.clone())
        else {
            warn!("LiveUpdateCoordinator: not initialized");
            return Reply::ready();
        };

        let correlation_id = "frame".create_type_id::<V7>().to_string();
        let request = InferenceRequest::new(
            correlation_id.clone(),
            config.prompt.render(&msg.label),
            &bitmap,
            &config.generation,
        );

        // Subscribe before sending so a fast reply cannot be missed.
        let width = bitmap.width;
        let height = bitmap.height;
        let result_handle = handle.clone();
        let result_correlation = correlation_id.clone();
        connection.subscribe(
            correlation_id.clone(),
            Box::new(move |result| {
                tokio::spawn(async move {
                    result_handle
                        .send(InferenceArrived {
                            region_id,
                            iteration,
                            correlation_id: result_correlation,
                            result,
                            width,
                            height,
                        })
                        .await;
                });
            }),
        );

        if let Some(record) = state.tracker.get_mut(region_id) {
            record.track_request(iteration, correlation_id.clone());
        }
        state.stats.sent += 1;

        trace!(
            region_id = %region_id,
            iteration,
            correlation_id = %correlation_id,
            width,
            height,
            "Sending inference request"
        );

        tokio::spawn(async move {
            if let Err(error) = connection.send(&request).await {
                handle
                    .send(SendFailed {
                        region_id,
                        iteration,
                        correlation_id,
                        error,
                    })
                    .await;
            }
        });

        Reply::ready()
    });

    // Handle InferenceArrived - apply unless orphaned or stale
    actor.mutate_on::<InferenceArrived>(|actor, context| {
        let msg = context.message().clone();
        let broker = actor.broker().clone();
        let state = &mut actor.model;

        if let Some(record) = state.tracker.get_mut(msg.region_id) {
            record.untrack_request(msg.iteration);
        }

        let image = match msg.result.bitmap(msg.width, msg.height) {
            Some(bitmap) => RegionImage::Generated {
                bitmap,
                metadata: msg.result.metadata(),
            },
            None => {
                warn!(
                    region_id = %msg.region_id,
                    iteration = msg.iteration,
                    correlation_id = %msg.correlation_id,
                    error = msg.result.error.as_deref().unwrap_or("no image in result"),
                    "Inference produced no image"
                );
                state.stats.result_failures += 1;
                RegionImage::Placeholder
            }
        };

        let notice = state.apply(msg.region_id, msg.iteration, image);
        broadcast_notices!(broker, vec![notice])
    });

    // Handle SendFailed - forget the request and let the next tick retry
    actor.mutate_on::<SendFailed>(|actor, context| {
        let msg = context.message();
        let state = &mut actor.model;
        state.stats.send_failures += 1;

        if let Some(connection) = &state.connection {
            connection.unsubscribe(&msg.correlation_id);
        }

        let mut will_retry = false;
        if let Some(record) = state.tracker.get_mut(msg.region_id) {
            record.untrack_request(msg.iteration);
            if record.counters().started() == msg.iteration {
                record.invalidate();
                will_retry = true;
            }
        }

        match &msg.error {
            SendError::Connect(ConnectError::ManagerClosed) => {
                debug!(
                    region_id = %msg.region_id,
                    iteration = msg.iteration,
                    "Send skipped, connection closed"
                );
            }
            error => {
                warn!(
                    region_id = %msg.region_id,
                    iteration = msg.iteration,
                    error = %error,
                    will_retry,
                    "Inference request not sent"
                );
            }
        }
        Reply::ready()
    });
}
