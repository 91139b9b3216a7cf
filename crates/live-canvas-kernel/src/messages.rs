//! Message types for acton-reactive actor communication.
//!
//! Every suspension point of a region's pipeline ends by sending one of these
//! back to the coordinator, which re-checks staleness before acting on it.

use crate::error::{RasterizeError, SendError};
use crate::protocol::InferenceResult;
use crate::raster::Bitmap;
use crate::region::{Iteration, RegionId};

/// Tick trigger - sent to the coordinator on a fixed cadence.
#[derive(Debug, Clone)]
pub struct Tick {
    /// Current timestamp
    pub now_ms: u64,
}

/// Per-tick change detection outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Live regions seen this tick
    pub regions: usize,
    /// Regions skipped because nothing changed
    pub unchanged: usize,
    /// Regions that started a new iteration
    pub started: usize,
    /// Regions forgotten because they left the canvas
    pub removed: usize,
}

/// Running counters for the whole loop.
///
/// `stale_dropped` and `orphan_dropped` count expected discards; the
/// `*_failures` counters count genuine failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub unchanged: u64,
    pub started: u64,
    pub rasterized: u64,
    pub sent: u64,
    pub applied: u64,
    pub placeholders: u64,
    pub stale_dropped: u64,
    pub orphan_dropped: u64,
    pub raster_failures: u64,
    pub result_failures: u64,
    pub send_failures: u64,
}

/// Tick completion notification - broadcast after every tick.
#[derive(Debug, Clone)]
pub struct TickComplete {
    /// Tick number (1-based)
    pub tick: u64,
    /// What this tick decided
    pub summary: TickSummary,
    /// Loop counters as of the end of this tick
    pub stats: LoopStats,
}

/// Rasterization for one iteration finished (successfully or not).
#[derive(Debug, Clone)]
pub struct RasterizeFinished {
    pub region_id: RegionId,
    pub iteration: Iteration,
    /// Label committed when the iteration started
    pub label: String,
    pub outcome: Result<Bitmap, RasterizeError>,
}

/// A result arrived for a request this loop sent.
#[derive(Debug, Clone)]
pub struct InferenceArrived {
    pub region_id: RegionId,
    pub iteration: Iteration,
    pub correlation_id: String,
    pub result: InferenceResult,
    /// Pixel size of the image that was sent
    pub width: u32,
    pub height: u32,
}

/// A request could not be transmitted.
#[derive(Debug, Clone)]
pub struct SendFailed {
    pub region_id: RegionId,
    pub iteration: Iteration,
    pub correlation_id: String,
    pub error: SendError,
}

/// Why a unit of work was discarded instead of applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// A newer iteration already completed for the region.
    Stale,
    /// The region no longer exists on the canvas.
    Orphaned,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Stale => "stale",
            DropReason::Orphaned => "orphaned",
        }
    }
}

/// Broadcast when a region's display content changed.
#[derive(Debug, Clone)]
pub struct RegionUpdated {
    pub region_id: RegionId,
    pub iteration: Iteration,
    pub placeholder: bool,
}

/// Broadcast when work for a region was discarded.
#[derive(Debug, Clone)]
pub struct WorkDropped {
    pub region_id: RegionId,
    pub iteration: Iteration,
    pub reason: DropReason,
}
