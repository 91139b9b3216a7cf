//! Region records: per-region state owned by the update loop.
//!
//! A region's record holds the last committed fingerprint and label, its
//! iteration counters, and the correlation identifiers of requests that are
//! still in flight. Pipeline stages never touch the counters directly; they go
//! through [`IterationTracker`].

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::snapshot::Fingerprint;

/// Stable identifier for a region on the canvas.
pub type RegionId = Uuid;

/// Identifier of one attempt to update a region.
pub type Iteration = u64;

/// Axis-aligned rectangle in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn max_x(&self) -> f64 {
        self.x + self.w
    }

    pub fn max_y(&self) -> f64 {
        self.y + self.h
    }

    /// True when the two rectangles overlap or touch.
    pub fn collides(&self, other: &Rect) -> bool {
        !(self.max_x() < other.x
            || self.x > other.max_x()
            || self.max_y() < other.y
            || self.y > other.max_y())
    }
}

/// Started/finished counters for a single region.
///
/// Invariant: `finished <= started`, and `finished` never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationCounters {
    started: Iteration,
    finished: Iteration,
}

impl IterationCounters {
    pub fn started(&self) -> Iteration {
        self.started
    }

    pub fn finished(&self) -> Iteration {
        self.finished
    }

    fn begin(&mut self) -> Iteration {
        self.started += 1;
        self.started
    }

    fn is_stale(&self, iteration: Iteration) -> bool {
        iteration <= self.finished
    }

    fn complete(&mut self, iteration: Iteration) {
        // Iterations are only minted by `begin`, so this cannot exceed `started`.
        let iteration = iteration.min(self.started);
        self.finished = self.finished.max(iteration);
    }
}

/// Everything the loop remembers about one live region.
#[derive(Debug, Clone)]
pub struct RegionRecord {
    pub id: RegionId,
    /// Label committed with the last accepted change.
    pub label: Option<String>,
    /// Fingerprint committed with the last accepted change.
    pub fingerprint: Option<Fingerprint>,
    /// Current pixel size of the region.
    pub width: f64,
    pub height: f64,
    counters: IterationCounters,
    /// Requests sent and not yet answered, keyed by the iteration they carry.
    in_flight: BTreeMap<Iteration, String>,
}

impl RegionRecord {
    pub fn new(id: RegionId) -> Self {
        Self {
            id,
            label: None,
            fingerprint: None,
            width: 0.0,
            height: 0.0,
            counters: IterationCounters::default(),
            in_flight: BTreeMap::new(),
        }
    }

    pub fn counters(&self) -> IterationCounters {
        self.counters
    }

    /// Forget the committed fingerprint so the next tick sees a change.
    pub fn invalidate(&mut self) {
        self.fingerprint = None;
    }

    pub fn in_flight(&self) -> impl Iterator<Item = (&Iteration, &String)> {
        self.in_flight.iter()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Record the correlation identifier a request for `iteration` was sent under.
    pub fn track_request(&mut self, iteration: Iteration, correlation_id: String) {
        self.in_flight.insert(iteration, correlation_id);
    }

    /// Stop tracking a single request, returning its correlation identifier.
    pub fn untrack_request(&mut self, iteration: Iteration) -> Option<String> {
        self.in_flight.remove(&iteration)
    }

    /// Drop every tracked request at or below `iteration`.
    ///
    /// Those requests are stale for good once `iteration` has completed.
    pub fn prune_through(&mut self, iteration: Iteration) -> Vec<String> {
        let keep = self.in_flight.split_off(&iteration.saturating_add(1));
        let pruned = std::mem::replace(&mut self.in_flight, keep);
        pruned.into_values().collect()
    }

    /// Drain all tracked requests (used when the region disappears).
    pub fn drain_requests(&mut self) -> Vec<String> {
        std::mem::take(&mut self.in_flight).into_values().collect()
    }
}

/// Keyed access to region records and their iteration counters.
///
/// This is the only place the started/finished counters are mutated.
#[derive(Debug, Clone, Default)]
pub struct IterationTracker {
    regions: HashMap<RegionId, RegionRecord>,
}

impl IterationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn contains(&self, id: RegionId) -> bool {
        self.regions.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<RegionId> {
        self.regions.keys().copied().collect()
    }

    pub fn get(&self, id: RegionId) -> Option<&RegionRecord> {
        self.regions.get(&id)
    }

    pub fn get_mut(&mut self, id: RegionId) -> Option<&mut RegionRecord> {
        self.regions.get_mut(&id)
    }

    /// Fetch the record for `id`, registering a fresh one on first sight.
    pub fn ensure(&mut self, id: RegionId) -> &mut RegionRecord {
        self.regions.entry(id).or_insert_with(|| RegionRecord::new(id))
    }

    pub fn remove(&mut self, id: RegionId) -> Option<RegionRecord> {
        self.regions.remove(&id)
    }

    /// Start a new iteration for `id` and return its number.
    ///
    /// Returns `None` for regions the tracker does not know.
    pub fn begin(&mut self, id: RegionId) -> Option<Iteration> {
        self.regions.get_mut(&id).map(|r| r.counters.begin())
    }

    /// True iff `iteration` has been superseded by a completed one.
    ///
    /// Unknown regions are always stale: their work can never be applied.
    pub fn is_stale(&self, id: RegionId, iteration: Iteration) -> bool {
        self.regions
            .get(&id)
            .is_none_or(|r| r.counters.is_stale(iteration))
    }

    /// Mark `iteration` finished. Never moves the counter backward.
    pub fn complete(&mut self, id: RegionId, iteration: Iteration) {
        if let Some(record) = self.regions.get_mut(&id) {
            record.counters.complete(iteration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(name: &str) -> RegionId {
        Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes())
    }

    #[test]
    fn test_begin_is_monotonic() {
        let mut tracker = IterationTracker::new();
        let id = region("frame_a");
        tracker.ensure(id);

        assert_eq!(tracker.begin(id), Some(1));
        assert_eq!(tracker.begin(id), Some(2));
        assert_eq!(tracker.begin(id), Some(3));
        assert_eq!(tracker.get(id).unwrap().counters().started(), 3);
    }

    #[test]
    fn test_late_low_iteration_does_not_move_finished_backward() {
        let mut tracker = IterationTracker::new();
        let id = region("frame_a");
        tracker.ensure(id);
        let first = tracker.begin(id).unwrap();
        let second = tracker.begin(id).unwrap();

        tracker.complete(id, second);
        assert!(tracker.is_stale(id, first));

        tracker.complete(id, first);
        assert_eq!(tracker.get(id).unwrap().counters().finished(), second);
    }

    #[test]
    fn test_finished_never_exceeds_started() {
        let mut tracker = IterationTracker::new();
        let id = region("frame_a");
        tracker.ensure(id);
        tracker.begin(id);

        tracker.complete(id, 99);
        let counters = tracker.get(id).unwrap().counters();
        assert!(counters.finished() <= counters.started());
    }

    #[test]
    fn test_in_flight_iteration_is_not_stale_until_superseded() {
        let mut tracker = IterationTracker::new();
        let id = region("frame_a");
        tracker.ensure(id);
        let first = tracker.begin(id).unwrap();
        let second = tracker.begin(id).unwrap();

        assert!(!tracker.is_stale(id, first));
        assert!(!tracker.is_stale(id, second));

        tracker.complete(id, first);
        assert!(tracker.is_stale(id, first));
        assert!(!tracker.is_stale(id, second));
    }

    #[test]
    fn test_unknown_region_is_stale() {
        let tracker = IterationTracker::new();
        assert!(tracker.is_stale(region("ghost"), 1));
    }

    #[test]
    fn test_finished_is_non_decreasing_under_any_completion_order() {
        let orders: [[Iteration; 4]; 3] = [[1, 2, 3, 4], [4, 3, 2, 1], [2, 4, 1, 3]];
        for order in orders {
            let mut tracker = IterationTracker::new();
            let id = region("frame_a");
            tracker.ensure(id);
            for _ in 0..4 {
                tracker.begin(id);
            }

            let mut last = 0;
            for iteration in order {
                tracker.complete(id, iteration);
                let finished = tracker.get(id).unwrap().counters().finished();
                assert!(finished >= last, "order {:?} moved finished backward", order);
                last = finished;
            }
            assert_eq!(last, 4);
        }
    }

    #[test]
    fn test_prune_through_keeps_newer_requests() {
        let mut record = RegionRecord::new(region("frame_a"));
        record.track_request(1, "frame_1".to_string());
        record.track_request(2, "frame_2".to_string());
        record.track_request(3, "frame_3".to_string());

        let pruned = record.prune_through(2);
        assert_eq!(pruned, vec!["frame_1".to_string(), "frame_2".to_string()]);
        assert_eq!(record.in_flight_count(), 1);
        assert_eq!(record.untrack_request(3), Some("frame_3".to_string()));
    }

    #[test]
    fn test_rect_collision() {
        let frame = Rect::new(0.0, 0.0, 100.0, 100.0);
        assert!(frame.collides(&Rect::new(50.0, 50.0, 100.0, 100.0)));
        assert!(frame.collides(&Rect::new(100.0, 0.0, 10.0, 10.0)));
        assert!(!frame.collides(&Rect::new(101.0, 0.0, 10.0, 10.0)));
        assert!(!frame.collides(&Rect::new(0.0, -20.0, 10.0, 10.0)));
    }
}
