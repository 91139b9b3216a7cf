//! Snapshot queries and change detection.
//!
//! The [`SnapshotSource`] trait is the read side of the external canvas. The
//! loop takes a fresh [`Snapshot`] of every region on every tick and asks
//! [`ChangeDetector`] whether it differs from what was last committed.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::raster::VectorImage;
use crate::region::{Rect, RegionId, RegionRecord};

/// Content hash of everything visually overlapping a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Fingerprint a set of parts without regard to their order.
    ///
    /// Each part is hashed on its own, the part hashes are sorted, and the
    /// sorted sequence is hashed again.
    pub fn of_unordered<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Hash,
    {
        let mut hashes: Vec<u64> = parts
            .into_iter()
            .map(|part| {
                let mut hasher = DefaultHasher::new();
                part.hash(&mut hasher);
                hasher.finish()
            })
            .collect();
        hashes.sort_unstable();

        let mut hasher = DefaultHasher::new();
        hashes.len().hash(&mut hasher);
        for h in hashes {
            h.hash(&mut hasher);
        }
        Fingerprint(hasher.finish())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Read-only view of the external canvas.
///
/// Implementations are pure queries: no state is kept on behalf of the loop.
/// The loop calls these from its actor, so they should be cheap.
pub trait SnapshotSource: Send + Sync {
    /// Identifiers of every live region on the canvas.
    fn list_regions(&self) -> Vec<RegionId>;

    /// Page bounds of a region, or `None` once it has been deleted.
    fn region_bounds(&self, id: RegionId) -> Option<Rect>;

    /// Order-independent fingerprint of everything overlapping the region.
    fn overlapping_fingerprint(&self, id: RegionId) -> Fingerprint;

    /// Current label (generation prompt) of the region.
    fn label(&self, id: RegionId) -> String;

    /// Render the region and everything overlapping it as a vector image.
    ///
    /// `None` means the editor produced nothing drawable.
    fn render_region(&self, id: RegionId) -> Option<VectorImage>;
}

/// Immutable point-in-time summary of a region.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub region_id: RegionId,
    pub bounds: Rect,
    pub fingerprint: Fingerprint,
    pub label: String,
}

impl Snapshot {
    /// Query the source for a region; `None` when the region no longer exists.
    pub fn take(source: &dyn SnapshotSource, id: RegionId) -> Option<Self> {
        let bounds = source.region_bounds(id)?;
        Some(Self {
            region_id: id,
            bounds,
            fingerprint: source.overlapping_fingerprint(id),
            label: source.label(id),
        })
    }
}

/// Decides whether a region needs regenerating.
pub struct ChangeDetector;

impl ChangeDetector {
    /// False iff both fingerprint and label match the last committed values.
    pub fn should_update(record: &RegionRecord, snapshot: &Snapshot) -> bool {
        record.fingerprint != Some(snapshot.fingerprint)
            || record.label.as_deref() != Some(snapshot.label.as_str())
    }

    /// Commit a snapshot to the record before any async work is issued.
    ///
    /// Changes arriving while that work is in flight are compared against
    /// this commit, so they are neither missed nor processed twice.
    pub fn commit(record: &mut RegionRecord, snapshot: &Snapshot) {
        record.fingerprint = Some(snapshot.fingerprint);
        record.label = Some(snapshot.label.clone());
        record.width = snapshot.bounds.w;
        record.height = snapshot.bounds.h;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn snapshot(fingerprint: u64, label: &str) -> Snapshot {
        Snapshot {
            region_id: Uuid::nil(),
            bounds: Rect::new(0.0, 0.0, 256.0, 256.0),
            fingerprint: Fingerprint(fingerprint),
            label: label.to_string(),
        }
    }

    #[test]
    fn test_fresh_record_always_updates() {
        let record = RegionRecord::new(Uuid::nil());
        assert!(ChangeDetector::should_update(&record, &snapshot(1, "")));
    }

    #[test]
    fn test_unchanged_snapshot_is_skipped() {
        let mut record = RegionRecord::new(Uuid::nil());
        let snap = snapshot(7, "a cat");
        ChangeDetector::commit(&mut record, &snap);

        assert!(!ChangeDetector::should_update(&record, &snap));
        assert!(!ChangeDetector::should_update(&record, &snap.clone()));
    }

    #[test]
    fn test_label_only_change_triggers_update() {
        let mut record = RegionRecord::new(Uuid::nil());
        ChangeDetector::commit(&mut record, &snapshot(7, "a cat"));

        assert!(ChangeDetector::should_update(&record, &snapshot(7, "a dog")));
    }

    #[test]
    fn test_content_change_triggers_update() {
        let mut record = RegionRecord::new(Uuid::nil());
        ChangeDetector::commit(&mut record, &snapshot(7, "a cat"));

        assert!(ChangeDetector::should_update(&record, &snapshot(8, "a cat")));
    }

    #[test]
    fn test_invalidate_forces_update() {
        let mut record = RegionRecord::new(Uuid::nil());
        let snap = snapshot(7, "a cat");
        ChangeDetector::commit(&mut record, &snap);
        record.invalidate();

        assert!(ChangeDetector::should_update(&record, &snap));
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = Fingerprint::of_unordered(["rect:1", "ellipse:2", "stroke:3"]);
        let b = Fingerprint::of_unordered(["stroke:3", "rect:1", "ellipse:2"]);
        let c = Fingerprint::of_unordered(["stroke:3", "rect:1"]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_empty_fingerprint_is_stable() {
        let empty: [&str; 0] = [];
        assert_eq!(
            Fingerprint::of_unordered(empty),
            Fingerprint::of_unordered(Vec::<String>::new())
        );
    }
}
