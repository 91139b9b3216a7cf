//! In-memory shape document standing in for a drawing editor.
//!
//! Frames are the live regions. A frame's content is every other shape whose
//! page bounds touch it; editing any of those shapes changes the frame's
//! fingerprint on the next tick.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use live_canvas_kernel::canvas::{CanvasSurface, RegionImage};
use live_canvas_kernel::raster::{Rgba, VectorImage, VectorLayer};
use live_canvas_kernel::region::{Rect, RegionId};
use live_canvas_kernel::snapshot::{Fingerprint, SnapshotSource};

/// What a shape draws.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShapeKind {
    Rect { fill: Rgba },
    Ellipse { fill: Rgba },
    /// Polyline in page coordinates.
    Stroke {
        points: Vec<(f64, f64)>,
        width: f64,
        color: Rgba,
    },
    /// A live region; its name is the generation label.
    Frame { name: String },
}

/// A shape on the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub id: Uuid,
    pub bounds: Rect,
    pub kind: ShapeKind,
}

impl Shape {
    pub fn rect(bounds: Rect, fill: Rgba) -> Self {
        Self {
            id: Uuid::new_v4(),
            bounds,
            kind: ShapeKind::Rect { fill },
        }
    }

    pub fn ellipse(bounds: Rect, fill: Rgba) -> Self {
        Self {
            id: Uuid::new_v4(),
            bounds,
            kind: ShapeKind::Ellipse { fill },
        }
    }

    /// A stroke; its bounds cover the points padded by half the width.
    pub fn stroke(points: Vec<(f64, f64)>, width: f64, color: Rgba) -> Self {
        let pad = width / 2.0;
        let (mut min_x, mut min_y) = (f64::MAX, f64::MAX);
        let (mut max_x, mut max_y) = (f64::MIN, f64::MIN);
        for &(x, y) in &points {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        let bounds = if points.is_empty() {
            Rect::default()
        } else {
            Rect::new(
                min_x - pad,
                min_y - pad,
                max_x - min_x + width,
                max_y - min_y + width,
            )
        };
        Self {
            id: Uuid::new_v4(),
            bounds,
            kind: ShapeKind::Stroke {
                points,
                width,
                color,
            },
        }
    }

    pub fn frame(name: impl Into<String>, bounds: Rect) -> Self {
        Self {
            id: Uuid::new_v4(),
            bounds,
            kind: ShapeKind::Frame { name: name.into() },
        }
    }

    pub fn is_frame(&self) -> bool {
        matches!(self.kind, ShapeKind::Frame { .. })
    }

    /// Drawing primitive for this shape; frames draw nothing.
    pub fn layer(&self) -> Option<VectorLayer> {
        match &self.kind {
            ShapeKind::Rect { fill } => Some(VectorLayer::Rect {
                bounds: self.bounds,
                fill: *fill,
            }),
            ShapeKind::Ellipse { fill } => Some(VectorLayer::Ellipse {
                bounds: self.bounds,
                fill: *fill,
            }),
            ShapeKind::Stroke {
                points,
                width,
                color,
            } => Some(VectorLayer::Stroke {
                points: points.clone(),
                width: *width,
                color: *color,
            }),
            ShapeKind::Frame { .. } => None,
        }
    }

    fn translate(&mut self, dx: f64, dy: f64) {
        self.bounds.x += dx;
        self.bounds.y += dy;
        if let ShapeKind::Stroke { points, .. } = &mut self.kind {
            for point in points.iter_mut() {
                point.0 += dx;
                point.1 += dy;
            }
        }
    }
}

/// Last image the loop put on a frame.
#[derive(Debug, Clone)]
pub struct AppliedImage {
    pub image: RegionImage,
    pub applied_at: DateTime<Utc>,
    /// How many images this frame has received in total
    pub updates: u64,
}

/// Thread-safe shape document. Shapes are kept in z-order, bottom first.
#[derive(Default)]
pub struct SceneCanvas {
    shapes: RwLock<Vec<Shape>>,
    applied: RwLock<HashMap<RegionId, AppliedImage>>,
}

impl std::fmt::Debug for SceneCanvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneCanvas")
            .field("shapes", &self.read_shapes().len())
            .field("applied", &self.read_applied().len())
            .finish()
    }
}

impl SceneCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shapes(shapes: Vec<Shape>) -> Self {
        Self {
            shapes: RwLock::new(shapes),
            applied: RwLock::default(),
        }
    }

    /// Two frames over a few shapes.
    pub fn demo() -> Self {
        Self::with_shapes(vec![
            Shape::rect(Rect::new(0.0, 300.0, 1000.0, 200.0), Rgba([70, 130, 60, 255])),
            Shape::ellipse(Rect::new(60.0, 40.0, 120.0, 120.0), Rgba([250, 200, 40, 255])),
            Shape::rect(Rect::new(200.0, 180.0, 160.0, 160.0), Rgba([160, 60, 40, 255])),
            Shape::stroke(
                vec![(600.0, 320.0), (700.0, 120.0), (800.0, 320.0)],
                12.0,
                Rgba::BLACK,
            ),
            Shape::frame("a cottage under a summer sun", Rect::new(0.0, 0.0, 480.0, 480.0)),
            Shape::frame("a mountain at dusk", Rect::new(520.0, 0.0, 480.0, 480.0)),
        ])
    }

    fn read_shapes(&self) -> RwLockReadGuard<'_, Vec<Shape>> {
        self.shapes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_shapes(&self) -> RwLockWriteGuard<'_, Vec<Shape>> {
        self.shapes.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_applied(&self) -> RwLockReadGuard<'_, HashMap<RegionId, AppliedImage>> {
        self.applied.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a shape on top of everything else.
    pub fn add(&self, shape: Shape) -> Uuid {
        let id = shape.id;
        self.write_shapes().push(shape);
        id
    }

    pub fn remove(&self, id: Uuid) -> bool {
        let mut shapes = self.write_shapes();
        let before = shapes.len();
        shapes.retain(|shape| shape.id != id);
        shapes.len() != before
    }

    pub fn move_shape(&self, id: Uuid, dx: f64, dy: f64) -> bool {
        match self.write_shapes().iter_mut().find(|shape| shape.id == id) {
            Some(shape) => {
                shape.translate(dx, dy);
                true
            }
            None => false,
        }
    }

    /// Rename a frame. Returns false if `id` is not a frame.
    pub fn rename_frame(&self, id: Uuid, name: impl Into<String>) -> bool {
        let mut shapes = self.write_shapes();
        match shapes.iter_mut().find(|shape| shape.id == id) {
            Some(Shape {
                kind: ShapeKind::Frame { name: current },
                ..
            }) => {
                *current = name.into();
                true
            }
            _ => false,
        }
    }

    pub fn shape(&self, id: Uuid) -> Option<Shape> {
        self.read_shapes().iter().find(|shape| shape.id == id).cloned()
    }

    pub fn shapes(&self) -> Vec<Shape> {
        self.read_shapes().clone()
    }

    pub fn frames(&self) -> Vec<Shape> {
        self.read_shapes()
            .iter()
            .filter(|shape| shape.is_frame())
            .cloned()
            .collect()
    }

    fn frame(&self, id: RegionId) -> Option<Shape> {
        self.shape(id).filter(Shape::is_frame)
    }

    /// Every other shape whose bounds touch the frame, in z-order.
    pub fn overlapping(&self, id: RegionId) -> Vec<Shape> {
        let Some(frame) = self.frame(id) else {
            return Vec::new();
        };
        self.read_shapes()
            .iter()
            .filter(|shape| shape.id != id && shape.bounds.collides(&frame.bounds))
            .cloned()
            .collect()
    }

    pub fn applied(&self, id: RegionId) -> Option<AppliedImage> {
        self.read_applied().get(&id).cloned()
    }

    /// Write the last image of every frame into `dir`.
    ///
    /// File names are `<frame name>-<timestamp>.<ext>`; placeholders are skipped.
    pub fn write_images(&self, dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

        let mut written = Vec::new();
        for frame in self.frames() {
            let ShapeKind::Frame { name } = &frame.kind else {
                continue;
            };
            let Some(applied) = self.applied(frame.id) else {
                continue;
            };
            if applied.image.is_placeholder() {
                continue;
            }

            let bitmap = applied.image.bitmap();
            let path = dir.join(format!(
                "{}-{}.{}",
                file_stem(name),
                applied.applied_at.format("%Y%m%d-%H%M%S%.3f"),
                bitmap.format.extension()
            ));
            std::fs::write(&path, &bitmap.bytes)
                .with_context(|| format!("Failed to write image {}", path.display()))?;
            debug!(path = %path.display(), bytes = bitmap.bytes.len(), "Wrote frame image");
            written.push(path);
        }
        Ok(written)
    }
}

/// Lowercase a frame name into a safe file stem.
fn file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let stem = stem.trim_matches('-').to_string();
    if stem.is_empty() {
        "frame".to_string()
    } else {
        stem
    }
}

impl SnapshotSource for SceneCanvas {
    fn list_regions(&self) -> Vec<RegionId> {
        self.read_shapes()
            .iter()
            .filter(|shape| shape.is_frame())
            .map(|shape| shape.id)
            .collect()
    }

    fn region_bounds(&self, id: RegionId) -> Option<Rect> {
        self.frame(id).map(|frame| frame.bounds)
    }

    fn overlapping_fingerprint(&self, id: RegionId) -> Fingerprint {
        // Serialized shapes hash identically whenever they look identical.
        Fingerprint::of_unordered(
            self.overlapping(id)
                .iter()
                .filter_map(|shape| serde_json::to_string(shape).ok()),
        )
    }

    fn label(&self, id: RegionId) -> String {
        match self.frame(id).map(|frame| frame.kind) {
            Some(ShapeKind::Frame { name }) => name,
            _ => String::new(),
        }
    }

    fn render_region(&self, id: RegionId) -> Option<VectorImage> {
        let frame = self.frame(id)?;
        Some(VectorImage {
            bounds: frame.bounds,
            background: Rgba::WHITE,
            layers: self
                .overlapping(id)
                .iter()
                .filter_map(Shape::layer)
                .collect(),
        })
    }
}

impl CanvasSurface for SceneCanvas {
    fn apply_image(&self, id: RegionId, image: RegionImage) {
        let placeholder = image.is_placeholder();
        let mut applied = self.applied.write().unwrap_or_else(PoisonError::into_inner);
        let updates = applied.get(&id).map(|a| a.updates).unwrap_or(0) + 1;
        applied.insert(
            id,
            AppliedImage {
                image,
                applied_at: Utc::now(),
                updates,
            },
        );
        info!(region_id = %id, updates, placeholder, "Frame image updated");
    }
}
