//! Canvas apply surface: the only write the pipeline performs on the editor.

use crate::protocol::ResultMetadata;
use crate::raster::{placeholder_bitmap, Bitmap};
use crate::region::RegionId;

/// What a region displays after an attempt finishes.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionImage {
    /// Image produced by the inference service.
    Generated {
        bitmap: Bitmap,
        metadata: ResultMetadata,
    },
    /// Neutral image shown when the attempt yielded nothing usable.
    Placeholder,
}

impl RegionImage {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, RegionImage::Placeholder)
    }

    /// Encoded payload to display.
    pub fn bitmap(&self) -> Bitmap {
        match self {
            RegionImage::Generated { bitmap, .. } => bitmap.clone(),
            RegionImage::Placeholder => placeholder_bitmap(),
        }
    }
}

/// Receives display content for regions.
///
/// The loop only calls this for regions that still exist on the canvas.
pub trait CanvasSurface: Send + Sync {
    fn apply_image(&self, id: RegionId, image: RegionImage);
}
