//! Rasterizer adapter: vector snapshots in, fixed-format bitmaps out.
//!
//! The rasterizer itself is external. The kernel only needs it to be
//! asynchronous and fallible, and decides the pixel scale it is asked for.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::RasterizeError;
use crate::region::Rect;

/// Straight-alpha RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    pub const WHITE: Rgba = Rgba([255, 255, 255, 255]);
    pub const BLACK: Rgba = Rgba([0, 0, 0, 255]);
}

/// A single drawing primitive in page coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VectorLayer {
    Rect { bounds: Rect, fill: Rgba },
    Ellipse { bounds: Rect, fill: Rgba },
    Stroke { points: Vec<(f64, f64)>, width: f64, color: Rgba },
}

/// Vector rendering of a region: what the editor hands the rasterizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorImage {
    /// Page area covered by the image; its size is the image's natural size.
    pub bounds: Rect,
    pub background: Rgba,
    /// Painted in order, first layer at the bottom.
    pub layers: Vec<VectorLayer>,
}

/// Encoded raster container formats the pipeline ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
    Gif,
}

impl ImageFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
        }
    }
}

/// Encoded bitmap payload.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub bytes: Arc<[u8]>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32, format: ImageFormat, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            width,
            height,
            format,
            bytes: bytes.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// 1x1 transparent GIF shown while a region has nothing better.
pub const PLACEHOLDER_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x21, 0xf9, 0x04,
    0x01, 0x0a, 0x00, 0x01, 0x00, 0x2c, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02,
    0x02, 0x4c, 0x01, 0x00, 0x3b,
];

/// The neutral placeholder as a bitmap.
pub fn placeholder_bitmap() -> Bitmap {
    Bitmap::new(1, 1, ImageFormat::Gif, PLACEHOLDER_GIF)
}

/// Largest bitmap a plan may ask for, in pixels (4096x4096).
pub const MAX_RASTER_PIXELS: u64 = 4096 * 4096;

/// Pixel geometry for one rasterization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterPlan {
    pub scale: f64,
    pub width: u32,
    pub height: u32,
}

impl RasterPlan {
    /// Scale a region so its width maps onto `target_size` pixels.
    ///
    /// Output dimensions are floored. Degenerate regions yield
    /// [`RasterizeError::EmptyArea`]; plans above [`MAX_RASTER_PIXELS`]
    /// (very tall, thin regions) yield [`RasterizeError::Unsupported`].
    pub fn for_region(bounds: &Rect, target_size: u32) -> Result<Self, RasterizeError> {
        if !(bounds.w > 0.0 && bounds.h > 0.0) || target_size == 0 {
            return Err(RasterizeError::EmptyArea {
                width: 0,
                height: 0,
            });
        }
        let scale = target_size as f64 / bounds.w;
        Self::with_scale(bounds, scale)
    }

    pub fn with_scale(bounds: &Rect, scale: f64) -> Result<Self, RasterizeError> {
        let width = (bounds.w * scale).floor().max(0.0);
        let height = (bounds.h * scale).floor().max(0.0);
        let oversized = width * height > MAX_RASTER_PIXELS as f64;
        if !(width.is_finite() && height.is_finite()) || oversized {
            return Err(RasterizeError::Unsupported(format!(
                "{width}x{height} px exceeds the {MAX_RASTER_PIXELS} pixel limit"
            )));
        }
        let (width, height) = (width as u32, height as u32);
        if width == 0 || height == 0 {
            return Err(RasterizeError::EmptyArea { width, height });
        }
        Ok(Self {
            scale,
            width,
            height,
        })
    }
}

/// Converts vector snapshots to encoded bitmaps.
///
/// Returned futures must be `'static`; implementations that do CPU-heavy work
/// should move it off the async executor.
pub trait Rasterizer: Send + Sync {
    fn name(&self) -> &str;

    fn rasterize(
        &self,
        image: VectorImage,
        plan: RasterPlan,
    ) -> BoxFuture<'static, Result<Bitmap, RasterizeError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_maps_width_to_target() {
        let plan = RasterPlan::for_region(&Rect::new(0.0, 0.0, 256.0, 128.0), 512).unwrap();
        assert_eq!(plan.scale, 2.0);
        assert_eq!((plan.width, plan.height), (512, 256));
    }

    #[test]
    fn test_plan_floors_fractional_dimensions() {
        let plan = RasterPlan::for_region(&Rect::new(0.0, 0.0, 300.0, 301.0), 512).unwrap();
        assert_eq!(plan.width, 512);
        assert_eq!(plan.height, (301.0 * 512.0 / 300.0_f64).floor() as u32);
    }

    #[test]
    fn test_plan_rejects_degenerate_region() {
        assert!(matches!(
            RasterPlan::for_region(&Rect::new(0.0, 0.0, 0.0, 100.0), 512),
            Err(RasterizeError::EmptyArea { .. })
        ));
        assert!(matches!(
            RasterPlan::for_region(&Rect::new(0.0, 0.0, 4096.0, 1.0), 512),
            Err(RasterizeError::EmptyArea { .. })
        ));
    }

    #[test]
    fn test_plan_rejects_oversized_output() {
        // 0.001 wide maps to 512 px, so 100 tall would need 51.2M rows
        let err = RasterPlan::for_region(&Rect::new(0.0, 0.0, 0.001, 100.0), 512).unwrap_err();
        assert!(matches!(err, RasterizeError::Unsupported(_)));

        let over = RasterPlan::for_region(&Rect::new(0.0, 0.0, 512.0, 4096.0 * 8.0), 512);
        assert!(matches!(over, Err(RasterizeError::Unsupported(_))));

        let tall = RasterPlan::for_region(&Rect::new(0.0, 0.0, 512.0, 4096.0), 512).unwrap();
        assert_eq!((tall.width, tall.height), (512, 4096));
    }

    #[test]
    fn test_placeholder_is_a_gif() {
        let placeholder = placeholder_bitmap();
        assert!(PLACEHOLDER_GIF.starts_with(b"GIF89a"));
        assert_eq!(placeholder.format.mime(), "image/gif");
        assert!(!placeholder.is_empty());
    }
}
