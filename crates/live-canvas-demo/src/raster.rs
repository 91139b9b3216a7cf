//! Pixel rasterizer for vector snapshots, built on the `image` crate.
//!
//! Drawing and encoding run on a blocking thread; the returned future only
//! waits for the result.

use std::io::Cursor;

use futures::future::{BoxFuture, FutureExt};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgba, RgbaImage};
use tracing::trace;

use live_canvas_kernel::config::RasterConfig;
use live_canvas_kernel::error::RasterizeError;
use live_canvas_kernel::raster::{
    Bitmap, ImageFormat, RasterPlan, Rasterizer, VectorImage, VectorLayer, MAX_RASTER_PIXELS,
};
use live_canvas_kernel::region::Rect;

/// Rasterizer that paints layers into an RGBA buffer and encodes it.
#[derive(Debug, Clone)]
pub struct ImageRasterizer {
    format: ImageFormat,
    jpeg_quality: u8,
}

impl ImageRasterizer {
    pub fn new(config: &RasterConfig) -> Self {
        Self {
            format: config.format,
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
        }
    }
}

impl Rasterizer for ImageRasterizer {
    fn name(&self) -> &str {
        "image"
    }

    fn rasterize(
        &self,
        image: VectorImage,
        plan: RasterPlan,
    ) -> BoxFuture<'static, Result<Bitmap, RasterizeError>> {
        let format = self.format;
        let quality = self.jpeg_quality;
        if plan.width as u64 * plan.height as u64 > MAX_RASTER_PIXELS {
            let error = RasterizeError::Unsupported(format!(
                "{}x{} px exceeds the {MAX_RASTER_PIXELS} pixel limit",
                plan.width, plan.height
            ));
            return futures::future::ready(Err(error)).boxed();
        }
        tokio::task::spawn_blocking(move || {
            let pixels = paint(&image, plan);
            let bytes = encode(pixels, format, quality)?;
            trace!(
                width = plan.width,
                height = plan.height,
                layers = image.layers.len(),
                bytes = bytes.len(),
                "Rasterized region"
            );
            Ok(Bitmap::new(plan.width, plan.height, format, bytes))
        })
        .map(|joined| {
            joined.unwrap_or_else(|e| Err(RasterizeError::Environment(e.to_string())))
        })
        .boxed()
    }
}

/// Draw every layer, bottom first, in output pixel space.
pub fn paint(image: &VectorImage, plan: RasterPlan) -> RgbaImage {
    let mut pixels = RgbaImage::from_pixel(plan.width, plan.height, Rgba(image.background.0));
    let origin = image.bounds;
    let scale = plan.scale;
    let to_px = |x: f64, y: f64| ((x - origin.x) * scale, (y - origin.y) * scale);

    for layer in &image.layers {
        match layer {
            VectorLayer::Rect { bounds, fill } => {
                let (x0, y0, x1, y1) = pixel_box(bounds, &to_px);
                fill_rect(&mut pixels, x0, y0, x1, y1, Rgba(fill.0));
            }
            VectorLayer::Ellipse { bounds, fill } => {
                let (x0, y0, x1, y1) = pixel_box(bounds, &to_px);
                fill_ellipse(&mut pixels, x0, y0, x1, y1, Rgba(fill.0));
            }
            VectorLayer::Stroke {
                points,
                width,
                color,
            } => {
                let radius = (width * scale / 2.0).max(0.5);
                let color = Rgba(color.0);
                let mapped: Vec<(f64, f64)> = points.iter().map(|&(x, y)| to_px(x, y)).collect();
                if let [only] = mapped.as_slice() {
                    draw_disc(&mut pixels, only.0, only.1, radius, color);
                }
                for pair in mapped.windows(2) {
                    draw_segment(&mut pixels, pair[0], pair[1], radius, color);
                }
            }
        }
    }
    pixels
}

fn pixel_box(bounds: &Rect, to_px: &impl Fn(f64, f64) -> (f64, f64)) -> (f64, f64, f64, f64) {
    let (x0, y0) = to_px(bounds.x, bounds.y);
    let (x1, y1) = to_px(bounds.max_x(), bounds.max_y());
    (x0, y0, x1, y1)
}

fn encode(pixels: RgbaImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>, RasterizeError> {
    let mut out = Vec::new();
    let image = DynamicImage::ImageRgba8(pixels);
    let written = match format {
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = image.to_rgb8();
            JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb)
        }
        ImageFormat::Png => image.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png),
        ImageFormat::Gif => image.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Gif),
    };
    written.map_err(|e| RasterizeError::Unsupported(e.to_string()))?;
    Ok(out)
}

fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let sa = f64::from(src[3]) / 255.0;
    if sa >= 1.0 {
        return src;
    }
    let da = f64::from(dst[3]) / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let channel = |i: usize| {
        let c = (f64::from(src[i]) * sa + f64::from(dst[i]) * da * (1.0 - sa)) / out_a;
        c.round().clamp(0.0, 255.0) as u8
    };
    Rgba([
        channel(0),
        channel(1),
        channel(2),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

/// Inclusive pixel range covered by `[lo, hi)` in continuous coordinates.
fn span(lo: f64, hi: f64, limit: u32) -> Option<(u32, u32)> {
    if limit == 0 {
        return None;
    }
    let start = lo.min(hi).floor().max(0.0);
    let end = (lo.max(hi).ceil() - 1.0).min(f64::from(limit - 1));
    if end < start {
        return None;
    }
    Some((start as u32, end as u32))
}

fn fill_rect(img: &mut RgbaImage, x0: f64, y0: f64, x1: f64, y1: f64, color: Rgba<u8>) {
    let (Some((min_x, max_x)), Some((min_y, max_y))) =
        (span(x0, x1, img.width()), span(y0, y1, img.height()))
    else {
        return;
    };
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dst = *img.get_pixel(x, y);
            img.put_pixel(x, y, blend_pixel(dst, color));
        }
    }
}

fn fill_ellipse(img: &mut RgbaImage, x0: f64, y0: f64, x1: f64, y1: f64, color: Rgba<u8>) {
    let (cx, cy) = ((x0 + x1) / 2.0, (y0 + y1) / 2.0);
    let (rx, ry) = ((x1 - x0).abs() / 2.0, (y1 - y0).abs() / 2.0);
    if rx <= 0.0 || ry <= 0.0 {
        return;
    }
    let (Some((min_x, max_x)), Some((min_y, max_y))) =
        (span(x0, x1, img.width()), span(y0, y1, img.height()))
    else {
        return;
    };
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dx = (f64::from(x) + 0.5 - cx) / rx;
            let dy = (f64::from(y) + 0.5 - cy) / ry;
            if dx * dx + dy * dy <= 1.0 {
                let dst = *img.get_pixel(x, y);
                img.put_pixel(x, y, blend_pixel(dst, color));
            }
        }
    }
}

fn draw_disc(img: &mut RgbaImage, cx: f64, cy: f64, radius: f64, color: Rgba<u8>) {
    let (Some((min_x, max_x)), Some((min_y, max_y))) = (
        span(cx - radius, cx + radius, img.width()),
        span(cy - radius, cy + radius, img.height()),
    ) else {
        return;
    };
    let r2 = radius * radius;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dx = f64::from(x) + 0.5 - cx;
            let dy = f64::from(y) + 0.5 - cy;
            if dx * dx + dy * dy <= r2 {
                let dst = *img.get_pixel(x, y);
                img.put_pixel(x, y, blend_pixel(dst, color));
            }
        }
    }
}

/// Thick line with round caps.
fn draw_segment(
    img: &mut RgbaImage,
    from: (f64, f64),
    to: (f64, f64),
    radius: f64,
    color: Rgba<u8>,
) {
    let (Some((min_x, max_x)), Some((min_y, max_y))) = (
        span(from.0.min(to.0) - radius, from.0.max(to.0) + radius, img.width()),
        span(from.1.min(to.1) - radius, from.1.max(to.1) + radius, img.height()),
    ) else {
        return;
    };
    let (vx, vy) = (to.0 - from.0, to.1 - from.1);
    let len2 = vx * vx + vy * vy;
    let r2 = radius * radius;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let (px, py) = (f64::from(x) + 0.5, f64::from(y) + 0.5);
            let t = if len2 > 0.0 {
                (((px - from.0) * vx + (py - from.1) * vy) / len2).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let (dx, dy) = (px - (from.0 + t * vx), py - (from.1 + t * vy));
            if dx * dx + dy * dy <= r2 {
                let dst = *img.get_pixel(x, y);
                img.put_pixel(x, y, blend_pixel(dst, color));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use live_canvas_kernel::raster::Rgba as Color;

    fn plan(width: u32, height: u32, scale: f64) -> RasterPlan {
        RasterPlan {
            scale,
            width,
            height,
        }
    }

    fn image(layers: Vec<VectorLayer>) -> VectorImage {
        VectorImage {
            bounds: Rect::new(100.0, 100.0, 50.0, 50.0),
            background: Color::WHITE,
            layers,
        }
    }

    #[test]
    fn test_rect_is_painted_relative_to_region_origin() {
        let img = image(vec![VectorLayer::Rect {
            bounds: Rect::new(100.0, 100.0, 10.0, 10.0),
            fill: Color::BLACK,
        }]);
        let pixels = paint(&img, plan(100, 100, 2.0));

        assert_eq!(pixels.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(pixels.get_pixel(19, 19).0, [0, 0, 0, 255]);
        assert_eq!(pixels.get_pixel(20, 20).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_ellipse_leaves_corners_untouched() {
        let img = image(vec![VectorLayer::Ellipse {
            bounds: Rect::new(100.0, 100.0, 50.0, 50.0),
            fill: Color::BLACK,
        }]);
        let pixels = paint(&img, plan(50, 50, 1.0));

        assert_eq!(pixels.get_pixel(25, 25).0, [0, 0, 0, 255]);
        assert_eq!(pixels.get_pixel(0, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_stroke_covers_its_path() {
        let img = image(vec![VectorLayer::Stroke {
            points: vec![(100.0, 125.0), (150.0, 125.0)],
            width: 4.0,
            color: Color::BLACK,
        }]);
        let pixels = paint(&img, plan(50, 50, 1.0));

        assert_eq!(pixels.get_pixel(25, 24).0, [0, 0, 0, 255]);
        assert_eq!(pixels.get_pixel(25, 5).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_translucent_fill_blends() {
        let img = image(vec![VectorLayer::Rect {
            bounds: Rect::new(100.0, 100.0, 50.0, 50.0),
            fill: Color([0, 0, 0, 128]),
        }]);
        let pixels = paint(&img, plan(10, 10, 0.2));
        let [r, g, b, a] = pixels.get_pixel(5, 5).0;
        assert!((120..=135).contains(&r) && r == g && g == b);
        assert_eq!(a, 255);
    }

    #[test]
    fn test_shapes_outside_region_are_clipped() {
        let img = image(vec![VectorLayer::Rect {
            bounds: Rect::new(0.0, 0.0, 10.0, 10.0),
            fill: Color::BLACK,
        }]);
        let pixels = paint(&img, plan(50, 50, 1.0));
        assert!(pixels.pixels().all(|p| p.0 == [255, 255, 255, 255]));
    }

    #[tokio::test]
    async fn test_rasterize_encodes_jpeg() {
        let rasterizer = ImageRasterizer::new(&RasterConfig::default());
        let bitmap = rasterizer
            .rasterize(image(Vec::new()), plan(64, 32, 1.0))
            .await
            .unwrap();

        assert_eq!((bitmap.width, bitmap.height), (64, 32));
        assert_eq!(bitmap.format, ImageFormat::Jpeg);
        assert_eq!(&bitmap.bytes[..2], &[0xff, 0xd8]);
    }

    #[tokio::test]
    async fn test_rasterize_refuses_oversized_plan() {
        let rasterizer = ImageRasterizer::new(&RasterConfig::default());
        let err = rasterizer
            .rasterize(image(Vec::new()), plan(512, 51_200_000, 512_000.0))
            .await
            .unwrap_err();
        assert!(matches!(err, RasterizeError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_rasterize_encodes_png() {
        let config = RasterConfig {
            format: ImageFormat::Png,
            ..RasterConfig::default()
        };
        let bitmap = ImageRasterizer::new(&config)
            .rasterize(image(Vec::new()), plan(8, 8, 1.0))
            .await
            .unwrap();

        assert_eq!(&bitmap.bytes[1..4], b"PNG");
    }
}
