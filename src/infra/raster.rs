use std::time::Instant;

use resvg::{tiny_skia, usvg};
use tracing::debug;

use crate::application::render::Rasterizer;
use crate::domain::vector::{Bitmap, Dimensions};

/// Per-axis pixel ceiling; anything larger is clamped.
pub const MAX_PIXEL_EXTENT: u32 = 8192;

/// SVG rasterizer built on `resvg`. Stretches the document's own size onto
/// the requested one, so `ex`-sized markup renders at the caller's x-height.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResvgRasterizer;

impl ResvgRasterizer {
    pub fn new() -> Self {
        Self
    }
}

impl Rasterizer for ResvgRasterizer {
    fn rasterize(&self, markup: &str, size: Dimensions, scale: f64) -> Bitmap {
        let started_at = Instant::now();
        let width = pixel_extent(size.width * scale);
        let height = pixel_extent(size.height * scale);
        if width == 0 || height == 0 {
            return Bitmap::empty(scale);
        }

        let tree = match usvg::Tree::from_str(markup, &usvg::Options::default()) {
            Ok(tree) => tree,
            Err(err) => {
                debug!(
                    target = "infra::raster",
                    op = "raster::rasterize",
                    result = "parse_error",
                    error = %err,
                    "SVG could not be parsed for rasterization"
                );
                return Bitmap::empty(scale);
            }
        };

        let source = tree.size();
        if source.width() <= 0.0 || source.height() <= 0.0 {
            return Bitmap::empty(scale);
        }
        let Some(mut pixmap) = tiny_skia::Pixmap::new(width, height) else {
            return Bitmap::empty(scale);
        };

        let transform = tiny_skia::Transform::from_scale(
            width as f32 / source.width(),
            height as f32 / source.height(),
        );
        resvg::render(&tree, transform, &mut pixmap.as_mut());

        debug!(
            target = "infra::raster",
            op = "raster::rasterize",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            width,
            height,
            "SVG rasterized"
        );
        Bitmap::new(width, height, scale, pixmap.data().to_vec())
    }
}

fn pixel_extent(value: f64) -> u32 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    value.round().min(f64::from(MAX_PIXEL_EXTENT)) as u32
}
