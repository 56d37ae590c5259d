use std::{sync::Arc, time::Instant};

use tracing::{debug, warn};

use crate::domain::vector::{Bitmap, Dimensions, VectorDocument};

use super::types::{Rasterizer, RenderError};

/// Scale below one (or not a number) renders at one pixel per point.
pub fn clamp_display_scale(scale: f64) -> f64 {
    if scale.is_finite() { scale.max(1.0) } else { 1.0 }
}

/// Geometry checks and the one-shot fallback around a [`Rasterizer`].
pub struct RasterGateway {
    rasterizer: Arc<dyn Rasterizer>,
}

impl RasterGateway {
    pub fn new(rasterizer: Arc<dyn Rasterizer>) -> Self {
        Self { rasterizer }
    }

    pub fn rasterize(
        &self,
        document: &VectorDocument,
        x_height: f64,
        display_scale: f64,
    ) -> Result<Bitmap, RenderError> {
        let started_at = Instant::now();
        let scale = clamp_display_scale(display_scale);
        let size = document.size(x_height);
        if !size.is_positive() {
            return Err(invalid_geometry(size));
        }

        let bitmap = self.rasterizer.rasterize(document.markup(), size, scale);
        if !bitmap.is_degenerate() {
            debug!(
                target = "application::render::raster",
                op = "raster::rasterize",
                result = "ok",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                width = bitmap.width(),
                height = bitmap.height(),
                "Equation rasterized"
            );
            return Ok(bitmap);
        }

        // Sub-pixel equations (a lone `.` or `\,`) round to nothing.
        let fallback = size.clamped_min(1.0);
        warn!(
            target = "application::render::raster",
            op = "raster::rasterize",
            result = "retry",
            width = size.width,
            height = size.height,
            scale,
            "Rasterizer produced an empty bitmap; retrying at minimum size"
        );
        let bitmap = self.rasterizer.rasterize(document.markup(), fallback, scale);
        if bitmap.is_degenerate() {
            return Err(invalid_geometry(size));
        }
        Ok(bitmap)
    }
}

fn invalid_geometry(size: Dimensions) -> RenderError {
    RenderError::InvalidGeometry {
        width: size.width,
        height: size.height,
    }
}
