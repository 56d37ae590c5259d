use thiserror::Error;

use crate::domain::types::{ConversionOptions, EngineOptions};
use crate::domain::vector::{Bitmap, Dimensions};

/// Per-component render failures. None of these escape
/// [`RenderPipeline::render`](super::RenderPipeline::render); a failed
/// component degrades to its source text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("conversion engine unavailable: {reason}")]
    EngineUnavailable { reason: String },
    #[error("conversion failed: {diagnostic}")]
    ConversionFailed { diagnostic: String },
    #[error("invalid raster geometry: {width}x{height}")]
    InvalidGeometry { width: f64, height: f64 },
    #[error("cached entry is corrupted: {reason}")]
    CacheCorrupted { reason: String },
}

impl RenderError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RenderError::EngineUnavailable { .. } => "engine_unavailable",
            RenderError::ConversionFailed { .. } => "conversion_failed",
            RenderError::InvalidGeometry { .. } => "invalid_geometry",
            RenderError::CacheCorrupted { .. } => "cache_corrupted",
        }
    }
}

/// What a conversion engine hands back for one equation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    /// Raw vector markup.
    pub markup: String,
    /// Error text the engine embedded in otherwise successful output.
    pub diagnostic: Option<String>,
}

impl EngineOutput {
    pub fn markup(markup: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
            diagnostic: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine could not be reached at all.
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    /// The engine ran and refused the input.
    #[error("engine rejected input: {0}")]
    Rejected(String),
}

/// TeX to vector markup. Implementations need not be safe for concurrent
/// calls: the conversion gateway serializes access.
pub trait ConversionEngine: Send + Sync {
    fn convert(
        &self,
        text: &str,
        conversion: &ConversionOptions,
        engine: &EngineOptions,
    ) -> Result<EngineOutput, EngineError>;
}

/// Vector markup to pixels. `size` is in points; the output should be about
/// `size * scale` pixels. Unusable input yields a degenerate bitmap rather
/// than an error.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, markup: &str, size: Dimensions, scale: f64) -> Bitmap;
}

/// Inputs shared by every component of a render call.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderParams {
    /// Height of a lowercase `x` in the surrounding font, in points.
    pub x_height: f64,
    /// Pixels per point on the target display.
    pub display_scale: f64,
    pub engine: EngineOptions,
}

impl RenderParams {
    pub fn new(x_height: f64, display_scale: f64) -> Self {
        Self {
            x_height,
            display_scale,
            engine: EngineOptions::default(),
        }
    }

    pub fn with_engine_options(mut self, engine: EngineOptions) -> Self {
        self.engine = engine;
        self
    }
}

/// What the pipeline does when its own failures trigger a cache purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Return the batch as computed; the caller re-invokes later.
    #[default]
    Never,
    /// Re-attempt the failed components once, right after the purge.
    OncePostPurge,
}
