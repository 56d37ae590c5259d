//! Equation rendering.
//!
//! The pipeline is pure with respect to its inputs: it takes parsed blocks and
//! returns new blocks with vector documents and bitmaps attached. Shared state
//! lives in the [`CacheStore`](crate::cache::CacheStore) and
//! [`FailureTracker`](crate::cache::FailureTracker) handed to its constructor.

mod conversion;
mod pipeline;
mod raster;
mod types;

pub use conversion::ConversionGateway;
pub use pipeline::RenderPipeline;
pub use raster::{RasterGateway, clamp_display_scale};
pub use types::{
    ConversionEngine, EngineError, EngineOutput, Rasterizer, RenderError, RenderParams,
    RetryPolicy,
};

pub(crate) use conversion::METRIC_ENGINE_CALL_MS;
pub(crate) use pipeline::{METRIC_BATCH_MS, METRIC_COMPONENT_FAILURE};
