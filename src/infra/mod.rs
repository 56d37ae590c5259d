//! Infrastructure adapters and runtime bootstrap.

pub mod engine;
pub mod error;
pub mod export;
pub mod raster;
pub mod telemetry;
