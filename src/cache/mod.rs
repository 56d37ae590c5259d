//! Calamo render cache
//!
//! Two independent tiers share one store:
//!
//! - **Vector tier**: encoded vector documents keyed by equation text and
//!   conversion/engine options
//! - **Bitmap tier**: rasterized bitmaps keyed by document content, x-height
//!   and display scale
//!
//! The [`FailureTracker`] purges both tiers when consecutive render batches
//! keep failing.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! vector_limit = 1024
//! bitmap_limit = 512
//! failure_threshold = 3
//! ```

mod config;
mod keys;
pub(crate) mod lock;
mod store;
mod tracker;

pub use config::CacheConfig;
pub use keys::{CacheKey, CacheTier};
pub use store::{CacheStore, CacheStoreError};
pub use tracker::FailureTracker;

pub(crate) use config::{DEFAULT_BITMAP_LIMIT, DEFAULT_FAILURE_THRESHOLD, DEFAULT_VECTOR_LIMIT};
pub(crate) use store::{METRIC_CACHE_EVICT, METRIC_CACHE_HIT, METRIC_CACHE_MISS, METRIC_CACHE_PURGE};
