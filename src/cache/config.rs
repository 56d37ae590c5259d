//! Cache configuration.
//!
//! Bounds both tiers and sets the failure threshold that triggers a purge.

use std::num::NonZeroUsize;

use serde::Deserialize;

pub(crate) const DEFAULT_VECTOR_LIMIT: usize = 1024;
pub(crate) const DEFAULT_BITMAP_LIMIT: usize = 512;
pub(crate) const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries in the vector-document tier.
    pub vector_limit: usize,
    /// Maximum entries in the bitmap tier.
    pub bitmap_limit: usize,
    /// Consecutive failing batches that trigger a full purge.
    pub failure_threshold: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            vector_limit: DEFAULT_VECTOR_LIMIT,
            bitmap_limit: DEFAULT_BITMAP_LIMIT,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            vector_limit: settings.vector_limit.get(),
            bitmap_limit: settings.bitmap_limit.get(),
            failure_threshold: settings.failure_threshold.get(),
        }
    }
}

impl CacheConfig {
    /// Returns the vector limit as NonZeroUsize, clamping to 1 if zero.
    pub fn vector_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.vector_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the bitmap limit as NonZeroUsize, clamping to 1 if zero.
    pub fn bitmap_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.bitmap_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Failure threshold, never below one.
    pub fn failure_threshold_clamped(&self) -> u32 {
        self.failure_threshold.max(1)
    }
}
