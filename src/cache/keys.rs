//! Content-addressed cache keys.
//!
//! A key is `hex(SHA-256(canonical JSON of the derivation inputs))` followed by
//! the tier tag. Callers treat keys as opaque.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::domain::types::{ConversionOptions, EngineOptions};
use crate::domain::vector::VectorDocument;

/// Bumped whenever the canonical encoding changes shape.
const KEY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    /// Encoded vector documents.
    Vector,
    /// Rasterized bitmaps.
    Bitmap,
}

impl CacheTier {
    pub fn tag(self) -> &'static str {
        match self {
            CacheTier::Vector => "vector",
            CacheTier::Bitmap => "bitmap",
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    tier: CacheTier,
    value: String,
}

#[derive(Serialize)]
struct VectorKeyFields<'a> {
    version: u32,
    text: &'a str,
    conversion: &'a ConversionOptions,
    engine: &'a EngineOptions,
}

#[derive(Serialize)]
struct BitmapKeyFields<'a> {
    version: u32,
    markup: &'a str,
    // Bit patterns keep the encoding exact; JSON would fold NaN and the
    // infinities into `null`.
    x_height_bits: u64,
    display_scale_bits: u64,
}

impl CacheKey {
    /// Key for the vector tier: one equation under one set of options.
    pub fn vector(text: &str, conversion: &ConversionOptions, engine: &EngineOptions) -> Self {
        let fields = VectorKeyFields {
            version: KEY_SCHEMA_VERSION,
            text,
            conversion,
            engine,
        };
        Self::derive(CacheTier::Vector, &fields, text)
    }

    /// Key for the bitmap tier: one document at one x-height and scale.
    pub fn bitmap(document: &VectorDocument, x_height: f64, display_scale: f64) -> Self {
        let fields = BitmapKeyFields {
            version: KEY_SCHEMA_VERSION,
            markup: document.markup(),
            x_height_bits: x_height.to_bits(),
            display_scale_bits: display_scale.to_bits(),
        };
        Self::derive(CacheTier::Bitmap, &fields, document.markup())
    }

    fn derive<T: Serialize>(tier: CacheTier, fields: &T, fallback: &str) -> Self {
        let value = match serde_json::to_vec(fields) {
            Ok(encoded) => format!("{}-{}", hash_hex(&encoded), tier.tag()),
            Err(err) => {
                warn!(
                    target = "cache::keys",
                    tier = tier.tag(),
                    error = %err,
                    "Canonical key encoding failed; falling back to raw content"
                );
                format!("raw-{}-{}", hash_hex(fallback.as_bytes()), tier.tag())
            }
        };
        Self { tier, value }
    }

    pub fn tier(&self) -> CacheTier {
        self.tier
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

fn hash_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
