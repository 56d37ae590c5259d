//! calamo: TeX spans in plain text rendered to SVG and bitmaps through a
//! two-tier content-addressed cache.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
