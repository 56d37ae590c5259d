//! Application services: parsing with reuse, the render pipeline and reports.

pub mod error;
pub mod parse;
pub mod render;
pub mod report;
