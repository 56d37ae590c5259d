//! Domain layer: document components, render inputs and the artifacts produced from them.

pub mod error;
pub mod markup;
pub mod types;
pub mod vector;
