//! Serializable summaries of parsed and rendered blocks, as printed by the CLI.

use serde::Serialize;

use crate::domain::types::{Block, Component, ComponentKind, MathStyle};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderReport {
    pub blocks: usize,
    pub equations: usize,
    pub rendered: usize,
    pub failed: usize,
    pub components: Vec<ComponentReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentReport {
    pub block: usize,
    pub kind: &'static str,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitmap: Option<BitmapReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BitmapReport {
    pub width: u32,
    pub height: u32,
    pub bytes: usize,
    /// Baseline offset in points, for aligning with surrounding text.
    pub baseline_offset: f64,
}

impl RenderReport {
    /// Summarize `blocks`; `x_height` resolves the baseline offset.
    pub fn from_blocks(blocks: &[Block], x_height: f64) -> Self {
        let mut report = Self {
            blocks: blocks.len(),
            equations: 0,
            rendered: 0,
            failed: 0,
            components: Vec::new(),
        };

        for (index, block) in blocks.iter().enumerate() {
            for component in block.components() {
                if component.is_equation() {
                    report.equations += 1;
                    if component.is_rendered() {
                        report.rendered += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                report
                    .components
                    .push(ComponentReport::new(index, component, x_height));
            }
        }
        report
    }
}

impl ComponentReport {
    fn new(block: usize, component: &Component, x_height: f64) -> Self {
        let bitmap = match (&component.vector, &component.image) {
            (Some(vector), Some(image)) => Some(BitmapReport {
                width: image.width(),
                height: image.height(),
                bytes: image.byte_len(),
                baseline_offset: vector.vertical_offset(x_height),
            }),
            _ => None,
        };
        Self {
            block,
            kind: kind_label(component.kind),
            text: component.text.clone(),
            bitmap,
        }
    }
}

fn kind_label(kind: ComponentKind) -> &'static str {
    match kind {
        ComponentKind::Text => "text",
        ComponentKind::Equation(MathStyle::Inline) => "inline",
        ComponentKind::Equation(MathStyle::Display) => "display",
    }
}
