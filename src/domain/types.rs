//! Document components and the options that drive their conversion.

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};

use super::vector::{Bitmap, VectorDocument};

/// How an equation sits in the surrounding text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MathStyle {
    /// Flows with the text line (`$…$`, `\(…\)`).
    Inline,
    /// Stands on its own line (`$$…$$`, `\[…\]`, display environments).
    Display,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Text,
    Equation(MathStyle),
}

impl ComponentKind {
    pub fn is_equation(self) -> bool {
        matches!(self, ComponentKind::Equation(_))
    }
}

/// A run of text or a single equation inside a [`Block`].
///
/// Components are values: rendering never mutates a component, it returns a
/// new one carrying the vector document and bitmap alongside the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub text: String,
    pub kind: ComponentKind,
    pub vector: Option<Arc<VectorDocument>>,
    pub image: Option<Bitmap>,
}

impl Component {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: ComponentKind::Text,
            vector: None,
            image: None,
        }
    }

    pub fn equation(text: impl Into<String>, style: MathStyle) -> Self {
        Self {
            text: text.into(),
            kind: ComponentKind::Equation(style),
            vector: None,
            image: None,
        }
    }

    pub fn is_equation(&self) -> bool {
        self.kind.is_equation()
    }

    pub fn is_rendered(&self) -> bool {
        self.vector.is_some() && self.image.is_some()
    }

    /// Conversion options for equation components; `None` for text.
    pub fn conversion_options(&self) -> Option<ConversionOptions> {
        match self.kind {
            ComponentKind::Text => None,
            ComponentKind::Equation(style) => Some(ConversionOptions {
                display: style == MathStyle::Display,
            }),
        }
    }

    /// Returns a rendered copy of this component.
    pub fn rendered(&self, vector: Arc<VectorDocument>, image: Bitmap) -> Self {
        Self {
            text: self.text.clone(),
            kind: self.kind,
            vector: Some(vector),
            image: Some(image),
        }
    }
}

/// Ordered sequence of components; the order reconstructs the source document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    components: Vec<Component>,
}

impl Block {
    pub fn new(components: Vec<Component>) -> Self {
        Self { components }
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn into_components(self) -> Vec<Component> {
        self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn equations(&self) -> impl Iterator<Item = &Component> {
        self.components.iter().filter(|component| component.is_equation())
    }

    /// True when the block holds exactly one display equation.
    pub fn is_display_equation(&self) -> bool {
        matches!(
            self.components.as_slice(),
            [Component {
                kind: ComponentKind::Equation(MathStyle::Display),
                ..
            }]
        )
    }
}

impl FromIterator<Component> for Block {
    fn from_iter<I: IntoIterator<Item = Component>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// How the raw input is split into components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParseMode {
    /// Extract delimited math spans from surrounding text.
    #[default]
    Spans,
    /// Treat the whole input as one display equation.
    AllText,
}

/// Exact inputs of a parse; doubles as the memo key for parse reuse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParseInputs {
    pub raw_text: String,
    pub unescape_entities: bool,
    pub mode: ParseMode,
}

impl ParseInputs {
    pub fn new(raw_text: impl Into<String>, mode: ParseMode) -> Self {
        Self {
            raw_text: raw_text.into(),
            unescape_entities: false,
            mode,
        }
    }

    pub fn with_unescape_entities(mut self, unescape: bool) -> Self {
        self.unescape_entities = unescape;
        self
    }
}

/// Per-equation options handed to the conversion engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversionOptions {
    pub display: bool,
}

/// Glyph reuse strategy requested from the conversion engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FontCache {
    None,
    #[default]
    Local,
    Global,
}

impl FontCache {
    pub fn as_str(self) -> &'static str {
        match self {
            FontCache::None => "none",
            FontCache::Local => "local",
            FontCache::Global => "global",
        }
    }
}

/// Engine-wide options shared by every equation in a render call.
///
/// Macros live in a `BTreeMap` so the serialized form, and therefore every
/// cache key derived from it, is independent of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub packages: Vec<String>,
    pub macros: BTreeMap<String, String>,
    pub font_cache: FontCache,
}

impl EngineOptions {
    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.packages.push(package.into());
        self
    }

    pub fn with_macro(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.macros.insert(name.into(), body.into());
        self
    }
}
