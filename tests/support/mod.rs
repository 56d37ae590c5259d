#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use calamo::application::render::{
    ConversionEngine, EngineError, EngineOutput, Rasterizer, RenderParams, RenderPipeline,
    RetryPolicy,
};
use calamo::cache::{CacheStore, FailureTracker};
use calamo::domain::markup::{DelimiterParser, MarkupParser};
use calamo::domain::types::{Block, ConversionOptions, EngineOptions, ParseMode};
use calamo::domain::vector::{Bitmap, Dimensions};

/// Equations containing this marker are rejected by [`FakeEngine`].
pub const FAIL_MARKER: &str = "\\fail";

/// Deterministic engine: width in ex follows the text length, inline
/// equations are one ex tall and display equations two.
#[derive(Default)]
pub struct FakeEngine {
    calls: AtomicUsize,
    offline: AtomicBool,
    fail_next: AtomicUsize,
    texts: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().expect("texts lock").clone()
    }

    /// Make every call fail with `EngineError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make the next `count` calls fail with `EngineError::Unavailable`.
    pub fn fail_next_calls(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }
}

impl ConversionEngine for FakeEngine {
    fn convert(
        &self,
        text: &str,
        conversion: &ConversionOptions,
        _engine: &EngineOptions,
    ) -> Result<EngineOutput, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().expect("texts lock").push(text.to_string());
        let transient = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if transient || self.offline.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable("engine offline".to_string()));
        }
        if text.contains(FAIL_MARKER) {
            return Err(EngineError::Rejected(format!("Undefined control sequence in `{text}`")));
        }
        let height = if conversion.display { 2 } else { 1 };
        Ok(EngineOutput::markup(svg_for(text, height)))
    }
}

pub fn svg_for(text: &str, height_ex: u32) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{}ex" height="{height_ex}ex" style="vertical-align: -0.25ex" data-source="{}"/>"#,
        text.chars().count().max(1),
        text.len()
    )
}

/// Solid bitmaps of exactly `round(size * scale)` pixels.
#[derive(Default)]
pub struct FakeRasterizer {
    calls: AtomicUsize,
}

impl FakeRasterizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Rasterizer for FakeRasterizer {
    fn rasterize(&self, _markup: &str, size: Dimensions, scale: f64) -> Bitmap {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let width = (size.width * scale).round() as u32;
        let height = (size.height * scale).round() as u32;
        Bitmap::new(width, height, scale, vec![255; (width * height * 4) as usize])
    }
}

/// Delegates to [`DelimiterParser`] and counts calls.
#[derive(Default)]
pub struct CountingParser {
    calls: AtomicUsize,
}

impl CountingParser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MarkupParser for CountingParser {
    fn parse(&self, raw_text: &str, mode: ParseMode) -> Vec<Block> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        DelimiterParser.parse(raw_text, mode)
    }
}

pub struct Harness {
    pub store: Arc<CacheStore>,
    pub tracker: Arc<FailureTracker>,
    pub engine: Arc<FakeEngine>,
    pub rasterizer: Arc<FakeRasterizer>,
    pub pipeline: RenderPipeline,
}

impl Harness {
    pub fn new(threshold: u32) -> Self {
        let store = Arc::new(CacheStore::default());
        let tracker = Arc::new(FailureTracker::new(Arc::clone(&store), threshold));
        let engine = FakeEngine::new();
        let rasterizer = FakeRasterizer::new();
        let pipeline = RenderPipeline::new(
            Arc::clone(&store),
            Arc::clone(&tracker),
            engine.clone(),
            rasterizer.clone(),
        );
        Self {
            store,
            tracker,
            engine,
            rasterizer,
            pipeline,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.pipeline = self.pipeline.with_retry_policy(retry);
        self
    }
}

pub fn params() -> RenderParams {
    RenderParams::new(8.0, 2.0)
}

pub fn parse(text: &str) -> Vec<Block> {
    DelimiterParser.parse(text, ParseMode::Spans)
}
