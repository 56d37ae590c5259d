//! Block rendering through the two cache tiers.
//!
//! For each equation component the pipeline resolves a vector document
//! (vector tier, else the conversion engine) and then a bitmap (bitmap tier,
//! else the rasterizer). A failing component keeps its source text and the
//! rest of the batch carries on; the batch outcome feeds the failure tracker.

use std::{sync::Arc, time::Instant};

use metrics::{counter, histogram};
use tracing::{error, info, warn};

use crate::cache::{CacheKey, CacheStore, FailureTracker};
use crate::domain::types::{Block, Component, ConversionOptions, EngineOptions};
use crate::domain::vector::{Bitmap, VectorDocument};

use super::conversion::ConversionGateway;
use super::raster::{RasterGateway, clamp_display_scale};
use super::types::{ConversionEngine, Rasterizer, RenderError, RenderParams, RetryPolicy};

pub(crate) const METRIC_COMPONENT_FAILURE: &str = "calamo_render_component_failure_total";
pub(crate) const METRIC_BATCH_MS: &str = "calamo_render_batch_ms";

pub struct RenderPipeline {
    store: Arc<CacheStore>,
    tracker: Arc<FailureTracker>,
    conversion: ConversionGateway,
    raster: RasterGateway,
    retry: RetryPolicy,
}

impl RenderPipeline {
    pub fn new(
        store: Arc<CacheStore>,
        tracker: Arc<FailureTracker>,
        engine: Arc<dyn ConversionEngine>,
        rasterizer: Arc<dyn Rasterizer>,
    ) -> Self {
        Self {
            store,
            tracker,
            conversion: ConversionGateway::new(engine),
            raster: RasterGateway::new(rasterizer),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<FailureTracker> {
        &self.tracker
    }

    /// Render every equation in `blocks`. Never fails: components that cannot
    /// be rendered come back unchanged, in their original position.
    pub fn render(&self, blocks: &[Block], params: &RenderParams) -> Vec<Block> {
        let started_at = Instant::now();
        let mut rendered: Vec<Vec<Component>> = Vec::with_capacity(blocks.len());
        let mut failed: Vec<(usize, usize)> = Vec::new();

        for (block_index, block) in blocks.iter().enumerate() {
            let mut components = Vec::with_capacity(block.len());
            for (component_index, component) in block.components().iter().enumerate() {
                match self.render_component(component, params) {
                    Ok(done) => components.push(done),
                    Err(err) => {
                        report_component_failure(component, &err);
                        failed.push((block_index, component_index));
                        components.push(component.clone());
                    }
                }
            }
            rendered.push(components);
        }

        let first_failures = failed.len();
        if failed.is_empty() {
            self.tracker.record_success();
        } else if self.tracker.record_failure() && self.retry == RetryPolicy::OncePostPurge {
            info!(
                target = "application::render::pipeline",
                op = "pipeline::retry",
                components = failed.len(),
                "Retrying failed components after cache purge"
            );
            failed.retain(|&(block_index, component_index)| {
                let original = &blocks[block_index].components()[component_index];
                match self.render_component(original, params) {
                    Ok(done) => {
                        rendered[block_index][component_index] = done;
                        false
                    }
                    Err(err) => {
                        report_component_failure(original, &err);
                        true
                    }
                }
            });
        }

        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_BATCH_MS).record(elapsed_ms);
        info!(
            target = "application::render::pipeline",
            op = "pipeline::render",
            result = if failed.is_empty() { "ok" } else { "partial" },
            elapsed_ms = elapsed_ms as u64,
            blocks = blocks.len(),
            failed = first_failures,
            still_failed = failed.len(),
            "Render batch finished"
        );

        rendered.into_iter().map(Block::new).collect()
    }

    /// Render a single component. Text components are returned as they are.
    pub fn render_component(
        &self,
        component: &Component,
        params: &RenderParams,
    ) -> Result<Component, RenderError> {
        let Some(conversion) = component.conversion_options() else {
            return Ok(component.clone());
        };

        let document = self.resolve_vector(&component.text, &conversion, &params.engine)?;
        let bitmap = self.resolve_bitmap(&document, params)?;
        Ok(component.rendered(document, bitmap))
    }

    /// True when every equation in `blocks` would be served from the cache
    /// under `params`. Does not touch recency or hit/miss accounting.
    pub fn blocks_exist_in_cache(&self, blocks: &[Block], params: &RenderParams) -> bool {
        let scale = clamp_display_scale(params.display_scale);
        blocks
            .iter()
            .flat_map(|block| block.equations())
            .all(|component| {
                let Some(conversion) = component.conversion_options() else {
                    return true;
                };
                let key = CacheKey::vector(&component.text, &conversion, &params.engine);
                let Some(bytes) = self.store.peek_vector(&key) else {
                    return false;
                };
                match VectorDocument::parse(&bytes) {
                    Ok(document) => self
                        .store
                        .contains_bitmap(&CacheKey::bitmap(&document, params.x_height, scale)),
                    Err(_) => false,
                }
            })
    }

    /// [`render`](Self::render) on the blocking thread pool. If the task
    /// cannot be joined the input comes back unrendered.
    pub async fn render_in_background(
        self: Arc<Self>,
        blocks: Vec<Block>,
        params: RenderParams,
    ) -> Vec<Block> {
        let fallback = blocks.clone();
        let task = tokio::task::spawn_blocking(move || self.render(&blocks, &params));
        match task.await {
            Ok(rendered) => rendered,
            Err(err) => {
                error!(
                    target = "application::render::pipeline",
                    op = "pipeline::render_in_background",
                    result = "error",
                    error = %err,
                    "Background render task failed"
                );
                fallback
            }
        }
    }

    fn resolve_vector(
        &self,
        text: &str,
        conversion: &ConversionOptions,
        engine: &EngineOptions,
    ) -> Result<Arc<VectorDocument>, RenderError> {
        let key = CacheKey::vector(text, conversion, engine);
        if let Some(bytes) = self.store.get_vector(&key) {
            match VectorDocument::parse(&bytes) {
                Ok(document) => return Ok(Arc::new(document)),
                Err(err) => {
                    self.store.evict_vector(&key);
                    let corrupted = RenderError::CacheCorrupted {
                        reason: err.to_string(),
                    };
                    warn!(
                        target = "application::render::pipeline",
                        op = "pipeline::resolve_vector",
                        result = "evicted",
                        key = %key,
                        error = %corrupted,
                        "Dropped undecodable vector cache entry"
                    );
                }
            }
        }

        let document = self.conversion.convert(text, conversion, engine)?;
        if let Err(err) = self.store.put_vector(key, document.to_bytes()) {
            warn!(
                target = "application::render::pipeline",
                op = "pipeline::resolve_vector",
                error = %err,
                "Failed to cache vector document"
            );
        }
        Ok(Arc::new(document))
    }

    fn resolve_bitmap(
        &self,
        document: &VectorDocument,
        params: &RenderParams,
    ) -> Result<Bitmap, RenderError> {
        let scale = clamp_display_scale(params.display_scale);
        let key = CacheKey::bitmap(document, params.x_height, scale);
        if let Some(bitmap) = self.store.get_bitmap(&key) {
            if !bitmap.is_degenerate() {
                return Ok(bitmap);
            }
            self.store.evict_bitmap(&key);
            warn!(
                target = "application::render::pipeline",
                op = "pipeline::resolve_bitmap",
                result = "evicted",
                key = %key,
                "Dropped degenerate bitmap cache entry"
            );
        }

        let bitmap = self.raster.rasterize(document, params.x_height, scale)?;
        if let Err(err) = self.store.put_bitmap(key, bitmap.clone()) {
            warn!(
                target = "application::render::pipeline",
                op = "pipeline::resolve_bitmap",
                error = %err,
                "Failed to cache bitmap"
            );
        }
        Ok(bitmap)
    }
}

fn report_component_failure(component: &Component, err: &RenderError) {
    counter!(METRIC_COMPONENT_FAILURE, "kind" => err.kind()).increment(1);
    warn!(
        target = "application::render::pipeline",
        op = "pipeline::render_component",
        result = "error",
        kind = err.kind(),
        source_len = component.text.len(),
        error = %err,
        "Equation left unrendered"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;

    use super::*;
    use crate::application::render::types::{EngineError, EngineOutput};
    use crate::domain::types::MathStyle;
    use crate::domain::vector::Dimensions;

    struct CountingEngine {
        calls: AtomicUsize,
    }

    impl ConversionEngine for CountingEngine {
        fn convert(
            &self,
            text: &str,
            _conversion: &ConversionOptions,
            _engine: &EngineOptions,
        ) -> Result<EngineOutput, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.contains("\\bad") {
                return Err(EngineError::Rejected(format!("cannot parse {text}")));
            }
            Ok(EngineOutput::markup(format!(
                r#"<svg xmlns="http://www.w3.org/2000/svg" width="{}ex" height="1ex"/>"#,
                text.len()
            )))
        }
    }

    struct SolidRasterizer;

    impl Rasterizer for SolidRasterizer {
        fn rasterize(&self, _markup: &str, size: Dimensions, scale: f64) -> Bitmap {
            let width = (size.width * scale).round() as u32;
            let height = (size.height * scale).round() as u32;
            Bitmap::new(width, height, scale, vec![255; (width * height * 4) as usize])
        }
    }

    fn pipeline() -> (RenderPipeline, Arc<CountingEngine>) {
        let store = Arc::new(CacheStore::default());
        let tracker = Arc::new(FailureTracker::new(Arc::clone(&store), 3));
        let engine = Arc::new(CountingEngine {
            calls: AtomicUsize::new(0),
        });
        let pipeline = RenderPipeline::new(store, tracker, engine.clone(), Arc::new(SolidRasterizer));
        (pipeline, engine)
    }

    fn params() -> RenderParams {
        RenderParams::new(8.0, 2.0)
    }

    #[test]
    fn text_components_pass_through() {
        let (pipeline, engine) = pipeline();
        let component = Component::text("plain words");
        let done = pipeline
            .render_component(&component, &params())
            .expect("text never fails");
        assert_eq!(done, component);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failure_keeps_the_original_component_in_place() {
        let (pipeline, _) = pipeline();
        let blocks = vec![Block::new(vec![
            Component::text("a "),
            Component::equation("\\bad", MathStyle::Inline),
            Component::equation("x^2", MathStyle::Inline),
        ])];

        let out = pipeline.render(&blocks, &params());
        let components = out[0].components();
        assert_eq!(components[0], blocks[0].components()[0]);
        assert_eq!(components[1], blocks[0].components()[1]);
        assert!(components[2].is_rendered());
        assert_eq!(pipeline.tracker().current_count(), 1);
    }

    #[test]
    fn corrupted_vector_entry_is_evicted_and_reconverted() {
        let (pipeline, engine) = pipeline();
        let key = CacheKey::vector(
            "y",
            &ConversionOptions { display: false },
            &EngineOptions::default(),
        );
        pipeline
            .store()
            .put_vector(key.clone(), Bytes::from_static(b"\xff\xfe"))
            .expect("vector key");

        let done = pipeline
            .render_component(&Component::equation("y", MathStyle::Inline), &params())
            .expect("self-heals");

        assert!(done.is_rendered());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        let healed = pipeline.store().peek_vector(&key).expect("re-stored");
        assert!(VectorDocument::parse(&healed).is_ok());
    }

    #[test]
    fn degenerate_cached_bitmap_is_replaced() {
        let (pipeline, _) = pipeline();
        let component = Component::equation("z", MathStyle::Inline);
        let first = pipeline
            .render_component(&component, &params())
            .expect("rendered");
        let document = first.vector.expect("vector attached");
        let key = CacheKey::bitmap(&document, 8.0, 2.0);
        pipeline
            .store()
            .put_bitmap(key.clone(), Bitmap::empty(2.0))
            .expect("bitmap key");

        let again = pipeline
            .render_component(&component, &params())
            .expect("rendered again");
        assert!(!again.image.expect("image attached").is_degenerate());
        assert!(!pipeline.store().get_bitmap(&key).expect("cached").is_degenerate());
    }

    #[test]
    fn sub_unit_scale_shares_the_unit_scale_entry() {
        let (pipeline, engine) = pipeline();
        let blocks = vec![Block::new(vec![Component::equation("w", MathStyle::Display)])];

        pipeline.render(&blocks, &RenderParams::new(8.0, 0.5));
        assert!(pipeline.blocks_exist_in_cache(&blocks, &RenderParams::new(8.0, 1.0)));
        assert!(!pipeline.blocks_exist_in_cache(&blocks, &RenderParams::new(8.0, 3.0)));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }
}
