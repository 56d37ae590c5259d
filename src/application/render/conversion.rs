use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use metrics::histogram;
use tracing::{debug, warn};

use crate::cache::lock::mutex_lock;
use crate::domain::types::{ConversionOptions, EngineOptions};
use crate::domain::vector::VectorDocument;

use super::types::{ConversionEngine, EngineError, RenderError};

const SOURCE: &str = "application::render::conversion";
pub(crate) const METRIC_ENGINE_CALL_MS: &str = "calamo_engine_call_ms";

/// Single-flight access to the conversion engine.
///
/// The engine mutex is the only lock held across the engine call; callers
/// must not hold any cache lock when they get here.
pub struct ConversionGateway {
    engine: Arc<dyn ConversionEngine>,
    in_flight: Mutex<()>,
}

impl ConversionGateway {
    pub fn new(engine: Arc<dyn ConversionEngine>) -> Self {
        Self {
            engine,
            in_flight: Mutex::new(()),
        }
    }

    pub fn convert(
        &self,
        text: &str,
        conversion: &ConversionOptions,
        engine_options: &EngineOptions,
    ) -> Result<VectorDocument, RenderError> {
        let queued_at = Instant::now();
        let (result, call_ms) = {
            let _turn = mutex_lock(&self.in_flight, SOURCE, "convert");
            let started_at = Instant::now();
            let result = self.engine.convert(text, conversion, engine_options);
            (result, started_at.elapsed().as_secs_f64() * 1000.0)
        };
        histogram!(METRIC_ENGINE_CALL_MS).record(call_ms);

        let output = result.map_err(|err| {
            warn!(
                target = "application::render::conversion",
                op = "conversion::convert",
                result = "error",
                elapsed_ms = queued_at.elapsed().as_millis() as u64,
                error = %err,
                "Conversion engine call failed"
            );
            match err {
                EngineError::Unavailable(reason) => RenderError::EngineUnavailable { reason },
                EngineError::Rejected(diagnostic) => RenderError::ConversionFailed { diagnostic },
            }
        })?;

        if let Some(diagnostic) = output.diagnostic {
            warn!(
                target = "application::render::conversion",
                op = "conversion::convert",
                result = "diagnostic",
                diagnostic = %diagnostic,
                "Conversion engine reported an error for the input"
            );
            return Err(RenderError::ConversionFailed { diagnostic });
        }

        let document = VectorDocument::from_markup(output.markup).map_err(|err| {
            RenderError::ConversionFailed {
                diagnostic: format!("engine returned unusable markup: {err}"),
            }
        })?;

        debug!(
            target = "application::render::conversion",
            op = "conversion::convert",
            result = "ok",
            elapsed_ms = queued_at.elapsed().as_millis() as u64,
            call_ms,
            markup_bytes = document.markup().len(),
            "Equation converted"
        );
        Ok(document)
    }
}
