use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::render::{METRIC_BATCH_MS, METRIC_COMPONENT_FAILURE, METRIC_ENGINE_CALL_MS};
use crate::cache::{METRIC_CACHE_EVICT, METRIC_CACHE_HIT, METRIC_CACHE_MISS, METRIC_CACHE_PURGE};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register units and help text for every metric the crate emits. Safe to
/// call more than once.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CACHE_HIT,
            Unit::Count,
            "Render cache hits, labelled by tier."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Render cache misses, labelled by tier."
        );
        describe_counter!(
            METRIC_CACHE_EVICT,
            Unit::Count,
            "Render cache evictions due to capacity, labelled by tier."
        );
        describe_counter!(
            METRIC_CACHE_PURGE,
            Unit::Count,
            "Full render cache purges."
        );
        describe_counter!(
            METRIC_COMPONENT_FAILURE,
            Unit::Count,
            "Equations left unrendered, labelled by failure kind."
        );
        describe_histogram!(
            METRIC_BATCH_MS,
            Unit::Milliseconds,
            "Render batch latency in milliseconds."
        );
        describe_histogram!(
            METRIC_ENGINE_CALL_MS,
            Unit::Milliseconds,
            "Conversion engine call latency in milliseconds."
        );
    });
}
