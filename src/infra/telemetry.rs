use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

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
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "texpress_cache_hit_total",
            Unit::Count,
            "Submissions answered from the result cache."
        );
        describe_counter!(
            "texpress_cache_miss_total",
            Unit::Count,
            "Result cache lookups that found no live entry."
        );
        describe_counter!(
            "texpress_cache_evict_total",
            Unit::Count,
            "Result cache entries dropped to stay within capacity."
        );
        describe_counter!(
            "texpress_jobs_completed_total",
            Unit::Count,
            "Compile jobs that produced a PDF."
        );
        describe_counter!(
            "texpress_jobs_failed_total",
            Unit::Count,
            "Compile jobs that ended in failure."
        );
        describe_counter!(
            "texpress_fallback_activations_total",
            Unit::Count,
            "Times the service switched to inline compilation."
        );
        describe_gauge!(
            "texpress_queue_depth",
            Unit::Count,
            "Compile jobs waiting for a worker."
        );
        describe_histogram!(
            "texpress_compile_ms",
            Unit::Milliseconds,
            "Wall-clock time of a compile job in milliseconds."
        );
    });
}
