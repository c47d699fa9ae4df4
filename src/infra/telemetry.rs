use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
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

/// Register units and help text for every cache metric with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "tiercache_fast_hit_total",
            Unit::Count,
            "Lookups answered by the fast tier."
        );
        describe_counter!(
            "tiercache_durable_hit_total",
            Unit::Count,
            "Lookups answered by the durable tier."
        );
        describe_counter!(
            "tiercache_miss_total",
            Unit::Count,
            "Lookups answered by neither tier."
        );
        describe_counter!(
            "tiercache_promotion_total",
            Unit::Count,
            "Durable hits copied into the fast tier."
        );
        describe_counter!(
            "tiercache_fast_evict_total",
            Unit::Count,
            "Fast tier entries evicted due to capacity."
        );
        describe_counter!(
            "tiercache_fast_expired_total",
            Unit::Count,
            "Fast tier entries removed after their TTL."
        );
        describe_counter!(
            "tiercache_durable_expired_total",
            Unit::Count,
            "Durable rows removed after their TTL, by read or sweep."
        );
        describe_counter!(
            "tiercache_durable_error_total",
            Unit::Count,
            "Durable tier operations that failed and were absorbed."
        );
        describe_histogram!(
            "tiercache_cleanup_ms",
            Unit::Milliseconds,
            "Durable sweep latency in milliseconds."
        );
    });
}
