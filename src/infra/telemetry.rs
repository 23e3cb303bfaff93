use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_CACHE_EXPIRED_TOTAL, METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_MISS_TOTAL,
    METRIC_CACHE_STORE_ERROR_TOTAL, METRIC_CACHE_STORE_TOTAL, METRIC_NOT_MODIFIED_TOTAL,
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
            METRIC_CACHE_HIT_TOTAL,
            Unit::Count,
            "Total number of responses replayed from the cache."
        );
        describe_counter!(
            METRIC_CACHE_MISS_TOTAL,
            Unit::Count,
            "Total number of cacheable requests with no usable entry."
        );
        describe_counter!(
            METRIC_CACHE_EXPIRED_TOTAL,
            Unit::Count,
            "Total number of entries found past their expiry and removed."
        );
        describe_counter!(
            METRIC_CACHE_STORE_TOTAL,
            Unit::Count,
            "Total number of captured responses written to the cache."
        );
        describe_counter!(
            METRIC_CACHE_STORE_ERROR_TOTAL,
            Unit::Count,
            "Total number of cache backend failures treated as misses."
        );
        describe_counter!(
            METRIC_NOT_MODIFIED_TOTAL,
            Unit::Count,
            "Total number of conditional GETs answered with 304."
        );
    });
}
