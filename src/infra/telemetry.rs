use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::ledger::{
    METRIC_LEDGER_CHARGED, METRIC_LEDGER_INSUFFICIENT, METRIC_LEDGER_REFUNDED,
    METRIC_LEDGER_RESERVED,
};
use crate::application::orchestrator::{
    METRIC_ENGINE_MS, METRIC_JOBS_COMPLETED, METRIC_JOBS_FAILED, METRIC_JOBS_SUBMITTED,
    METRIC_RENDER_MS,
};
use crate::application::share_links::{METRIC_SHARE_DENIED, METRIC_SHARE_RESOLVED};
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
            METRIC_JOBS_SUBMITTED,
            Unit::Count,
            "Report jobs accepted and queued."
        );
        describe_counter!(
            METRIC_JOBS_COMPLETED,
            Unit::Count,
            "Report jobs that reached COMPLETED."
        );
        describe_counter!(
            METRIC_JOBS_FAILED,
            Unit::Count,
            "Report jobs that reached FAILED, labelled by reason."
        );
        describe_histogram!(
            METRIC_ENGINE_MS,
            Unit::Milliseconds,
            "Analysis engine latency per attempt in milliseconds."
        );
        describe_histogram!(
            METRIC_RENDER_MS,
            Unit::Milliseconds,
            "Renderer latency in milliseconds."
        );
        describe_counter!(
            METRIC_LEDGER_RESERVED,
            Unit::Count,
            "Credit reservations taken."
        );
        describe_counter!(
            METRIC_LEDGER_CHARGED,
            Unit::Count,
            "Reservations finalized as charges."
        );
        describe_counter!(
            METRIC_LEDGER_REFUNDED,
            Unit::Count,
            "Reservations returned to their account."
        );
        describe_counter!(
            METRIC_LEDGER_INSUFFICIENT,
            Unit::Count,
            "Reservations refused for lack of credit."
        );
        describe_counter!(
            METRIC_SHARE_RESOLVED,
            Unit::Count,
            "Share link accesses granted."
        );
        describe_counter!(
            METRIC_SHARE_DENIED,
            Unit::Count,
            "Share link accesses denied, labelled by reason."
        );
    });
}
