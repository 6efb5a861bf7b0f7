//! Process-wide tracing subscriber and metric descriptions.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, filter::Directive, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// chromiumoxide traces every CDP frame at debug level. Kept at `warn` unless
/// `RUST_LOG` asks for it explicitly.
const ENGINE_DIRECTIVES: [&str; 2] = ["chromiumoxide=warn", "tungstenite=warn"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

const METRICS: [(&str, MetricKind, Unit, &str); 7] = [
    (
        "pdfsmith_gate_active",
        MetricKind::Gauge,
        Unit::Count,
        "Render slots currently held.",
    ),
    (
        "pdfsmith_gate_queued",
        MetricKind::Gauge,
        Unit::Count,
        "Render requests waiting for a slot.",
    ),
    (
        "pdfsmith_gate_rejected_total",
        MetricKind::Counter,
        Unit::Count,
        "Render requests turned away by the gate, labelled by reason.",
    ),
    (
        "pdfsmith_worker_launch_total",
        MetricKind::Counter,
        Unit::Count,
        "Rendering worker launch attempts, labelled by result.",
    ),
    (
        "pdfsmith_render_total",
        MetricKind::Counter,
        Unit::Count,
        "Completed render calls, labelled by result.",
    ),
    (
        "pdfsmith_render_ms",
        MetricKind::Histogram,
        Unit::Milliseconds,
        "End-to-end render latency in milliseconds, queue wait included.",
    ),
    (
        "pdfsmith_files_purged_total",
        MetricKind::Counter,
        Unit::Count,
        "Saved PDFs removed by the retention sweep.",
    ),
];

/// Install the global subscriber and describe the service metrics.
///
/// Fails if a subscriber is already installed.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = build_filter(logging, std::env::var_os(EnvFilter::DEFAULT_ENV).is_some())?;

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
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

fn build_filter(logging: &LoggingSettings, env_overrides: bool) -> Result<EnvFilter, InfraError> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();
    if env_overrides {
        return Ok(filter);
    }
    for directive in ENGINE_DIRECTIVES {
        let directive: Directive = directive.parse().map_err(|err| {
            InfraError::telemetry(format!("invalid log directive `{directive}`: {err}"))
        })?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        for (name, kind, unit, description) in METRICS {
            match kind {
                MetricKind::Counter => describe_counter!(name, unit, description),
                MetricKind::Gauge => describe_gauge!(name, unit, description),
                MetricKind::Histogram => describe_histogram!(name, unit, description),
            }
        }
    });
}
