//! Logging utilities for threadcode.
//!
//! # Noise Filtering
//!
//! By default, noisy library modules (hyper, reqwest, h2, rustls, tungstenite)
//! are set to `warn` level while relay logs stay at the configured level.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Default noisy modules that should be filtered to warn level.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio_util",
    "tungstenite",
    "tokio_tungstenite",
];

/// Build the filter directive string with noise suppression.
fn build_directives(log_level: &str) -> String {
    let mut directives = String::from(log_level);

    for module in NOISY_MODULES {
        directives.push_str(&format!(",{}=warn", module));
    }

    directives
}

/// Build the default EnvFilter; `RUST_LOG` overrides everything.
fn build_filter(log_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    EnvFilter::new(build_directives(log_level))
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, ANSI-coloured lines
    Pretty,
    /// One JSON object per event, carrying the enclosing relay span
    Json,
}

impl LogFormat {
    /// Parse a config value; anything other than `json` is pretty.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Initialize logging with the given configuration.
///
/// Each inbound message runs inside a `relay` span (trace id, message id,
/// channel id). Both formats emit that span's close event, so every handled
/// message ends with one timing line.
pub fn init_logging(log_level: &str, log_format: &str) {
    let format = LogFormat::parse(log_format);

    let json_layer = (format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
    });
    let pretty_layer = (format == LogFormat::Pretty).then(|| {
        tracing_subscriber::fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(true)
            .with_target(false)
    });

    let _ = tracing_subscriber::registry()
        .with(build_filter(log_level))
        .with(json_layer)
        .with(pretty_layer)
        .try_init();

    tracing::info!(
        log_level = %log_level,
        log_format = ?format,
        noise_filtered = NOISY_MODULES.len(),
        "Logging initialized"
    );
}

/// Generate a new trace ID for correlating one inbound message's log lines.
pub fn generate_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
