//! Common observability utilities.
//!
//! This module provides the tracing subscriber used by the binary and a
//! helper for logging errors together with their sources.
//!
use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, EnvFilter, Layer};

pub const ERROR: Level = Level::ERROR;

/// The error type returned when building a subscriber.
#[derive(Debug, thiserror::Error)]
pub enum BuildSubscriberError {
    #[error("failed to parse filtering directive")]
    Parse(#[from] tracing_subscriber::filter::ParseError),
}

/// Build a tracing subscriber.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`.
pub fn build_subscriber() -> Result<impl Subscriber, BuildSubscriberError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    Ok(tracing_subscriber::registry().with(fmt_layer.with_filter(env_filter)))
}

/// Render an error and every error in its `source()` chain, outermost
/// first, separated by `": "`.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Log an error with its full source chain as the `error` field.
///
/// ```ignore
/// log_error!(ERROR, error, stage = %stage, "error initializing database");
/// ```
#[macro_export]
macro_rules! log_error {
    ($level:expr, $error:expr, $($arg:tt)+) => {{
        let chain = $crate::utils::o11y::error_chain(&$error);
        ::tracing::event!($level, error = %chain, $($arg)+);
    }};
}
