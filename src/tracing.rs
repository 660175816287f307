//! Tracing subsystem initialization
//!
//! Structured console logging with env-filterable levels. Spans carry the
//! session key and trace id so one chat invocation can be followed across
//! the lifecycle manager, tool executor, and completion calls.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subsystem.
///
/// Idempotent: returns Ok even if a global subscriber is already set,
/// which keeps test binaries from fighting over it.
///
/// # Example
/// ```ignore
/// appforge::tracing::init_tracing();
/// ```
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,appforge=debug"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
