use tracing_subscriber::{fmt, fmt::time::UtcTime, EnvFilter};

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, or by `default` when
/// the variable is unset, with RFC 3339 UTC timestamps. Does nothing if a
/// global subscriber already exists.
pub fn init_logging(default: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let installed = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_thread_names(true)
        .try_init();

    if installed.is_ok() {
        tracing::debug!("Logging initialized");
    }
}
