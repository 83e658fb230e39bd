//! Logging setup for programs and tests that drive the optimizers
//!
//! The library itself only emits `tracing` events (per-iteration progress at DEBUG,
//! convergence at INFO, error increases at WARN). Installing a subscriber is left to
//! the caller; these helpers give the standard one.

use tracing::Level;

/// Install the standard `tracing` subscriber with INFO as the default level.
///
/// The level can be overridden through `RUST_LOG`:
/// ```bash
/// RUST_LOG=factorgraph=debug cargo test --test visual_slam
/// ```
///
/// # Example
/// ```no_run
/// use factorgraph::init_logger;
///
/// init_logger();
/// tracing::info!("optimizer starting");
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Install the standard subscriber with a custom default level.
///
/// Calling this more than once is harmless: later calls leave the first
/// subscriber in place.
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

/// Subscriber for unit and integration tests: output goes through the test writer
/// so it is captured unless `--nocapture` is passed.
pub fn init_test_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(Level::WARN.into())
                .from_env_lossy(),
        )
        .with_test_writer()
        .with_target(true)
        .try_init();
}
