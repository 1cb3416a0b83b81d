use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::core::config::AppPaths;

// Keeps the non-blocking writer alive for the process lifetime; dropping it
// would silently stop file logging.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the tracing subscriber: human-readable stdout plus a daily
/// rolling file under the data dir. Safe to call more than once; later calls
/// are no-ops.
pub fn init(paths: &AppPaths) {
    let _ = std::fs::create_dir_all(&paths.log_dir);

    let file_appender = tracing_appender::rolling::daily(&paths.log_dir, "deskbot.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    // sqlx logs every statement at info; the crawl path makes that noise.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,sqlx=warn"));

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(file_writer);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();
}
