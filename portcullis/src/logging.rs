//! Tracing initialization: daily-rotated file logging plus stderr, filtered
//! by `RUST_LOG` (defaulting to `info`). Idempotent so both the daemon and
//! test harnesses can call it freely.

use std::sync::OnceLock;

use portcullis_shared::errors::{PortcullisError, PortcullisResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Layout;

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Initialize tracing for the daemon.
///
/// Logs are written to `<layout.logs_dir()>/portcullisd.log` with daily
/// rotation, and mirrored to stderr. Idempotent: subsequent calls are a
/// no-op once the global subscriber has been installed.
pub fn init(layout: &Layout) -> PortcullisResult<()> {
    std::fs::create_dir_all(layout.logs_dir())
        .map_err(|e| PortcullisError::IoError(format!("create logs dir: {e}")))?;

    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let file_appender = tracing_appender::rolling::daily(layout.logs_dir(), "portcullisd.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Ignore "already set" errors so tests that call this repeatedly, or a
    // host process with its own tracing setup, don't panic.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init();

    Ok(())
}
