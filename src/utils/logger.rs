use std::path::Path;
use std::sync::OnceLock;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

static GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Console logging, plus a daily rolling file when `to_file` is set.
/// `RUST_LOG` overrides the configured level.
pub fn init_logger(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer()
        .with_target(false)
        .with_ansi(true)
        .with_writer(std::io::stdout);

    if cfg.to_file {
        let path = Path::new(&cfg.file_path);
        let dir = path.parent().unwrap_or_else(|| Path::new("./logs"));
        let name = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("scanner.log"));
        let appender = rolling::daily(dir, name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        GUARD.set(guard).ok();

        let file_layer = fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .init();
    }
}
