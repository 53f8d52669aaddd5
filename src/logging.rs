//! Logging setup shared by both binaries. `common.env` ("prod"/"dev")
//! picks the default filter level when `RUST_LOG` is unset; an optional
//! `common.logFile` tees output to a file instead of stdout via
//! `tracing_appender`'s non-blocking writer.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::CommonConfig;

/// Installs the global subscriber. The returned guard must be kept
/// alive for the process lifetime when logging to a file — dropping it
/// stops the background flush thread.
pub fn init(common: &CommonConfig) -> Option<WorkerGuard> {
    let default_level = if common.env == "prod" { "info" } else { "debug" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("throughway={}", default_level)));

    match &common.log_file {
        Some(path) => {
            let path = std::path::Path::new(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_owned())
                .unwrap_or_else(|| std::ffi::OsString::from("throughway.log"));
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            None
        }
    }
}
