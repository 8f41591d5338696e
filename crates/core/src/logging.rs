//! File logging for build hosts that drive the transform.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Overrides the directory log files are written to.
pub const LOG_DIR_ENV: &str = "SHADOWLOADER_LOG_DIR";

const DEFAULT_FILTER: &str =
    "shadowloader_core=info,shadowloader_compiler=info,shadowloader_runtime=info";

/// `$SHADOWLOADER_LOG_DIR`, else `~/.shadowloader/logs`.
pub fn log_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(LOG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    let home = std::env::var_os("HOME").unwrap_or_else(|| ".".into());
    PathBuf::from(home).join(".shadowloader").join("logs")
}

/// Routes `tracing` output to a daily file named after `component`, and to
/// stderr as well when `to_stderr` is set. `RUST_LOG` replaces the default
/// filter. Lines are flushed until the returned guard is dropped.
pub fn init_logging(component: &str, to_stderr: bool) -> WorkerGuard {
    let dir = log_dir();
    let _ = std::fs::create_dir_all(&dir);

    // transform.log.2024-01-21
    let appender = tracing_appender::rolling::daily(&dir, component);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let to_file = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);
    let to_terminal = to_stderr.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    // A host that installed its own subscriber first keeps it.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(to_file)
        .with(to_terminal)
        .try_init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_dir_defaults_under_home() {
        if std::env::var_os(LOG_DIR_ENV).is_none() {
            assert!(log_dir().ends_with(".shadowloader/logs"));
        }
    }
}
