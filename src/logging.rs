//! Tracing configuration and log routing.
//!
//! Logs go to stdout through a compact formatter and to a file. `DOCENT_LOG_FILE` selects the
//! file; otherwise `logs/docent.log` is used. The file writer is non-blocking so request tasks
//! never wait on disk.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_FILE_ENV: &str = "DOCENT_LOG_FILE";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_NAME: &str = "docent.log";

/// Configure tracing subscribers for stdout and file logging.
///
/// - Respects `RUST_LOG` for filtering (defaults to `info`).
/// - Installs a compact stdout layer and, when the file can be opened, a file layer.
/// - Keeps the non-blocking writer guard alive for the process lifetime.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    let target = resolve_log_target(std::env::var(LOG_FILE_ENV).ok());
    if let Some(writer) = open_writer(&target) {
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact();

        registry.with(file_layer).init();
    } else {
        registry.init();
    }
}

/// Where the file layer writes.
#[derive(Debug, PartialEq, Eq)]
enum LogTarget {
    /// Operator-chosen file, appended to.
    Explicit(PathBuf),
    /// `logs/docent.log` under the working directory.
    Default,
}

fn resolve_log_target(env_value: Option<String>) -> LogTarget {
    match env_value.filter(|value| !value.trim().is_empty()) {
        Some(path) => LogTarget::Explicit(PathBuf::from(path.trim())),
        None => LogTarget::Default,
    }
}

/// Returns `None` when the log directory or file cannot be created.
fn open_writer(target: &LogTarget) -> Option<NonBlocking> {
    match target {
        LogTarget::Explicit(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty())
                && let Err(err) = std::fs::create_dir_all(parent)
            {
                eprintln!("Failed to create log directory {}: {err}", parent.display());
                return None;
            }
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(file) => Some(install_guard(tracing_appender::non_blocking(file))),
                Err(err) => {
                    eprintln!("Failed to open log file {}: {err}", path.display());
                    None
                }
            }
        }
        LogTarget::Default => {
            if let Err(err) = std::fs::create_dir_all(Path::new(DEFAULT_LOG_DIR)) {
                eprintln!("Failed to create logs directory: {err}");
                return None;
            }
            let appender = tracing_appender::rolling::never(DEFAULT_LOG_DIR, DEFAULT_LOG_NAME);
            Some(install_guard(tracing_appender::non_blocking(appender)))
        }
    }
}

fn install_guard((writer, guard): (NonBlocking, WorkerGuard)) -> NonBlocking {
    let _ = LOG_GUARD.set(guard);
    writer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_env_value_uses_default_target() {
        assert_eq!(resolve_log_target(None), LogTarget::Default);
        assert_eq!(resolve_log_target(Some("  ".into())), LogTarget::Default);
    }

    #[test]
    fn explicit_path_is_trimmed() {
        assert_eq!(
            resolve_log_target(Some(" /tmp/docent/app.log ".into())),
            LogTarget::Explicit(PathBuf::from("/tmp/docent/app.log"))
        );
    }
}
