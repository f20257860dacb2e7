//! Logging setup for the console binary.
//!
//! Records flow through `tracing`; the `log` macros used by the bridge
//! crates are forwarded via `tracing-log`.  Output goes to stdout and
//! to a daily-rolling file under the log directory.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Local};
use tracing_log::LogTracer;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "nextpvr-console.log";

/// Timestamps in local time so the file lines up with the backend's
/// own logs.
struct LocalTimeTimer;

impl FormatTime for LocalTimeTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Installs the global subscriber.  `RUST_LOG` wins over both the
/// config file level and the verbose flag.
pub fn init_logging(
    log_dir: &Path,
    retention_days: u64,
    verbose: bool,
    config_level: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(log_dir)?;

    let fallback = if verbose {
        "debug"
    } else {
        config_level.unwrap_or("info")
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    // Dropping the guard would discard buffered records at exit.
    Box::leak(Box::new(guard));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_timer(LocalTimeTimer)
        .with_target(false);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_timer(LocalTimeTimer);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    LogTracer::init()?;

    clean_old_logs(log_dir, retention_days);
    Ok(())
}

/// Deletes rolled log files older than the retention window.
fn clean_old_logs(log_dir: &Path, retention_days: u64) {
    let cutoff = Local::now() - chrono::Duration::days(retention_days as i64);
    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    let mut removed = 0usize;
    for entry in entries.flatten() {
        if !entry
            .file_name()
            .to_string_lossy()
            .starts_with(LOG_FILE_PREFIX)
        {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let modified: DateTime<Local> = modified.into();
        if modified < cutoff && std::fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        log::info!("removed {} expired log files", removed);
    }
}
