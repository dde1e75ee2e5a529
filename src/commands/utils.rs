use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;

use crate::config::LoggingConfig;

/// Initialize logging
///
/// `RUST_LOG` wins over the configured level; `--verbose` forces debug.
pub fn init_logging(verbose: bool, logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let level = if verbose { "debug" } else { logging.level.as_str() };

    let file_layer = match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                crate::backend::fs::ensure_directory_exists(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let installed = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .try_init();

    // A second call in the same process keeps the first subscriber
    if let Err(e) = installed {
        tracing::debug!("Logging already initialized: {}", e);
    }

    Ok(())
}

/// Format seconds the way the dashboard shows today's usage: `1h 2m 3s`
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Coarser format used for history totals: `1h 2m`
pub fn format_duration_short(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

/// Text progress bar for a percentage
pub fn progress_bar(percent: f64, width: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_like_the_dashboard() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(61), "1m 1s");
        assert_eq!(format_duration(3723), "1h 2m 3s");
        assert_eq!(format_duration(7200), "2h 0m 0s");
    }

    #[test]
    fn short_format_drops_seconds() {
        assert_eq!(format_duration_short(59), "0m");
        assert_eq!(format_duration_short(3723), "1h 2m");
    }

    #[test]
    fn progress_bar_is_clamped() {
        assert_eq!(progress_bar(0.0, 4), "[----]");
        assert_eq!(progress_bar(50.0, 4), "[##--]");
        assert_eq!(progress_bar(250.0, 4), "[####]");
    }
}
