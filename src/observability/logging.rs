use std::path::{Path, PathBuf};

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default location for rotated log files.
pub fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".shardlink")
        .join("logs")
}

/// Install the global tracing subscriber.
///
/// Always logs to stdout. When `log_dir` is given, additionally writes
/// daily-rotated plain-text files there (see [`default_log_dir`]), creating
/// the directory if needed. `RUST_LOG` overrides `level`.
pub fn init_logging(level: &str, log_dir: Option<&Path>) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = log_dir
        .map(|dir| -> anyhow::Result<_> {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "shardlink.log");
            Ok(fmt::layer()
                .with_writer(appender)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true))
        })
        .transpose()?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false)
                .with_line_number(false),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    if let Some(dir) = log_dir {
        tracing::info!(log_dir = %dir.display(), level = %level, "file logging enabled");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_logging_creates_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        // Init may fail if another test installed a subscriber first; the
        // directory must exist either way
        let _ = init_logging("info", Some(&log_dir));
        assert!(log_dir.exists());
    }

    #[test]
    fn test_default_log_dir_location() {
        assert!(default_log_dir().ends_with(".shardlink/logs"));
    }
}
