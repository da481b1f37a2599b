//! Logging initialisation.
//!
//! stdout belongs to the JSON-RPC transport, so logs go to stderr or a file
//! under `kuzu-memory/logs/`. Format and level come from the `logging`
//! config section; `RUST_LOG` wins when set.

use crate::config::LoggingConfig;
use crate::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialises the global tracing subscriber.
///
/// Safe to call more than once; later calls are no-ops (the first
/// subscriber wins), which keeps tests and embedded use simple.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] when a configured log file cannot be
/// opened.
pub fn init_logging(config: &LoggingConfig, logs_dir: Option<&Path>) -> Result<()> {
    let default_directive = config.filter.clone().unwrap_or_else(|| {
        let level = config.level.as_deref().unwrap_or("info");
        format!("kuzu_memory={level}")
    });
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let json = config.format.as_deref() == Some("json");

    let file = match (&config.file, logs_dir) {
        (Some(name), Some(dir)) => {
            std::fs::create_dir_all(dir).map_err(|e| Error::OperationFailed {
                operation: "create_logs_dir".to_string(),
                cause: format!("{}: {e}", dir.display()),
            })?;
            let path = dir.join(name);
            let handle = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| Error::OperationFailed {
                    operation: "open_log_file".to_string(),
                    cause: format!("{}: {e}", path.display()),
                })?;
            Some(Arc::new(handle))
        },
        _ => None,
    };

    // The writer/format combinations change the subscriber's type, so each
    // arm finishes initialisation itself.
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match (file, json) {
        (Some(file), true) => builder.json().with_writer(file).try_init(),
        (Some(file), false) => builder.with_ansi(false).with_writer(file).try_init(),
        (None, true) => builder.json().with_writer(std::io::stderr).try_init(),
        (None, false) => builder.with_writer(std::io::stderr).try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_twice_is_ok() {
        let config = LoggingConfig::default();
        assert!(init_logging(&config, None).is_ok());
        assert!(init_logging(&config, None).is_ok());
    }

    #[test]
    fn test_file_logging_creates_dir() {
        let tmp = TempDir::new().unwrap();
        let logs = tmp.path().join("logs");
        let config = LoggingConfig {
            file: Some("memory.log".to_string()),
            ..LoggingConfig::default()
        };
        assert!(init_logging(&config, Some(&logs)).is_ok());
        assert!(logs.is_dir());
    }
}
