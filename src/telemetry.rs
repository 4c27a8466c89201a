//! Structured `tracing` initialization plus the dedicated failed-request
//! sink.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::PipelineError;
use crate::parameters::ParameterSet;

/// Initializes the global `tracing` subscriber: an ANSI stdout layer and a
/// rotating (daily) file layer, both governed by `RUST_LOG` (default
/// `info`). Call once at process start.
pub fn init_logging(log_dir: impl AsRef<Path>) -> Result<tracing_appender::non_blocking::WorkerGuard, PipelineError> {
    std::fs::create_dir_all(log_dir.as_ref()).map_err(|source| PipelineError::FailedLogInit {
        path: log_dir.as_ref().display().to_string(),
        source,
    })?;

    let file_appender = tracing_appender::rolling::daily(log_dir.as_ref(), "profile-crawler.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_ansi(true).with_target(false))
        .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
        .init();

    Ok(guard)
}

/// A dedicated, process-wide appender for permanent per-query failures: one
/// line per failure, independent of the general log stream. Callers share it
/// by `Arc`.
pub struct FailedRequestSink {
    file: Mutex<File>,
}

impl FailedRequestSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PipelineError::FailedLogInit {
                path: path.display().to_string(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| PipelineError::FailedLogInit {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends one line: `<timestamp> - <parameters key> - <error>`.
    pub fn record(&self, params: &ParameterSet, error: &str) {
        use std::io::Write;
        let line = format!(
            "{} - {} - {error}\n",
            chrono::Utc::now().to_rfc3339(),
            params.canonical_key()
        );
        if let Ok(mut file) = self.file.lock() {
            let _ = write_all_best_effort(&mut file, line.as_bytes());
        }
    }
}

fn write_all_best_effort(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    use std::io::Write;
    file.write_all(bytes)?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::{ClauseValue, FilterClause};

    #[test]
    fn record_appends_one_line_per_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed_requests.log");
        let sink = FailedRequestSink::open(&path).unwrap();

        let params = ParameterSet::new().with_bound(
            "layer",
            vec![FilterClause {
                value: ClauseValue::Single("x".to_string()),
                operator: "is one of".to_string(),
            }],
        );

        sink.record(&params, "boom");
        sink.record(&params, "boom again");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("boom again"));
    }
}
