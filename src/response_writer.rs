//! Persists one file per downloaded search response page.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use tokio::fs;
use tracing::{error, info};

use crate::errors::WriterError;

/// Persists raw search response bodies to timestamped JSON files.
#[derive(Debug, Clone)]
pub struct ResponseWriter {
    output_dir: PathBuf,
}

impl ResponseWriter {
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Write `response` to `<output_dir>/profile_search_response_<timestamp>.json`,
    /// pretty-printed with 4-space indent, UTF-8. Creates the output
    /// directory if absent. Never panics on I/O failure: the error is
    /// logged and returned, the caller keeps the pipeline running.
    pub async fn write(&self, response: &Value) -> Result<PathBuf, WriterError> {
        if let Err(source) = fs::create_dir_all(&self.output_dir).await {
            let err = WriterError::CreateDir {
                path: self.output_dir.display().to_string(),
                source,
            };
            error!(error = %err, "response_writer: failed to create output directory");
            return Err(err);
        }

        let path = self.output_dir.join(file_name(Utc::now()));
        let body = serde_json::to_vec_pretty(response).map_err(WriterError::Serialize)?;

        if let Err(source) = fs::write(&path, body).await {
            let err = WriterError::Write {
                path: path.display().to_string(),
                source,
            };
            error!(error = %err, "response_writer: failed to write response file");
            return Err(err);
        }

        info!(path = %path.display(), "response_writer: wrote response file");
        Ok(path)
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

/// `profile_search_response_<YYYY-MM-DD_HH-MM-SS-μμμμμμ>.json`.
///
/// Microsecond precision avoids collisions among concurrent writers; two
/// downloaders finishing a page in the same microsecond is the only
/// remaining collision window, and is no worse than the source format this
/// was distilled from.
fn file_name(now: chrono::DateTime<Utc>) -> String {
    format!(
        "profile_search_response_{}.json",
        now.format("%Y-%m-%d_%H-%M-%S-%6f")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn writes_pretty_printed_utf8_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResponseWriter::new(dir.path());
        let body = json!({"results": [1, 2, 3]});

        let path = writer.write(&body).await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();

        assert!(contents.starts_with("{\n"));
        assert!(contents.contains("  \"results\""));
        let roundtrip: Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(roundtrip, body);
    }

    #[tokio::test]
    async fn creates_output_dir_if_absent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested/more");
        let writer = ResponseWriter::new(&nested);

        writer.write(&json!({})).await.unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn concurrent_writes_produce_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResponseWriter::new(dir.path());

        for _ in 0..5 {
            writer.write(&json!({"x": 1})).await.unwrap();
        }

        let count = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 5);
    }
}
