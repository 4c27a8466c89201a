//! On-disk CSV ledger files plus the in-memory fold that is the single
//! source of truth for resumption.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::{info, warn};

use super::event::{fold, CheckData, Event, EventType, FailedData, PageUpdateData, QueryState};
use crate::errors::LedgerError;
use crate::parameters::ParameterSet;

/// Ledger files rotate once the active file reaches this many data rows.
pub const MAX_LEDGER_ROWS: u64 = 100_000;

const CSV_HEADER: &[&str] = &["timestamp", "parameters_key", "event_type", "data_json"];

struct ActiveFile {
    writer: csv::Writer<File>,
    row_count: u64,
}

struct LedgerInner {
    active: ActiveFile,
    state: HashMap<String, QueryState>,
}

/// Append-only CSV event log with an in-memory fold, serialized behind a
/// single mutex so wall-clock write order always equals replay order.
pub struct EventLedger {
    dir: PathBuf,
    base_name: String,
    max_rows: u64,
    inner: Mutex<LedgerInner>,
}

impl EventLedger {
    /// Reconstructs state by replaying every `<base_name>_*.csv` file under
    /// `dir` in lexical order, then opens (or continues) the most recent
    /// file for further appends. Reconstruction completes before this
    /// function returns, satisfying "reconstruction must complete before
    /// producer launch".
    pub fn open(dir: impl Into<PathBuf>, base_name: impl Into<String>) -> Result<Self, LedgerError> {
        Self::open_with_row_cap(dir, base_name, MAX_LEDGER_ROWS)
    }

    /// Like [`EventLedger::open`] but with a caller-chosen row cap, so tests
    /// can force rotation without writing 100,000 rows.
    pub fn open_with_row_cap(
        dir: impl Into<PathBuf>,
        base_name: impl Into<String>,
        max_rows: u64,
    ) -> Result<Self, LedgerError> {
        let dir = dir.into();
        let base_name = base_name.into();
        std::fs::create_dir_all(&dir).map_err(|source| LedgerError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        let mut files = ledger_files(&dir, &base_name)?;
        files.sort();

        let mut state = HashMap::new();
        for path in &files {
            replay_file(path, &mut state)?;
        }

        let active = match files.last() {
            Some(path) => open_existing_for_append(path)?,
            None => create_new_file(&dir, &base_name)?,
        };

        info!(
            dir = %dir.display(),
            files = files.len(),
            keys = state.len(),
            "ledger: reconstructed state from disk"
        );

        Ok(Self {
            dir,
            base_name,
            max_rows,
            inner: Mutex::new(LedgerInner { active, state }),
        })
    }

    /// Records the result of a CHECK request: the reported total and
    /// whether it falls under the per-query cap.
    pub fn log_check(
        &self,
        params: &ParameterSet,
        total_profiles: u64,
        is_workable: bool,
    ) -> Result<(), LedgerError> {
        self.append(
            params.canonical_key(),
            EventType::Check,
            serde_json::to_value(CheckData {
                total_profiles,
                is_workable,
            })
            .expect("CheckData always serializes"),
        )
    }

    /// Records a durably-written page.
    pub fn update_page_progress(
        &self,
        params: &ParameterSet,
        page_number: u32,
    ) -> Result<(), LedgerError> {
        self.append(
            params.canonical_key(),
            EventType::PageUpdate,
            serde_json::to_value(PageUpdateData { page_number })
                .expect("PageUpdateData always serializes"),
        )
    }

    /// Records that every page for `params` was fetched.
    pub fn mark_completed(&self, params: &ParameterSet) -> Result<(), LedgerError> {
        self.append(
            params.canonical_key(),
            EventType::Completed,
            serde_json::Value::Null,
        )
    }

    /// Records a permanent per-query failure.
    pub fn mark_failed(
        &self,
        params: &ParameterSet,
        failed_at_page: Option<u32>,
    ) -> Result<(), LedgerError> {
        self.append(
            params.canonical_key(),
            EventType::Failed,
            serde_json::to_value(FailedData { failed_at_page })
                .expect("FailedData always serializes"),
        )
    }

    /// The current (post-replay, post-every-prior-append) state for `key`,
    /// or `None` if the key has never been seen.
    #[must_use]
    pub fn state_for(&self, key: &str) -> Option<QueryState> {
        self.inner.lock().unwrap().state.get(key).cloned()
    }

    fn append(
        &self,
        parameters_key: String,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Result<(), LedgerError> {
        let event = Event {
            timestamp: Utc::now(),
            parameters_key,
            event_type,
            data,
        };

        let mut inner = self.inner.lock().unwrap();

        inner
            .active
            .writer
            .write_record(&[
                event.timestamp.to_rfc3339(),
                event.parameters_key.clone(),
                event.event_type.as_str().to_string(),
                event.data.to_string(),
            ])
            .map_err(|source| LedgerError::Write { source })?;
        inner
            .active
            .writer
            .flush()
            .map_err(|source| LedgerError::Write { source: source.into() })?;
        inner.active.row_count += 1;

        let prior = inner.state.remove(&event.parameters_key);
        let next = fold(prior, &event);
        inner.state.insert(event.parameters_key.clone(), next);

        if inner.active.row_count >= self.max_rows {
            let rotated = create_new_file(&self.dir, &self.base_name)?;
            warn!(dir = %self.dir.display(), "ledger: rotating to a new file at row cap");
            inner.active = rotated;
        }

        Ok(())
    }
}

fn ledger_files(dir: &Path, base_name: &str) -> Result<Vec<PathBuf>, LedgerError> {
    let prefix = format!("{base_name}_");
    let entries = std::fs::read_dir(dir).map_err(|source| LedgerError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| LedgerError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with(&prefix) && name.ends_with(".csv") {
            files.push(path);
        }
    }
    Ok(files)
}

fn replay_file(path: &Path, state: &mut HashMap<String, QueryState>) -> Result<(), LedgerError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|source| LedgerError::Read {
            path: path.display().to_string(),
            source,
        })?;

    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|source| LedgerError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let event = parse_record(path, line as u64 + 2, &record)?;
        let prior = state.remove(&event.parameters_key);
        let next = fold(prior, &event);
        state.insert(event.parameters_key.clone(), next);
    }
    Ok(())
}

fn parse_record(path: &Path, line: u64, record: &csv::StringRecord) -> Result<Event, LedgerError> {
    let malformed = |message: &str| LedgerError::MalformedRow {
        path: path.display().to_string(),
        line,
        message: message.to_string(),
    };

    let timestamp = record
        .get(0)
        .ok_or_else(|| malformed("missing timestamp column"))?;
    let parameters_key = record
        .get(1)
        .ok_or_else(|| malformed("missing parameters_key column"))?;
    let event_type = record
        .get(2)
        .ok_or_else(|| malformed("missing event_type column"))?;
    let data_json = record
        .get(3)
        .ok_or_else(|| malformed("missing data_json column"))?;

    Ok(Event {
        timestamp: chrono::DateTime::parse_from_rfc3339(timestamp)
            .map_err(|_| malformed("invalid timestamp"))?
            .with_timezone(&Utc),
        parameters_key: parameters_key.to_string(),
        event_type: EventType::parse(event_type).ok_or_else(|| malformed("unknown event_type"))?,
        data: serde_json::from_str(data_json).map_err(|_| malformed("invalid data_json"))?,
    })
}

/// Opens the most recently created file for further appends, counting its
/// existing rows so rotation still happens at the configured cap across a
/// process restart.
fn open_existing_for_append(path: &Path) -> Result<ActiveFile, LedgerError> {
    let row_count = count_rows(path)?;

    let file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|source| LedgerError::Io {
            path: path.display().to_string(),
            source,
        })?;
    let writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

    Ok(ActiveFile { writer, row_count })
}

fn count_rows(path: &Path) -> Result<u64, LedgerError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|source| LedgerError::Read {
            path: path.display().to_string(),
            source,
        })?;
    Ok(reader.records().count() as u64)
}

/// Creates `<base>_<YYYYMMDD_HHMMSS>.csv` with the header row written,
/// disambiguating with a numeric suffix if a file with that second-precision
/// name already exists (e.g. two rotations within the same wall-clock
/// second). The disambiguated name still sorts lexically after the base
/// name, so replay order is preserved.
fn create_new_file(dir: &Path, base_name: &str) -> Result<ActiveFile, LedgerError> {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut path = dir.join(format!("{base_name}_{stamp}.csv"));
    let mut suffix = 2;
    while path.exists() {
        path = dir.join(format!("{base_name}_{stamp}_{suffix}.csv"));
        suffix += 1;
    }

    let file = File::create(&path).map_err(|source| LedgerError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    writer
        .write_record(CSV_HEADER)
        .map_err(|source| LedgerError::Write { source })?;
    writer
        .flush()
        .map_err(|source| LedgerError::Write { source: source.into() })?;

    Ok(ActiveFile {
        writer,
        row_count: 0,
    })
}
