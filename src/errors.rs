//! Shared error taxonomy.
//!
//! Each subsystem gets its own `thiserror`-derived enum carrying enough
//! context (parameters key, page number, HTTP status, path) to produce a
//! useful log line on its own. Errors that cross a subsystem boundary convert
//! via `#[from]` into the caller's error type instead of being stringified.

use miette::Diagnostic;
use thiserror::Error;

/// Startup configuration failures. Fatal: surfaced before any component is
/// constructed.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("missing required environment variable: {name}")]
    #[diagnostic(
        code(profile_crawler::config::missing_env),
        help("Set `{name}` in the environment or in a `.env` file.")
    )]
    MissingEnv { name: &'static str },

    #[error("failed to read hierarchy file at {path}")]
    #[diagnostic(code(profile_crawler::config::hierarchy_io))]
    HierarchyIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("hierarchy file at {path} is not valid JSON")]
    #[diagnostic(code(profile_crawler::config::hierarchy_parse))]
    HierarchyParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("hierarchy table is malformed: {message}")]
    #[diagnostic(code(profile_crawler::config::hierarchy_invalid))]
    HierarchyInvalid { message: String },
}

/// Errors from a single search API call.
#[derive(Debug, Error, Diagnostic)]
pub enum ApiClientError {
    /// Precondition violation (page bounds). Fatal to the call, not the pipeline.
    #[error("invalid argument: {message}")]
    #[diagnostic(code(profile_crawler::api_client::invalid_argument))]
    InvalidArgument { message: String },

    /// 5xx or a connect/body timeout, exhausted after retries.
    #[error("transient remote error after {attempts} attempt(s): {message}")]
    #[diagnostic(code(profile_crawler::api_client::transient))]
    Transient { attempts: u32, message: String },

    /// 4xx or any non-timeout network failure. Not retried.
    #[error("permanent remote error (status {status:?}): {message}")]
    #[diagnostic(code(profile_crawler::api_client::permanent))]
    Permanent {
        status: Option<u16>,
        message: String,
    },

    /// Response body could not be parsed as JSON.
    #[error("failed to decode response body: {0}")]
    #[diagnostic(code(profile_crawler::api_client::decode))]
    Decode(#[source] serde_json::Error),
}

/// Errors from the append-only event ledger. Treated as fatal: the ledger is
/// the source of truth and a broken ledger cannot be trusted to resume from.
#[derive(Debug, Error, Diagnostic)]
pub enum LedgerError {
    #[error("failed to open ledger file {path}")]
    #[diagnostic(code(profile_crawler::ledger::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read ledger file {path}")]
    #[diagnostic(code(profile_crawler::ledger::read))]
    Read {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("failed to append ledger row: {source}")]
    #[diagnostic(code(profile_crawler::ledger::write))]
    Write {
        #[source]
        source: csv::Error,
    },

    #[error("ledger row at {path}:{line} is malformed: {message}")]
    #[diagnostic(code(profile_crawler::ledger::malformed_row))]
    MalformedRow {
        path: String,
        line: u64,
        message: String,
    },

    /// An invariant of the event fold was violated. This indicates a bug in
    /// the fold implementation, not a data problem.
    #[error("ledger invariant violated: {0}")]
    #[diagnostic(code(profile_crawler::ledger::invariant))]
    Invariant(String),
}

/// Errors writing a single response file. Never fatal to the pipeline: a
/// failed write is logged and the emission is dropped.
#[derive(Debug, Error, Diagnostic)]
pub enum WriterError {
    #[error("failed to create output directory {path}")]
    #[diagnostic(code(profile_crawler::writer::create_dir))]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write response file {path}")]
    #[diagnostic(code(profile_crawler::writer::write))]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize response body: {0}")]
    #[diagnostic(code(profile_crawler::writer::serialize))]
    Serialize(#[source] serde_json::Error),
}

/// Top-level pipeline errors: anything that should abort the whole run.
#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ledger(#[from] LedgerError),

    #[error("failed to join worker task: {0}")]
    #[diagnostic(code(profile_crawler::pipeline::join))]
    Join(#[from] tokio::task::JoinError),

    #[error("failed to initialize failed-request log at {path}")]
    #[diagnostic(code(profile_crawler::pipeline::failed_log_init))]
    FailedLogInit {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
