//! Messages passed between the producer, the downloader pool, the writer,
//! and the progress logger.

use serde_json::Value;

use crate::parameters::ParameterSet;

/// One unit of work: fetch every page of `params`, which a CHECK already
/// confirmed reports `total_profiles` matches.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub params: ParameterSet,
    pub total_profiles: u64,
}

/// A single downloaded page, on its way to disk.
#[derive(Debug, Clone)]
pub struct ResultItem {
    pub params: ParameterSet,
    pub page_number: u32,
    pub response: Value,
}

/// A ledger-relevant fact raised by a downloader as it works through a
/// query's pages.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    PageDownloaded { params: ParameterSet, page_number: u32 },
    Completed { params: ParameterSet },
    Failed { params: ParameterSet, failed_at_page: Option<u32> },
}
