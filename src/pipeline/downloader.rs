//! Downloader worker: pulls `WorkItem`s off the shared work queue and walks
//! every page of the query, resuming from wherever the ledger last left off.

use std::sync::Arc;

use tracing::warn;

use crate::api_client::ApiClient;
use crate::ledger::EventLedger;
use crate::parameters::ParameterSet;
use crate::telemetry::FailedRequestSink;

use super::queue::{TrackedReceiver, TrackedSender};
use super::types::{ProgressEvent, ResultItem, WorkItem};

const PAGE_SIZE: u32 = 100;
const MAX_PAGES: u32 = 100;
/// The API never returns more than this many matches for a single query,
/// regardless of what a CHECK's reported total says; pagination is always
/// computed against this ceiling.
const SEARCH_CAP: u64 = 10_000;

pub struct Downloader {
    api_client: ApiClient,
    ledger: Arc<EventLedger>,
    results_tx: TrackedSender<ResultItem>,
    progress_tx: TrackedSender<ProgressEvent>,
    failed_sink: Arc<FailedRequestSink>,
}

impl Downloader {
    #[must_use]
    pub fn new(
        api_client: ApiClient,
        ledger: Arc<EventLedger>,
        results_tx: TrackedSender<ResultItem>,
        progress_tx: TrackedSender<ProgressEvent>,
        failed_sink: Arc<FailedRequestSink>,
    ) -> Self {
        Self {
            api_client,
            ledger,
            results_tx,
            progress_tx,
            failed_sink,
        }
    }

    /// Consumes work items until the queue is closed (the producer has
    /// finished and the coordinator has dropped its sender).
    pub async fn run(self, work_rx: TrackedReceiver<WorkItem>) {
        while let Some(done) = work_rx.recv().await {
            let item = done.into_inner();
            self.fetch_all(item.params, item.total_profiles).await;
        }
    }

    async fn fetch_all(&self, params: ParameterSet, total_profiles: u64) {
        let total_profiles = total_profiles.min(SEARCH_CAP);
        let last_page = last_page_for(total_profiles);
        let start_page = self
            .ledger
            .state_for(&params.canonical_key())
            .map(|s| s.last_completed_page + 1)
            .unwrap_or(1);

        for page_number in start_page..=last_page {
            let page_size = effective_page_size(total_profiles, page_number, last_page);
            match self.api_client.search(page_number, page_size, &params).await {
                Ok(response) => {
                    if self
                        .results_tx
                        .send(ResultItem {
                            params: params.clone(),
                            page_number,
                            response,
                        })
                        .await
                        .is_err()
                    {
                        warn!("downloader: results queue closed mid-run");
                        return;
                    }
                    if self
                        .progress_tx
                        .send(ProgressEvent::PageDownloaded {
                            params: params.clone(),
                            page_number,
                        })
                        .await
                        .is_err()
                    {
                        warn!("downloader: progress queue closed mid-run");
                        return;
                    }
                }
                Err(err) => {
                    self.failed_sink.record(&params, &err.to_string());
                    let _ = self
                        .progress_tx
                        .send(ProgressEvent::Failed {
                            params: params.clone(),
                            failed_at_page: Some(page_number),
                        })
                        .await;
                    return;
                }
            }
        }

        let _ = self
            .progress_tx
            .send(ProgressEvent::Completed { params })
            .await;
    }
}

/// Number of pages to fetch for a query reporting `total_profiles` matches,
/// clamped to the API's 100-page ceiling.
fn last_page_for(total_profiles: u64) -> u32 {
    if total_profiles == 0 {
        return 0;
    }
    let pages = total_profiles.div_ceil(u64::from(PAGE_SIZE));
    u32::try_from(pages).unwrap_or(MAX_PAGES).min(MAX_PAGES)
}

/// `PAGE_SIZE` for every page except the last, which only requests the
/// remainder (or a full page if it divides evenly).
fn effective_page_size(total_profiles: u64, page_number: u32, last_page: u32) -> u32 {
    if page_number != last_page {
        return PAGE_SIZE;
    }
    let remainder = total_profiles % u64::from(PAGE_SIZE);
    if remainder == 0 {
        PAGE_SIZE
    } else {
        u32::try_from(remainder).unwrap_or(PAGE_SIZE)
    }
}
