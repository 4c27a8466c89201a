//! The producer: walks the filter hierarchy depth-first, issuing a
//! single-result CHECK request at every node to decide whether to subdivide
//! further, enqueue the node as work, or prune it.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::{info, warn};

use crate::api_client::{total_profiles, ApiClient};
use crate::errors::PipelineError;
use crate::ledger::{EventLedger, QueryStatus};
use crate::parameters::{ParameterProvider, ParameterSet, STATIC_COUNTRY_LAYER};
use crate::telemetry::FailedRequestSink;

use super::queue::TrackedSender;
use super::types::WorkItem;

/// A query is workable once a CHECK reports fewer than this many matches;
/// at or above it, the query must be subdivided further (or, if already at
/// the deepest layer, is downloaded anyway and will simply lose any matches
/// past the API's own page-100 ceiling).
const SEARCH_CAP: u64 = 10_000;

pub struct Explorer {
    provider: ParameterProvider,
    ledger: Arc<EventLedger>,
    check_client: ApiClient,
    work_tx: TrackedSender<WorkItem>,
    failed_sink: Arc<FailedRequestSink>,
    dry_run: bool,
}

impl Explorer {
    #[must_use]
    pub fn new(
        provider: ParameterProvider,
        ledger: Arc<EventLedger>,
        check_client: ApiClient,
        work_tx: TrackedSender<WorkItem>,
        failed_sink: Arc<FailedRequestSink>,
        dry_run: bool,
    ) -> Self {
        Self {
            provider,
            ledger,
            check_client,
            work_tx,
            failed_sink,
            dry_run,
        }
    }

    /// Binds the static country clause and starts the traversal at layer 0.
    pub async fn run(&self) -> Result<(), PipelineError> {
        let root = ParameterSet::new()
            .with_bound(STATIC_COUNTRY_LAYER, self.provider.hierarchy().static_country.clone());
        self.explore(root, 0).await
    }

    fn explore<'a>(&'a self, current: ParameterSet, layer_index: usize) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let layers = &self.provider.hierarchy().layers;
            if layer_index == layers.len() {
                return Ok(());
            }

            let layer = layers[layer_index].clone();
            let is_last_layer = layer_index + 1 == layers.len();
            let values = self.provider.values_for_layer(&layer, &current);

            for value in values {
                let candidate = current.with_bound(&layer, value);
                self.visit(candidate, layer_index, is_last_layer).await?;
            }

            Ok(())
        })
    }

    async fn visit(
        &self,
        candidate: ParameterSet,
        layer_index: usize,
        is_last_layer: bool,
    ) -> Result<(), PipelineError> {
        let key = candidate.canonical_key();

        if let Some(state) = self.ledger.state_for(&key) {
            return self.resume(candidate, layer_index, state.status).await;
        }

        match self.check_client.search(1, 1, &candidate).await {
            Ok(response) => {
                let total = total_profiles(&response);
                let workable = total > 0 && total < SEARCH_CAP;
                self.ledger.log_check(&candidate, total, workable)?;

                if total == 0 {
                    return Ok(());
                }
                if workable {
                    self.enqueue(candidate, total).await;
                    return Ok(());
                }
                if is_last_layer {
                    info!(key = %key, total, "explorer: deepest layer still exceeds cap, downloading a capped best-effort set");
                    self.enqueue(candidate, SEARCH_CAP).await;
                } else {
                    self.explore(candidate, layer_index + 1).await?;
                }
                Ok(())
            }
            Err(err) => {
                warn!(key = %key, error = %err, "explorer: CHECK request failed permanently");
                self.failed_sink.record(&candidate, &err.to_string());
                self.ledger.mark_failed(&candidate, None)?;
                Ok(())
            }
        }
    }

    async fn resume(
        &self,
        candidate: ParameterSet,
        layer_index: usize,
        status: QueryStatus,
    ) -> Result<(), PipelineError> {
        match status {
            QueryStatus::Completed | QueryStatus::SkippedNoResult => Ok(()),
            QueryStatus::SkippedTooLarge => self.explore(candidate, layer_index + 1).await,
            QueryStatus::Pending | QueryStatus::InProgress | QueryStatus::Failed => {
                let state = self
                    .ledger
                    .state_for(&candidate.canonical_key())
                    .expect("state_for just returned Some for this key");
                self.enqueue(candidate, state.total_profiles).await;
                Ok(())
            }
        }
    }

    async fn enqueue(&self, params: ParameterSet, total_profiles: u64) {
        if self.dry_run {
            info!(key = %params.canonical_key(), total_profiles, "explorer: dry-run, not enqueuing");
            return;
        }
        if self
            .work_tx
            .send(WorkItem { params, total_profiles })
            .await
            .is_err()
        {
            warn!("explorer: work queue closed while enqueuing, downloader pool must have exited early");
        }
    }
}
