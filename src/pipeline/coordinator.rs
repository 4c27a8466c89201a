//! Wires the producer, the downloader pool, the response writer, and the
//! progress logger together over bounded channels, then drains them in
//! order on the way out.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::api_client::ApiClient;
use crate::config::Config;
use crate::errors::{LedgerError, PipelineError};
use crate::ledger::EventLedger;
use crate::parameters::ParameterProvider;
use crate::response_writer::ResponseWriter;
use crate::telemetry::FailedRequestSink;

use super::downloader::Downloader;
use super::explorer::Explorer;
use super::queue;
use super::types::{ProgressEvent, ResultItem, WorkItem};

/// Work queue depth: the producer outruns the downloader pool by this many
/// queries before it blocks, bounding memory use during a deep fan-out.
const WORK_QUEUE_CAPACITY: usize = 1000;
/// Results queue depth: downloaders outrun the single writer by this many
/// pages before they block.
const RESULTS_QUEUE_CAPACITY: usize = 50;

const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Pipeline {
    config: Config,
    ledger: Arc<EventLedger>,
    provider: ParameterProvider,
    failed_sink: Arc<FailedRequestSink>,
    threads: usize,
    dry_run: bool,
}

impl Pipeline {
    pub fn new(config: Config, threads: usize, dry_run: bool) -> Result<Self, PipelineError> {
        let ledger = Arc::new(EventLedger::open(&config.ledger_dir, &config.ledger_base_name)?);
        let provider = ParameterProvider::new(config.hierarchy.clone());
        let failed_sink = Arc::new(FailedRequestSink::open(&config.failed_request_log_path)?);

        Ok(Self {
            config,
            ledger,
            provider,
            failed_sink,
            threads: threads.max(1),
            dry_run,
        })
    }

    /// Runs the pipeline to completion: spawns the producer, the downloader
    /// pool, the writer, and the progress logger; waits for the producer (or
    /// an external interrupt) to finish exploring; then drains every queue
    /// in order, closing each one only once everything sent on it has been
    /// fully processed, before joining the workers that read it.
    pub async fn run(self) -> Result<(), PipelineError> {
        let (work_tx, work_rx) = queue::bounded::<WorkItem>(WORK_QUEUE_CAPACITY);
        let (results_tx, results_rx) = queue::bounded::<ResultItem>(RESULTS_QUEUE_CAPACITY);
        let (progress_tx, progress_rx) = queue::unbounded::<ProgressEvent>();

        let writer = ResponseWriter::new(self.config.output_dir.clone());
        let writer_handle = tokio::spawn(run_writer(writer, results_rx));
        let mut progress_handle = tokio::spawn(run_progress_logger(self.ledger.clone(), progress_rx));

        let mut downloader_handles = Vec::with_capacity(self.threads);
        for id in 0..self.threads {
            let downloader = Downloader::new(
                ApiClient::new(self.config.base_url.clone(), self.config.api_key.clone()),
                self.ledger.clone(),
                results_tx.clone(),
                progress_tx.clone(),
                self.failed_sink.clone(),
            );
            let rx = work_rx.clone();
            downloader_handles.push(tokio::spawn(async move {
                downloader.run(rx).await;
                info!(downloader = id, "pipeline: downloader exited");
            }));
        }
        drop(work_rx);

        let explorer = Explorer::new(
            self.provider.clone(),
            self.ledger.clone(),
            ApiClient::new(self.config.base_url.clone(), self.config.api_key.clone()),
            work_tx.clone(),
            self.failed_sink.clone(),
            self.dry_run,
        );

        let explore_result = tokio::select! {
            result = explorer.run() => {
                info!("pipeline: exploration finished");
                Some(result)
            }
            _ = shutdown_signal() => {
                warn!("pipeline: interrupt received, stopping exploration early");
                None
            }
        };
        // Explorer holds its own work_tx clone; it must be dropped before we
        // drop the coordinator's clone below, or the channel never closes.
        drop(explorer);
        if let Some(result) = explore_result {
            result?;
        }

        work_tx.wait_drained().await;
        drop(work_tx);
        info!("pipeline: work queue drained, waiting for downloaders to exit");

        for handle in downloader_handles {
            if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, handle).await.is_err() {
                warn!("pipeline: downloader did not exit within the shutdown timeout");
            }
        }

        results_tx.wait_drained().await;
        drop(results_tx);
        info!("pipeline: results queue drained");

        // A ledger write failure makes run_progress_logger return early
        // (see its doc comment) without marking every in-flight event done,
        // so plain wait_drained() would then block forever. Race the drain
        // against the logger's own exit so that case aborts the run instead.
        tokio::select! {
            _ = progress_tx.wait_drained() => {
                drop(progress_tx);
            }
            join_result = &mut progress_handle => {
                drop(progress_tx);
                return match join_result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(ledger_err)) => Err(PipelineError::from(ledger_err)),
                    Err(join_err) => Err(PipelineError::Join(join_err)),
                };
            }
        }
        info!("pipeline: progress queue drained");

        let _ = tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, writer_handle).await;
        match tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, progress_handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(ledger_err))) => return Err(PipelineError::from(ledger_err)),
            Ok(Err(join_err)) => return Err(PipelineError::Join(join_err)),
            Err(_) => warn!("pipeline: progress logger did not exit within the shutdown timeout"),
        }

        info!("pipeline: shutdown complete");
        Ok(())
    }
}

async fn run_writer(writer: ResponseWriter, results_rx: queue::TrackedReceiver<ResultItem>) {
    while let Some(done) = results_rx.recv().await {
        let item = done.into_inner();
        if let Err(err) = writer.write(&item.response).await {
            warn!(
                key = %item.params.canonical_key(),
                page = item.page_number,
                error = %err,
                "pipeline: failed to persist a downloaded page"
            );
        }
    }
}

/// A ledger write failure means the source of truth can no longer be
/// trusted to resume correctly, so it is treated as fatal: this task exits
/// early with the error instead of continuing to drain the queue, and the
/// coordinator propagates it as the run's result (see the `select!` around
/// `progress_tx.wait_drained()` in [`Pipeline::run`]).
async fn run_progress_logger(
    ledger: Arc<EventLedger>,
    progress_rx: queue::TrackedReceiver<ProgressEvent>,
) -> Result<(), LedgerError> {
    while let Some(done) = progress_rx.recv().await {
        let event = done.into_inner();
        match &event {
            ProgressEvent::PageDownloaded { params, page_number } => {
                ledger.update_page_progress(params, *page_number)
            }
            ProgressEvent::Completed { params } => ledger.mark_completed(params),
            ProgressEvent::Failed { params, failed_at_page } => {
                ledger.mark_failed(params, *failed_at_page)
            }
        }?;
    }
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
