use crate::model::{ExportRequest, ExportResponse};
use crate::stats::{DispatchStats, DispatchSummary};
use crate::submitter::ExportSubmitter;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{AcquireError, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch concurrency must be between 1 and {max}, got {got}")]
    InvalidConcurrency { got: usize, max: usize },

    #[error("permit pool closed while dispatching")]
    PoolClosed(#[from] AcquireError),
}

/// Keeps at most `concurrency` export calls in flight until cancelled, out of
/// time, or out of calls.
pub struct DispatchEngine {
    submitter: Arc<dyn ExportSubmitter>,
    concurrency: u32,
    max_calls: Option<u64>,
    stats: Arc<DispatchStats>,
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("submitter", &self.submitter.name())
            .field("concurrency", &self.concurrency)
            .field("max_calls", &self.max_calls)
            .finish()
    }
}

impl DispatchEngine {
    pub fn new(
        submitter: Arc<dyn ExportSubmitter>,
        concurrency: usize,
        stats: Arc<DispatchStats>,
    ) -> Result<Self, DispatchError> {
        let max = Semaphore::MAX_PERMITS.min(u32::MAX as usize);
        if concurrency == 0 || concurrency > max {
            return Err(DispatchError::InvalidConcurrency {
                got: concurrency,
                max,
            });
        }
        Ok(Self {
            submitter,
            concurrency: concurrency as u32,
            max_calls: None,
            stats,
        })
    }

    /// Stop issuing after `max_calls` calls in this run.
    pub fn with_max_calls(mut self, max_calls: u64) -> Self {
        self.max_calls = Some(max_calls);
        self
    }

    pub fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    /// Replay `payload` until `cancel` fires, `deadline` elapses or the call
    /// limit is reached, then wait for every in-flight call before returning.
    pub async fn run(
        &self,
        payload: Arc<ExportRequest>,
        cancel: CancellationToken,
        deadline: Option<Duration>,
    ) -> Result<DispatchSummary, DispatchError> {
        // The deadline cancels a child token so interrupt and timeout share
        // one stop path without the timer cancelling the caller's token.
        let stop = cancel.child_token();
        let timer = deadline.map(|deadline| arm_deadline(stop.clone(), deadline));

        let permits = Arc::new(Semaphore::new(self.concurrency as usize));
        let records_sent = payload.metric_count() as u64;
        let mut issued = 0u64;

        info!(
            submitter = self.submitter.name(),
            concurrency = self.concurrency,
            records_per_call = records_sent,
            deadline_ms = deadline.map(|d| d.as_millis() as u64),
            max_calls = self.max_calls,
            "Starting dispatch"
        );

        loop {
            if stop.is_cancelled() {
                break;
            }
            if matches!(self.max_calls, Some(max) if issued >= max) {
                debug!(issued, "Call limit reached");
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => permit?,
            };

            issued += 1;
            self.stats.record_issued();

            let submitter = Arc::clone(&self.submitter);
            let payload = Arc::clone(&payload);
            let stats = Arc::clone(&self.stats);
            tokio::spawn(async move {
                let start = Instant::now();
                // A panicking submitter still has to leave an outcome behind.
                let call = tokio::spawn(async move { submitter.export(&payload).await });
                let result = match call.await {
                    Ok(result) => result,
                    Err(e) => Err(anyhow::anyhow!("export task failed: {e}")),
                };
                let latency_ms = start.elapsed().as_millis() as u64;
                record_outcome(&stats, result, records_sent, latency_ms);
                drop(permit);
            });
        }

        info!(issued, "Dispatch stopped, waiting for in-flight calls to complete...");
        let _drained = permits.acquire_many(self.concurrency).await?;

        if let Some(timer) = timer {
            timer.abort();
        }

        Ok(self.stats.snapshot())
    }
}

fn arm_deadline(stop: CancellationToken, deadline: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = stop.cancelled() => {}
            _ = tokio::time::sleep(deadline) => {
                info!(deadline_ms = deadline.as_millis() as u64, "Run deadline elapsed");
                stop.cancel();
            }
        }
    })
}

fn record_outcome(
    stats: &DispatchStats,
    result: anyhow::Result<ExportResponse>,
    records_sent: u64,
    latency_ms: u64,
) {
    match result {
        Err(e) => {
            warn!("Export error: {:#}", e);
            stats.record_transport_error(format!("{e:#}"), latency_ms);
        }
        Ok(response) => match response.rejected() {
            Some(rejected) => {
                let message = response
                    .partial_success
                    .as_ref()
                    .map(|partial| partial.error_message.as_str())
                    .unwrap_or_default();
                stats.record_partial(
                    records_sent,
                    rejected,
                    format!("rejected {rejected} of {records_sent} records: {message}"),
                    latency_ms,
                );
            }
            None => stats.record_success(
                || format!("accepted {records_sent} records in {latency_ms}ms"),
                latency_ms,
            ),
        },
    }
}
