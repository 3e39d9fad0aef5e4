use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// One bucket per millisecond; the last bucket absorbs everything slower.
const LATENCY_BUCKETS: usize = 1_000;

/// Aggregate counters for one dispatch run.
///
/// Every in-flight call writes here concurrently, so counters are atomics and
/// the failure details sit behind their own small locks.
#[derive(Debug)]
pub struct DispatchStats {
    issued: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    ok_calls: AtomicU64,
    partial_responses: AtomicU64,
    transport_errors: AtomicU64,
    first_failure: OnceLock<String>,
    last_failure: Mutex<Option<String>>,
    first_success: OnceLock<String>,
    latency_buckets: Vec<AtomicU64>,
    start_time: Instant,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self {
            issued: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            ok_calls: AtomicU64::new(0),
            partial_responses: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            first_failure: OnceLock::new(),
            last_failure: Mutex::new(None),
            first_success: OnceLock::new(),
            latency_buckets: (0..LATENCY_BUCKETS).map(|_| AtomicU64::new(0)).collect(),
            start_time: Instant::now(),
        }
    }

    pub fn record_issued(&self) {
        self.issued.fetch_add(1, Ordering::Relaxed);
    }

    /// The call never produced a response.
    pub fn record_transport_error(&self, detail: String, latency_ms: u64) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
        self.record_failure_detail(detail);
        self.record_latency(latency_ms);
    }

    /// The endpoint rejected `rejected` of the `sent` records.
    pub fn record_partial(&self, sent: u64, rejected: u64, detail: String, latency_ms: u64) {
        self.failed.fetch_add(rejected, Ordering::Relaxed);
        self.succeeded
            .fetch_add(sent.saturating_sub(rejected), Ordering::Relaxed);
        self.partial_responses.fetch_add(1, Ordering::Relaxed);
        self.record_failure_detail(detail);
        self.record_latency(latency_ms);
    }

    /// `detail` is only evaluated for the first success of the run.
    pub fn record_success(&self, detail: impl FnOnce() -> String, latency_ms: u64) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.ok_calls.fetch_add(1, Ordering::Relaxed);
        if self.first_success.get().is_none() {
            let _ = self.first_success.set(detail());
        }
        self.record_latency(latency_ms);
    }

    fn record_failure_detail(&self, detail: String) {
        if self.first_failure.get().is_none() {
            let _ = self.first_failure.set(detail.clone());
        }
        *self.last_failure.lock() = Some(detail);
    }

    fn record_latency(&self, latency_ms: u64) {
        let bucket_idx = latency_ms.min((LATENCY_BUCKETS - 1) as u64) as usize;
        self.latency_buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    /// Calculate percentile from histogram (integer ms)
    pub fn percentile(&self, p: u64) -> u64 {
        let counts: Vec<u64> = self
            .latency_buckets
            .iter()
            .map(|bucket| bucket.load(Ordering::Relaxed))
            .collect();
        let total: u64 = counts.iter().sum();
        if total == 0 {
            return 0;
        }

        let target = (total * p).div_ceil(100);
        let mut cumulative = 0u64;

        for (bucket_idx, count) in counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return bucket_idx as u64;
            }
        }

        counts.len() as u64
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn snapshot(&self) -> DispatchSummary {
        DispatchSummary {
            issued: self.issued.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            ok_calls: self.ok_calls.load(Ordering::Relaxed),
            partial_responses: self.partial_responses.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            first_failure: self.first_failure.get().cloned(),
            last_failure: self.last_failure.lock().clone(),
            first_success: self.first_success.get().cloned(),
            latency_p50_ms: self.percentile(50),
            latency_p95_ms: self.percentile(95),
            latency_p99_ms: self.percentile(99),
            duration_ms: self.elapsed_ms(),
        }
    }
}

impl Default for DispatchStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`DispatchStats`].
///
/// `succeeded`/`failed` count records; `ok_calls`, `partial_responses` and
/// `transport_errors` count calls and add up to `issued` once the run has drained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub issued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub ok_calls: u64,
    pub partial_responses: u64,
    pub transport_errors: u64,
    pub first_failure: Option<String>,
    pub last_failure: Option<String>,
    pub first_success: Option<String>,
    pub latency_p50_ms: u64,
    pub latency_p95_ms: u64,
    pub latency_p99_ms: u64,
    pub duration_ms: u64,
}

impl DispatchSummary {
    pub fn completed_calls(&self) -> u64 {
        self.ok_calls + self.partial_responses + self.transport_errors
    }
}
