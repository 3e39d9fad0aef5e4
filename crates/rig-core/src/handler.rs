use crate::cache::{CacheError, CacheRecord, OutcomeCache};
use crate::model::{ExportRequest, ExportResponse, PartialSuccess};
use std::sync::Arc;
use tracing::{debug, info};

/// Message reported for a batch containing at least one malformed record.
pub const MALFORMED_METRIC_MESSAGE: &str = "found malformed metric record";

/// Default number of outcomes retained per cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Success,
    /// `message` describes the last malformed record seen, not every one.
    PartialFailure { rejected: u64, message: String },
}

impl ExportOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExportOutcome::Success)
    }
}

impl From<ExportOutcome> for ExportResponse {
    fn from(outcome: ExportOutcome) -> Self {
        match outcome {
            ExportOutcome::Success => ExportResponse::default(),
            ExportOutcome::PartialFailure { rejected, message } => ExportResponse {
                partial_success: Some(PartialSuccess {
                    rejected_data_points: i64::try_from(rejected).unwrap_or(i64::MAX),
                    error_message: message,
                }),
            },
        }
    }
}

/// Validates inbound export batches and remembers recent outcomes.
///
/// Safe to share across concurrently running request handlers; the only
/// shared state is the two caches.
#[derive(Debug, Clone)]
pub struct IngestionHandler {
    success: Arc<OutcomeCache>,
    failure: Arc<OutcomeCache>,
}

impl IngestionHandler {
    pub fn new(success: Arc<OutcomeCache>, failure: Arc<OutcomeCache>) -> Self {
        Self { success, failure }
    }

    pub fn with_capacity(capacity: usize) -> Result<Self, CacheError> {
        Ok(Self::new(
            Arc::new(OutcomeCache::new(capacity)?),
            Arc::new(OutcomeCache::new(capacity)?),
        ))
    }

    pub fn success_cache(&self) -> &Arc<OutcomeCache> {
        &self.success
    }

    pub fn failure_cache(&self) -> &Arc<OutcomeCache> {
        &self.failure
    }

    /// Scan every record in declared order, then file the request into
    /// exactly one cache according to the outcome.
    pub fn handle(&self, request: Arc<ExportRequest>) -> ExportOutcome {
        let mut rejected = 0u64;
        let mut message = None;

        for metric in request.metrics() {
            if !metric.is_well_formed() {
                rejected += 1;
                message = Some(MALFORMED_METRIC_MESSAGE);
            }
        }

        debug!(
            metrics = request.metric_count(),
            rejected, "Scanned export request"
        );

        let record = CacheRecord::now(Arc::clone(&request));
        match message {
            None => {
                self.success.enqueue(record);
                ExportOutcome::Success
            }
            Some(message) => {
                info!(rejected, "Export request partially rejected");
                self.failure.enqueue(record);
                ExportOutcome::PartialFailure {
                    rejected,
                    message: message.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataKind, Metric, ResourceMetrics, ScopeMetrics};

    fn handler() -> IngestionHandler {
        IngestionHandler::with_capacity(DEFAULT_CACHE_CAPACITY).unwrap()
    }

    fn good(name: &str) -> Metric {
        Metric::new(name, "desc", "unit", Some(DataKind::Sum))
    }

    fn contains(cache: &OutcomeCache, request: &Arc<ExportRequest>) -> bool {
        cache
            .snapshot()
            .iter()
            .any(|record| Arc::ptr_eq(&record.request, request))
    }

    #[test]
    fn test_valid_request_is_success() {
        let handler = handler();
        let request = Arc::new(ExportRequest::single_scope(vec![good("m1"), good("m2")]));

        let outcome = handler.handle(Arc::clone(&request));

        assert_eq!(outcome, ExportOutcome::Success);
        assert!(contains(handler.success_cache(), &request));
        assert!(!contains(handler.failure_cache(), &request));
        assert_eq!(ExportResponse::from(outcome), ExportResponse::default());
    }

    #[test]
    fn test_empty_unit_is_partial_failure() {
        let handler = handler();
        let request = Arc::new(ExportRequest::single_scope(vec![
            good("m1"),
            Metric::new("m2", "desc", "", Some(DataKind::Gauge)),
        ]));

        let outcome = handler.handle(Arc::clone(&request));

        assert_eq!(
            outcome,
            ExportOutcome::PartialFailure {
                rejected: 1,
                message: MALFORMED_METRIC_MESSAGE.to_string(),
            }
        );
        assert!(contains(handler.failure_cache(), &request));
        assert!(!contains(handler.success_cache(), &request));
    }

    #[test]
    fn test_empty_metric_reports_wire_shape() {
        let handler = handler();
        let request = Arc::new(ExportRequest::single_scope(vec![Metric::default()]));

        let response = ExportResponse::from(handler.handle(request));
        let partial = response.partial_success.unwrap();
        assert_eq!(partial.rejected_data_points, 1);
        assert_eq!(partial.error_message, MALFORMED_METRIC_MESSAGE);
    }

    #[test]
    fn test_rejections_counted_across_groups() {
        let handler = handler();
        let scope = |metrics| ScopeMetrics {
            metrics,
            ..ScopeMetrics::default()
        };
        let request = ExportRequest {
            resource_metrics: vec![
                ResourceMetrics {
                    scope_metrics: vec![
                        scope(vec![good("a"), Metric::new("", "d", "u", Some(DataKind::Sum))]),
                        scope(vec![Metric::new("b", "", "u", Some(DataKind::Sum))]),
                    ],
                    ..ResourceMetrics::default()
                },
                ResourceMetrics {
                    scope_metrics: vec![scope(vec![
                        Metric::new("c", "d", "u", None),
                        good("d"),
                    ])],
                    ..ResourceMetrics::default()
                },
            ],
        };

        let outcome = handler.handle(Arc::new(request));
        assert!(matches!(
            outcome,
            ExportOutcome::PartialFailure { rejected: 3, .. }
        ));
    }

    #[test]
    fn test_each_call_enqueues_exactly_once() {
        let handler = handler();
        for i in 0..4 {
            let metrics = if i % 2 == 0 {
                vec![good("ok")]
            } else {
                vec![Metric::default()]
            };
            handler.handle(Arc::new(ExportRequest::single_scope(metrics)));
        }
        assert_eq!(handler.success_cache().len(), 2);
        assert_eq!(handler.failure_cache().len(), 2);
    }

    #[test]
    fn test_sample_payloads() {
        let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../payloads");
        let handler = handler();

        let valid = ExportRequest::from_file(dir.join("valid_request.json")).unwrap();
        assert!(handler.handle(Arc::new(valid)).is_success());

        let invalid = ExportRequest::from_file(dir.join("invalid_request.json")).unwrap();
        assert!(matches!(
            handler.handle(Arc::new(invalid)),
            ExportOutcome::PartialFailure { rejected: 2, .. }
        ));
    }

    #[test]
    fn test_empty_request_is_success() {
        let handler = handler();
        assert!(handler.handle(Arc::new(ExportRequest::default())).is_success());
        assert_eq!(handler.success_cache().len(), 1);
    }
}
