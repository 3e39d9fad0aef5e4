use axum::extract::{Path, Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rig_core::{BuildVersion, CacheRecord, ExportRequest, ExportResponse, IngestionHandler};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AppState {
    pub handler: IngestionHandler,
    pub version: BuildVersion,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/metrics", post(export))
        .route("/version", get(version))
        .route("/health", get(health))
        .route("/debug/cache/{kind}", get(cache_view))
        .layer(middleware::from_fn(log_latency))
        .with_state(state)
}

async fn export(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> Json<ExportResponse> {
    let outcome = state.handler.handle(Arc::new(request));
    Json(outcome.into())
}

async fn version(State(state): State<AppState>) -> Json<BuildVersion> {
    Json(state.version)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
enum CacheKind {
    Success,
    Failure,
}

#[derive(Debug, Default, Deserialize)]
struct CacheQuery {
    /// Embed the full cached requests, not just their shape.
    #[serde(default)]
    requests: bool,
}

#[derive(Debug, Serialize)]
struct CacheView {
    kind: CacheKind,
    capacity: usize,
    len: usize,
    first: Option<RecordView>,
    last: Option<RecordView>,
    records: Vec<RecordView>,
}

#[derive(Debug, Serialize)]
struct RecordView {
    timestamp: DateTime<Utc>,
    resource_groups: usize,
    scope_groups: usize,
    metrics: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    request: Option<ExportRequest>,
}

impl RecordView {
    fn new(record: &CacheRecord, with_request: bool) -> Self {
        Self {
            timestamp: record.timestamp,
            resource_groups: record.request.resource_metrics.len(),
            scope_groups: record.request.scope_count(),
            metrics: record.request.metric_count(),
            request: with_request.then(|| (*record.request).clone()),
        }
    }
}

async fn cache_view(
    State(state): State<AppState>,
    Path(kind): Path<CacheKind>,
    Query(query): Query<CacheQuery>,
) -> Json<CacheView> {
    let cache = match kind {
        CacheKind::Success => state.handler.success_cache(),
        CacheKind::Failure => state.handler.failure_cache(),
    };

    // One snapshot so first/last/records agree with each other.
    let records: Vec<RecordView> = cache
        .snapshot()
        .iter()
        .map(|record| RecordView::new(record, query.requests))
        .collect();
    let first = records.first().map(|view| RecordView {
        request: None,
        ..*view
    });
    let last = records.last().map(|view| RecordView {
        request: None,
        ..*view
    });

    Json(CacheView {
        kind,
        capacity: cache.capacity(),
        len: records.len(),
        first,
        last,
        records,
    })
}

async fn log_latency(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let start = Instant::now();

    let response = next.run(request).await;

    debug!(
        %method,
        path,
        status = response.status().as_u16(),
        latency_us = start.elapsed().as_micros() as u64,
        "Request processed"
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, StatusCode};
    use rig_core::{DataKind, Metric, MALFORMED_METRIC_MESSAGE};
    use tower::ServiceExt;

    fn app() -> (Router, IngestionHandler) {
        let handler = IngestionHandler::with_capacity(3).unwrap();
        let state = AppState {
            handler: handler.clone(),
            version: BuildVersion::from_parts("abc123", "2024-05-19T13:17:37"),
        };
        (router(state), handler)
    }

    fn export_request(request: &ExportRequest) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/v1/metrics")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(request).unwrap()))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_export_full_success() {
        let (app, handler) = app();
        let request =
            ExportRequest::single_scope(vec![Metric::new("m", "d", "u", Some(DataKind::Sum))]);

        let response = app.oneshot(export_request(&request)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, serde_json::json!({}));
        assert_eq!(handler.success_cache().len(), 1);
        assert!(handler.failure_cache().is_empty());
    }

    #[tokio::test]
    async fn test_export_partial_failure() {
        let (app, handler) = app();
        let request = ExportRequest::single_scope(vec![
            Metric::new("m", "d", "u", Some(DataKind::Sum)),
            Metric::new("m2", "d", "", Some(DataKind::Gauge)),
        ]);

        let response = app.oneshot(export_request(&request)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["partialSuccess"]["rejectedDataPoints"], 1);
        assert_eq!(
            body["partialSuccess"]["errorMessage"],
            MALFORMED_METRIC_MESSAGE
        );
        assert_eq!(handler.failure_cache().len(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_rejected() {
        let (app, handler) = app();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/v1/metrics")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{ not json"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert!(response.status().is_client_error());
        assert!(handler.success_cache().is_empty());
        assert!(handler.failure_cache().is_empty());
    }

    #[tokio::test]
    async fn test_version() {
        let (app, _) = app();
        let request = Request::builder()
            .uri("/version")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["gitCommitSha"], "abc123");
        assert_eq!(body["buildTimestamp"], 1716124657);
    }

    #[tokio::test]
    async fn test_cache_view_oldest_first() {
        let (app, _) = app();
        for i in 0..4 {
            let metrics = (0..=i)
                .map(|j| Metric::new(format!("m{j}"), "d", "u", Some(DataKind::Gauge)))
                .collect();
            let response = app
                .clone()
                .oneshot(export_request(&ExportRequest::single_scope(metrics)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let request = Request::builder()
            .uri("/debug/cache/success")
            .body(Body::empty())
            .unwrap();
        let body = json_body(app.oneshot(request).await.unwrap()).await;

        assert_eq!(body["capacity"], 3);
        assert_eq!(body["len"], 3);
        let metrics: Vec<_> = body["records"]
            .as_array()
            .unwrap()
            .iter()
            .map(|record| record["metrics"].as_u64().unwrap())
            .collect();
        assert_eq!(metrics, vec![2, 3, 4]);
        assert_eq!(body["first"]["metrics"], 2);
        assert_eq!(body["last"]["metrics"], 4);
        assert!(body["records"][0].get("request").is_none());
    }

    #[tokio::test]
    async fn test_cache_view_embeds_requests() {
        let (app, _) = app();
        let request = ExportRequest::single_scope(vec![Metric::default()]);
        app.clone().oneshot(export_request(&request)).await.unwrap();

        let view = Request::builder()
            .uri("/debug/cache/failure?requests=true")
            .body(Body::empty())
            .unwrap();
        let body = json_body(app.oneshot(view).await.unwrap()).await;

        assert_eq!(body["kind"], "failure");
        assert!(body["records"][0]["request"]["resourceMetrics"].is_array());
    }

    #[tokio::test]
    async fn test_unknown_cache_kind() {
        let (app, _) = app();
        let request = Request::builder()
            .uri("/debug/cache/everything")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
