use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading an export payload before any call is made.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("failed to read payload file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("payload does not decode as an export request: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One batch of metric data: resource groups -> scope groups -> metric records.
///
/// Field names follow the OTLP/JSON encoding so payload files produced by
/// other OTLP tooling can be replayed unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    #[serde(default)]
    pub resource_metrics: Vec<ResourceMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    #[serde(default)]
    pub scope_metrics: Vec<ScopeMetrics>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schema_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Value>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schema_url: String,
}

/// A single metric record. The data body is carried opaquely; only its
/// presence (and which kind it is) matters to ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gauge: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub histogram: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exponential_histogram: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Gauge,
    Sum,
    Histogram,
    ExponentialHistogram,
    Summary,
}

impl Metric {
    /// Build a record whose data body of `kind` is an empty object.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        kind: Option<DataKind>,
    ) -> Self {
        let mut metric = Self {
            name: name.into(),
            description: description.into(),
            unit: unit.into(),
            ..Self::default()
        };
        if let Some(kind) = kind {
            let body = Some(Value::Object(Default::default()));
            match kind {
                DataKind::Gauge => metric.gauge = body,
                DataKind::Sum => metric.sum = body,
                DataKind::Histogram => metric.histogram = body,
                DataKind::ExponentialHistogram => metric.exponential_histogram = body,
                DataKind::Summary => metric.summary = body,
            }
        }
        metric
    }

    /// The data kind carried by this record, `None` when no data body is set.
    pub fn data_kind(&self) -> Option<DataKind> {
        [
            (&self.gauge, DataKind::Gauge),
            (&self.sum, DataKind::Sum),
            (&self.histogram, DataKind::Histogram),
            (&self.exponential_histogram, DataKind::ExponentialHistogram),
            (&self.summary, DataKind::Summary),
        ]
        .into_iter()
        .find_map(|(body, kind)| body.as_ref().map(|_| kind))
    }

    /// Name, description, unit and data kind must all be present.
    pub fn is_well_formed(&self) -> bool {
        !self.name.is_empty()
            && !self.description.is_empty()
            && !self.unit.is_empty()
            && self.data_kind().is_some()
    }
}

impl ExportRequest {
    /// Wrap `metrics` into a single resource group with a single scope group.
    pub fn single_scope(metrics: Vec<Metric>) -> Self {
        Self {
            resource_metrics: vec![ResourceMetrics {
                scope_metrics: vec![ScopeMetrics {
                    metrics,
                    ..ScopeMetrics::default()
                }],
                ..ResourceMetrics::default()
            }],
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, PayloadError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PayloadError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| PayloadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Every metric record in declared order: resource group, then scope
    /// group, then record.
    pub fn metrics(&self) -> impl Iterator<Item = &Metric> {
        self.resource_metrics
            .iter()
            .flat_map(|resource| resource.scope_metrics.iter())
            .flat_map(|scope| scope.metrics.iter())
    }

    pub fn metric_count(&self) -> usize {
        self.metrics().count()
    }

    pub fn scope_count(&self) -> usize {
        self.resource_metrics
            .iter()
            .map(|resource| resource.scope_metrics.len())
            .sum()
    }
}

/// Body returned by an export call. An empty body means full success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_success: Option<PartialSuccess>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialSuccess {
    #[serde(default)]
    pub rejected_data_points: i64,
    #[serde(default)]
    pub error_message: String,
}

impl ExportResponse {
    /// Rejected record count, if the endpoint reported any rejection.
    pub fn rejected(&self) -> Option<u64> {
        self.partial_success
            .as_ref()
            .map(|partial| partial.rejected_data_points.max(0) as u64)
            .filter(|rejected| *rejected > 0)
    }
}
