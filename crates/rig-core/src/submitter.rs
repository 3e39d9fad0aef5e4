use crate::config::ClientTlsConfig;
use crate::handler::MALFORMED_METRIC_MESSAGE;
use crate::model::{ExportRequest, ExportResponse, PartialSuccess};
use crate::version::BuildVersion;
use anyhow::{Context, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use url::Url;

pub type SubmitFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Trait for export transport adapters
pub trait ExportSubmitter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver one export call. `Err` means no response was obtained.
    fn export<'a>(&'a self, request: &'a ExportRequest) -> SubmitFuture<'a, ExportResponse>;

    fn version(&self) -> SubmitFuture<'_, BuildVersion>;
}

/// Mock submitter with configurable delay and a deterministic failure cadence
pub struct MockSubmitter {
    delay_ms: u64,
    failure_every: Option<u64>,
    partial_every: Option<(u64, i64)>,
    calls: AtomicU64,
}

impl MockSubmitter {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            failure_every: None,
            partial_every: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Every `n`th call fails without a response.
    pub fn with_failure_every(mut self, n: u64) -> Self {
        self.failure_every = Some(n.max(1));
        self
    }

    /// Every `n`th call (that did not fail outright) reports `rejected`
    /// rejected records.
    pub fn with_partial_every(mut self, n: u64, rejected: i64) -> Self {
        self.partial_every = Some((n.max(1), rejected));
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl ExportSubmitter for MockSubmitter {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn export<'a>(&'a self, _request: &'a ExportRequest) -> SubmitFuture<'a, ExportResponse> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
            sleep(Duration::from_millis(self.delay_ms)).await;

            if matches!(self.failure_every, Some(n) if call % n == 0) {
                anyhow::bail!("mock transport failure on call {call}");
            }
            match self.partial_every {
                Some((n, rejected)) if call % n == 0 => Ok(ExportResponse {
                    partial_success: Some(PartialSuccess {
                        rejected_data_points: rejected,
                        error_message: MALFORMED_METRIC_MESSAGE.to_string(),
                    }),
                }),
                _ => Ok(ExportResponse::default()),
            }
        })
    }

    fn version(&self) -> SubmitFuture<'_, BuildVersion> {
        Box::pin(async move { Ok(BuildVersion::from_parts("mock", "n/a")) })
    }
}

/// HTTP/JSON submitter for the ingestion endpoint, optionally over mutual TLS
pub struct HttpJsonSubmitter {
    client: reqwest::Client,
    export_url: Url,
    version_url: Url,
}

impl HttpJsonSubmitter {
    pub fn new(endpoint: &str, timeout_ms: u64, tls: Option<&ClientTlsConfig>) -> Result<Self> {
        let base = parse_endpoint(endpoint, tls.is_some())?;

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_millis(timeout_ms.max(1)))
            .tcp_keepalive(Duration::from_secs(30));

        if let Some(tls) = tls {
            let ca = std::fs::read(&tls.ca_cert)
                .with_context(|| format!("Failed to read CA certificate {:?}", tls.ca_cert))?;
            let ca = reqwest::Certificate::from_pem(&ca).context("Invalid CA certificate")?;

            let mut identity = std::fs::read(&tls.client_cert).with_context(|| {
                format!("Failed to read client certificate {:?}", tls.client_cert)
            })?;
            let key = std::fs::read(&tls.client_key)
                .with_context(|| format!("Failed to read client key {:?}", tls.client_key))?;
            identity.push(b'\n');
            identity.extend_from_slice(&key);
            let identity = reqwest::Identity::from_pem(&identity)
                .context("Invalid client certificate/key pair")?;

            builder = builder
                .tls_built_in_root_certs(false)
                .add_root_certificate(ca)
                .identity(identity);
        }

        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            export_url: base.join("v1/metrics")?,
            version_url: base.join("version")?,
        })
    }
}

/// Validate the endpoint base URL and normalise it so relative joins append.
fn parse_endpoint(raw: &str, require_https: bool) -> Result<Url> {
    let mut url = Url::parse(raw).with_context(|| format!("Invalid endpoint URL: {raw}"))?;

    match url.scheme() {
        "https" => {}
        "http" if !require_https => {}
        "http" => anyhow::bail!("Endpoint must be https:// when TLS is configured (got {raw})"),
        other => anyhow::bail!("Unsupported endpoint scheme {other} (got {raw})"),
    }
    if url.host_str().is_none() {
        anyhow::bail!("Endpoint must include a hostname (got {raw})");
    }
    if url.query().is_some() || url.fragment().is_some() {
        anyhow::bail!("Endpoint must not include query/fragment (got {raw})");
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

impl ExportSubmitter for HttpJsonSubmitter {
    fn name(&self) -> &'static str {
        "http"
    }

    fn export<'a>(&'a self, request: &'a ExportRequest) -> SubmitFuture<'a, ExportResponse> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.export_url.clone())
                .json(request)
                .send()
                .await
                .context("export call failed")?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("export rejected with status {status}: {body}");
            }

            response
                .json::<ExportResponse>()
                .await
                .context("export response did not decode")
        })
    }

    fn version(&self) -> SubmitFuture<'_, BuildVersion> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.version_url.clone())
                .send()
                .await
                .context("version call failed")?
                .error_for_status()?;
            response
                .json::<BuildVersion>()
                .await
                .context("version response did not decode")
        })
    }
}
