use crate::handler::DEFAULT_CACHE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Load-client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub worker: WorkerConfig,
    pub target: TargetConfig,
    pub run: RunConfig,
    #[serde(default)]
    pub tls: Option<ClientTlsConfig>,
}

impl ClientConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker identifier used in logs and run-log file names
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Base URL of the ingestion endpoint
    pub endpoint: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum concurrent in-flight export calls
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Path to the JSON-encoded export request replayed on every call
    pub payload_path: PathBuf,
    /// Optional wall-clock cap in milliseconds
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Optional cap on the number of calls issued
    #[serde(default)]
    pub total_requests: Option<u64>,
}

/// PEM material for mutual TLS on the client side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientTlsConfig {
    pub ca_cert: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

/// Ingestion endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
    #[serde(default)]
    pub tls: Option<ServerTlsConfig>,
}

impl IngestConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: IngestConfig = toml::from_str(&contents)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the RPC listener (e.g., "0.0.0.0:8080")
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Outcomes retained per cache (success and failure each)
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Filter directive used when RUST_LOG is unset
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

/// PEM material for the server; clients must present a certificate signed
/// by `ca_cert`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTlsConfig {
    pub ca_cert: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_concurrency() -> usize {
    1
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_serde() {
        let config_str = r#"
[worker]
id = "test-worker"

[target]
endpoint = "https://localhost:8080"
concurrency = 16

[run]
payload_path = "payloads/valid_request.json"
duration_ms = 30000

[tls]
ca_cert = "certs/ca.crt"
client_cert = "certs/client.crt"
client_key = "certs/client.key"
        "#;

        let config: ClientConfig = toml::from_str(config_str).unwrap();
        assert_eq!(config.worker.id, "test-worker");
        assert_eq!(config.target.concurrency, 16);
        assert_eq!(config.target.timeout_ms, 5_000);
        assert_eq!(config.run.duration_ms, Some(30_000));
        assert_eq!(config.run.total_requests, None);
        assert_eq!(
            config.tls.unwrap().client_key,
            PathBuf::from("certs/client.key")
        );
    }

    #[test]
    fn test_ingest_config_defaults() {
        let config: IngestConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.server.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert_eq!(config.logger.level, "info");
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_ingest_config_serde() {
        let config_str = r#"
[server]
bind = "127.0.0.1:9443"
cache_capacity = 3

[logger]
level = "debug"

[tls]
ca_cert = "certs/ca.crt"
server_cert = "certs/server.crt"
server_key = "certs/server.key"
        "#;

        let config: IngestConfig = toml::from_str(config_str).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9443");
        assert_eq!(config.server.cache_capacity, 3);
        assert_eq!(config.logger.level, "debug");
        assert_eq!(
            config.tls.unwrap().server_cert,
            PathBuf::from("certs/server.crt")
        );
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingestd.toml");
        std::fs::write(&path, "[server]\ncache_capacity = 5\n").unwrap();

        let config = IngestConfig::from_file(&path).unwrap();
        assert_eq!(config.server.cache_capacity, 5);
        assert!(IngestConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
