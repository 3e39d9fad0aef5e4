//! Mutual-TLS setup for the ingestion listener.
//!
//! The server presents its own certificate and only completes handshakes with
//! clients whose certificate chains to the configured CA.

use rig_core::ServerTlsConfig;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Certificate file not found: {0}")]
    CertificateNotFound(PathBuf),

    #[error("Private key file not found: {0}")]
    PrivateKeyNotFound(PathBuf),

    #[error("Failed to parse certificate: {0}")]
    CertificateParseFailed(String),

    #[error("Failed to parse private key: {0}")]
    PrivateKeyParseFailed(String),

    #[error("No private keys found in file")]
    NoPrivateKeysFound,

    #[error("TLS configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Build a rustls server config that requires and verifies client
/// certificates.
pub fn load_server_config(tls: &ServerTlsConfig) -> Result<ServerConfig, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = RootCertStore::empty();
    for ca in load_certificates(&tls.ca_cert)? {
        roots
            .add(ca)
            .map_err(|e| TlsError::CertificateParseFailed(e.to_string()))?;
    }
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .map_err(|e| TlsError::ConfigurationError(e.to_string()))?;

    let cert_chain = load_certificates(&tls.server_cert)?;
    let private_key = load_private_key(&tls.server_key)?;

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::ConfigurationError(e.to_string()))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(cert_chain, private_key)
        .map_err(|e| TlsError::ConfigurationError(e.to_string()))?;

    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(config)
}

/// Load certificates from PEM file
fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    if !path.exists() {
        return Err(TlsError::CertificateNotFound(path.to_path_buf()));
    }

    let pem_data = std::fs::read(path)?;
    let mut reader = BufReader::new(&pem_data[..]);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::CertificateParseFailed(e.to_string()))?;

    if certs.is_empty() {
        return Err(TlsError::CertificateParseFailed(format!(
            "No certificates found in {}",
            path.display()
        )));
    }

    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) from a PEM file
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    if !path.exists() {
        return Err(TlsError::PrivateKeyNotFound(path.to_path_buf()));
    }

    let pem_data = std::fs::read(path)?;
    let mut reader = BufReader::new(&pem_data[..]);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::PrivateKeyParseFailed(e.to_string()))?
        .ok_or(TlsError::NoPrivateKeysFound)
}
