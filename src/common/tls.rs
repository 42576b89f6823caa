//! TLS collaborator
//!
//! `TlsConnect` wraps an established byte stream in TLS. The default
//! implementation uses rustls with the webpki root store.

use crate::outbound::ProxyConnection;
use crate::{Error, Result};
use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::ClientConfig;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// TLS handshake over an existing stream
#[async_trait]
pub trait TlsConnect: Send + Sync {
    /// Handshake with `server_name` used for SNI and certificate verification
    async fn handshake(
        &self,
        stream: Box<dyn ProxyConnection>,
        server_name: &str,
    ) -> Result<Box<dyn ProxyConnection>>;
}

/// rustls-backed TLS connector
#[derive(Clone)]
pub struct RustlsConnector {
    connector: TlsConnector,
}

impl RustlsConnector {
    /// Verify against webpki roots plus any certificates in `ca_file`
    pub fn new(ca_file: Option<&Path>) -> Result<Self> {
        let mut root_store = Self::get_root_store();

        if let Some(path) = ca_file {
            for cert in load_certs(path)? {
                root_store
                    .add(cert)
                    .map_err(|e| Error::config(format!("Invalid CA certificate: {}", e)))?;
            }
        }

        let config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(RustlsConnector {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    /// Accept any certificate
    pub fn insecure() -> Self {
        let config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertificateVerification))
            .with_no_client_auth();

        RustlsConnector {
            connector: TlsConnector::from(Arc::new(config)),
        }
    }

    fn get_root_store() -> rustls::RootCertStore {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        root_store
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::config(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::config(format!("Failed to read {}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(Error::config(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

#[async_trait]
impl TlsConnect for RustlsConnector {
    async fn handshake(
        &self,
        stream: Box<dyn ProxyConnection>,
        server_name: &str,
    ) -> Result<Box<dyn ProxyConnection>> {
        let name: ServerName<'static> = server_name
            .to_string()
            .try_into()
            .map_err(|_| Error::tls(format!("Invalid server name: {}", server_name)))?;

        debug!("TLS handshake with {}", server_name);

        let tls_stream = self
            .connector
            .connect(name, stream)
            .await
            .map_err(|e| map_handshake_error(e, server_name))?;

        Ok(Box::new(tls_stream))
    }
}

/// tokio-rustls reports rustls failures wrapped in `io::Error`
fn map_handshake_error(e: std::io::Error, server_name: &str) -> Error {
    let inner = e
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>());

    match inner {
        Some(rustls::Error::InvalidCertificate(cert_err)) => Error::tls_verification(format!(
            "{}: {:?}",
            server_name, cert_err
        )),
        Some(other) => Error::tls(format!("{}: {}", server_name, other)),
        None => Error::tls(format!("TLS handshake with {} failed: {}", server_name, e)),
    }
}

/// Certificate verifier that accepts any certificate
#[derive(Debug)]
struct NoCertificateVerification;

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
