//! Error types for the proxied request client

use std::fmt;
use std::io;
use thiserror::Error;

/// Client error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid proxy URL: {0}")]
    InvalidProxyUrl(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported auth scheme: {0}")]
    UnsupportedAuthScheme(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Proxy handshake failed: {0}")]
    ProxyHandshakeFailed(String),

    #[error("Proxy rejected credentials: {0}")]
    ProxyAuthRejected(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("TLS verification failed: {0}")]
    TlsVerificationFailed(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Stage of a request an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    ProxyHandshake,
    TlsHandshake,
    Send,
    Receive,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Connect => write!(f, "connect"),
            Phase::ProxyHandshake => write!(f, "proxy-handshake"),
            Phase::TlsHandshake => write!(f, "tls-handshake"),
            Phase::Send => write!(f, "send"),
            Phase::Receive => write!(f, "receive"),
        }
    }
}

impl Error {
    pub fn invalid_proxy_url<S: Into<String>>(msg: S) -> Self {
        Error::InvalidProxyUrl(msg.into())
    }

    pub fn invalid_url<S: Into<String>>(msg: S) -> Self {
        Error::InvalidUrl(msg.into())
    }

    pub fn unsupported_auth<S: Into<String>>(msg: S) -> Self {
        Error::UnsupportedAuthScheme(msg.into())
    }

    pub fn auth_failed<S: Into<String>>(msg: S) -> Self {
        Error::AuthFailed(msg.into())
    }

    pub fn handshake<S: Into<String>>(msg: S) -> Self {
        Error::ProxyHandshakeFailed(msg.into())
    }

    pub fn proxy_auth<S: Into<String>>(msg: S) -> Self {
        Error::ProxyAuthRejected(msg.into())
    }

    pub fn refused<S: Into<String>>(msg: S) -> Self {
        Error::ConnectionRefused(msg.into())
    }

    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Error::Connection(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        Error::Cancelled(msg.into())
    }

    pub fn tls_verification<S: Into<String>>(msg: S) -> Self {
        Error::TlsVerificationFailed(msg.into())
    }

    pub fn tls<S: Into<String>>(msg: S) -> Self {
        Error::Tls(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Prefix the message with the phase and endpoint it happened on.
    ///
    /// Raw IO errors become `Connection` errors so the context survives.
    pub fn context(self, phase: Phase, endpoint: &str) -> Self {
        let prefix = |msg: String| format!("[{} {}] {}", phase, endpoint, msg);
        match self {
            Error::Io(e) => match e.kind() {
                io::ErrorKind::ConnectionRefused => Error::ConnectionRefused(prefix(e.to_string())),
                io::ErrorKind::TimedOut => Error::Timeout(prefix(e.to_string())),
                io::ErrorKind::UnexpectedEof if phase == Phase::ProxyHandshake => {
                    Error::ProxyHandshakeFailed(prefix("proxy closed the connection".into()))
                }
                _ =>Error::Connection(prefix(e.to_string())),
            },
            Error::InvalidProxyUrl(m) => Error::InvalidProxyUrl(prefix(m)),
            Error::InvalidUrl(m) => Error::InvalidUrl(prefix(m)),
            Error::UnsupportedAuthScheme(m) => Error::UnsupportedAuthScheme(prefix(m)),
            Error::AuthFailed(m) => Error::AuthFailed(prefix(m)),
            Error::ProxyHandshakeFailed(m) => Error::ProxyHandshakeFailed(prefix(m)),
            Error::ProxyAuthRejected(m) => Error::ProxyAuthRejected(prefix(m)),
            Error::ConnectionRefused(m) => Error::ConnectionRefused(prefix(m)),
            Error::Connection(m) => Error::Connection(prefix(m)),
            Error::Timeout(m) => Error::Timeout(prefix(m)),
            Error::Cancelled(m) => Error::Cancelled(prefix(m)),
            Error::TlsVerificationFailed(m) => Error::TlsVerificationFailed(prefix(m)),
            Error::Tls(m) => Error::Tls(prefix(m)),
            Error::Protocol(m) => Error::Protocol(prefix(m)),
            Error::Config(m) => Error::Config(prefix(m)),
        }
    }

    /// Whether the failure happened below the HTTP layer
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ProxyHandshakeFailed(_)
                | Error::ProxyAuthRejected(_)
                | Error::ConnectionRefused(_)
                | Error::Connection(_)
                | Error::Timeout(_)
                | Error::TlsVerificationFailed(_)
                | Error::Tls(_)
        )
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol(e.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::InvalidUrl(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        match e {
            rustls::Error::InvalidCertificate(_) => Error::TlsVerificationFailed(e.to_string()),
            _ => Error::Tls(e.to_string()),
        }
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::protocol("invalid header");
        assert_eq!(e.to_string(), "Protocol error: invalid header");
    }

    #[test]
    fn test_context_prefix() {
        let e = Error::timeout("elapsed").context(Phase::Connect, "proxy.test:8080");
        assert_eq!(e.to_string(), "Timeout error: [connect proxy.test:8080] elapsed");
    }

    #[test]
    fn test_context_maps_io_refused() {
        let io = io::Error::new(io::ErrorKind::ConnectionRefused, "nope");
        let e = Error::from(io).context(Phase::Connect, "127.0.0.1:1");
        assert!(matches!(e, Error::ConnectionRefused(_)));
        assert!(e.is_transport());
    }

    #[test]
    fn test_certificate_errors_map_to_verification() {
        let e = Error::from(rustls::Error::InvalidCertificate(
            rustls::CertificateError::UnknownIssuer,
        ));
        assert!(matches!(e, Error::TlsVerificationFailed(_)));
    }
}
