//! Network utilities
//!
//! Holds the raw socket collaborator (`Dialer`) used by every outbound, and
//! the address types shared by the SOCKS codecs.

use crate::outbound::ProxyConnection;
use crate::{Error, Result};
use async_trait::async_trait;
use socket2::SockRef;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;
use url::Url;

#[inline]
pub fn configure_tcp_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
}

/// Destination of a request, derived from its URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    /// Whether the origin speaks TLS
    pub secure: bool,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Target {
            host: host.into(),
            port,
            secure,
        }
    }

    /// Build from an `http`/`https` URL
    pub fn from_url(url: &Url) -> Result<Self> {
        let secure = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(Error::invalid_url(format!(
                    "Unsupported URL scheme: {}",
                    other
                )))
            }
        };

        let host = match url.host() {
            Some(url::Host::Domain(d)) => d.to_string(),
            Some(url::Host::Ipv4(ip)) => ip.to_string(),
            Some(url::Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(Error::invalid_url(format!("Missing host in {}", url))),
        };

        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::invalid_url(format!("Missing port in {}", url)))?;

        Ok(Target { host, port, secure })
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn authority(&self) -> String {
        Address::from(self.host.clone()).to_string_with_port(self.port)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.authority())
    }
}

/// SOCKS address type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IPv4 address
    Ipv4(Ipv4Addr),
    /// IPv6 address
    Ipv6(Ipv6Addr),
    /// Domain name
    Domain(String),
}

impl Address {
    /// Get bytes length in SOCKS5 format
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        match self {
            Address::Ipv4(_) => 1 + 4 + 2,             // atyp + ip + port
            Address::Ipv6(_) => 1 + 16 + 2,            // atyp + ip + port
            Address::Domain(d) => 1 + 1 + d.len() + 2, // atyp + len + domain + port
        }
    }

    /// Convert to string representation
    pub fn to_string_with_port(&self, port: u16) -> String {
        match self {
            Address::Ipv4(ip) => format!("{}:{}", ip, port),
            Address::Ipv6(ip) => format!("[{}]:{}", ip, port),
            Address::Domain(d) => format!("{}:{}", d, port),
        }
    }

    /// Get as IP if resolved
    pub fn to_ip(&self) -> Option<IpAddr> {
        match self {
            Address::Ipv4(ip) => Some(IpAddr::V4(*ip)),
            Address::Ipv6(ip) => Some(IpAddr::V6(*ip)),
            Address::Domain(_) => None,
        }
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Address::Ipv4(v4),
            IpAddr::V6(v6) => Address::Ipv6(v6),
        }
    }
}

impl From<String> for Address {
    fn from(domain: String) -> Self {
        // Try to parse as IP first
        if let Ok(ip) = domain.parse::<Ipv4Addr>() {
            return Address::Ipv4(ip);
        }
        if let Ok(ip) = domain.parse::<Ipv6Addr>() {
            return Address::Ipv6(ip);
        }
        Address::Domain(domain)
    }
}

/// Raw socket collaborator
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a byte stream to `host:port`, giving up after `timeout`
    async fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Box<dyn ProxyConnection>>;

    /// Resolve a hostname locally, for proxies that need an IP
    async fn resolve(&self, host: &str, port: u16) -> Result<IpAddr> {
        if let Some(ip) = Address::from(host.to_string()).to_ip() {
            return Ok(ip);
        }
        let mut addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| Error::connection(format!("Failed to resolve {}: {}", host, e)))?;
        addrs
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| Error::connection(format!("No address for {}", host)))
    }
}

/// Plain TCP dialer
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<Box<dyn ProxyConnection>> {
        let addr = Address::from(host.to_string()).to_string_with_port(port);
        trace!("Dialing {}", addr);

        let stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "Connect to {} exceeded {}ms",
                    addr,
                    connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::ConnectionRefused => {
                    Error::refused(format!("{}: {}", addr, e))
                }
                std::io::ErrorKind::TimedOut => Error::timeout(format!("{}: {}", addr, e)),
                _ => Error::connection(format!("Failed to connect to {}: {}", addr, e)),
            })?;

        configure_tcp_stream(&stream);
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_from_domain() {
        let addr = Address::from("example.com".to_string());
        assert!(matches!(addr, Address::Domain(_)));
        assert_eq!(addr.len(), 1 + 1 + 11 + 2);
    }

    #[test]
    fn test_address_ipv6_brackets() {
        let addr = Address::from("::1".to_string());
        assert_eq!(addr.to_string_with_port(443), "[::1]:443");
    }

    #[test]
    fn test_target_from_url_defaults() {
        let url = Url::parse("https://example.test/path").unwrap();
        let target = Target::from_url(&url).unwrap();
        assert_eq!(target, Target::new("example.test", 443, true));

        let url = Url::parse("http://[::1]:8080/").unwrap();
        let target = Target::from_url(&url).unwrap();
        assert_eq!(target.authority(), "[::1]:8080");
        assert!(!target.secure);
    }

    #[test]
    fn test_target_rejects_other_schemes() {
        let url = Url::parse("ftp://example.test/").unwrap();
        assert!(matches!(Target::from_url(&url), Err(Error::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_dialer_connection_refused() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = TcpDialer
            .connect("127.0.0.1", port, Duration::from_secs(2))
            .await;
        assert!(matches!(result, Err(Error::ConnectionRefused(_))));
    }

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let ip = TcpDialer.resolve("10.1.2.3", 80).await.unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)));
    }
}
