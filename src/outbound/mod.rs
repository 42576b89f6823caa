//! Outbound adapters (transport agents)
//!
//! Every adapter turns a [`Target`] into a byte stream that reaches the
//! origin: directly, through an HTTP proxy (CONNECT tunnel or absolute-URI
//! forwarding), or through a SOCKS4/SOCKS5 handshake. [`TransportAgent`]
//! layers TLS to the origin on top when the target is `https`.

mod direct;
mod http;
mod socks4;
mod socks5;

pub use self::http::HttpProxy;
pub use direct::Direct;
pub use socks4::{socks4_handshake, Socks4Proxy};
pub use socks5::{socks5_handshake, Socks5Proxy};

use crate::auth::AuthHeader;
use crate::common::{Dialer, Phase, Target, TlsConnect};
use crate::proxy::{ProxyDescriptor, ProxyScheme};
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Proxy type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyType {
    Direct,
    Http,
    Https,
    Socks4,
    Socks5,
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyType::Direct => write!(f, "Direct"),
            ProxyType::Http => write!(f, "HTTP"),
            ProxyType::Https => write!(f, "HTTPS"),
            ProxyType::Socks4 => write!(f, "SOCKS4"),
            ProxyType::Socks5 => write!(f, "SOCKS5"),
        }
    }
}

impl From<ProxyScheme> for ProxyType {
    fn from(scheme: ProxyScheme) -> Self {
        match scheme {
            ProxyScheme::Http => ProxyType::Http,
            ProxyScheme::Https => ProxyType::Https,
            ProxyScheme::Socks4 => ProxyType::Socks4,
            ProxyScheme::Socks5 => ProxyType::Socks5,
        }
    }
}

/// Trait for proxy connections
pub trait ProxyConnection: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> ProxyConnection for T {}

/// How the request line must address the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestForm {
    /// `GET /path HTTP/1.1`, the stream reaches the origin
    Origin,
    /// `GET http://host/path HTTP/1.1`, the stream reaches an HTTP proxy
    Absolute {
        proxy_authorization: Option<AuthHeader>,
    },
}

/// A stream ready for the HTTP request
pub struct Established {
    pub stream: Box<dyn ProxyConnection>,
    pub form: RequestForm,
}

impl Established {
    pub fn origin(stream: Box<dyn ProxyConnection>) -> Self {
        Established {
            stream,
            form: RequestForm::Origin,
        }
    }
}

impl fmt::Debug for Established {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Established").field("form", &self.form).finish()
    }
}

/// Collaborators every outbound dials with
#[derive(Clone)]
pub struct DialContext {
    pub dialer: Arc<dyn Dialer>,
    pub tls: Arc<dyn TlsConnect>,
    pub connect_timeout: Duration,
}

/// Trait for outbound proxy connections
#[async_trait]
pub trait OutboundProxy: Send + Sync {
    /// Get proxy name
    fn name(&self) -> &str;

    /// Get proxy type
    fn proxy_type(&self) -> ProxyType;

    /// Get server address
    fn server(&self) -> &str;

    /// Dial a stream towards the target through this proxy
    async fn dial_tcp(&self, target: &Target) -> Result<Established>;
}

/// Build the outbound for a descriptor; `None` means direct
pub fn from_descriptor(
    proxy: Option<&ProxyDescriptor>,
    ctx: DialContext,
) -> Arc<dyn OutboundProxy> {
    match proxy {
        None => Arc::new(Direct::new(ctx)),
        Some(d) => match d.scheme {
            ProxyScheme::Http | ProxyScheme::Https => Arc::new(HttpProxy::new(d, ctx)),
            ProxyScheme::Socks4 => Arc::new(Socks4Proxy::new(d, ctx)),
            ProxyScheme::Socks5 => Arc::new(Socks5Proxy::new(d, ctx)),
        },
    }
}

/// Produces a stream to the origin, TLS included
pub struct TransportAgent {
    outbound: Arc<dyn OutboundProxy>,
    tls: Arc<dyn TlsConnect>,
}

impl TransportAgent {
    pub fn new(proxy: Option<&ProxyDescriptor>, ctx: DialContext) -> Self {
        let tls = ctx.tls.clone();
        TransportAgent {
            outbound: from_descriptor(proxy, ctx),
            tls,
        }
    }

    pub fn outbound(&self) -> &Arc<dyn OutboundProxy> {
        &self.outbound
    }

    /// Connect, then handshake TLS with the target host (never the proxy's)
    pub async fn connect(&self, target: &Target) -> Result<Established> {
        debug!(
            "[{}] Connecting to {} via {}",
            self.outbound.name(),
            target,
            self.outbound.server()
        );

        let mut established = self.outbound.dial_tcp(target).await?;

        if target.secure {
            established.stream = self
                .tls
                .handshake(established.stream, &target.host)
                .await
                .map_err(|e| e.context(Phase::TlsHandshake, &target.authority()))?;
        }

        Ok(established)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{RustlsConnector, TcpDialer};

    fn ctx() -> DialContext {
        DialContext {
            dialer: Arc::new(TcpDialer),
            tls: Arc::new(RustlsConnector::insecure()),
            connect_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_from_descriptor_types() {
        let cases = [
            ("http://proxy.test:8080", ProxyType::Http),
            ("https://proxy.test:8443", ProxyType::Https),
            ("socks4a://proxy.test:1080", ProxyType::Socks4),
            ("socks5h://proxy.test:1080", ProxyType::Socks5),
        ];
        for (url, expected) in cases {
            let d = ProxyDescriptor::parse(url).unwrap();
            let outbound = from_descriptor(Some(&d), ctx());
            assert_eq!(outbound.proxy_type(), expected);
            assert_eq!(outbound.server(), d.authority());
        }

        assert_eq!(from_descriptor(None, ctx()).proxy_type(), ProxyType::Direct);
    }

    #[test]
    fn test_proxy_type_display() {
        assert_eq!(ProxyType::from(ProxyScheme::Socks5).to_string(), "SOCKS5");
        assert_eq!(ProxyType::Direct.to_string(), "Direct");
    }
}
