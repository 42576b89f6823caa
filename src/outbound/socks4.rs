//! SOCKS4/SOCKS4a proxy outbound
//!
//! The username, if any, travels as the SOCKS4 user id. SOCKS4 has no
//! password field and cannot address IPv6 targets.

use super::{DialContext, Established, OutboundProxy, ProxyType};
use crate::common::socks::{
    read_socks4_reply, Socks4Request, SOCKS4_GRANTED, SOCKS4_IDENTD_MISMATCH,
    SOCKS4_IDENTD_UNREACHABLE, SOCKS4_REJECTED,
};
use crate::common::{Address, Phase, Target};
use crate::proxy::ProxyDescriptor;
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::debug;

/// SOCKS4 proxy outbound
pub struct Socks4Proxy {
    name: String,
    server: String,
    host: String,
    port: u16,
    user_id: String,
    remote_dns: bool,
    ctx: DialContext,
}

impl Socks4Proxy {
    pub fn new(descriptor: &ProxyDescriptor, ctx: DialContext) -> Self {
        Socks4Proxy {
            name: descriptor.to_string(),
            server: descriptor.authority(),
            host: descriptor.host.clone(),
            port: descriptor.port,
            user_id: descriptor
                .credentials
                .as_ref()
                .map(|c| c.username().to_string())
                .unwrap_or_default(),
            remote_dns: descriptor.remote_dns,
            ctx,
        }
    }

    async fn target_address(&self, target: &Target) -> Result<Address> {
        let address = Address::from(target.host.clone());
        if address.to_ip().is_some() || self.remote_dns {
            return Ok(address);
        }
        // Plain SOCKS4 needs an IPv4 literal
        match self.ctx.dialer.resolve(&target.host, target.port).await? {
            std::net::IpAddr::V4(ip) => Ok(Address::Ipv4(ip)),
            std::net::IpAddr::V6(ip) => Err(Error::handshake(format!(
                "{} resolved to IPv6 {}, which SOCKS4 cannot carry",
                target.host, ip
            ))),
        }
    }
}

/// Run the client side of a SOCKS4/4a CONNECT on an open stream
pub async fn socks4_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    address: &Address,
    port: u16,
    user_id: &str,
) -> Result<()> {
    Socks4Request {
        address,
        port,
        user_id,
    }
    .write_to(stream)
    .await?;

    match read_socks4_reply(stream).await? {
        SOCKS4_GRANTED => Ok(()),
        code @ (SOCKS4_IDENTD_UNREACHABLE | SOCKS4_IDENTD_MISMATCH) => Err(Error::proxy_auth(
            format!("SOCKS4 proxy rejected user id (code {:#04x})", code),
        )),
        SOCKS4_REJECTED => Err(Error::handshake(format!(
            "SOCKS4 request for {} rejected or failed",
            address.to_string_with_port(port)
        ))),
        code => Err(Error::handshake(format!(
            "SOCKS4 proxy answered with unknown code {:#04x}",
            code
        ))),
    }
}

#[async_trait]
impl OutboundProxy for Socks4Proxy {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxy_type(&self) -> ProxyType {
        ProxyType::Socks4
    }

    fn server(&self) -> &str {
        &self.server
    }

    async fn dial_tcp(&self, target: &Target) -> Result<Established> {
        debug!(
            "[{}] SOCKS4 connecting to {} via {}",
            self.name, target, self.server
        );

        let address = self
            .target_address(target)
            .await
            .map_err(|e| e.context(Phase::Connect, &target.authority()))?;

        let mut stream = self
            .ctx
            .dialer
            .connect(&self.host, self.port, self.ctx.connect_timeout)
            .await
            .map_err(|e| e.context(Phase::Connect, &self.server))?;

        timeout(
            self.ctx.connect_timeout,
            socks4_handshake(&mut stream, &address, target.port, &self.user_id),
        )
        .await
        .map_err(|_| Error::timeout("SOCKS4 handshake timeout"))
        .and_then(|r| r)
        .map_err(|e| e.context(Phase::ProxyHandshake, &self.server))?;

        debug!("[{}] SOCKS4 connected to {}", self.name, target);
        Ok(Established::origin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_socks4_granted() {
        let mut mock = Builder::new()
            .write(&[0x04, 0x01, 0x00, 0x50, 10, 0, 0, 1, b'b', b'o', b'b', 0x00])
            .read(&[0x00, 0x5A, 0, 0, 0, 0, 0, 0])
            .build();

        socks4_handshake(&mut mock, &Address::Ipv4(Ipv4Addr::new(10, 0, 0, 1)), 80, "bob")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_socks4a_domain() {
        let mut request = vec![0x04, 0x01, 0x01, 0xBB, 0, 0, 0, 1, 0x00];
        request.extend_from_slice(b"example.test");
        request.push(0x00);

        let mut mock = Builder::new()
            .write(&request)
            .read(&[0x00, 0x5A, 0, 0, 0, 0, 0, 0])
            .build();

        let address = Address::Domain("example.test".to_string());
        socks4_handshake(&mut mock, &address, 443, "").await.unwrap();
    }

    #[tokio::test]
    async fn test_socks4_identd_rejection() {
        let mut mock = Builder::new()
            .write(&[0x04, 0x01, 0x00, 0x50, 10, 0, 0, 1, 0x00])
            .read(&[0x00, 0x5D, 0, 0, 0, 0, 0, 0])
            .build();

        let err = socks4_handshake(&mut mock, &Address::Ipv4(Ipv4Addr::new(10, 0, 0, 1)), 80, "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProxyAuthRejected(_)));
    }

    #[tokio::test]
    async fn test_socks4_rejected() {
        let mut mock = Builder::new()
            .write(&[0x04, 0x01, 0x00, 0x50, 10, 0, 0, 1, 0x00])
            .read(&[0x00, 0x5B, 0, 0, 0, 0, 0, 0])
            .build();

        let err = socks4_handshake(&mut mock, &Address::Ipv4(Ipv4Addr::new(10, 0, 0, 1)), 80, "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProxyHandshakeFailed(_)));
    }
}
