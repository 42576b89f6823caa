//! SOCKS5 proxy outbound
//!
//! Implements the client side of RFC 1928 with RFC 1929 username/password
//! authentication. `socks5h`/`socks` hand the hostname to the proxy;
//! plain `socks5` resolves it locally first.

use super::{DialContext, Established, OutboundProxy, ProxyType};
use crate::common::socks::{
    reply_error_message, ConnectRequest, Greeting, MethodSelection, Reply, UsernamePasswordAuth,
    AUTH_NO_ACCEPTABLE, AUTH_NO_AUTH, AUTH_USERNAME_PASSWORD,
};
use crate::common::{Address, Phase, Target};
use crate::proxy::{Credentials, ProxyDescriptor};
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::debug;

/// SOCKS5 proxy outbound
pub struct Socks5Proxy {
    name: String,
    server: String,
    host: String,
    port: u16,
    credentials: Option<Credentials>,
    remote_dns: bool,
    ctx: DialContext,
}

impl Socks5Proxy {
    pub fn new(descriptor: &ProxyDescriptor, ctx: DialContext) -> Self {
        Socks5Proxy {
            name: descriptor.to_string(),
            server: descriptor.authority(),
            host: descriptor.host.clone(),
            port: descriptor.port,
            credentials: descriptor.credentials.clone(),
            remote_dns: descriptor.remote_dns,
            ctx,
        }
    }

    /// Address to put in the CONNECT request
    async fn target_address(&self, target: &Target) -> Result<Address> {
        let address = Address::from(target.host.clone());
        if self.remote_dns || address.to_ip().is_some() {
            return Ok(address);
        }
        let ip = self.ctx.dialer.resolve(&target.host, target.port).await?;
        debug!("[{}] Resolved {} to {}", self.name, target.host, ip);
        Ok(Address::from(ip))
    }
}

/// Run the client side of a SOCKS5 handshake on an open stream
///
/// Offers username/password only when credentials are given. A rejected
/// subnegotiation stops the exchange before any CONNECT is sent.
pub async fn socks5_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    address: &Address,
    port: u16,
    credentials: Option<&Credentials>,
) -> Result<Reply> {
    Greeting::new(credentials.is_some())
        .write_to(stream)
        .await?;

    let selection = MethodSelection::read_from(stream).await?;
    match (selection.method, credentials) {
        (AUTH_NO_AUTH, _) => {
            debug!("SOCKS5 proxy requires no authentication");
        }
        (AUTH_USERNAME_PASSWORD, Some(creds)) => {
            debug!("SOCKS5 proxy selected username/password authentication");
            UsernamePasswordAuth {
                username: creds.username(),
                password: creds.password(),
            }
            .write_to(stream)
            .await?;

            if !UsernamePasswordAuth::read_status(stream).await? {
                return Err(Error::proxy_auth(
                    "SOCKS5 proxy rejected username/password",
                ));
            }
        }
        (AUTH_NO_ACCEPTABLE, _) => {
            return Err(Error::proxy_auth(
                "SOCKS5 proxy accepted none of the offered authentication methods",
            ));
        }
        (method, _) => {
            return Err(Error::handshake(format!(
                "SOCKS5 proxy selected unoffered method: {:#04x}",
                method
            )));
        }
    }

    ConnectRequest {
        address: address.clone(),
        port,
    }
    .write_to(stream)
    .await?;

    let reply = Reply::read_from(stream).await?;
    if !reply.is_success() {
        return Err(Error::handshake(format!(
            "SOCKS5 connect to {} failed: {}",
            address.to_string_with_port(port),
            reply_error_message(reply.reply)
        )));
    }

    Ok(reply)
}

#[async_trait]
impl OutboundProxy for Socks5Proxy {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxy_type(&self) -> ProxyType {
        ProxyType::Socks5
    }

    fn server(&self) -> &str {
        &self.server
    }

    async fn dial_tcp(&self, target: &Target) -> Result<Established> {
        debug!(
            "[{}] SOCKS5 connecting to {} via {}",
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

        let reply = timeout(
            self.ctx.connect_timeout,
            socks5_handshake(
                &mut stream,
                &address,
                target.port,
                self.credentials.as_ref(),
            ),
        )
        .await
        .map_err(|_| Error::timeout("SOCKS5 handshake timeout"))
        .and_then(|r| r)
        .map_err(|e| e.context(Phase::ProxyHandshake, &self.server))?;

        debug!(
            "[{}] SOCKS5 connected to {} (bound {})",
            self.name,
            target,
            reply.bound.to_string_with_port(reply.port)
        );
        Ok(Established::origin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn domain() -> Address {
        Address::Domain("example.test".to_string())
    }

    #[tokio::test]
    async fn test_rejected_credentials_stop_before_connect() {
        let mut mock = Builder::new()
            .write(&[0x05, 0x02, 0x00, 0x02])
            .read(&[0x05, 0x02])
            .write(&[0x01, 0x04, b'u', b's', b'e', b'r', 0x04, b'p', b'a', b's', b's'])
            .read(&[0x01, 0x01])
            .build();

        let creds = Credentials::new("user", "pass");
        let err = socks5_handshake(&mut mock, &domain(), 443, Some(&creds))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProxyAuthRejected(_)));
    }

    #[tokio::test]
    async fn test_no_auth_domain_connect() {
        let mut request = vec![0x05, 0x01, 0x00, 0x03, 12];
        request.extend_from_slice(b"example.test");
        request.extend_from_slice(&[0x01, 0xBB]);

        let mut mock = Builder::new()
            .write(&[0x05, 0x01, 0x00])
            .read(&[0x05, 0x00])
            .write(&request)
            .read(&[0x05, 0x00, 0x00, 0x01, 10, 0, 0, 1, 0x1F, 0x90])
            .build();

        let reply = socks5_handshake(&mut mock, &domain(), 443, None)
            .await
            .unwrap();
        assert!(reply.is_success());
        assert_eq!(reply.bound.to_string_with_port(reply.port), "10.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_password_accepted() {
        let mut mock = Builder::new()
            .write(&[0x05, 0x02, 0x00, 0x02])
            .read(&[0x05, 0x02])
            .write(&[0x01, 0x01, b'a', 0x01, b'b'])
            .read(&[0x01, 0x00])
            .write(&[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50])
            .read(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .build();

        let creds = Credentials::new("a", "b");
        let address = Address::from("127.0.0.1".to_string());
        socks5_handshake(&mut mock, &address, 80, Some(&creds))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_acceptable_method() {
        let mut mock = Builder::new()
            .write(&[0x05, 0x01, 0x00])
            .read(&[0x05, 0xFF])
            .build();

        let err = socks5_handshake(&mut mock, &domain(), 443, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProxyAuthRejected(_)));
    }

    #[tokio::test]
    async fn test_connect_refused_reply() {
        let mut request = vec![0x05, 0x01, 0x00, 0x03, 12];
        request.extend_from_slice(b"example.test");
        request.extend_from_slice(&[0x01, 0xBB]);

        let mut mock = Builder::new()
            .write(&[0x05, 0x01, 0x00])
            .read(&[0x05, 0x00])
            .write(&request)
            .read(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .build();

        let err = socks5_handshake(&mut mock, &domain(), 443, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProxyHandshakeFailed(_)));
        assert!(err.to_string().contains("Connection refused"));
    }
}
