//! SOCKS4/SOCKS5 client-side wire messages

use super::net::Address;
use crate::{Error, Result};
use std::net::Ipv4Addr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// SOCKS5 version
pub const SOCKS5_VERSION: u8 = 0x05;

// SOCKS5 authentication methods
pub const AUTH_NO_AUTH: u8 = 0x00;
pub const AUTH_USERNAME_PASSWORD: u8 = 0x02;
pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

// RFC 1929 subnegotiation version
pub const USER_PASS_VERSION: u8 = 0x01;

// SOCKS5 commands
pub const CMD_CONNECT: u8 = 0x01;

// SOCKS5 address types
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

// SOCKS5 reply codes
pub const REP_SUCCEEDED: u8 = 0x00;
pub const REP_GENERAL_FAILURE: u8 = 0x01;
pub const REP_CONNECTION_NOT_ALLOWED: u8 = 0x02;
pub const REP_NETWORK_UNREACHABLE: u8 = 0x03;
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
pub const REP_CONNECTION_REFUSED: u8 = 0x05;
pub const REP_TTL_EXPIRED: u8 = 0x06;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

// SOCKS4
pub const SOCKS4_VERSION: u8 = 0x04;
pub const SOCKS4_REPLY_VERSION: u8 = 0x00;
pub const SOCKS4_GRANTED: u8 = 0x5A;
pub const SOCKS4_REJECTED: u8 = 0x5B;
pub const SOCKS4_IDENTD_UNREACHABLE: u8 = 0x5C;
pub const SOCKS4_IDENTD_MISMATCH: u8 = 0x5D;

/// Client greeting listing the offered auth methods
#[derive(Debug)]
pub struct Greeting {
    pub methods: Vec<u8>,
}

impl Greeting {
    pub fn new(with_password: bool) -> Self {
        let methods = if with_password {
            vec![AUTH_NO_AUTH, AUTH_USERNAME_PASSWORD]
        } else {
            vec![AUTH_NO_AUTH]
        };
        Greeting { methods }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.methods.len());
        buf.push(SOCKS5_VERSION);
        buf.push(self.methods.len() as u8);
        buf.extend_from_slice(&self.methods);
        buf
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Server's chosen auth method
pub struct MethodSelection {
    pub method: u8,
}

impl MethodSelection {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).await?;

        if buf[0] != SOCKS5_VERSION {
            return Err(Error::handshake(format!(
                "Unsupported SOCKS version in method selection: {}",
                buf[0]
            )));
        }

        Ok(MethodSelection { method: buf[1] })
    }
}

/// RFC 1929 username/password request
pub struct UsernamePasswordAuth<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

impl<'a> UsernamePasswordAuth<'a> {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let username = self.username.as_bytes();
        let password = self.password.as_bytes();
        if username.is_empty() || username.len() > 255 || password.len() > 255 {
            return Err(Error::handshake(
                "SOCKS5 username must be 1-255 bytes and password at most 255 bytes",
            ));
        }

        let mut buf = Vec::with_capacity(3 + username.len() + password.len());
        buf.push(USER_PASS_VERSION);
        buf.push(username.len() as u8);
        buf.extend_from_slice(username);
        buf.push(password.len() as u8);
        buf.extend_from_slice(password);
        Ok(buf)
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes()?).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read the subnegotiation status; `true` means accepted
    pub async fn read_status<R: AsyncRead + Unpin>(reader: &mut R) -> Result<bool> {
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).await?;
        Ok(buf[1] == 0x00)
    }
}

/// SOCKS5 CONNECT request
#[derive(Debug)]
pub struct ConnectRequest {
    pub address: Address,
    pub port: u16,
}

impl ConnectRequest {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(3 + self.address.len());
        buf.extend_from_slice(&[SOCKS5_VERSION, CMD_CONNECT, 0x00]);
        match &self.address {
            Address::Ipv4(ip) => {
                buf.push(ATYP_IPV4);
                buf.extend_from_slice(&ip.octets());
            }
            Address::Ipv6(ip) => {
                buf.push(ATYP_IPV6);
                buf.extend_from_slice(&ip.octets());
            }
            Address::Domain(domain) => {
                let bytes = domain.as_bytes();
                if bytes.is_empty() || bytes.len() > 255 {
                    return Err(Error::handshake("Domain name length out of range"));
                }
                buf.push(ATYP_DOMAIN);
                buf.push(bytes.len() as u8);
                buf.extend_from_slice(bytes);
            }
        }
        buf.extend_from_slice(&self.port.to_be_bytes());
        Ok(buf)
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes()?).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// SOCKS5 reply to a CONNECT request
#[derive(Debug)]
pub struct Reply {
    pub reply: u8,
    pub bound: Address,
    pub port: u16,
}

impl Reply {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header).await?;

        if header[0] != SOCKS5_VERSION {
            return Err(Error::handshake(format!(
                "Unsupported SOCKS version in reply: {}",
                header[0]
            )));
        }

        // A failure reply may still carry a bound address; read it so the
        // stream is left in a clean state either way.
        let (bound, port) = match header[3] {
            ATYP_IPV4 => {
                let mut buf = [0u8; 6];
                reader.read_exact(&mut buf).await?;
                let addr = Address::Ipv4(Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]));
                (addr, u16::from_be_bytes([buf[4], buf[5]]))
            }
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                reader.read_exact(&mut len).await?;
                let len = len[0] as usize;
                let mut buf = vec![0u8; len + 2];
                reader.read_exact(&mut buf).await?;
                let port = u16::from_be_bytes([buf[len], buf[len + 1]]);
                buf.truncate(len);
                (Address::Domain(String::from_utf8_lossy(&buf).to_string()), port)
            }
            ATYP_IPV6 => {
                let mut buf = [0u8; 18];
                reader.read_exact(&mut buf).await?;
                let mut ip = [0u8; 16];
                ip.copy_from_slice(&buf[..16]);
                (
                    Address::Ipv6(std::net::Ipv6Addr::from(ip)),
                    u16::from_be_bytes([buf[16], buf[17]]),
                )
            }
            t => {
                return Err(Error::handshake(format!(
                    "Unknown address type in reply: {}",
                    t
                )))
            }
        };

        Ok(Reply {
            reply: header[1],
            bound,
            port,
        })
    }

    pub fn is_success(&self) -> bool {
        self.reply == REP_SUCCEEDED
    }
}

/// Convert a SOCKS5 reply code to an error message
pub fn reply_error_message(code: u8) -> String {
    match code {
        REP_GENERAL_FAILURE => "General SOCKS server failure".to_string(),
        REP_CONNECTION_NOT_ALLOWED => "Connection not allowed by ruleset".to_string(),
        REP_NETWORK_UNREACHABLE => "Network unreachable".to_string(),
        REP_HOST_UNREACHABLE => "Host unreachable".to_string(),
        REP_CONNECTION_REFUSED => "Connection refused".to_string(),
        REP_TTL_EXPIRED => "TTL expired".to_string(),
        REP_COMMAND_NOT_SUPPORTED => "Command not supported".to_string(),
        REP_ADDRESS_TYPE_NOT_SUPPORTED => "Address type not supported".to_string(),
        _ => format!("Unknown error: {}", code),
    }
}

/// SOCKS4/4a CONNECT request
#[derive(Debug)]
pub struct Socks4Request<'a> {
    pub address: &'a Address,
    pub port: u16,
    pub user_id: &'a str,
}

impl<'a> Socks4Request<'a> {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(9 + self.user_id.len());
        buf.extend_from_slice(&[SOCKS4_VERSION, CMD_CONNECT]);
        buf.extend_from_slice(&self.port.to_be_bytes());

        match self.address {
            Address::Ipv4(ip) => {
                buf.extend_from_slice(&ip.octets());
                buf.extend_from_slice(self.user_id.as_bytes());
                buf.push(0x00);
            }
            // SOCKS4a: invalid IP 0.0.0.x signals a trailing hostname
            Address::Domain(domain) => {
                buf.extend_from_slice(&[0, 0, 0, 1]);
                buf.extend_from_slice(self.user_id.as_bytes());
                buf.push(0x00);
                buf.extend_from_slice(domain.as_bytes());
                buf.push(0x00);
            }
            Address::Ipv6(_) => {
                return Err(Error::handshake("SOCKS4 cannot carry IPv6 addresses"));
            }
        }
        Ok(buf)
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes()?).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// SOCKS4 reply; returns the status code
pub async fn read_socks4_reply<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).await?;

    if buf[0] != SOCKS4_REPLY_VERSION {
        return Err(Error::handshake(format!(
            "Invalid SOCKS4 reply version: {}",
            buf[0]
        )));
    }
    Ok(buf[1])
}
