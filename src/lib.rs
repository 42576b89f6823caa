//! proxy-fetch - proxy-aware HTTP/1.1 client core
//!
//! Issues one HTTP request to a target URL, directly or through an HTTP,
//! HTTPS, SOCKS4 or SOCKS5 proxy, with basic, digest and SOCKS-inline
//! authentication.
//!
//! # Architecture
//!
//! ```text
//!          +-----------------+
//!          |    client/      |   Idle -> Sent -> AwaitingChallenge
//!          | (executor)      |        -> Retried -> Done | Failed
//!          +---+---------+---+
//!              |         |
//!      +-------v--+   +--v--------+    +-------------+
//!      |  auth/   |   | outbound/ +--->|   common/   |
//!      | (basic,  |   | (direct,  |    | (dialer,    |
//!      |  digest) |   |  http,    |    |  tls, socks |
//!      +----------+   |  socks4/5)|    |  wire, err) |
//!                     +-----+-----+    +-------------+
//!                           |
//!                     +-----v-----+
//!                     |  proxy/   |
//!                     | (parser)  |
//!                     +-----------+
//! ```
//!
//! ```no_run
//! use proxy_fetch::{ProxyClient, ProxyDescriptor, RequestSpec};
//!
//! # async fn demo() -> proxy_fetch::Result<()> {
//! let proxy = ProxyDescriptor::parse("http://user:pw@proxy.example:8080")?;
//! let spec = RequestSpec::get("https://example.com/")?
//!     .with_header("User-Agent", "Mozilla/5.0")
//!     .with_proxy(proxy);
//! let response = ProxyClient::new()?.execute(&spec).await?;
//! println!("{} {}", response.status, response.text());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod common;
pub mod config;
pub mod http;
pub mod outbound;
pub mod proxy;

pub use auth::AuthStrategy;
pub use client::{ExchangeState, ProxyClient, ProxyClientBuilder};
pub use common::error::{Error, Phase, Result};
pub use config::ClientConfig;
pub use self::http::{RequestSpec, ResponseResult};
pub use proxy::{Credentials, ProxyDescriptor, ProxyScheme};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
