//! Common utilities and types

pub mod error;
pub mod net;
pub mod socks;
pub mod tls;

pub use error::{Error, Phase, Result};
pub use net::{Address, Dialer, Target, TcpDialer};
pub use tls::{RustlsConnector, TlsConnect};
