//! HTTP Basic authentication

use super::AuthHeader;
use crate::proxy::Credentials;
use base64::Engine;
use http::header::{AUTHORIZATION, PROXY_AUTHORIZATION};

/// `base64(user:pass)`
pub fn encode_credentials(credentials: &Credentials) -> String {
    let raw = format!("{}:{}", credentials.username(), credentials.password());
    base64::engine::general_purpose::STANDARD.encode(raw)
}

/// Static `Authorization: Basic ...` header, computed once
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    value: String,
}

impl BasicAuth {
    pub fn new(credentials: &Credentials) -> Self {
        BasicAuth {
            value: format!("Basic {}", encode_credentials(credentials)),
        }
    }

    /// Header value, `Basic <token>`
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn header(&self) -> AuthHeader {
        AuthHeader::new(AUTHORIZATION, self.value.clone())
    }

    /// Same token for a proxy
    pub fn proxy_header(&self) -> AuthHeader {
        AuthHeader::new(PROXY_AUTHORIZATION, self.value.clone())
    }
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BasicAuth(***)")
    }
}
