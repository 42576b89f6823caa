//! HTTP Digest authentication (RFC 7616, RFC 2617)
//!
//! A [`DigestAuth`] caches the last challenge it saw together with a
//! nonce-count. Both live behind one mutex so concurrent requests sharing the
//! instance each get a distinct `nc` value.

use super::AuthHeader;
use crate::proxy::Credentials;
use crate::{Error, Result};
use http::header::{AUTHORIZATION, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, WWW_AUTHENTICATE};
use http::HeaderName;
use md5::Md5;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Digest hash algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl Algorithm {
    fn hash(&self, data: &[u8]) -> String {
        match self {
            Algorithm::Md5 | Algorithm::Md5Sess => hex::encode(Md5::digest(data)),
            Algorithm::Sha256 | Algorithm::Sha256Sess => hex::encode(Sha256::digest(data)),
        }
    }

    fn is_session(&self) -> bool {
        matches!(self, Algorithm::Md5Sess | Algorithm::Sha256Sess)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Md5 => write!(f, "MD5"),
            Algorithm::Md5Sess => write!(f, "MD5-sess"),
            Algorithm::Sha256 => write!(f, "SHA-256"),
            Algorithm::Sha256Sess => write!(f, "SHA-256-sess"),
        }
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Algorithm::Md5),
            "md5-sess" => Ok(Algorithm::Md5Sess),
            "sha-256" => Ok(Algorithm::Sha256),
            "sha-256-sess" => Ok(Algorithm::Sha256Sess),
            _ => Err(Error::unsupported_auth(format!(
                "digest algorithm {} is not supported",
                s
            ))),
        }
    }
}

/// Quality of protection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qop {
    Auth,
    AuthInt,
}

impl fmt::Display for Qop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qop::Auth => write!(f, "auth"),
            Qop::AuthInt => write!(f, "auth-int"),
        }
    }
}

/// Which side issued the challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeOrigin {
    /// 401 + `WWW-Authenticate`
    Server,
    /// 407 + `Proxy-Authenticate`
    Proxy,
}

impl ChallengeOrigin {
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            401 => Some(ChallengeOrigin::Server),
            407 => Some(ChallengeOrigin::Proxy),
            _ => None,
        }
    }

    pub fn challenge_header(&self) -> HeaderName {
        match self {
            ChallengeOrigin::Server => WWW_AUTHENTICATE,
            ChallengeOrigin::Proxy => PROXY_AUTHENTICATE,
        }
    }

    pub fn authorization_header(&self) -> HeaderName {
        match self {
            ChallengeOrigin::Server => AUTHORIZATION,
            ChallengeOrigin::Proxy => PROXY_AUTHORIZATION,
        }
    }
}

/// Parsed `Digest` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Algorithm,
    /// Empty when the server sent no qop (RFC 2069 mode)
    pub qop: Vec<Qop>,
    pub stale: bool,
}

impl DigestChallenge {
    /// Parse one challenge header value, e.g. `Digest realm="x", nonce="y"`.
    ///
    /// Returns `Ok(None)` when the value holds no Digest challenge.
    pub fn parse(value: &str) -> Result<Option<Self>> {
        let Some(start) = find_scheme(value, "digest") else {
            return Ok(None);
        };
        let params = parse_params(&value[start + "digest".len()..]);

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = Algorithm::Md5;
        let mut qop_tokens: Option<String> = None;
        let mut stale = false;

        for (key, val) in params {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(val),
                "nonce" => nonce = Some(val),
                "opaque" => opaque = Some(val),
                "algorithm" => algorithm = val.parse()?,
                "qop" => qop_tokens = Some(val),
                "stale" => stale = val.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        let qop = match qop_tokens {
            None => Vec::new(),
            Some(tokens) => {
                let supported: Vec<Qop> = tokens
                    .split(',')
                    .filter_map(|t| match t.trim().to_ascii_lowercase().as_str() {
                        "auth" => Some(Qop::Auth),
                        "auth-int" => Some(Qop::AuthInt),
                        _ => None,
                    })
                    .collect();
                if supported.is_empty() {
                    return Err(Error::unsupported_auth(format!(
                        "digest qop {} is not supported",
                        tokens
                    )));
                }
                supported
            }
        };

        let nonce = nonce.ok_or_else(|| Error::protocol("digest challenge without nonce"))?;

        Ok(Some(DigestChallenge {
            realm: realm.unwrap_or_default(),
            nonce,
            opaque,
            algorithm,
            qop,
            stale,
        }))
    }

    /// Find the Digest challenge among all `name` headers.
    ///
    /// Fails with `UnsupportedAuthScheme` when challenges exist but none of
    /// them is Digest.
    pub fn from_headers(headers: &[(String, String)], name: &HeaderName) -> Result<Option<Self>> {
        let mut offered = Vec::new();
        for (key, value) in headers {
            if !key.eq_ignore_ascii_case(name.as_str()) {
                continue;
            }
            if let Some(challenge) = Self::parse(value)? {
                return Ok(Some(challenge));
            }
            if let Some(scheme) = value.split_whitespace().next() {
                offered.push(scheme.to_string());
            }
        }

        if offered.is_empty() {
            Ok(None)
        } else {
            Err(Error::unsupported_auth(format!(
                "server offered {} but only Digest is configured",
                offered.join(", ")
            )))
        }
    }

    /// Prefer `auth`, fall back to `auth-int`
    pub fn selected_qop(&self) -> Option<Qop> {
        if self.qop.contains(&Qop::Auth) {
            Some(Qop::Auth)
        } else {
            self.qop.first().copied()
        }
    }

    /// Hex digest for the `response` parameter
    pub fn compute_response(
        &self,
        credentials: &Credentials,
        method: &str,
        uri: &str,
        body: Option<&[u8]>,
        nonce_count: u32,
        cnonce: &str,
    ) -> String {
        let alg = self.algorithm;

        let mut ha1 = alg.hash(
            format!(
                "{}:{}:{}",
                credentials.username(),
                self.realm,
                credentials.password()
            )
            .as_bytes(),
        );
        if alg.is_session() {
            ha1 = alg.hash(format!("{}:{}:{}", ha1, self.nonce, cnonce).as_bytes());
        }

        let qop = self.selected_qop();
        let ha2 = match qop {
            Some(Qop::AuthInt) => {
                let body_hash = alg.hash(body.unwrap_or(&[]));
                alg.hash(format!("{}:{}:{}", method, uri, body_hash).as_bytes())
            }
            _ => alg.hash(format!("{}:{}", method, uri).as_bytes()),
        };

        match qop {
            Some(qop) => alg.hash(
                format!(
                    "{}:{}:{:08x}:{}:{}:{}",
                    ha1, self.nonce, nonce_count, cnonce, qop, ha2
                )
                .as_bytes(),
            ),
            None => alg.hash(format!("{}:{}:{}", ha1, self.nonce, ha2).as_bytes()),
        }
    }

    /// Full `Digest ...` credentials header value
    pub fn authorization_value(
        &self,
        credentials: &Credentials,
        method: &str,
        uri: &str,
        body: Option<&[u8]>,
        nonce_count: u32,
        cnonce: &str,
    ) -> String {
        let response = self.compute_response(credentials, method, uri, body, nonce_count, cnonce);

        let mut value = format!(
            "Digest username={}, realm={}, nonce={}, uri={}, algorithm={}, response=\"{}\"",
            quote(credentials.username()),
            quote(&self.realm),
            quote(&self.nonce),
            quote(uri),
            self.algorithm,
            response
        );
        if let Some(opaque) = &self.opaque {
            value.push_str(&format!(", opaque={}", quote(opaque)));
        }
        if let Some(qop) = self.selected_qop() {
            value.push_str(&format!(
                ", qop={}, nc={:08x}, cnonce={}",
                qop,
                nonce_count,
                quote(cnonce)
            ));
        }
        value
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Byte offset of `scheme` as a standalone token
fn find_scheme(value: &str, scheme: &str) -> Option<usize> {
    let lower = value.to_ascii_lowercase();
    let mut from = 0;
    while let Some(pos) = lower[from..].find(scheme) {
        let idx = from + pos;
        let before_ok = idx == 0 || matches!(lower.as_bytes()[idx - 1], b' ' | b',' | b'\t');
        let after = lower.as_bytes().get(idx + scheme.len());
        let after_ok = matches!(after, None | Some(b' ') | Some(b'\t'));
        if before_ok && after_ok {
            return Some(idx);
        }
        from = idx + scheme.len();
    }
    None
}

/// Parse `key=value, key="quoted value"` pairs, stopping at the next scheme
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() {
            break;
        }

        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        // A bare token is the start of the next challenge
        if chars.peek() != Some(&'=') {
            break;
        }
        chars.next();
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            value = value.trim().to_string();
        }

        params.push((key, value));
    }

    params
}

/// Source of client nonces
pub trait NonceSource: Send + Sync {
    fn next_nonce(&self) -> String;
}

/// 16 random bytes, hex encoded
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomNonce;

impl NonceSource for RandomNonce {
    fn next_nonce(&self) -> String {
        let bytes: [u8; 16] = rand::random();
        hex::encode(bytes)
    }
}

/// Always the same client nonce
#[derive(Debug, Clone)]
pub struct FixedNonce(pub String);

impl NonceSource for FixedNonce {
    fn next_nonce(&self) -> String {
        self.0.clone()
    }
}

#[derive(Default)]
struct DigestState {
    challenge: Option<(DigestChallenge, ChallengeOrigin)>,
    nonce_count: u32,
}

/// Stateful Digest strategy, shareable across requests
pub struct DigestAuth {
    credentials: Credentials,
    nonce_source: Arc<dyn NonceSource>,
    state: Mutex<DigestState>,
}

impl DigestAuth {
    pub fn new(credentials: Credentials) -> Self {
        Self::with_nonce_source(credentials, Arc::new(RandomNonce))
    }

    pub fn with_nonce_source(credentials: Credentials, nonce_source: Arc<dyn NonceSource>) -> Self {
        DigestAuth {
            credentials,
            nonce_source,
            state: Mutex::new(DigestState::default()),
        }
    }

    /// Whether a challenge has been learned yet
    pub fn has_challenge(&self) -> bool {
        self.state.lock().challenge.is_some()
    }

    pub fn nonce_count(&self) -> u32 {
        self.state.lock().nonce_count
    }

    /// Record the challenge carried by a 401/407 response.
    ///
    /// Returns `true` if it differs from the cached one (new nonce, a stale
    /// flag, or the other side challenging), `false` if it is the challenge
    /// already in use.
    pub fn observe(&self, status: u16, headers: &[(String, String)]) -> Result<bool> {
        Ok(self
            .observe_challenge(status, headers)?
            .is_some_and(|observed| observed.is_new))
    }

    /// Like [`observe`](Self::observe), returning what the response carried.
    /// `None` for statuses other than 401/407.
    pub fn observe_challenge(
        &self,
        status: u16,
        headers: &[(String, String)],
    ) -> Result<Option<ObservedChallenge>> {
        let Some(origin) = ChallengeOrigin::from_status(status) else {
            return Ok(None);
        };

        let challenge = DigestChallenge::from_headers(headers, &origin.challenge_header())?
            .ok_or_else(|| {
                Error::auth_failed(format!(
                    "{} response without a {} challenge",
                    status,
                    origin.challenge_header().as_str()
                ))
            })?;

        let mut state = self.state.lock();
        let is_new = match &state.challenge {
            Some((cached, cached_origin)) => {
                challenge.stale || cached.nonce != challenge.nonce || *cached_origin != origin
            }
            None => true,
        };

        let observed = ObservedChallenge {
            nonce: challenge.nonce.clone(),
            origin,
            stale: challenge.stale,
            is_new,
        };

        if is_new {
            debug!(
                "Digest challenge for realm {:?} ({}, qop {:?})",
                challenge.realm, challenge.algorithm, challenge.qop
            );
            state.challenge = Some((challenge, origin));
            state.nonce_count = 0;
        }
        Ok(Some(observed))
    }

    /// Header for the next request, if a challenge is known
    pub fn authorization(
        &self,
        method: &str,
        uri: &str,
        body: Option<&[u8]>,
    ) -> Option<AuthHeader> {
        self.answer(method, uri, body).map(|answer| answer.header)
    }

    /// Header for the next request together with the challenge it answers
    pub fn answer(&self, method: &str, uri: &str, body: Option<&[u8]>) -> Option<DigestAnswer> {
        let (challenge, origin, nonce_count) = {
            let mut state = self.state.lock();
            let (challenge, origin) = state.challenge.clone()?;
            state.nonce_count += 1;
            (challenge, origin, state.nonce_count)
        };

        let cnonce = self.nonce_source.next_nonce();
        let value = challenge.authorization_value(
            &self.credentials,
            method,
            uri,
            body,
            nonce_count,
            &cnonce,
        );
        Some(DigestAnswer {
            header: AuthHeader::new(origin.authorization_header(), value),
            nonce: challenge.nonce,
            origin,
        })
    }
}

/// A challenge as seen on one 401/407 response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedChallenge {
    pub nonce: String,
    pub origin: ChallengeOrigin,
    pub stale: bool,
    /// Differs from what was cached before this response
    pub is_new: bool,
}

impl ObservedChallenge {
    /// Whether `answer` already responded to this exact challenge
    pub fn answered_by(&self, answer: Option<&DigestAnswer>) -> bool {
        match answer {
            Some(answer) => !self.stale && answer.nonce == self.nonce && answer.origin == self.origin,
            None => false,
        }
    }
}

/// A computed Digest header and the server nonce it was signed with
#[derive(Debug, Clone)]
pub struct DigestAnswer {
    pub header: AuthHeader,
    pub nonce: String,
    pub origin: ChallengeOrigin,
}

impl fmt::Debug for DigestAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestAuth")
            .field("username", &self.credentials.username())
            .field("has_challenge", &self.has_challenge())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Credentials {
        Credentials::new("alice", "wonderland")
    }

    fn test_challenge() -> DigestChallenge {
        DigestChallenge::parse(r#"Digest realm="test", nonce="abc123", qop="auth", algorithm=MD5"#)
            .unwrap()
            .unwrap()
    }

    fn challenge_headers(value: &str) -> Vec<(String, String)> {
        vec![("WWW-Authenticate".to_string(), value.to_string())]
    }

    #[test]
    fn test_parse_challenge() {
        let c = test_challenge();
        assert_eq!(c.realm, "test");
        assert_eq!(c.nonce, "abc123");
        assert_eq!(c.algorithm, Algorithm::Md5);
        assert_eq!(c.qop, vec![Qop::Auth]);
        assert!(c.opaque.is_none());
        assert!(!c.stale);
    }

    #[test]
    fn test_parse_escaped_and_mixed_challenges() {
        let value = r#"Basic realm="b", Digest realm="a \"quoted\" realm", nonce=n1, opaque="o", stale=TRUE, qop="auth-int,auth""#;
        let c = DigestChallenge::parse(value).unwrap().unwrap();
        assert_eq!(c.realm, r#"a "quoted" realm"#);
        assert_eq!(c.nonce, "n1");
        assert_eq!(c.opaque.as_deref(), Some("o"));
        assert!(c.stale);
        assert_eq!(c.selected_qop(), Some(Qop::Auth));
    }

    #[test]
    fn test_fixed_challenge_is_deterministic() {
        let c = test_challenge();
        let first = c.compute_response(&alice(), "GET", "/protected", None, 1, "0a4f113b");
        let second = c.compute_response(&alice(), "GET", "/protected", None, 1, "0a4f113b");
        assert_eq!(first, "c91f3144c78a671bb204cf0784753698");
        assert_eq!(first, second);

        let next = c.compute_response(&alice(), "GET", "/protected", None, 2, "0a4f113b");
        assert_eq!(next, "532d820ca51666cc2819077c262fd468");
    }

    #[test]
    fn test_rfc2617_example() {
        let c = DigestChallenge::parse(
            r#"Digest realm="testrealm@host.com", qop="auth,auth-int", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#,
        )
        .unwrap()
        .unwrap();
        let creds = Credentials::new("Mufasa", "Circle Of Life");
        let response = c.compute_response(&creds, "GET", "/dir/index.html", None, 1, "0a4f113b");
        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn test_variants() {
        let creds = alice();

        let legacy = DigestChallenge::parse(r#"Digest realm="test", nonce="abc123""#)
            .unwrap()
            .unwrap();
        assert_eq!(
            legacy.compute_response(&creds, "GET", "/protected", None, 1, "0a4f113b"),
            "2c6ee66feb5a6b547dc5c8583bcf8920"
        );

        let sess = DigestChallenge::parse(
            r#"Digest realm="test", nonce="abc123", qop="auth", algorithm=MD5-sess"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            sess.compute_response(&creds, "GET", "/protected", None, 1, "0a4f113b"),
            "210b4a98000836b35216af51feeab9a1"
        );

        let int = DigestChallenge::parse(r#"Digest realm="test", nonce="abc123", qop="auth-int""#)
            .unwrap()
            .unwrap();
        assert_eq!(
            int.compute_response(&creds, "POST", "/upload", Some(b"payload"), 1, "0a4f113b"),
            "c7a44ef7084977cfed2dd02997ab0669"
        );

        let sha = DigestChallenge::parse(
            r#"Digest realm="test", nonce="abc123", qop="auth", algorithm=SHA-256"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            sha.compute_response(&creds, "GET", "/protected", None, 1, "0a4f113b"),
            "3485f275b25ca5f9d031e4a3103b210cf9d0a515ce1ddb5c4ceea50628d363e4"
        );
    }

    #[test]
    fn test_unsupported_algorithm_is_surfaced() {
        let result = DigestChallenge::parse(
            r#"Digest realm="test", nonce="abc123", qop="auth", algorithm=SHA-512-256"#,
        );
        assert!(matches!(result, Err(Error::UnsupportedAuthScheme(_))));

        let result = DigestChallenge::parse(r#"Digest realm="test", nonce="abc123", qop="x-token""#);
        assert!(matches!(result, Err(Error::UnsupportedAuthScheme(_))));
    }

    #[test]
    fn test_basic_only_challenge_is_unsupported() {
        let result = DigestChallenge::from_headers(
            &challenge_headers(r#"Basic realm="test""#),
            &WWW_AUTHENTICATE,
        );
        assert!(matches!(result, Err(Error::UnsupportedAuthScheme(_))));
    }

    #[test]
    fn test_authorization_header_layout() {
        let auth = DigestAuth::with_nonce_source(alice(), Arc::new(FixedNonce("0a4f113b".into())));
        assert!(auth.authorization("GET", "/protected", None).is_none());

        let headers = challenge_headers(
            r#"Digest realm="test", nonce="abc123", qop="auth", algorithm=MD5, opaque="xyz""#,
        );
        assert!(auth.observe(401, &headers).unwrap());

        let header = auth.authorization("GET", "/protected", None).unwrap();
        assert_eq!(header.name, AUTHORIZATION);
        assert_eq!(
            header.value,
            "Digest username=\"alice\", realm=\"test\", nonce=\"abc123\", uri=\"/protected\", \
             algorithm=MD5, response=\"c91f3144c78a671bb204cf0784753698\", opaque=\"xyz\", \
             qop=auth, nc=00000001, cnonce=\"0a4f113b\""
        );
    }

    #[test]
    fn test_observe_tracks_nonce_rotation() {
        let auth = DigestAuth::with_nonce_source(alice(), Arc::new(FixedNonce("c".into())));
        let first = challenge_headers(r#"Digest realm="test", nonce="n1", qop="auth""#);

        assert!(auth.observe(401, &first).unwrap());
        auth.authorization("GET", "/", None).unwrap();
        auth.authorization("GET", "/", None).unwrap();
        assert_eq!(auth.nonce_count(), 2);

        // Same nonce again: nothing new learned
        assert!(!auth.observe(401, &first).unwrap());
        assert_eq!(auth.nonce_count(), 2);

        // Rotated nonce resets the counter
        let rotated = challenge_headers(r#"Digest realm="test", nonce="n2", qop="auth""#);
        assert!(auth.observe(401, &rotated).unwrap());
        assert_eq!(auth.nonce_count(), 0);
        let header = auth.authorization("GET", "/", None).unwrap();
        assert!(header.value.contains("nc=00000001"));
    }

    #[test]
    fn test_proxy_challenge_uses_proxy_headers() {
        let auth = DigestAuth::new(alice());
        let headers = vec![(
            "Proxy-Authenticate".to_string(),
            r#"Digest realm="proxy", nonce="p1""#.to_string(),
        )];
        assert!(auth.observe(407, &headers).unwrap());
        let header = auth.authorization("GET", "http://example.test/", None).unwrap();
        assert_eq!(header.name, PROXY_AUTHORIZATION);
        assert!(!header.value.contains("nc="));
    }

    #[test]
    fn test_missing_challenge_header_fails() {
        let auth = DigestAuth::new(alice());
        assert!(matches!(auth.observe(401, &[]), Err(Error::AuthFailed(_))));
        assert!(!auth.observe(200, &[]).unwrap());
    }

    #[test]
    fn test_answered_by_tracks_signed_nonce() {
        let auth = DigestAuth::new(alice());
        let first = challenge_headers(r#"Digest realm="test", nonce="abc123", qop="auth""#);

        let observed = auth.observe_challenge(401, &first).unwrap().unwrap();
        assert!(observed.is_new);
        assert!(!observed.answered_by(None));

        let answer = auth.answer("GET", "/", None).unwrap();
        assert_eq!(answer.nonce, "abc123");
        assert_eq!(answer.origin, ChallengeOrigin::Server);

        // Same nonce seen again by a request that never signed it
        let again = auth.observe_challenge(401, &first).unwrap().unwrap();
        assert!(!again.is_new);
        assert!(!again.answered_by(None));
        assert!(again.answered_by(Some(&answer)));

        let stale = challenge_headers(r#"Digest realm="test", nonce="abc123", qop="auth", stale=true"#);
        let refreshed = auth.observe_challenge(401, &stale).unwrap().unwrap();
        assert!(!refreshed.answered_by(Some(&answer)));

        let proxy = vec![(
            "Proxy-Authenticate".to_string(),
            r#"Digest realm="test", nonce="abc123", qop="auth""#.to_string(),
        )];
        let from_proxy = auth.observe_challenge(407, &proxy).unwrap().unwrap();
        assert!(!from_proxy.answered_by(Some(&answer)));

        assert!(auth.observe_challenge(200, &[]).unwrap().is_none());
    }

    #[test]
    fn test_random_nonce_shape() {
        let nonce = RandomNonce.next_nonce();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(nonce, RandomNonce.next_nonce());
    }

    #[test]
    fn test_concurrent_nonce_counts_are_unique() {
        let auth = Arc::new(DigestAuth::new(alice()));
        auth.observe(401, &challenge_headers(r#"Digest realm="r", nonce="n", qop="auth""#))
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let auth = auth.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .map(|_| auth.authorization("GET", "/", None).unwrap().value)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .map(|v| {
                let start = v.find("nc=").unwrap() + 3;
                v[start..start + 8].to_string()
            })
            .collect();
        counts.sort();
        counts.dedup();
        assert_eq!(counts.len(), 200);
    }
}
