//! Request executor
//!
//! Drives one request through
//! `Idle -> Sent -> [AwaitingChallenge -> Retried] -> Done | Failed`.
//! Every round trip opens its own connection. A Digest challenge earns at
//! most one retry, so an `execute` never issues more than two requests.

use crate::auth::{AuthHeader, AuthStrategy, ChallengeOrigin, DigestAnswer};
use crate::common::{Dialer, Phase, RustlsConnector, Target, TcpDialer, TlsConnect};
use crate::config::ClientConfig;
use crate::http::{read_response, RequestSpec, ResponseResult, DEFAULT_USER_AGENT};
use crate::outbound::{DialContext, TransportAgent};
use crate::proxy::ProxyDescriptor;
use crate::{Error, Result};
use http::Method;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Most requests a single `execute` may send
pub const MAX_ROUND_TRIPS: usize = 2;

/// Where an exchange stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Sent,
    AwaitingChallenge,
    Retried,
    Done,
    Failed,
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExchangeState::Idle => "idle",
            ExchangeState::Sent => "sent",
            ExchangeState::AwaitingChallenge => "awaiting-challenge",
            ExchangeState::Retried => "retried",
            ExchangeState::Done => "done",
            ExchangeState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Proxy-aware HTTP client
pub struct ProxyClient {
    proxy: Option<ProxyDescriptor>,
    auth: AuthStrategy,
    default_headers: Vec<(String, String)>,
    user_agent: String,
    connect_timeout: Duration,
    timeout: Duration,
    dialer: Arc<dyn Dialer>,
    tls: Arc<dyn TlsConnect>,
}

/// Builder for [`ProxyClient`]
#[derive(Default)]
pub struct ProxyClientBuilder {
    config: ClientConfig,
    dialer: Option<Arc<dyn Dialer>>,
    tls: Option<Arc<dyn TlsConnect>>,
    auth: Option<AuthStrategy>,
}

impl ProxyClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the socket dialer
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Replace the TLS handshaker
    pub fn tls(mut self, tls: Arc<dyn TlsConnect>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Origin auth; overrides the config's `auth` section
    pub fn auth(mut self, auth: AuthStrategy) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn build(self) -> Result<ProxyClient> {
        let config = self.config;
        config.validate()?;

        let tls: Arc<dyn TlsConnect> = match self.tls {
            Some(tls) => tls,
            None if config.skip_cert_verify => {
                warn!("TLS certificate verification is disabled");
                Arc::new(RustlsConnector::insecure())
            }
            None => Arc::new(RustlsConnector::new(config.ca_file.as_deref())?),
        };

        Ok(ProxyClient {
            proxy: config.proxy_descriptor()?,
            auth: self.auth.unwrap_or_else(|| config.auth_strategy()),
            user_agent: config
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            default_headers: config.headers.clone(),
            connect_timeout: config.connect_timeout(),
            timeout: config.timeout(),
            dialer: self.dialer.unwrap_or_else(|| Arc::new(TcpDialer)),
            tls,
        })
    }
}

impl ProxyClient {
    pub fn builder() -> ProxyClientBuilder {
        ProxyClientBuilder::default()
    }

    /// Client with default settings
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn auth(&self) -> &AuthStrategy {
        &self.auth
    }

    /// Proxy used when the request names none
    pub fn proxy(&self) -> Option<&ProxyDescriptor> {
        self.proxy.as_ref()
    }

    /// Issue the request; non-2xx statuses are results, not errors
    pub async fn execute(&self, spec: &RequestSpec) -> Result<ResponseResult> {
        self.execute_with_cancel(spec, CancellationToken::new()).await
    }

    /// Like [`execute`](Self::execute), aborting with `Cancelled` when
    /// `cancel` fires
    pub async fn execute_with_cancel(
        &self,
        spec: &RequestSpec,
        cancel: CancellationToken,
    ) -> Result<ResponseResult> {
        spec.validate()?;
        let target = spec.target()?;
        let proxy = spec.proxy().or(self.proxy.as_ref());

        let mut exchange = Exchange {
            client: self,
            spec,
            agent: TransportAgent::new(proxy, self.dial_context()),
            target: &target,
            state: ExchangeState::Idle,
            round_trips: 0,
            answered: None,
        };

        let deadline = self.timeout;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::cancelled(format!("request to {} cancelled", target))),
            res = timeout(deadline, exchange.run()) => match res {
                Ok(res) => res,
                Err(_) => Err(Error::timeout(format!(
                    "request to {} exceeded {}ms",
                    target,
                    deadline.as_millis()
                ))),
            },
        };

        match &result {
            Ok(response) => info!(
                "{} {} -> {} {}",
                spec.method(),
                target,
                response.status,
                response.reason
            ),
            Err(e) => warn!("{} {} failed: {}", spec.method(), target, e),
        }
        result
    }

    fn dial_context(&self) -> DialContext {
        DialContext {
            dialer: self.dialer.clone(),
            tls: self.tls.clone(),
            connect_timeout: self.connect_timeout,
        }
    }
}

/// One `execute` in flight
struct Exchange<'a> {
    client: &'a ProxyClient,
    spec: &'a RequestSpec,
    agent: TransportAgent,
    target: &'a Target,
    state: ExchangeState,
    round_trips: usize,
    /// Digest challenge the last request was signed for
    answered: Option<DigestAnswer>,
}

impl Exchange<'_> {
    fn transition(&mut self, next: ExchangeState) {
        debug!(
            "[{}] exchange {} -> {} ({})",
            self.agent.outbound().name(),
            self.state,
            next,
            self.target
        );
        self.state = next;
    }

    async fn run(&mut self) -> Result<ResponseResult> {
        let result = self.drive().await;
        match &result {
            Ok(_) => self.transition(ExchangeState::Done),
            Err(_) => self.transition(ExchangeState::Failed),
        }
        result
    }

    async fn drive(&mut self) -> Result<ResponseResult> {
        let first = self.round_trip().await?;
        self.transition(ExchangeState::Sent);

        let AuthStrategy::Digest(digest) = &self.client.auth else {
            return Ok(first);
        };
        let digest = digest.clone();

        if ChallengeOrigin::from_status(first.status).is_none() {
            return Ok(first);
        }
        self.transition(ExchangeState::AwaitingChallenge);

        let challenge = digest.observe_challenge(first.status, &first.headers)?;
        if challenge.is_some_and(|c| c.answered_by(self.answered.as_ref())) {
            return Err(Error::auth_failed(format!(
                "{} rejected the digest response for the current challenge",
                first.status
            )));
        }

        let second = self.round_trip().await?;
        self.transition(ExchangeState::Retried);

        if ChallengeOrigin::from_status(second.status).is_some() {
            // Keep a rotated nonce for the next request
            let _ = digest.observe(second.status, &second.headers);
            return Err(Error::auth_failed(format!(
                "{} {} after digest retry",
                second.status, second.reason
            )));
        }
        Ok(second)
    }

    /// Header for this attempt; remembers which Digest challenge it answers
    fn auth_header(&mut self, request_target: &str) -> Option<AuthHeader> {
        let (spec, client) = (self.spec, self.client);
        let method = spec.method().as_str();
        let body = spec.body().map(|b| b.as_ref());
        match &client.auth {
            AuthStrategy::Digest(digest) => {
                self.answered = digest.answer(method, request_target, body);
                self.answered.as_ref().map(|answer| answer.header.clone())
            }
            other => other.header_for(method, request_target, body),
        }
    }

    /// Connect, send the request, read the response
    async fn round_trip(&mut self) -> Result<ResponseResult> {
        if self.round_trips >= MAX_ROUND_TRIPS {
            return Err(Error::auth_failed("retry budget exhausted"));
        }
        self.round_trips += 1;

        let mut established = self.agent.connect(self.target).await?;

        let request_target = self.spec.request_target(&established.form);
        let auth = self.auth_header(&request_target);
        let request = self.spec.encode(
            &established.form,
            &self.client.default_headers,
            &self.client.user_agent,
            auth.as_ref(),
        );

        debug!(
            "[{}] {} {} (attempt {}, auth {})",
            self.agent.outbound().name(),
            self.spec.method(),
            request_target,
            self.round_trips,
            self.client.auth.name()
        );

        let endpoint = self.target.authority();
        async {
            established.stream.write_all(&request).await?;
            established.stream.flush().await
        }
        .await
        .map_err(|e| Error::from(e).context(Phase::Send, &endpoint))?;

        let head_request = self.spec.method() == Method::HEAD;
        read_response(&mut established.stream, head_request)
            .await
            .map_err(|e| e.context(Phase::Receive, &endpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_uses_config() {
        let config = ClientConfig {
            proxy: Some("http://user:pw@proxy.test:3128".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
            timeout_ms: 1_500,
            ..Default::default()
        };
        let client = ProxyClient::builder().config(config).build().unwrap();
        assert_eq!(client.proxy().unwrap().authority(), "proxy.test:3128");
        assert_eq!(client.user_agent, "Mozilla/5.0");
        assert_eq!(client.timeout, Duration::from_millis(1_500));
        assert!(matches!(client.auth(), AuthStrategy::None));
    }

    #[test]
    fn test_builder_rejects_bad_proxy() {
        let config = ClientConfig {
            proxy: Some("gopher://proxy.test".to_string()),
            ..Default::default()
        };
        let err = ProxyClient::builder().config(config).build().err().unwrap();
        assert!(matches!(err, Error::InvalidProxyUrl(_)));
    }

    #[test]
    fn test_builder_rejects_injected_default_header() {
        let config = ClientConfig {
            headers: vec![("X-A".to_string(), "v\r\nInjected: 1".to_string())],
            ..Default::default()
        };
        let err = ProxyClient::builder().config(config).build().err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ExchangeState::AwaitingChallenge.to_string(), "awaiting-challenge");
        assert_eq!(ExchangeState::Failed.to_string(), "failed");
    }

    #[tokio::test]
    async fn test_invalid_header_fails_before_dialing() {
        let client = ProxyClient::new().unwrap();
        let spec = RequestSpec::get("http://127.0.0.1:9/")
            .unwrap()
            .with_header("X-Bad", "a\nb");
        let err = client.execute(&spec).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
