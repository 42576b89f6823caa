//! Direct outbound (no proxy)

use super::{DialContext, Established, OutboundProxy, ProxyType};
use crate::common::{Phase, Target};
use crate::Result;
use async_trait::async_trait;
use tracing::debug;

/// Direct connection (no proxy)
pub struct Direct {
    name: String,
    ctx: DialContext,
}

impl Direct {
    pub fn new(ctx: DialContext) -> Self {
        Direct {
            name: "DIRECT".to_string(),
            ctx,
        }
    }
}

#[async_trait]
impl OutboundProxy for Direct {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxy_type(&self) -> ProxyType {
        ProxyType::Direct
    }

    fn server(&self) -> &str {
        "DIRECT"
    }

    async fn dial_tcp(&self, target: &Target) -> Result<Established> {
        debug!("Direct connecting to {}", target);

        let stream = self
            .ctx
            .dialer
            .connect(&target.host, target.port, self.ctx.connect_timeout)
            .await
            .map_err(|e| e.context(Phase::Connect, &target.authority()))?;

        debug!("Direct connected to {}", target);
        Ok(Established::origin(stream))
    }
}
