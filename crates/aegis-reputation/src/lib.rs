//! Reputation readers
//!
//! A merchant's credit limit is its stake scaled by a bounded reputation
//! factor. The oracle is external; this crate defines the reading seam
//! and two implementations: a fixed factor (a constant reader must yield
//! a fully functioning system) and an HTTP oracle client that clamps
//! whatever the oracle returns and falls back to neutral on error.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use aegis_types::{Address, RepFactor};

/// Read a bounded reputation factor for an agent identity
///
/// Lookups prefer the agent id when one is known (`agent_id != "0"`) and
/// fall back to the ledger address otherwise.
#[async_trait]
pub trait ReputationReader: Send + Sync {
    async fn by_agent_id(&self, agent_id: &str) -> RepFactor;

    async fn by_address(&self, address: &Address) -> RepFactor;

    /// Factor for a merchant, dispatching on whether the agent id is known
    async fn for_merchant(&self, agent_id: &str, address: &Address) -> RepFactor {
        if agent_id != "0" {
            self.by_agent_id(agent_id).await
        } else {
            self.by_address(address).await
        }
    }
}

/// Constant-factor reader
pub struct FixedReputation {
    factor: RepFactor,
}

impl FixedReputation {
    pub fn new(factor: RepFactor) -> Self {
        Self { factor }
    }

    /// Neutral reader (ρ = 1.0)
    pub fn neutral() -> Self {
        Self::new(RepFactor::NEUTRAL)
    }
}

#[async_trait]
impl ReputationReader for FixedReputation {
    async fn by_agent_id(&self, _agent_id: &str) -> RepFactor {
        self.factor
    }

    async fn by_address(&self, _address: &Address) -> RepFactor {
        self.factor
    }
}

#[derive(Deserialize)]
struct OracleResponse {
    permille: u32,
}

/// HTTP oracle reader
///
/// Queries `{base_url}/reputation/agent/{id}` or
/// `{base_url}/reputation/address/{addr}`. Whatever comes back is
/// clamped into the factor bounds; any failure degrades to the fallback
/// factor rather than blocking subscription.
pub struct HttpReputation {
    base_url: String,
    client: reqwest::Client,
    fallback: RepFactor,
}

impl HttpReputation {
    pub fn new(base_url: &str, fallback: RepFactor) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            fallback,
        }
    }

    async fn fetch(&self, path: String) -> RepFactor {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<OracleResponse>().await {
                Ok(body) => RepFactor::from_permille(body.permille),
                Err(e) => {
                    warn!(url, error = %e, "reputation oracle returned invalid body");
                    self.fallback
                }
            },
            Ok(resp) => {
                warn!(url, status = %resp.status(), "reputation oracle request failed");
                self.fallback
            }
            Err(e) => {
                warn!(url, error = %e, "reputation oracle unreachable");
                self.fallback
            }
        }
    }
}

#[async_trait]
impl ReputationReader for HttpReputation {
    async fn by_agent_id(&self, agent_id: &str) -> RepFactor {
        self.fetch(format!("reputation/agent/{agent_id}")).await
    }

    async fn by_address(&self, address: &Address) -> RepFactor {
        self.fetch(format!("reputation/address/{address}")).await
    }
}
