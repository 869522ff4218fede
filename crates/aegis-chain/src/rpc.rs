//! JSON-RPC client for the deployment's ledger gateway
//!
//! Both on-ledger collaborators (the value asset and the credit
//! contract) are reached through one JSON-RPC 2.0 endpoint. The client
//! owns its HTTP handle; adapters share it behind an `Arc`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use aegis_types::{Aegis402Error, Result};

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct RpcResponse<R> {
    result: Option<R>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// JSON-RPC 2.0 client, authenticated with the clearinghouse agent key
pub struct RpcClient {
    base_url: String,
    agent_key: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a client for the gateway at `base_url`
    pub fn new(base_url: &str, agent_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent_key: agent_key.into(),
            client: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Invoke `method` with `params`, decoding the result as `R`
    pub async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let resp = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.agent_key)
            .timeout(RPC_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| Aegis402Error::ledger(format!("{method}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Aegis402Error::ledger(format!(
                "{method}: gateway returned {status}"
            )));
        }

        let body: RpcResponse<R> = resp
            .json()
            .await
            .map_err(|e| Aegis402Error::ledger(format!("{method}: invalid response: {e}")))?;

        if let Some(err) = body.error {
            return Err(Aegis402Error::ledger(format!(
                "{method}: {} (code {})",
                err.message, err.code
            )));
        }

        body.result
            .ok_or_else(|| Aegis402Error::ledger(format!("{method}: empty result")))
    }
}
