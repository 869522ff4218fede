//! Typed wrapper for the on-ledger credit contract
//!
//! Writes return a receipt once the gateway has accepted the
//! transaction. Transient failures surface as `Ledger` errors; the
//! clearing core reports them to callers and never retries internally.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use aegis_types::{
    Address, Aegis402Error, Amount, CreditEvent, CreditEventKind, MerchantState, Result, TxHash,
};

/// Default block window for historical event queries
pub const DEFAULT_EVENT_CHUNK: u64 = 2_000;

/// Receipt for an accepted credit-contract write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallReceipt {
    pub tx_hash: TxHash,
    pub block: u64,
}

/// Read/write interface to the on-ledger credit contract
#[async_trait]
pub trait CreditOps: Send + Sync {
    /// Read a merchant's on-ledger state (zero state for unknown addresses)
    async fn get_merchant(&self, addr: &Address) -> Result<MerchantState>;

    /// Read a merchant's registered skill tags
    async fn get_merchant_skills(&self, addr: &Address) -> Result<Vec<String>>;

    /// Register a merchant, pulling `stake` from the clearinghouse account.
    /// Requires a prior token-level approval; fails if already active.
    async fn subscribe_for(
        &self,
        addr: &Address,
        stake: Amount,
        agent_id: &str,
        endpoint: &str,
        skills: &[String],
    ) -> Result<CallReceipt>;

    /// Set a merchant's credit limit; requires the merchant to be active
    async fn set_credit_limit(&self, addr: &Address, limit: Amount) -> Result<CallReceipt>;

    /// Record outstanding exposure; fails if it would exceed the credit limit
    async fn record_payment(&self, addr: &Address, amount: Amount) -> Result<CallReceipt>;

    /// Clear outstanding exposure; fails if `amount > exposure`
    async fn clear_exposure(&self, addr: &Address, amount: Amount) -> Result<CallReceipt>;

    /// Burn stake to refund `client`; fails if `amount` exceeds stake or exposure
    async fn slash(&self, addr: &Address, client: &Address, amount: Amount) -> Result<CallReceipt>;

    /// Approve the credit contract to pull `amount` of the value asset
    /// from the clearinghouse account
    async fn approve_stake(&self, amount: Amount) -> Result<CallReceipt>;

    /// Current token allowance granted to the credit contract
    async fn stake_allowance(&self) -> Result<Amount>;

    /// One uncut historical event query; callers go through `query_events`
    async fn query_events_raw(
        &self,
        kind: CreditEventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<CreditEvent>>;

    /// Historical events in `[from_block, to_block]`, queried in fixed-size
    /// chunks. A failed chunk is halved and retried once, then skipped;
    /// chunk failures never abort the outer scan.
    async fn query_events(
        &self,
        kind: CreditEventKind,
        from_block: u64,
        to_block: u64,
    ) -> Vec<CreditEvent> {
        let mut events = Vec::new();
        let mut from = from_block;

        while from <= to_block {
            let to = to_block.min(from.saturating_add(DEFAULT_EVENT_CHUNK - 1));
            match self.query_events_raw(kind, from, to).await {
                Ok(chunk) => {
                    events.extend(chunk);
                    from = to + 1;
                }
                Err(e) => {
                    warn!(%kind, from, to, error = %e, "event chunk failed, retrying half");
                    let half_to = from + (to - from) / 2;
                    match self.query_events_raw(kind, from, half_to).await {
                        Ok(chunk) => {
                            events.extend(chunk);
                            from = half_to + 1;
                        }
                        Err(e) => {
                            warn!(%kind, from, to, error = %e, "event chunk skipped");
                            from = to + 1;
                        }
                    }
                }
            }
        }

        events
    }
}

// ============================================================================
// JSON-RPC implementation
// ============================================================================

/// `CreditOps` over the JSON-RPC gateway
pub struct RpcCreditManager {
    rpc: Arc<super::RpcClient>,
    contract_address: Address,
}

impl RpcCreditManager {
    pub fn new(rpc: Arc<super::RpcClient>, contract_address: Address) -> Self {
        Self {
            rpc,
            contract_address,
        }
    }
}

#[async_trait]
impl CreditOps for RpcCreditManager {
    async fn get_merchant(&self, addr: &Address) -> Result<MerchantState> {
        self.rpc
            .call(
                "credit_getMerchant",
                json!({ "contract": self.contract_address, "merchant": addr }),
            )
            .await
    }

    async fn get_merchant_skills(&self, addr: &Address) -> Result<Vec<String>> {
        self.rpc
            .call(
                "credit_getMerchantSkills",
                json!({ "contract": self.contract_address, "merchant": addr }),
            )
            .await
    }

    async fn subscribe_for(
        &self,
        addr: &Address,
        stake: Amount,
        agent_id: &str,
        endpoint: &str,
        skills: &[String],
    ) -> Result<CallReceipt> {
        self.rpc
            .call(
                "credit_subscribeFor",
                json!({
                    "contract": self.contract_address,
                    "merchant": addr,
                    "stake": stake,
                    "agent_id": agent_id,
                    "endpoint": endpoint,
                    "skills": skills,
                }),
            )
            .await
    }

    async fn set_credit_limit(&self, addr: &Address, limit: Amount) -> Result<CallReceipt> {
        self.rpc
            .call(
                "credit_setCreditLimit",
                json!({ "contract": self.contract_address, "merchant": addr, "limit": limit }),
            )
            .await
    }

    async fn record_payment(&self, addr: &Address, amount: Amount) -> Result<CallReceipt> {
        self.rpc
            .call(
                "credit_recordPayment",
                json!({ "contract": self.contract_address, "merchant": addr, "amount": amount }),
            )
            .await
    }

    async fn clear_exposure(&self, addr: &Address, amount: Amount) -> Result<CallReceipt> {
        self.rpc
            .call(
                "credit_clearExposure",
                json!({ "contract": self.contract_address, "merchant": addr, "amount": amount }),
            )
            .await
    }

    async fn slash(&self, addr: &Address, client: &Address, amount: Amount) -> Result<CallReceipt> {
        self.rpc
            .call(
                "credit_slash",
                json!({
                    "contract": self.contract_address,
                    "merchant": addr,
                    "client": client,
                    "amount": amount,
                }),
            )
            .await
    }

    async fn approve_stake(&self, amount: Amount) -> Result<CallReceipt> {
        self.rpc
            .call(
                "token_approve",
                json!({ "spender": self.contract_address, "amount": amount }),
            )
            .await
    }

    async fn stake_allowance(&self) -> Result<Amount> {
        self.rpc
            .call(
                "token_allowance",
                json!({ "spender": self.contract_address }),
            )
            .await
    }

    async fn query_events_raw(
        &self,
        kind: CreditEventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<CreditEvent>> {
        self.rpc
            .call(
                "credit_queryEvents",
                json!({
                    "contract": self.contract_address,
                    "kind": kind,
                    "from_block": from_block,
                    "to_block": to_block,
                }),
            )
            .await
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

#[derive(Debug, Clone, Default)]
struct OnLedgerMerchant {
    stake: Amount,
    credit_limit: Amount,
    exposure: Amount,
    agent_id: String,
    endpoint: String,
    skills: Vec<String>,
    active: bool,
}

/// A slash refund executed by the in-memory contract
#[derive(Debug, Clone)]
pub struct RefundTransfer {
    pub client: Address,
    pub amount: Amount,
    pub tx_hash: TxHash,
}

#[derive(Default)]
struct ContractState {
    merchants: HashMap<Address, OnLedgerMerchant>,
    allowance: Amount,
    refunds: Vec<RefundTransfer>,
    events: Vec<CreditEvent>,
    block: u64,
    seq: u64,
    fail_next: Option<String>,
}

/// In-memory credit contract with the same failure semantics as the
/// on-ledger one, for tests and local runs
#[derive(Default)]
pub struct InMemoryCreditManager {
    inner: RwLock<ContractState>,
}

impl InMemoryCreditManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call to `method` fail once with a ledger error
    pub async fn fail_next_call(&self, method: &str) {
        self.inner.write().await.fail_next = Some(method.to_string());
    }

    /// Advance the simulated block height
    pub async fn set_block(&self, block: u64) {
        self.inner.write().await.block = block;
    }

    /// Refund transfers executed by `slash`, oldest first
    pub async fn refunds(&self) -> Vec<RefundTransfer> {
        self.inner.read().await.refunds.clone()
    }

    /// All emitted contract events, oldest first
    pub async fn events(&self) -> Vec<CreditEvent> {
        self.inner.read().await.events.clone()
    }

    async fn check_fail(&self, method: &str) -> Result<()> {
        let mut state = self.inner.write().await;
        if state.fail_next.as_deref() == Some(method) {
            state.fail_next = None;
            return Err(Aegis402Error::ledger(format!("injected {method} failure")));
        }
        Ok(())
    }
}

fn receipt(state: &mut ContractState) -> CallReceipt {
    state.seq += 1;
    state.block += 1;
    CallReceipt {
        tx_hash: TxHash::new(format!("0xcredit{:08x}", state.seq)),
        block: state.block,
    }
}

fn emit(
    state: &mut ContractState,
    kind: CreditEventKind,
    merchant: &Address,
    counterparty: Option<Address>,
    amount: Amount,
    receipt: &CallReceipt,
) {
    state.events.push(CreditEvent {
        kind,
        merchant: merchant.clone(),
        counterparty,
        amount,
        block: receipt.block,
        timestamp: receipt.block,
        tx_hash: receipt.tx_hash.clone(),
    });
}

#[async_trait]
impl CreditOps for InMemoryCreditManager {
    async fn get_merchant(&self, addr: &Address) -> Result<MerchantState> {
        self.check_fail("get_merchant").await?;
        let state = self.inner.read().await;
        let m = state.merchants.get(addr).cloned().unwrap_or_default();
        Ok(MerchantState {
            stake: m.stake,
            credit_limit: m.credit_limit,
            outstanding_exposure: m.exposure,
            agent_id: m.agent_id,
            endpoint: m.endpoint,
            active: m.active,
        })
    }

    async fn get_merchant_skills(&self, addr: &Address) -> Result<Vec<String>> {
        let state = self.inner.read().await;
        Ok(state
            .merchants
            .get(addr)
            .map(|m| m.skills.clone())
            .unwrap_or_default())
    }

    async fn subscribe_for(
        &self,
        addr: &Address,
        stake: Amount,
        agent_id: &str,
        endpoint: &str,
        skills: &[String],
    ) -> Result<CallReceipt> {
        self.check_fail("subscribe_for").await?;
        let mut state = self.inner.write().await;

        if state.merchants.get(addr).map(|m| m.active).unwrap_or(false) {
            return Err(Aegis402Error::ledger(format!("merchant {addr} already active")));
        }
        if state.allowance < stake {
            return Err(Aegis402Error::ledger(format!(
                "allowance {} below stake {stake}",
                state.allowance
            )));
        }
        state.allowance = state.allowance.saturating_sub(stake);

        state.merchants.insert(
            addr.clone(),
            OnLedgerMerchant {
                stake,
                credit_limit: Amount::ZERO,
                exposure: Amount::ZERO,
                agent_id: agent_id.to_string(),
                endpoint: endpoint.to_string(),
                skills: skills.to_vec(),
                active: true,
            },
        );

        let receipt = receipt(&mut state);
        emit(&mut state, CreditEventKind::Subscribed, addr, None, stake, &receipt);
        Ok(receipt)
    }

    async fn set_credit_limit(&self, addr: &Address, limit: Amount) -> Result<CallReceipt> {
        self.check_fail("set_credit_limit").await?;
        let mut state = self.inner.write().await;
        let m = state
            .merchants
            .get_mut(addr)
            .filter(|m| m.active)
            .ok_or_else(|| Aegis402Error::ledger(format!("merchant {addr} not active")))?;
        m.credit_limit = limit;
        Ok(receipt(&mut state))
    }

    async fn record_payment(&self, addr: &Address, amount: Amount) -> Result<CallReceipt> {
        self.check_fail("record_payment").await?;
        let mut state = self.inner.write().await;
        let m = state
            .merchants
            .get_mut(addr)
            .filter(|m| m.active)
            .ok_or_else(|| Aegis402Error::ledger(format!("merchant {addr} not active")))?;
        let new_exposure = m.exposure.checked_add(amount)?;
        if new_exposure > m.credit_limit {
            return Err(Aegis402Error::ledger(format!(
                "exposure {new_exposure} would exceed credit limit {}",
                m.credit_limit
            )));
        }
        m.exposure = new_exposure;

        let receipt = receipt(&mut state);
        emit(
            &mut state,
            CreditEventKind::ExposureIncreased,
            addr,
            None,
            amount,
            &receipt,
        );
        Ok(receipt)
    }

    async fn clear_exposure(&self, addr: &Address, amount: Amount) -> Result<CallReceipt> {
        self.check_fail("clear_exposure").await?;
        let mut state = self.inner.write().await;
        let m = state
            .merchants
            .get_mut(addr)
            .ok_or_else(|| Aegis402Error::ledger(format!("merchant {addr} unknown")))?;
        if amount > m.exposure {
            return Err(Aegis402Error::ledger(format!(
                "clear {amount} exceeds exposure {}",
                m.exposure
            )));
        }
        m.exposure = m.exposure.saturating_sub(amount);

        let receipt = receipt(&mut state);
        emit(
            &mut state,
            CreditEventKind::ExposureCleared,
            addr,
            None,
            amount,
            &receipt,
        );
        Ok(receipt)
    }

    async fn slash(&self, addr: &Address, client: &Address, amount: Amount) -> Result<CallReceipt> {
        self.check_fail("slash").await?;
        let mut state = self.inner.write().await;
        let m = state
            .merchants
            .get_mut(addr)
            .ok_or_else(|| Aegis402Error::ledger(format!("merchant {addr} unknown")))?;
        if amount > m.stake {
            return Err(Aegis402Error::ledger(format!(
                "slash {amount} exceeds stake {}",
                m.stake
            )));
        }
        if amount > m.exposure {
            return Err(Aegis402Error::ledger(format!(
                "slash {amount} exceeds exposure {}",
                m.exposure
            )));
        }
        m.stake = m.stake.saturating_sub(amount);
        m.exposure = m.exposure.saturating_sub(amount);

        let receipt = receipt(&mut state);
        state.refunds.push(RefundTransfer {
            client: client.clone(),
            amount,
            tx_hash: receipt.tx_hash.clone(),
        });
        emit(
            &mut state,
            CreditEventKind::Slashed,
            addr,
            Some(client.clone()),
            amount,
            &receipt,
        );
        Ok(receipt)
    }

    async fn approve_stake(&self, amount: Amount) -> Result<CallReceipt> {
        self.check_fail("approve_stake").await?;
        let mut state = self.inner.write().await;
        state.allowance = amount;
        Ok(receipt(&mut state))
    }

    async fn stake_allowance(&self) -> Result<Amount> {
        Ok(self.inner.read().await.allowance)
    }

    async fn query_events_raw(
        &self,
        kind: CreditEventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<CreditEvent>> {
        self.check_fail("query_events_raw").await?;
        let state = self.inner.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.kind == kind && e.block >= from_block && e.block <= to_block)
            .cloned()
            .collect())
    }
}
