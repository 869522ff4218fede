//! Read-only view of the value ledger's Transfer log

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;

use aegis_types::{Address, Amount, ObservedTransfer, Result};

/// Polling, read-only view of the value asset's `Transfer` log
///
/// Implementations must return transfers in block order and, within a
/// block, in log-index order.
#[async_trait]
pub trait LedgerView: Send + Sync {
    /// Current head block number
    async fn head_block(&self) -> Result<u64>;

    /// All `Transfer` events in `[from_block, to_block]`, inclusive
    async fn transfers(&self, from_block: u64, to_block: u64) -> Result<Vec<ObservedTransfer>>;

    /// Latest transfer to `to` of exactly `amount` within
    /// `[end_block − lookback, end_block]`; used only by recovery
    async fn find_transfer(
        &self,
        to: &Address,
        amount: Amount,
        end_block: u64,
        lookback: u64,
    ) -> Result<Option<ObservedTransfer>> {
        let from_block = end_block.saturating_sub(lookback);
        let transfers = self.transfers(from_block, end_block).await?;
        // transfers are block-then-log ordered, so the last match is the
        // latest one
        Ok(transfers
            .into_iter()
            .filter(|t| &t.to == to && t.amount == amount)
            .last())
    }
}

/// `LedgerView` over the JSON-RPC gateway
pub struct RpcLedger {
    rpc: Arc<super::RpcClient>,
    asset_address: Address,
}

impl RpcLedger {
    pub fn new(rpc: Arc<super::RpcClient>, asset_address: Address) -> Self {
        Self { rpc, asset_address }
    }
}

#[async_trait]
impl LedgerView for RpcLedger {
    async fn head_block(&self) -> Result<u64> {
        self.rpc.call("ledger_headBlock", json!([])).await
    }

    async fn transfers(&self, from_block: u64, to_block: u64) -> Result<Vec<ObservedTransfer>> {
        self.rpc
            .call(
                "ledger_getTransfers",
                json!({
                    "asset": self.asset_address,
                    "from_block": from_block,
                    "to_block": to_block,
                }),
            )
            .await
    }
}

/// In-memory ledger for tests and local runs
///
/// Transfers are appended in observation order; the head advances with
/// each append unless pinned explicitly.
#[derive(Default)]
pub struct InMemoryLedger {
    inner: RwLock<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    head: u64,
    transfers: Vec<ObservedTransfer>,
    fail_next_poll: bool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transfer and advance the head to its block
    pub async fn push_transfer(&self, transfer: ObservedTransfer) {
        let mut state = self.inner.write().await;
        state.head = state.head.max(transfer.block);
        state.transfers.push(transfer);
    }

    /// Pin the head block without adding transfers
    pub async fn set_head(&self, head: u64) {
        self.inner.write().await.head = head;
    }

    /// Make the next `transfers` call fail once (poll-retry tests)
    pub async fn fail_next_poll(&self) {
        self.inner.write().await.fail_next_poll = true;
    }
}

#[async_trait]
impl LedgerView for InMemoryLedger {
    async fn head_block(&self) -> Result<u64> {
        Ok(self.inner.read().await.head)
    }

    async fn transfers(&self, from_block: u64, to_block: u64) -> Result<Vec<ObservedTransfer>> {
        let mut state = self.inner.write().await;
        if state.fail_next_poll {
            state.fail_next_poll = false;
            return Err(aegis_types::Aegis402Error::ledger("injected poll failure"));
        }
        Ok(state
            .transfers
            .iter()
            .filter(|t| t.block >= from_block && t.block <= to_block)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_types::TxHash;

    fn transfer(hash: &str, to: &str, amount: u64, block: u64) -> ObservedTransfer {
        ObservedTransfer {
            tx_hash: TxHash::new(hash),
            from: Address::new("0xclient"),
            to: Address::new(to),
            amount: Amount::new(amount),
            block,
            timestamp: block * 12,
        }
    }

    #[tokio::test]
    async fn test_range_query_is_inclusive() {
        let ledger = InMemoryLedger::new();
        ledger.push_transfer(transfer("0x1", "0xm", 10, 5)).await;
        ledger.push_transfer(transfer("0x2", "0xm", 10, 6)).await;
        ledger.push_transfer(transfer("0x3", "0xm", 10, 7)).await;

        let got = ledger.transfers(6, 7).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].tx_hash, TxHash::new("0x2"));
    }

    #[tokio::test]
    async fn test_find_transfer_picks_latest_match() {
        let ledger = InMemoryLedger::new();
        ledger.push_transfer(transfer("0xold", "0xm", 500, 10)).await;
        ledger.push_transfer(transfer("0xnew", "0xm", 500, 12)).await;
        ledger.push_transfer(transfer("0xother", "0xm", 999, 12)).await;

        let found = ledger
            .find_transfer(&Address::new("0xm"), Amount::new(500), 13, 5)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.tx_hash, TxHash::new("0xnew"));
    }

    #[tokio::test]
    async fn test_find_transfer_respects_lookback() {
        let ledger = InMemoryLedger::new();
        ledger.push_transfer(transfer("0xold", "0xm", 500, 1)).await;

        let found = ledger
            .find_transfer(&Address::new("0xm"), Amount::new(500), 20, 5)
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
