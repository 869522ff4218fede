//! Chain watcher
//!
//! Polls the value ledger for `Transfer` events and forwards the ones
//! addressed to a watched merchant into the clearing core's channel.
//! The high-water mark advances only after a fully successful poll, so
//! a failed tick re-reads the same range on the next one; delivery is
//! at-least-once and consumers key on the transfer hash.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use aegis_types::{Address, ObservedTransfer, Result};

use crate::ledger::LedgerView;

/// Default poll period (Δ)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(15_000);

/// Shared set of merchant addresses whose incoming transfers are reported
#[derive(Clone, Default)]
pub struct WatchSet {
    inner: Arc<RwLock<HashSet<Address>>>,
}

impl WatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, address: Address) {
        self.inner.write().await.insert(address);
    }

    pub async fn contains(&self, address: &Address) -> bool {
        self.inner.read().await.contains(address)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// Polling observer over the value asset's Transfer log
pub struct ChainWatcher {
    ledger: Arc<dyn LedgerView>,
    watch: WatchSet,
    interval: Duration,
}

impl ChainWatcher {
    pub fn new(ledger: Arc<dyn LedgerView>, watch: WatchSet, interval: Duration) -> Self {
        Self {
            ledger,
            watch,
            interval,
        }
    }

    /// Run the poll loop, forwarding attributed transfers into `sink`.
    ///
    /// The first successful tick only records the head block; ranges
    /// strictly after it are scanned on subsequent ticks.
    pub fn spawn(self, sink: mpsc::Sender<ObservedTransfer>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut high_water: Option<u64> = None;

            loop {
                ticker.tick().await;
                match self.poll_once(high_water, &sink).await {
                    Ok(head) => high_water = Some(head),
                    // High-water mark unchanged: the same range is
                    // retried on the next tick.
                    Err(e) => warn!(error = %e, "ledger poll failed"),
                }
                if sink.is_closed() {
                    return;
                }
            }
        })
    }

    /// One poll cycle; returns the new high-water mark on success
    pub async fn poll_once(
        &self,
        high_water: Option<u64>,
        sink: &mpsc::Sender<ObservedTransfer>,
    ) -> Result<u64> {
        let head = self.ledger.head_block().await?;

        let Some(prev) = high_water else {
            debug!(head, "watcher anchored at head block");
            return Ok(head);
        };
        if head <= prev {
            return Ok(prev);
        }

        let transfers = self.ledger.transfers(prev + 1, head).await?;
        for transfer in transfers {
            if !self.watch.contains(&transfer.to).await {
                continue;
            }
            debug!(
                tx_hash = %transfer.tx_hash,
                to = %transfer.to,
                amount = %transfer.amount,
                block = transfer.block,
                "transfer attributed"
            );
            if sink.send(transfer).await.is_err() {
                break;
            }
        }

        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use aegis_types::{Amount, TxHash};

    fn transfer(hash: &str, to: &str, block: u64) -> ObservedTransfer {
        ObservedTransfer {
            tx_hash: TxHash::new(hash),
            from: Address::new("0xclient"),
            to: Address::new(to),
            amount: Amount::new(1_000),
            block,
            timestamp: block,
        }
    }

    fn watcher(ledger: Arc<InMemoryLedger>, watch: WatchSet) -> ChainWatcher {
        ChainWatcher::new(ledger, watch, DEFAULT_POLL_INTERVAL)
    }

    #[tokio::test]
    async fn test_first_poll_only_anchors() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.push_transfer(transfer("0xpre", "0xm", 3)).await;
        let watch = WatchSet::new();
        watch.insert(Address::new("0xm")).await;

        let (tx, mut rx) = mpsc::channel(8);
        let w = watcher(ledger, watch);

        let head = w.poll_once(None, &tx).await.unwrap();
        assert_eq!(head, 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_emits_only_watched_recipients() {
        let ledger = Arc::new(InMemoryLedger::new());
        let watch = WatchSet::new();
        watch.insert(Address::new("0xm")).await;

        let (tx, mut rx) = mpsc::channel(8);
        let w = watcher(ledger.clone(), watch);
        let anchor = w.poll_once(None, &tx).await.unwrap();

        ledger.push_transfer(transfer("0xa", "0xm", 1)).await;
        ledger.push_transfer(transfer("0xb", "0xstranger", 1)).await;
        ledger.push_transfer(transfer("0xc", "0xM", 2)).await;

        w.poll_once(Some(anchor), &tx).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().tx_hash, TxHash::new("0xa"));
        // 0xM lowercases into the watched address
        assert_eq!(rx.recv().await.unwrap().tx_hash, TxHash::new("0xc"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_high_water_mark() {
        let ledger = Arc::new(InMemoryLedger::new());
        let watch = WatchSet::new();
        watch.insert(Address::new("0xm")).await;

        let (tx, mut rx) = mpsc::channel(8);
        let w = watcher(ledger.clone(), watch);
        let anchor = w.poll_once(None, &tx).await.unwrap();

        ledger.push_transfer(transfer("0xa", "0xm", 1)).await;
        ledger.fail_next_poll().await;

        assert!(w.poll_once(Some(anchor), &tx).await.is_err());
        // Retry of the same range delivers the transfer.
        let head = w.poll_once(Some(anchor), &tx).await.unwrap();
        assert_eq!(head, 1);
        assert_eq!(rx.recv().await.unwrap().tx_hash, TxHash::new("0xa"));
    }
}
