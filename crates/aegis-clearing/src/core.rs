//! The clearing core
//!
//! All state-changing operations run on a single-writer path: one lock
//! guards the registry and is held across the whole
//! read-ledger → decide → write-ledger → mutate-registry section, so no
//! partial state is ever observable and the coupling invariants hold
//! after every committed transition. The ledger itself arbitrates races
//! (settle vs. slash vs. expiry): whichever on-ledger call lands first
//! wins, the loser's call fails and local state is only updated after
//! the on-ledger call succeeds.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use aegis_chain::{CreditOps, WatchSet};
use aegis_reputation::ReputationReader;
use aegis_types::{
    Address, Aegis402Error, Amount, Merchant, ObservedTransfer, Payment, PaymentStatus, RepFactor,
    Result, TxHash,
};

use crate::registry::Registry;

/// Seconds since epoch
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

/// Static configuration of the clearing core
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// The clearinghouse's own ledger address; transfers it originates
    /// (stake forwarding) are never treated as client payments
    pub agent_address: Address,
    /// Delivery deadline granted to merchants, seconds
    pub default_deadline_secs: u64,
    /// Settling delay between `subscribe_for` and `set_credit_limit`
    pub settle_delay: Duration,
}

impl CoreConfig {
    pub fn new(agent_address: Address) -> Self {
        Self {
            agent_address,
            default_deadline_secs: 3_600,
            settle_delay: Duration::from_secs(2),
        }
    }

    pub fn with_deadline_secs(mut self, secs: u64) -> Self {
        self.default_deadline_secs = secs;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

/// Merchant-supplied subscription details
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeDetails {
    pub endpoint: String,
    pub skills: Vec<String>,
    /// Reputation-namespace id; "0" means unknown
    pub agent_id: String,
}

/// Result of a committed subscription
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub merchant: Address,
    pub stake: Amount,
    pub credit_limit: Amount,
    pub rep_factor: RepFactor,
    pub message: String,
}

/// One ranked merchant in a quote response
#[derive(Debug, Clone, Serialize)]
pub struct QuoteEntry {
    pub address: Address,
    pub endpoint: String,
    pub available_capacity: Amount,
    pub rep_factor: f64,
    pub skills: Vec<String>,
}

/// Result of a committed settle
#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub tx_hash: TxHash,
    pub merchant: Address,
    pub amount: Amount,
}

/// Result of a committed slash
#[derive(Debug, Clone, Serialize)]
pub struct SlashResult {
    pub tx_hash: TxHash,
    pub merchant: Address,
    pub client: Address,
    pub slashed_amount: Amount,
    pub refund_tx: TxHash,
}

/// The clearinghouse state machine
pub struct ClearingCore {
    registry: Mutex<Registry>,
    credit: Arc<dyn CreditOps>,
    reputation: Arc<dyn ReputationReader>,
    watch: WatchSet,
    config: CoreConfig,
}

impl ClearingCore {
    pub fn new(
        credit: Arc<dyn CreditOps>,
        reputation: Arc<dyn ReputationReader>,
        watch: WatchSet,
        config: CoreConfig,
    ) -> Self {
        Self {
            registry: Mutex::new(Registry::new()),
            credit,
            reputation,
            watch,
            config,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn credit(&self) -> &Arc<dyn CreditOps> {
        &self.credit
    }

    pub fn watch_set(&self) -> &WatchSet {
        &self.watch
    }

    /// Snapshot of a single merchant
    pub async fn merchant(&self, address: &Address) -> Option<Merchant> {
        self.registry.lock().await.merchant(address).cloned()
    }

    /// Snapshot of all registered merchants
    pub async fn merchants(&self) -> Vec<Merchant> {
        self.registry.lock().await.merchants().cloned().collect()
    }

    /// Snapshot of a single payment record
    pub async fn payment(&self, tx_hash: &TxHash) -> Option<Payment> {
        self.registry.lock().await.payment(tx_hash).cloned()
    }

    /// Snapshot of all payment records
    pub async fn payments(&self) -> Vec<Payment> {
        self.registry.lock().await.payments().cloned().collect()
    }

    /// Run `f` against the locked registry (recovery and tests)
    pub(crate) async fn with_registry<T>(&self, f: impl FnOnce(&mut Registry) -> T) -> T {
        let mut registry = self.registry.lock().await;
        f(&mut registry)
    }

    // ========================================================================
    // Subscribe
    // ========================================================================

    /// Register a merchant whose stake payment has already been verified
    /// and settled to the clearinghouse account.
    ///
    /// Nothing is written to the registry until every on-ledger step has
    /// committed; any failure aborts with the registry untouched.
    pub async fn subscribe(
        &self,
        details: SubscribeDetails,
        merchant_addr: Address,
        stake: Amount,
    ) -> Result<Subscription> {
        let rep_factor = self
            .reputation
            .for_merchant(&details.agent_id, &merchant_addr)
            .await;
        let credit_limit = rep_factor.scale(stake);

        let mut registry = self.registry.lock().await;

        // Forward the stake: approve the credit contract and wait until
        // the allowance is confirmed on-ledger.
        self.credit.approve_stake(stake).await?;
        self.confirm_allowance(stake).await?;

        let on_ledger = self.credit.get_merchant(&merchant_addr).await?;
        if !on_ledger.active {
            self.credit
                .subscribe_for(
                    &merchant_addr,
                    stake,
                    &details.agent_id,
                    &details.endpoint,
                    &details.skills,
                )
                .await?;
        }

        // Let the subscription settle before pushing the limit.
        tokio::time::sleep(self.config.settle_delay).await;
        self.credit
            .set_credit_limit(&merchant_addr, credit_limit)
            .await?;

        let skills = details.skills.iter().cloned().collect();
        registry.upsert_merchant(Merchant {
            address: merchant_addr.clone(),
            agent_id: details.agent_id,
            endpoint: details.endpoint,
            skills,
            stake,
            credit_limit,
            exposure: Amount::ZERO,
            active: true,
            registered_at: unix_now(),
        });
        // The watch-set entry must be visible before the registry lock
        // is released, or a watcher poll could miss a transfer to the
        // just-activated merchant.
        self.watch.insert(merchant_addr.clone()).await;
        drop(registry);

        info!(
            merchant = %merchant_addr,
            %stake,
            %credit_limit,
            rep_factor = %rep_factor,
            "merchant subscribed"
        );

        Ok(Subscription {
            merchant: merchant_addr,
            stake,
            credit_limit,
            rep_factor,
            message: format!("Subscribed with repFactor {rep_factor}"),
        })
    }

    async fn confirm_allowance(&self, stake: Amount) -> Result<()> {
        for _ in 0..10 {
            if self.credit.stake_allowance().await? >= stake {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Err(Aegis402Error::ledger(format!(
            "stake approval of {stake} not confirmed"
        )))
    }

    // ========================================================================
    // Quote
    // ========================================================================

    /// Rank merchants offering `skill` with enough fresh capacity for
    /// `price`. Pure read; a per-merchant read failure drops only that
    /// merchant.
    pub async fn quote(&self, skill: &str, price: Amount) -> Result<Vec<QuoteEntry>> {
        if price.is_zero() {
            return Err(Aegis402Error::invalid_input("price", "must be positive"));
        }

        // Short lock: snapshot the candidates, then read the ledger
        // without holding up the writer path.
        let candidates: Vec<Merchant> = {
            let registry = self.registry.lock().await;
            registry
                .skill_candidates(skill)
                .into_iter()
                .filter_map(|addr| registry.merchant(&addr).cloned())
                .collect()
        };

        let mut entries = Vec::new();
        for merchant in candidates {
            let state = match self.credit.get_merchant(&merchant.address).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(merchant = %merchant.address, error = %e, "quote read failed, dropping merchant");
                    continue;
                }
            };

            let capacity = state.credit_limit.saturating_sub(state.outstanding_exposure);
            if capacity < price {
                continue;
            }

            let rep_factor = self
                .reputation
                .for_merchant(&merchant.agent_id, &merchant.address)
                .await;

            entries.push(QuoteEntry {
                address: merchant.address.clone(),
                endpoint: merchant.endpoint.clone(),
                available_capacity: capacity,
                rep_factor: rep_factor.as_f64(),
                skills: merchant.skills.iter().cloned().collect(),
            });
        }

        // capacity/price descending; price is constant across the list,
        // so capacity ordering is the ratio ordering. Stable sort keeps
        // ties in candidate order.
        entries.sort_by(|a, b| b.available_capacity.cmp(&a.available_capacity));
        Ok(entries)
    }

    // ========================================================================
    // Payment detection
    // ========================================================================

    /// Handle a transfer attributed by the chain watcher.
    ///
    /// Unknown recipients, self-initiated transfers and duplicate hashes
    /// are dropped. A `record_payment` refusal (the merchant is
    /// under-collateralized for this payment) is logged and produces no
    /// payment record: the transfer happened, but no credit is extended.
    pub async fn payment_detected(&self, transfer: ObservedTransfer) {
        if transfer.from == self.config.agent_address {
            debug!(tx_hash = %transfer.tx_hash, "ignoring self-initiated transfer");
            return;
        }

        let mut registry = self.registry.lock().await;

        if registry.merchant(&transfer.to).is_none() {
            debug!(to = %transfer.to, "transfer to unregistered address");
            return;
        }
        if registry.contains_payment(&transfer.tx_hash) {
            debug!(tx_hash = %transfer.tx_hash, "duplicate transfer observation");
            return;
        }

        if let Err(e) = self
            .credit
            .record_payment(&transfer.to, transfer.amount)
            .await
        {
            warn!(
                merchant = %transfer.to,
                amount = %transfer.amount,
                error = %e,
                "refusing to extend credit for observed payment"
            );
            return;
        }

        let deadline = transfer.timestamp + self.config.default_deadline_secs;
        registry.record_pending(Payment {
            tx_hash: transfer.tx_hash.clone(),
            merchant: transfer.to.clone(),
            client: transfer.from.clone(),
            amount: transfer.amount,
            deadline,
            status: PaymentStatus::Pending,
            created_at: transfer.timestamp,
        });

        info!(
            tx_hash = %transfer.tx_hash,
            merchant = %transfer.to,
            client = %transfer.from,
            amount = %transfer.amount,
            deadline,
            "payment recorded"
        );
    }

    // ========================================================================
    // Settle
    // ========================================================================

    /// Clear a pending payment's exposure. Caller-agnostic: the
    /// operation only ever decreases exposure, so holding the tx hash is
    /// authorization enough.
    pub async fn settle(&self, tx_hash: &TxHash) -> Result<Settlement> {
        let mut registry = self.registry.lock().await;

        let payment = registry
            .payment(tx_hash)
            .cloned()
            .ok_or_else(|| Aegis402Error::PaymentNotFound {
                tx_hash: tx_hash.to_string(),
            })?;
        if payment.status.is_terminal() {
            return Err(Aegis402Error::PaymentAlreadyTerminal {
                tx_hash: tx_hash.to_string(),
                status: payment.status,
            });
        }

        self.credit
            .clear_exposure(&payment.merchant, payment.amount)
            .await?;
        registry.finish_payment(tx_hash, PaymentStatus::Settled);

        info!(
            %tx_hash,
            merchant = %payment.merchant,
            amount = %payment.amount,
            "payment settled"
        );

        Ok(Settlement {
            tx_hash: tx_hash.clone(),
            merchant: payment.merchant,
            amount: payment.amount,
        })
    }

    // ========================================================================
    // Slash
    // ========================================================================

    /// Burn merchant stake to refund the client of an undelivered
    /// payment. `client_addr` is the address that paid the slash bond
    /// and must be the payment's original client.
    pub async fn slash(&self, tx_hash: &TxHash, client_addr: &Address) -> Result<SlashResult> {
        let mut registry = self.registry.lock().await;

        let payment = registry
            .payment(tx_hash)
            .cloned()
            .ok_or_else(|| Aegis402Error::PaymentNotFound {
                tx_hash: tx_hash.to_string(),
            })?;
        if payment.status.is_terminal() {
            return Err(Aegis402Error::PaymentAlreadyTerminal {
                tx_hash: tx_hash.to_string(),
                status: payment.status,
            });
        }

        let now = unix_now();
        if now < payment.deadline {
            return Err(Aegis402Error::DeadlineNotPassed {
                tx_hash: tx_hash.to_string(),
                remaining_secs: payment.deadline - now,
            });
        }

        if &payment.client != client_addr {
            return Err(Aegis402Error::NotOriginalClient {
                tx_hash: tx_hash.to_string(),
            });
        }

        let receipt = self
            .credit
            .slash(&payment.merchant, client_addr, payment.amount)
            .await?;
        registry.finish_payment(tx_hash, PaymentStatus::Slashed);

        info!(
            %tx_hash,
            merchant = %payment.merchant,
            client = %client_addr,
            amount = %payment.amount,
            refund_tx = %receipt.tx_hash,
            "merchant slashed"
        );

        Ok(SlashResult {
            tx_hash: tx_hash.clone(),
            merchant: payment.merchant,
            client: client_addr.clone(),
            slashed_amount: payment.amount,
            refund_tx: receipt.tx_hash,
        })
    }

    // ========================================================================
    // Deadline sweep
    // ========================================================================

    /// Expire pending payments whose deadline has passed. Failures are
    /// logged and retried on the next tick; returns the number expired.
    pub async fn deadline_tick(&self) -> usize {
        let mut registry = self.registry.lock().await;
        let now = unix_now();

        let due: Vec<(TxHash, Address, Amount)> = registry
            .payments()
            .filter(|p| p.status == PaymentStatus::Pending && now >= p.deadline)
            .map(|p| (p.tx_hash.clone(), p.merchant.clone(), p.amount))
            .collect();

        let mut expired = 0;
        for (tx_hash, merchant, amount) in due {
            match self.credit.clear_exposure(&merchant, amount).await {
                Ok(_) => {
                    registry.finish_payment(&tx_hash, PaymentStatus::Expired);
                    info!(%tx_hash, %merchant, %amount, "payment expired");
                    expired += 1;
                }
                Err(e) => {
                    warn!(%tx_hash, %merchant, error = %e, "expiry failed, will retry");
                }
            }
        }

        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_chain::InMemoryCreditManager;
    use aegis_reputation::FixedReputation;

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    fn details(skills: &[&str]) -> SubscribeDetails {
        SubscribeDetails {
            endpoint: "http://merchant:9000".to_string(),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            agent_id: "42".to_string(),
        }
    }

    fn transfer(hash: &str, from: &str, to: &str, amount: u64, timestamp: u64) -> ObservedTransfer {
        ObservedTransfer {
            tx_hash: TxHash::new(hash),
            from: addr(from),
            to: addr(to),
            amount: Amount::new(amount),
            block: 1,
            timestamp,
        }
    }

    fn test_core(credit: Arc<InMemoryCreditManager>) -> ClearingCore {
        ClearingCore::new(
            credit,
            Arc::new(FixedReputation::neutral()),
            WatchSet::new(),
            CoreConfig::new(addr("0xagent")).with_settle_delay(Duration::ZERO),
        )
    }

    async fn subscribed(core: &ClearingCore, merchant: &str, stake: u64) {
        core.subscribe(details(&["translate"]), addr(merchant), Amount::new(stake))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_scales_credit_limit() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = ClearingCore::new(
            credit.clone(),
            Arc::new(FixedReputation::new(RepFactor::from_permille(1500))),
            WatchSet::new(),
            CoreConfig::new(addr("0xagent")).with_settle_delay(Duration::ZERO),
        );

        let sub = core
            .subscribe(details(&["translate"]), addr("0xm"), Amount::new(100_000))
            .await
            .unwrap();
        assert_eq!(sub.credit_limit, Amount::new(150_000));

        let on_ledger = credit.get_merchant(&addr("0xm")).await.unwrap();
        assert_eq!(on_ledger.credit_limit, Amount::new(150_000));
        assert!(core.watch_set().contains(&addr("0xm")).await);
        core.with_registry(|r| r.check_invariants()).await;
    }

    #[tokio::test]
    async fn test_failed_subscribe_leaves_registry_untouched() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = test_core(credit.clone());

        credit.fail_next_call("set_credit_limit").await;
        let result = core
            .subscribe(details(&["translate"]), addr("0xm"), Amount::new(100_000))
            .await;
        assert!(result.is_err());
        assert!(core.merchant(&addr("0xm")).await.is_none());
        assert!(!core.watch_set().contains(&addr("0xm")).await);
    }

    #[tokio::test]
    async fn test_payment_detection_and_quote_capacity() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = test_core(credit.clone());
        subscribed(&core, "0xm", 100_000).await;

        core.payment_detected(transfer("0x1", "0xc", "0xm", 10_000, 0))
            .await;

        let quotes = core.quote("translate", Amount::new(10_000)).await.unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].available_capacity, Amount::new(90_000));
        core.with_registry(|r| r.check_invariants()).await;
    }

    #[tokio::test]
    async fn test_self_initiated_transfer_dropped() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = test_core(credit.clone());
        subscribed(&core, "0xm", 100_000).await;

        core.payment_detected(transfer("0x1", "0xagent", "0xm", 10_000, 0))
            .await;
        assert!(core.payment(&TxHash::new("0x1")).await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_detection_does_not_double_count() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = test_core(credit.clone());
        subscribed(&core, "0xm", 100_000).await;

        core.payment_detected(transfer("0x1", "0xc", "0xm", 10_000, 0))
            .await;
        core.payment_detected(transfer("0x1", "0xc", "0xm", 10_000, 0))
            .await;

        let m = core.merchant(&addr("0xm")).await.unwrap();
        assert_eq!(m.exposure, Amount::new(10_000));
        assert_eq!(core.payments().await.len(), 1);
    }

    #[tokio::test]
    async fn test_overcapacity_payment_produces_no_record() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = test_core(credit.clone());
        subscribed(&core, "0xm", 100_000).await;

        core.payment_detected(transfer("0x1", "0xc", "0xm", 60_000, 0))
            .await;
        core.payment_detected(transfer("0x2", "0xd", "0xm", 60_000, 0))
            .await;

        let m = core.merchant(&addr("0xm")).await.unwrap();
        assert_eq!(m.exposure, Amount::new(60_000));
        assert!(core.payment(&TxHash::new("0x2")).await.is_none());
        core.with_registry(|r| r.check_invariants()).await;
    }

    #[tokio::test]
    async fn test_settle_round_trip() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = test_core(credit.clone());
        subscribed(&core, "0xm", 100_000).await;

        core.payment_detected(transfer("0x1", "0xc", "0xm", 10_000, 0))
            .await;
        let settlement = core.settle(&TxHash::new("0x1")).await.unwrap();
        assert_eq!(settlement.amount, Amount::new(10_000));

        let m = core.merchant(&addr("0xm")).await.unwrap();
        assert_eq!(m.exposure, Amount::ZERO);
        assert_eq!(m.stake, Amount::new(100_000));

        // Terminal states are permanent
        let err = core.settle(&TxHash::new("0x1")).await.unwrap_err();
        assert_eq!(err.to_string(), "Payment already settled");
    }

    #[tokio::test]
    async fn test_settle_unknown_payment() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = test_core(credit);
        let err = core.settle(&TxHash::new("0xmissing")).await.unwrap_err();
        assert_eq!(err.to_string(), "Payment record not found");
    }

    #[tokio::test]
    async fn test_settle_ledger_failure_leaves_state() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = test_core(credit.clone());
        subscribed(&core, "0xm", 100_000).await;
        core.payment_detected(transfer("0x1", "0xc", "0xm", 10_000, 0))
            .await;

        credit.fail_next_call("clear_exposure").await;
        assert!(core.settle(&TxHash::new("0x1")).await.is_err());

        let payment = core.payment(&TxHash::new("0x1")).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        core.with_registry(|r| r.check_invariants()).await;
    }

    #[tokio::test]
    async fn test_slash_before_deadline_fails() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = test_core(credit.clone());
        subscribed(&core, "0xm", 100_000).await;

        // Deadline in the far future
        core.payment_detected(transfer("0x1", "0xc", "0xm", 50_000, unix_now()))
            .await;

        let err = core.slash(&TxHash::new("0x1"), &addr("0xc")).await.unwrap_err();
        assert!(err.to_string().starts_with("Deadline not yet passed"));
    }

    #[tokio::test]
    async fn test_slash_by_wrong_client_fails() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = test_core(credit.clone());
        subscribed(&core, "0xm", 100_000).await;
        core.payment_detected(transfer("0x1", "0xc", "0xm", 50_000, 0))
            .await;

        let err = core
            .slash(&TxHash::new("0x1"), &addr("0xeve"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Only the original client can slash");

        let m = core.merchant(&addr("0xm")).await.unwrap();
        assert_eq!(m.stake, Amount::new(100_000));
        assert_eq!(m.exposure, Amount::new(50_000));
    }

    #[tokio::test]
    async fn test_slash_after_deadline_refunds_client() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = test_core(credit.clone());
        subscribed(&core, "0xm", 100_000).await;
        // timestamp 0 → deadline 3600, long past
        core.payment_detected(transfer("0x1", "0xc", "0xm", 50_000, 0))
            .await;

        let result = core.slash(&TxHash::new("0x1"), &addr("0xC")).await.unwrap();
        assert_eq!(result.slashed_amount, Amount::new(50_000));

        let m = core.merchant(&addr("0xm")).await.unwrap();
        assert_eq!(m.stake, Amount::new(50_000));
        assert_eq!(m.exposure, Amount::ZERO);

        let refunds = credit.refunds().await;
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].amount, Amount::new(50_000));
        assert_eq!(refunds[0].client, addr("0xc"));
        core.with_registry(|r| r.check_invariants()).await;
    }

    #[tokio::test]
    async fn test_deadline_tick_expires_and_blocks_slash() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = test_core(credit.clone());
        subscribed(&core, "0xm", 100_000).await;
        core.payment_detected(transfer("0x1", "0xc", "0xm", 10_000, 0))
            .await;

        assert_eq!(core.deadline_tick().await, 1);

        let payment = core.payment(&TxHash::new("0x1")).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Expired);
        let m = core.merchant(&addr("0xm")).await.unwrap();
        assert_eq!(m.exposure, Amount::ZERO);

        let err = core.slash(&TxHash::new("0x1"), &addr("0xc")).await.unwrap_err();
        assert_eq!(err.to_string(), "Payment already expired");
    }

    #[tokio::test]
    async fn test_deadline_tick_retries_after_failure() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = test_core(credit.clone());
        subscribed(&core, "0xm", 100_000).await;
        core.payment_detected(transfer("0x1", "0xc", "0xm", 10_000, 0))
            .await;

        credit.fail_next_call("clear_exposure").await;
        assert_eq!(core.deadline_tick().await, 0);
        assert_eq!(
            core.payment(&TxHash::new("0x1")).await.unwrap().status,
            PaymentStatus::Pending
        );

        assert_eq!(core.deadline_tick().await, 1);
    }

    #[tokio::test]
    async fn test_quote_drops_failing_merchant_reads() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = test_core(credit.clone());
        subscribed(&core, "0xm", 100_000).await;

        credit.fail_next_call("get_merchant").await;
        let quotes = core.quote("translate", Amount::new(1_000)).await.unwrap();
        assert!(quotes.is_empty());
    }

    #[tokio::test]
    async fn test_quote_ranks_by_capacity() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = test_core(credit.clone());
        subscribed(&core, "0xa", 50_000).await;
        subscribed(&core, "0xb", 100_000).await;

        let quotes = core.quote("translate", Amount::new(10_000)).await.unwrap();
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].address, addr("0xb"));
        assert_eq!(quotes[1].address, addr("0xa"));
    }

    #[tokio::test]
    async fn test_quote_zero_price_rejected() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = test_core(credit);
        assert!(core.quote("translate", Amount::ZERO).await.is_err());
    }

    #[tokio::test]
    async fn test_quote_unknown_skill_is_empty() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = test_core(credit);
        let quotes = core.quote("no-such-skill", Amount::new(1)).await.unwrap();
        assert!(quotes.is_empty());
    }
}
