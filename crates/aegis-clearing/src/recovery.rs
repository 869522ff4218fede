//! Start-up recovery
//!
//! The clearinghouse keeps no disk state: everything durable lives on
//! the value ledger and the credit contract, and the registry is rebuilt
//! from their history on every start. Recovery is best-effort — every
//! failure is logged and skipped, readiness is never blocked — and
//! idempotent: re-running it against a loaded registry changes nothing.

use std::collections::HashMap;
use tracing::{info, warn};

use aegis_chain::{CreditOps, LedgerView};
use aegis_types::{
    Address, Amount, CreditEvent, CreditEventKind, Merchant, Payment, PaymentStatus, TxHash,
};

use crate::core::ClearingCore;

/// What a recovery pass managed to restore
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub merchants_loaded: usize,
    pub payments_loaded: usize,
    pub payments_dropped: usize,
}

/// Rebuild the registry from credit-contract history.
///
/// `Subscribed` events seed the merchant table from fresh on-ledger
/// state. `ExposureIncreased` events are cross-referenced against the
/// `ExposureCleared`/`Slashed` history — an increase whose exact amount
/// the ledger has since cleared is not resurrected — then attributed
/// back to their originating transfers and seeded as pending payments,
/// capped by the merchant's current on-ledger exposure.
pub async fn recover(
    core: &ClearingCore,
    ledger: &dyn LedgerView,
    start_block: u64,
) -> RecoveryReport {
    let mut report = RecoveryReport::default();
    let credit = core.credit().clone();

    let head = match ledger.head_block().await {
        Ok(head) => head,
        Err(e) => {
            warn!(error = %e, "recovery could not read head block, starting empty");
            return report;
        }
    };

    // ------------------------------------------------------------------
    // Merchants
    // ------------------------------------------------------------------
    let subscribed = credit
        .query_events(CreditEventKind::Subscribed, start_block, head)
        .await;

    for event in &subscribed {
        let address = event.merchant.clone();
        if core.merchant(&address).await.is_some() {
            continue;
        }

        let state = match credit.get_merchant(&address).await {
            Ok(state) => state,
            Err(e) => {
                warn!(merchant = %address, error = %e, "recovery merchant read failed");
                continue;
            }
        };
        if !state.active {
            continue;
        }

        let skills: Vec<String> = match credit.get_merchant_skills(&address).await {
            Ok(skills) => skills,
            Err(e) => {
                warn!(merchant = %address, error = %e, "recovery skills read failed");
                Vec::new()
            }
        };

        core.with_registry(|registry| {
            registry.upsert_merchant(Merchant {
                address: address.clone(),
                agent_id: state.agent_id.clone(),
                endpoint: state.endpoint.clone(),
                skills: skills.into_iter().collect(),
                stake: state.stake,
                credit_limit: state.credit_limit,
                exposure: Amount::ZERO,
                active: true,
                registered_at: event.timestamp,
            });
        })
        .await;
        core.watch_set().insert(address.clone()).await;
        report.merchants_loaded += 1;
    }

    // ------------------------------------------------------------------
    // Pending payments
    // ------------------------------------------------------------------
    let increases = credit
        .query_events(CreditEventKind::ExposureIncreased, start_block, head)
        .await;
    let mut cleared = cleared_amounts(&credit, start_block, head).await;

    for event in order_oldest_first(increases) {
        let Some(merchant) = core.merchant(&event.merchant).await else {
            continue;
        };

        // The ledger shows this exact amount as already cleared or
        // slashed for this merchant: the payment is terminal, skip it.
        if take_cleared(&mut cleared, &event.merchant, event.amount) {
            report.payments_dropped += 1;
            continue;
        }

        // Backstop for skipped history chunks: never seed more pending
        // exposure than the ledger still shows as outstanding.
        let outstanding = match credit.get_merchant(&event.merchant).await {
            Ok(state) => state.outstanding_exposure,
            Err(e) => {
                warn!(merchant = %event.merchant, error = %e, "recovery exposure read failed");
                continue;
            }
        };
        let next_exposure = match merchant.exposure.checked_add(event.amount) {
            Ok(total) => total,
            Err(_) => continue,
        };
        if next_exposure > outstanding {
            report.payments_dropped += 1;
            continue;
        }

        let (tx_hash, client, created_at) = attribute_transfer(ledger, core, &event).await;

        if core.with_registry(|r| r.contains_payment(&tx_hash)).await {
            continue;
        }

        let deadline = event.timestamp + core.config().default_deadline_secs;
        core.with_registry(|registry| {
            registry.record_pending(Payment {
                tx_hash: tx_hash.clone(),
                merchant: event.merchant.clone(),
                client,
                amount: event.amount,
                deadline,
                status: PaymentStatus::Pending,
                created_at,
            });
        })
        .await;
        report.payments_loaded += 1;
    }

    info!(
        merchants = report.merchants_loaded,
        payments = report.payments_loaded,
        dropped = report.payments_dropped,
        "recovery complete"
    );
    report
}

fn order_oldest_first(mut events: Vec<CreditEvent>) -> Vec<CreditEvent> {
    events.sort_by_key(|e| e.block);
    events
}

/// Per-merchant multiset of amounts the ledger has cleared since
async fn cleared_amounts(
    credit: &std::sync::Arc<dyn CreditOps>,
    start_block: u64,
    head: u64,
) -> HashMap<Address, Vec<Amount>> {
    let mut cleared: HashMap<Address, Vec<Amount>> = HashMap::new();
    for kind in [CreditEventKind::ExposureCleared, CreditEventKind::Slashed] {
        for event in credit.query_events(kind, start_block, head).await {
            cleared.entry(event.merchant).or_default().push(event.amount);
        }
    }
    cleared
}

fn take_cleared(
    cleared: &mut HashMap<Address, Vec<Amount>>,
    merchant: &Address,
    amount: Amount,
) -> bool {
    let Some(amounts) = cleared.get_mut(merchant) else {
        return false;
    };
    match amounts.iter().position(|a| *a == amount) {
        Some(index) => {
            amounts.swap_remove(index);
            true
        }
        None => false,
    }
}

/// Locate the client transfer behind an `ExposureIncreased` event.
///
/// Clients know their own transfer hash, so the payment is keyed by it
/// whenever the 5-block lookback finds the transfer; otherwise the
/// record-event hash is used with the clearinghouse address as a
/// placeholder client (such entries cannot be slashed, only settled or
/// swept by the deadline scheduler).
async fn attribute_transfer(
    ledger: &dyn LedgerView,
    core: &ClearingCore,
    event: &CreditEvent,
) -> (TxHash, Address, u64) {
    match ledger
        .find_transfer(&event.merchant, event.amount, event.block, 5)
        .await
    {
        Ok(Some(transfer)) => (transfer.tx_hash, transfer.from, transfer.timestamp),
        Ok(None) => (
            event.tx_hash.clone(),
            core.config().agent_address.clone(),
            event.timestamp,
        ),
        Err(e) => {
            warn!(
                merchant = %event.merchant,
                block = event.block,
                error = %e,
                "transfer attribution failed, keying by record event"
            );
            (
                event.tx_hash.clone(),
                core.config().agent_address.clone(),
                event.timestamp,
            )
        }
    }
}
