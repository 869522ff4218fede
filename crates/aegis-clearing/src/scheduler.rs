//! Deadline scheduler
//!
//! Periodic sweeper that expires pending payments past their delivery
//! deadline. Ticks are awaited sequentially, so a slow sweep delays the
//! next tick instead of overlapping it.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::core::ClearingCore;

/// Default sweep period
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub struct DeadlineScheduler;

impl DeadlineScheduler {
    /// Run the sweep loop until the core is dropped by every other holder
    pub fn spawn(core: Arc<ClearingCore>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let expired = core.deadline_tick().await;
                if expired > 0 {
                    debug!(expired, "deadline sweep expired payments");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CoreConfig, SubscribeDetails};
    use aegis_chain::{InMemoryCreditManager, WatchSet};
    use aegis_reputation::FixedReputation;
    use aegis_types::{Address, Amount, ObservedTransfer, PaymentStatus, TxHash};

    #[tokio::test]
    async fn test_scheduler_expires_overdue_payment() {
        let credit = Arc::new(InMemoryCreditManager::new());
        let core = Arc::new(ClearingCore::new(
            credit,
            Arc::new(FixedReputation::neutral()),
            WatchSet::new(),
            CoreConfig::new(Address::new("0xagent")).with_settle_delay(Duration::ZERO),
        ));

        core.subscribe(
            SubscribeDetails {
                endpoint: "http://m".to_string(),
                skills: vec!["x".to_string()],
                agent_id: "0".to_string(),
            },
            Address::new("0xm"),
            Amount::new(100_000),
        )
        .await
        .unwrap();

        // timestamp 0 puts the deadline far in the past
        core.payment_detected(ObservedTransfer {
            tx_hash: TxHash::new("0x1"),
            from: Address::new("0xc"),
            to: Address::new("0xm"),
            amount: Amount::new(10_000),
            block: 1,
            timestamp: 0,
        })
        .await;

        let handle = DeadlineScheduler::spawn(core.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert_eq!(
            core.payment(&TxHash::new("0x1")).await.unwrap().status,
            PaymentStatus::Expired
        );
    }
}
