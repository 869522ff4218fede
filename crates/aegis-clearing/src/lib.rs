//! Aegis402 clearing core
//!
//! The single-writer state machine of the clearinghouse: the in-memory
//! merchant/payment registry, the operations that drive it (subscribe,
//! quote, settle, slash, payment detection, deadline expiry) and the
//! start-up recovery that rebuilds everything from ledger history.

pub mod core;
pub mod recovery;
pub mod registry;
pub mod scheduler;

pub use crate::core::{
    ClearingCore, CoreConfig, QuoteEntry, Settlement, SlashResult, SubscribeDetails, Subscription,
};
pub use recovery::{recover, RecoveryReport};
pub use registry::Registry;
pub use scheduler::{DeadlineScheduler, DEFAULT_SWEEP_INTERVAL};
