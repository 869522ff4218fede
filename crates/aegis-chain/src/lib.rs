//! Aegis402 chain adapters
//!
//! Read-only access to the value ledger's `Transfer` log, a typed
//! read/write wrapper for the on-ledger credit contract, and the polling
//! watcher that attributes transfers to registered merchants.
//!
//! Every seam is a trait (`LedgerView`, `CreditOps`) with a concrete
//! network-owning implementation and an in-memory implementation for
//! tests and local runs. The clearing core only ever sees the traits.

pub mod credit;
pub mod ledger;
pub mod rpc;
pub mod watcher;

pub use credit::{CallReceipt, CreditOps, InMemoryCreditManager, RpcCreditManager};
pub use ledger::{InMemoryLedger, LedgerView, RpcLedger};
pub use rpc::RpcClient;
pub use watcher::{ChainWatcher, WatchSet};
