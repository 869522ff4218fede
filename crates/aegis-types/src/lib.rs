//! Aegis402 shared types
//!
//! Common vocabulary for the clearinghouse: ledger identifiers, atomic
//! amounts, the merchant/payment data model, credit-contract events and
//! the workspace error type. Everything here is plain data; behavior
//! lives in the adapter and clearing crates.

pub mod amount;
pub mod error;
pub mod id;
pub mod model;

pub use amount::Amount;
pub use error::{Aegis402Error, Result};
pub use id::{Address, TxHash};
pub use model::{
    CreditEvent, CreditEventKind, Merchant, MerchantState, ObservedTransfer, Payment,
    PaymentStatus, RepFactor,
};
