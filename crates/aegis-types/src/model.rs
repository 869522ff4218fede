//! The clearinghouse data model
//!
//! Merchants, payments, observed transfers and credit-contract events.
//! These structs are what the registry stores and what the adapters
//! produce; all mutation rules live in the clearing core.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::{Address, Amount, TxHash};

// ============================================================================
// Reputation factor
// ============================================================================

/// Lower clamp of the reputation factor (ρ = 0.5)
pub const REP_FACTOR_MIN_PERMILLE: u32 = 500;

/// Upper clamp of the reputation factor (ρ = 3.0)
pub const REP_FACTOR_MAX_PERMILLE: u32 = 3000;

/// Bounded reputation factor, stored as integer permille
///
/// The credit limit derivation `⌊stake · ρ⌋` must be reproducible against
/// the on-ledger contract, so the factor never exists as a float: an
/// oracle value of 1.25 is carried as 1250 permille.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepFactor(u32);

impl RepFactor {
    /// The neutral factor (ρ = 1.0)
    pub const NEUTRAL: RepFactor = RepFactor(1000);

    /// Create a factor, clamping into `[500, 3000]` permille
    pub fn from_permille(permille: u32) -> Self {
        Self(permille.clamp(REP_FACTOR_MIN_PERMILLE, REP_FACTOR_MAX_PERMILLE))
    }

    /// The clamped permille value
    pub fn permille(&self) -> u32 {
        self.0
    }

    /// The factor as a display float (for API responses only)
    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// Scale a stake into a credit limit: `⌊stake · ρ⌋` with integer
    /// arithmetic (u128 intermediate, so the product cannot wrap)
    pub fn scale(&self, stake: Amount) -> Amount {
        let scaled = (stake.units() as u128) * (self.0 as u128) / 1000;
        // stake ≤ u64::MAX and ρ ≤ 3.0 can exceed u64 only for stakes the
        // asset cannot mint; cap rather than wrap.
        Amount::new(u64::try_from(scaled).unwrap_or(u64::MAX))
    }
}

impl Default for RepFactor {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

impl fmt::Display for RepFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.as_f64())
    }
}

// ============================================================================
// Merchant
// ============================================================================

/// A service agent registered with the clearinghouse, one per address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Merchant {
    /// Stable identifier on the value ledger
    pub address: Address,
    /// Identifier in the external reputation namespace ("0" = unknown)
    pub agent_id: String,
    /// URL clients use to transact with the merchant directly
    pub endpoint: String,
    /// Unordered set of short skill tags
    pub skills: BTreeSet<String>,
    /// Collateral locked with the credit contract
    pub stake: Amount,
    /// Maximum concurrent exposure, derived from stake and reputation
    pub credit_limit: Amount,
    /// Sum of amounts over this merchant's pending payments
    pub exposure: Amount,
    pub active: bool,
    /// Seconds since epoch
    pub registered_at: u64,
}

impl Merchant {
    /// Remaining capacity: `credit_limit − exposure`
    pub fn capacity(&self) -> Amount {
        self.credit_limit.saturating_sub(self.exposure)
    }
}

/// On-ledger merchant state as read from the credit contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantState {
    pub stake: Amount,
    pub credit_limit: Amount,
    pub outstanding_exposure: Amount,
    pub agent_id: String,
    pub endpoint: String,
    pub active: bool,
}

// ============================================================================
// Payment
// ============================================================================

/// Lifecycle of an observed client→merchant payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Exposure recorded, delivery deadline running
    Pending,
    /// Merchant delivered; exposure cleared
    Settled,
    /// Client slashed the merchant; stake burned to refund
    Slashed,
    /// Deadline sweep cleared the exposure
    Expired,
}

impl PaymentStatus {
    /// Terminal states are permanent
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Settled => "settled",
            Self::Slashed => "slashed",
            Self::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// One record per observed client→merchant transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    /// Unique primary key
    pub tx_hash: TxHash,
    pub merchant: Address,
    pub client: Address,
    pub amount: Amount,
    /// Seconds since epoch; the merchant must deliver by this time
    pub deadline: u64,
    pub status: PaymentStatus,
    pub created_at: u64,
}

// ============================================================================
// Ledger observations
// ============================================================================

/// A value-asset `Transfer` log entry attributed to a watched merchant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedTransfer {
    pub tx_hash: TxHash,
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
    pub block: u64,
    /// Block timestamp, seconds since epoch
    pub timestamp: u64,
}

/// Event kinds emitted by the credit contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditEventKind {
    Subscribed,
    ExposureIncreased,
    ExposureCleared,
    Slashed,
}

impl fmt::Display for CreditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Subscribed => "subscribed",
            Self::ExposureIncreased => "exposure_increased",
            Self::ExposureCleared => "exposure_cleared",
            Self::Slashed => "slashed",
        };
        write!(f, "{s}")
    }
}

/// A historical credit-contract event, used only by recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditEvent {
    pub kind: CreditEventKind,
    pub merchant: Address,
    /// The client for `Slashed`; absent otherwise
    pub counterparty: Option<Address>,
    pub amount: Amount,
    pub block: u64,
    pub timestamp: u64,
    /// Hash of the transaction that emitted the event
    pub tx_hash: TxHash,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rep_factor_clamps() {
        assert_eq!(RepFactor::from_permille(100).permille(), 500);
        assert_eq!(RepFactor::from_permille(1500).permille(), 1500);
        assert_eq!(RepFactor::from_permille(9000).permille(), 3000);
    }

    #[test]
    fn test_rep_factor_scales_with_floor() {
        let stake = Amount::new(100_000);
        assert_eq!(RepFactor::NEUTRAL.scale(stake), Amount::new(100_000));
        assert_eq!(RepFactor::from_permille(1500).scale(stake), Amount::new(150_000));
        // 999 * 1.5 = 1498.5 floors to 1498
        assert_eq!(
            RepFactor::from_permille(1500).scale(Amount::new(999)),
            Amount::new(1498)
        );
    }

    #[test]
    fn test_capacity_saturates() {
        let m = Merchant {
            address: Address::new("0xaa"),
            agent_id: "0".to_string(),
            endpoint: "http://localhost:9000".to_string(),
            skills: BTreeSet::new(),
            stake: Amount::new(100),
            credit_limit: Amount::new(100),
            exposure: Amount::new(100),
            active: true,
            registered_at: 0,
        };
        assert_eq!(m.capacity(), Amount::ZERO);
    }

    #[test]
    fn test_status_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert!(PaymentStatus::Expired.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
    }
}
