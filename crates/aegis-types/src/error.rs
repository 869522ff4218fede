//! Error types for Aegis402
//!
//! One enum for the whole workspace. The clearing core never retries
//! ledger writes internally; callers retry at the protocol level, so
//! every variant here is surfaced to the caller as-is.

use thiserror::Error;

use crate::model::PaymentStatus;

/// Result type for Aegis402 operations
pub type Result<T> = std::result::Result<T, Aegis402Error>;

/// Aegis402 error types
#[derive(Debug, Clone, Error)]
pub enum Aegis402Error {
    // ========================================================================
    // Validation
    // ========================================================================

    /// Missing or malformed request field
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    // ========================================================================
    // Payment gate
    // ========================================================================

    /// Operation requires a verified x402 payment
    #[error("Payment required: {purpose}")]
    PaymentRequired { purpose: String },

    /// Facilitator rejected the payment payload
    #[error("Payment verification failed: {reason}")]
    PaymentVerificationFailed { reason: String },

    /// Facilitator failed to settle the payment
    #[error("Payment settlement failed: {reason}")]
    PaymentSettlementFailed { reason: String },

    // ========================================================================
    // Clearing state machine
    // ========================================================================

    /// No payment record for the given tx hash
    #[error("Payment record not found")]
    PaymentNotFound { tx_hash: String },

    /// Payment is already in a terminal state
    #[error("Payment already {status}")]
    PaymentAlreadyTerminal {
        tx_hash: String,
        status: PaymentStatus,
    },

    /// Slash attempted before the delivery deadline
    #[error("Deadline not yet passed. Wait {remaining_secs} seconds")]
    DeadlineNotPassed { tx_hash: String, remaining_secs: u64 },

    /// Slash attempted by someone other than the paying client
    #[error("Only the original client can slash")]
    NotOriginalClient { tx_hash: String },

    /// Merchant is not registered with the clearinghouse
    #[error("Merchant {address} not found")]
    MerchantNotFound { address: String },

    /// Subscribe stake below the configured minimum
    #[error("Stake {stake} below minimum {minimum}")]
    StakeBelowMinimum { stake: u64, minimum: u64 },

    // ========================================================================
    // Amounts
    // ========================================================================

    /// Amount overflow during arithmetic
    #[error("Amount overflow during arithmetic operation")]
    AmountOverflow,

    /// Amount underflow during arithmetic
    #[error("Amount underflow during arithmetic operation")]
    AmountUnderflow,

    // ========================================================================
    // External collaborators
    // ========================================================================

    /// RPC or contract call failed
    #[error("Ledger error: {message}")]
    Ledger { message: String },

    /// Start-up recovery failure (logged, never fatal)
    #[error("Recovery error: {message}")]
    Recovery { message: String },
}

impl Aegis402Error {
    /// Create an invalid input error
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a ledger error
    pub fn ledger(message: impl Into<String>) -> Self {
        Self::Ledger {
            message: message.into(),
        }
    }

    /// Create a recovery error
    pub fn recovery(message: impl Into<String>) -> Self {
        Self::Recovery {
            message: message.into(),
        }
    }

    /// Get an error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::PaymentRequired { .. } => "PAYMENT_REQUIRED",
            Self::PaymentVerificationFailed { .. } => "PAYMENT_VERIFICATION_FAILED",
            Self::PaymentSettlementFailed { .. } => "PAYMENT_SETTLEMENT_FAILED",
            Self::PaymentNotFound { .. } => "PAYMENT_NOT_FOUND",
            Self::PaymentAlreadyTerminal { .. } => "PAYMENT_ALREADY_TERMINAL",
            Self::DeadlineNotPassed { .. } => "DEADLINE_NOT_PASSED",
            Self::NotOriginalClient { .. } => "NOT_ORIGINAL_CLIENT",
            Self::MerchantNotFound { .. } => "MERCHANT_NOT_FOUND",
            Self::StakeBelowMinimum { .. } => "STAKE_BELOW_MINIMUM",
            Self::AmountOverflow => "AMOUNT_OVERFLOW",
            Self::AmountUnderflow => "AMOUNT_UNDERFLOW",
            Self::Ledger { .. } => "LEDGER_ERROR",
            Self::Recovery { .. } => "RECOVERY_ERROR",
        }
    }

    /// Whether this error warrants an HTTP 402 response
    pub fn is_payment_required(&self) -> bool {
        matches!(self, Self::PaymentRequired { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = Aegis402Error::PaymentNotFound {
            tx_hash: "0xabc".to_string(),
        };
        assert_eq!(err.error_code(), "PAYMENT_NOT_FOUND");
        assert_eq!(err.to_string(), "Payment record not found");
    }

    #[test]
    fn test_terminal_message_includes_status() {
        let err = Aegis402Error::PaymentAlreadyTerminal {
            tx_hash: "0xabc".to_string(),
            status: PaymentStatus::Expired,
        };
        assert_eq!(err.to_string(), "Payment already expired");
    }

    #[test]
    fn test_deadline_message() {
        let err = Aegis402Error::DeadlineNotPassed {
            tx_hash: "0xabc".to_string(),
            remaining_secs: 120,
        };
        assert_eq!(err.to_string(), "Deadline not yet passed. Wait 120 seconds");
    }
}
