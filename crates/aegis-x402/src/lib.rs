//! Payment-gate protocol surface (x402)
//!
//! Requests that must be paid for (subscribing with a stake, posting a
//! slash bond) carry an optional, typed payment submission; when it is
//! missing or unverifiable, handlers answer 402 with the requirements
//! the caller should satisfy. Payment-required is always a response
//! variant, never an unwind.

pub mod facilitator;

pub use facilitator::{Facilitator, HttpFacilitator, StaticFacilitator};

use serde::{Deserialize, Serialize};

use aegis_types::{Address, Amount};

/// Protocol version carried in 402 responses
pub const X402_VERSION: u32 = 1;

/// What a gated payment is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Stake,
    SlashBond,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stake => "stake",
            Self::SlashBond => "slash_bond",
        }
    }
}

/// Discriminator pocket inside a requirement object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementExtra {
    pub purpose: Purpose,
}

/// One acceptable way to pay for a gated operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Always `"exact"`: the caller pays precisely `max_amount_required`
    pub scheme: String,
    pub network: String,
    /// Value-asset contract address
    pub asset: Address,
    /// The clearinghouse agent address
    pub pay_to: Address,
    /// Atomic units as a decimal string
    pub max_amount_required: String,
    /// Path of the gated resource
    pub resource: String,
    pub description: String,
    pub max_timeout_seconds: u64,
    pub extra: RequirementExtra,
}

impl PaymentRequirements {
    fn exact(
        network: &str,
        asset: Address,
        pay_to: Address,
        amount: Amount,
        resource: &str,
        description: String,
        purpose: Purpose,
    ) -> Self {
        Self {
            scheme: "exact".to_string(),
            network: network.to_string(),
            asset,
            pay_to,
            max_amount_required: amount.to_string(),
            resource: resource.to_string(),
            description,
            max_timeout_seconds: 300,
            extra: RequirementExtra { purpose },
        }
    }

    /// Requirement for the collateral a merchant locks when subscribing
    pub fn stake(network: &str, asset: Address, pay_to: Address, minimum: Amount) -> Self {
        Self::exact(
            network,
            asset,
            pay_to,
            minimum,
            "/subscribe",
            format!("Merchant collateral stake (minimum {minimum} atomic units)"),
            Purpose::Stake,
        )
    }

    /// Requirement for the anti-griefing bond that gates a slash
    pub fn slash_bond(network: &str, asset: Address, pay_to: Address, bond: Amount) -> Self {
        Self::exact(
            network,
            asset,
            pay_to,
            bond,
            "/slash",
            format!("Anti-griefing bond for slashing ({bond} atomic units)"),
            Purpose::SlashBond,
        )
    }
}

/// A caller-supplied payment: the signed payload plus the requirements
/// it claims to satisfy
///
/// This replaces the source's untyped JSON pockets; unknown fields in
/// the payload are carried opaquely and ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSubmission {
    pub payment_payload: serde_json::Value,
    pub requirements: PaymentRequirements,
}

/// Body of a 402 Payment Required response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequiredBody {
    #[serde(rename = "x402Version")]
    pub x402_version: u32,
    pub accepts: Vec<PaymentRequirements>,
    pub error: String,
}

impl PaymentRequiredBody {
    pub fn new(accepts: Vec<PaymentRequirements>, error: impl Into<String>) -> Self {
        Self {
            x402_version: X402_VERSION,
            accepts,
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stake_req() -> PaymentRequirements {
        PaymentRequirements::stake(
            "base-sepolia",
            Address::new("0xAsset"),
            Address::new("0xAgent"),
            Amount::new(100_000),
        )
    }

    #[test]
    fn test_requirement_wire_shape() {
        let value = serde_json::to_value(stake_req()).unwrap();
        assert_eq!(value["scheme"], "exact");
        assert_eq!(value["payTo"], "0xagent");
        assert_eq!(value["maxAmountRequired"], "100000");
        assert_eq!(value["extra"]["purpose"], "stake");
    }

    #[test]
    fn test_bond_purpose_discriminator() {
        let req = PaymentRequirements::slash_bond(
            "base-sepolia",
            Address::new("0xasset"),
            Address::new("0xagent"),
            Amount::new(1_000),
        );
        assert_eq!(req.extra.purpose, Purpose::SlashBond);
        assert_eq!(req.resource, "/slash");
    }

    #[test]
    fn test_402_body_version_field() {
        let body = PaymentRequiredBody::new(vec![stake_req()], "Payment required: stake");
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["x402Version"], 1);
        assert_eq!(value["accepts"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_submission_ignores_unknown_payload_fields() {
        let json = serde_json::json!({
            "payment_payload": { "signature": "0xsig", "anything": { "nested": true } },
            "requirements": serde_json::to_value(stake_req()).unwrap(),
        });
        let submission: PaymentSubmission = serde_json::from_value(json).unwrap();
        assert_eq!(submission.requirements.extra.purpose, Purpose::Stake);
    }
}
