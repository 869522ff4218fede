//! Facilitator client
//!
//! The facilitator is the external service that verifies a payment
//! payload against its requirements and settles it on the value ledger.
//! Verification failures are ordinary outcomes, not transport errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use aegis_types::{Aegis402Error, Address, Result};

use crate::{PaymentRequirements, PaymentSubmission};

/// Result of verifying a payment payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub is_valid: bool,
    /// Address recovered from the payload signature
    pub payer: Option<Address>,
    pub invalid_reason: Option<String>,
}

/// Result of settling a verified payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleOutcome {
    pub success: bool,
    /// Hash of the settlement transaction
    pub transaction: Option<String>,
    pub payer: Option<Address>,
    pub error_reason: Option<String>,
}

/// Verify-and-settle contract presented by the facilitator
#[async_trait]
pub trait Facilitator: Send + Sync {
    async fn verify(
        &self,
        payload: &serde_json::Value,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyOutcome>;

    async fn settle(
        &self,
        payload: &serde_json::Value,
        requirements: &PaymentRequirements,
    ) -> Result<SettleOutcome>;

    /// Verify then settle a submission, returning the payer address.
    ///
    /// Errors map onto the caller-visible payment failures: an invalid
    /// payload is `PaymentVerificationFailed`, a failed settlement is
    /// `PaymentSettlementFailed`.
    async fn collect(&self, submission: &PaymentSubmission) -> Result<Address> {
        let verified = self
            .verify(&submission.payment_payload, &submission.requirements)
            .await?;
        if !verified.is_valid {
            return Err(Aegis402Error::PaymentVerificationFailed {
                reason: verified
                    .invalid_reason
                    .unwrap_or_else(|| "payload rejected".to_string()),
            });
        }

        let settled = self
            .settle(&submission.payment_payload, &submission.requirements)
            .await?;
        if !settled.success {
            return Err(Aegis402Error::PaymentSettlementFailed {
                reason: settled
                    .error_reason
                    .unwrap_or_else(|| "settlement rejected".to_string()),
            });
        }

        settled
            .payer
            .or(verified.payer)
            .ok_or_else(|| Aegis402Error::PaymentSettlementFailed {
                reason: "facilitator did not report a payer".to_string(),
            })
    }
}

#[derive(Serialize)]
struct FacilitatorRequest<'a> {
    payment_payload: &'a serde_json::Value,
    payment_requirements: &'a PaymentRequirements,
}

/// HTTP facilitator client
pub struct HttpFacilitator {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpFacilitator {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    async fn post<R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        payload: &serde_json::Value,
        requirements: &PaymentRequirements,
    ) -> Result<R> {
        let mut request = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .timeout(Duration::from_secs(30))
            .json(&FacilitatorRequest {
                payment_payload: payload,
                payment_requirements: requirements,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| Aegis402Error::ledger(format!("facilitator {path}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Aegis402Error::ledger(format!(
                "facilitator {path}: returned {status}"
            )));
        }

        resp.json()
            .await
            .map_err(|e| Aegis402Error::ledger(format!("facilitator {path}: invalid response: {e}")))
    }
}

#[async_trait]
impl Facilitator for HttpFacilitator {
    async fn verify(
        &self,
        payload: &serde_json::Value,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyOutcome> {
        self.post("verify", payload, requirements).await
    }

    async fn settle(
        &self,
        payload: &serde_json::Value,
        requirements: &PaymentRequirements,
    ) -> Result<SettleOutcome> {
        self.post("settle", payload, requirements).await
    }
}

/// Facilitator fake returning scripted outcomes, for tests and local runs
pub struct StaticFacilitator {
    payer: Option<Address>,
    valid: bool,
}

impl StaticFacilitator {
    /// Accept every payment as if paid by `payer`
    pub fn accepting(payer: Address) -> Self {
        Self {
            payer: Some(payer),
            valid: true,
        }
    }

    /// Reject every payment at verification
    pub fn rejecting() -> Self {
        Self {
            payer: None,
            valid: false,
        }
    }
}

#[async_trait]
impl Facilitator for StaticFacilitator {
    async fn verify(
        &self,
        _payload: &serde_json::Value,
        _requirements: &PaymentRequirements,
    ) -> Result<VerifyOutcome> {
        Ok(VerifyOutcome {
            is_valid: self.valid,
            payer: self.payer.clone(),
            invalid_reason: (!self.valid).then(|| "invalid payload".to_string()),
        })
    }

    async fn settle(
        &self,
        _payload: &serde_json::Value,
        _requirements: &PaymentRequirements,
    ) -> Result<SettleOutcome> {
        Ok(SettleOutcome {
            success: self.valid,
            transaction: self.valid.then(|| "0xsettled".to_string()),
            payer: self.payer.clone(),
            error_reason: (!self.valid).then(|| "settlement rejected".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_types::Amount;

    fn submission() -> PaymentSubmission {
        PaymentSubmission {
            payment_payload: serde_json::json!({ "signature": "0xsig" }),
            requirements: PaymentRequirements::stake(
                "base-sepolia",
                Address::new("0xasset"),
                Address::new("0xagent"),
                Amount::new(100_000),
            ),
        }
    }

    #[tokio::test]
    async fn test_collect_returns_payer() {
        let facilitator = StaticFacilitator::accepting(Address::new("0xMerchant"));
        let payer = facilitator.collect(&submission()).await.unwrap();
        assert_eq!(payer, Address::new("0xmerchant"));
    }

    #[tokio::test]
    async fn test_collect_surfaces_verification_failure() {
        let facilitator = StaticFacilitator::rejecting();
        let err = facilitator.collect(&submission()).await.unwrap_err();
        assert_eq!(err.error_code(), "PAYMENT_VERIFICATION_FAILED");
    }
}
