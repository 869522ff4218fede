//! HTTP handlers
//!
//! Thin adapters between the JSON surface and the clearing core. The
//! gated operations (subscribe, slash) answer 402 with payment
//! requirements until a verifiable submission arrives; everything else
//! maps core results straight through.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use aegis_clearing::SubscribeDetails;
use aegis_types::{Address, Aegis402Error, Amount, Merchant, Payment, TxHash};
use aegis_x402::{Facilitator, PaymentRequiredBody, PaymentRequirements, PaymentSubmission, Purpose};

use crate::error::ApiError;
use crate::state::App;

fn payment_required(accepts: Vec<PaymentRequirements>, error: &str) -> Response {
    (
        StatusCode::PAYMENT_REQUIRED,
        Json(PaymentRequiredBody::new(accepts, error)),
    )
        .into_response()
}

// ============================================================================
// Subscribe
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SubscribeBody {
    pub endpoint: Option<String>,
    pub skills: Option<Vec<String>>,
    pub agent_id: Option<String>,
    pub stake_amount: Option<Amount>,
    pub payment: Option<PaymentSubmission>,
}

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub success: bool,
    pub merchant: Address,
    pub stake: Amount,
    pub credit_limit: Amount,
    pub message: String,
}

pub async fn subscribe(
    State(app): State<Arc<App>>,
    Json(body): Json<SubscribeBody>,
) -> Result<Response, ApiError> {
    let endpoint = body
        .endpoint
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| ApiError::invalid("endpoint"))?;
    let skills = body
        .skills
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::invalid("skills"))?;
    let agent_id = body.agent_id.unwrap_or_else(|| "0".to_string());

    let desired_stake = body.stake_amount.unwrap_or(app.min_stake);
    if desired_stake < app.min_stake {
        return Err(Aegis402Error::StakeBelowMinimum {
            stake: desired_stake.units(),
            minimum: app.min_stake.units(),
        }
        .into());
    }

    let Some(payment) = body.payment else {
        let requirements = PaymentRequirements::stake(
            &app.network,
            app.asset_address.clone(),
            app.agent_address.clone(),
            desired_stake,
        );
        return Ok(payment_required(
            vec![requirements],
            "Payment required: merchant stake",
        ));
    };

    if payment.requirements.extra.purpose != Purpose::Stake {
        return Err(ApiError::invalid("payment.requirements.extra.purpose"));
    }
    let stake = Amount::parse(&payment.requirements.max_amount_required)?;
    if stake < app.min_stake {
        return Err(Aegis402Error::StakeBelowMinimum {
            stake: stake.units(),
            minimum: app.min_stake.units(),
        }
        .into());
    }

    // The facilitator settles the stake to the clearinghouse account and
    // tells us who paid it; that payer is the merchant being registered.
    let payer = app.facilitator.collect(&payment).await?;
    info!(merchant = %payer, %stake, "stake payment settled");

    let subscription = app
        .core
        .subscribe(
            SubscribeDetails {
                endpoint,
                skills,
                agent_id,
            },
            payer,
            stake,
        )
        .await?;

    Ok(Json(SubscribeResponse {
        success: true,
        merchant: subscription.merchant,
        stake: subscription.stake,
        credit_limit: subscription.credit_limit,
        message: subscription.message,
    })
    .into_response())
}

// ============================================================================
// Quote
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct QuoteBody {
    pub skill: Option<String>,
    pub price: Option<Amount>,
}

pub async fn quote(
    State(app): State<Arc<App>>,
    Json(body): Json<QuoteBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let skill = body
        .skill
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::invalid("skill"))?;
    let price = body.price.ok_or_else(|| ApiError::invalid("price"))?;

    let merchants = app.core.quote(&skill, price).await?;
    Ok(Json(serde_json::json!({ "merchants": merchants })))
}

// ============================================================================
// Settle
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SettleBody {
    pub tx_hash: Option<TxHash>,
}

#[derive(Debug, Serialize)]
pub struct SettleResponse {
    pub success: bool,
    pub tx_hash: TxHash,
    pub merchant: Address,
    pub amount: Amount,
}

pub async fn settle(
    State(app): State<Arc<App>>,
    Json(body): Json<SettleBody>,
) -> Result<Json<SettleResponse>, ApiError> {
    let tx_hash = body.tx_hash.ok_or_else(|| ApiError::invalid("tx_hash"))?;

    let settlement = app.core.settle(&tx_hash).await?;
    Ok(Json(SettleResponse {
        success: true,
        tx_hash: settlement.tx_hash,
        merchant: settlement.merchant,
        amount: settlement.amount,
    }))
}

// ============================================================================
// Slash
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SlashBody {
    pub tx_hash: Option<TxHash>,
    pub payment: Option<PaymentSubmission>,
}

#[derive(Debug, Serialize)]
pub struct SlashResponse {
    pub success: bool,
    pub tx_hash: TxHash,
    pub merchant: Address,
    pub client: Address,
    pub slashed_amount: Amount,
    pub refund_tx: TxHash,
}

pub async fn slash(
    State(app): State<Arc<App>>,
    Json(body): Json<SlashBody>,
) -> Result<Response, ApiError> {
    let tx_hash = body.tx_hash.ok_or_else(|| ApiError::invalid("tx_hash"))?;

    let Some(payment) = body.payment else {
        let requirements = PaymentRequirements::slash_bond(
            &app.network,
            app.asset_address.clone(),
            app.agent_address.clone(),
            app.slash_bond,
        );
        return Ok(payment_required(
            vec![requirements],
            "Payment required: slash bond",
        ));
    };

    if payment.requirements.extra.purpose != Purpose::SlashBond {
        return Err(ApiError::invalid("payment.requirements.extra.purpose"));
    }

    // The bond payer must be the payment's original client; the core
    // enforces the match.
    let payer = app.facilitator.collect(&payment).await?;
    info!(client = %payer, %tx_hash, "slash bond settled");

    let result = app.core.slash(&tx_hash, &payer).await?;
    Ok(Json(SlashResponse {
        success: true,
        tx_hash: result.tx_hash,
        merchant: result.merchant,
        client: result.client,
        slashed_amount: result.slashed_amount,
        refund_tx: result.refund_tx,
    })
    .into_response())
}

// ============================================================================
// Read-only surface
// ============================================================================

pub async fn health(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "agent": app.agent_address,
        "credit_manager": app.credit_manager_address,
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

#[derive(Debug, Serialize)]
pub struct MerchantsResponse {
    pub merchants: Vec<Merchant>,
    pub count: usize,
}

pub async fn merchants(State(app): State<Arc<App>>) -> Json<MerchantsResponse> {
    let mut merchants = app.core.merchants().await;
    merchants.sort_by(|a, b| a.address.cmp(&b.address));
    let count = merchants.len();
    Json(MerchantsResponse { merchants, count })
}

pub async fn merchant_detail(
    State(app): State<Arc<App>>,
    Path(address): Path<String>,
) -> Result<Json<Merchant>, ApiError> {
    let address = Address::new(&address);
    app.core
        .merchant(&address)
        .await
        .map(Json)
        .ok_or_else(|| {
            Aegis402Error::MerchantNotFound {
                address: address.to_string(),
            }
            .into()
        })
}

#[derive(Debug, Serialize)]
pub struct PaymentsResponse {
    pub payments: Vec<Payment>,
    pub count: usize,
}

pub async fn payments(State(app): State<Arc<App>>) -> Json<PaymentsResponse> {
    let mut payments = app.core.payments().await;
    payments.sort_by_key(|p| p.created_at);
    let count = payments.len();
    Json(PaymentsResponse { payments, count })
}
