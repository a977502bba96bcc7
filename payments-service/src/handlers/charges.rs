//! Charge and refund endpoints.

use crate::gateways::{CardDetails, Currency, PaymentRequest};
use crate::models::Payment;
use crate::services::charges::{self, ChargeInput};
use crate::AppState;
use axum::{extract::State, http::StatusCode, Json};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CardRequest {
    #[validate(length(min = 12, max = 23))]
    pub number: String,
    #[validate(range(min = 1, max = 12))]
    pub expiry_month: u32,
    #[validate(range(min = 2000, max = 2099))]
    pub expiry_year: u32,
    #[validate(length(min = 3, max = 4))]
    pub cvv: String,
    pub holder_name: Option<String>,
    pub holder_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChargeRequest {
    pub deal_id: Option<Uuid>,
    pub contact_id: Uuid,
    /// Omit to charge through the default gateway.
    pub gateway: Option<String>,
    pub amount: Decimal,
    pub currency: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub payment_method: String,
    #[validate(nested)]
    pub card: Option<CardRequest>,
    pub saved_card_token: Option<String>,
    #[validate(range(min = 1, max = 36))]
    pub installments: Option<u32>,
    pub save_card: Option<bool>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChargeResponse {
    pub payment: Payment,
    pub success: bool,
    pub saved_card_token: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

pub async fn create_charge(
    State(state): State<AppState>,
    Json(payload): Json<ChargeRequest>,
) -> Result<(StatusCode, Json<ChargeResponse>), AppError> {
    payload.validate().map_err(AppError::ValidationError)?;
    if payload.amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Charge amount must be positive"
        )));
    }
    if payload.card.is_some() == payload.saved_card_token.is_some() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Provide exactly one of card details or a saved card token"
        )));
    }

    let currency_code = payload.currency.as_deref().unwrap_or("ILS");
    let currency = Currency::from_string(currency_code).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!(
            "Unsupported currency '{}'",
            currency_code
        ))
    })?;

    let card = payload.card.map(|c| CardDetails {
        number: c.number,
        expiry_month: c.expiry_month,
        expiry_year: c.expiry_year,
        cvv: c.cvv,
        holder_name: c.holder_name,
        holder_id: c.holder_id,
    });

    let outcome = charges::charge(
        &state.db,
        &state.registry,
        ChargeInput {
            deal_id: payload.deal_id,
            contact_id: Some(payload.contact_id),
            gateway: payload.gateway,
            payment_method: payload.payment_method,
            request: PaymentRequest {
                amount: payload.amount,
                currency,
                card,
                saved_card_token: payload.saved_card_token,
                installments: payload.installments.unwrap_or(1),
                save_card: payload.save_card.unwrap_or(false),
                description: payload.description,
            },
        },
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(ChargeResponse {
            success: outcome.response.success,
            saved_card_token: outcome.response.saved_card_token,
            error_code: outcome.response.error_code,
            error_message: outcome.response.error_message,
            payment: outcome.payment,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct RefundRequestDto {
    pub payment_id: Uuid,
    /// Omit for a full refund.
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefundResponseDto {
    pub payment: Payment,
    pub success: bool,
    pub refund_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

pub async fn create_refund(
    State(state): State<AppState>,
    Json(payload): Json<RefundRequestDto>,
) -> Result<Json<RefundResponseDto>, AppError> {
    let outcome = charges::refund(
        &state.db,
        &state.registry,
        payload.payment_id,
        payload.amount,
        payload.reason,
    )
    .await?;

    Ok(Json(RefundResponseDto {
        success: outcome.response.success,
        refund_id: outcome.response.refund_id,
        error_code: outcome.response.error_code,
        error_message: outcome.response.error_message,
        payment: outcome.payment,
    }))
}
