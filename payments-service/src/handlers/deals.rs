//! Deal endpoints.

use crate::models::{CreateDeal, Deal};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDealRequest {
    pub contact_id: Option<Uuid>,
    #[validate(length(min = 1, max = 200))]
    pub product_name: String,
    #[validate(length(min = 1, max = 200))]
    pub customer_name: String,
    #[validate(email)]
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub currency: Option<String>,
    pub final_amount: Decimal,
}

pub async fn create_deal(
    State(state): State<AppState>,
    Json(payload): Json<CreateDealRequest>,
) -> Result<(StatusCode, Json<Deal>), AppError> {
    payload.validate().map_err(AppError::ValidationError)?;
    if payload.final_amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Deal amount must be positive"
        )));
    }

    let deal = state
        .db
        .create_deal(&CreateDeal {
            contact_id: payload.contact_id,
            product_name: payload.product_name,
            customer_name: payload.customer_name,
            customer_email: payload.customer_email,
            customer_phone: payload.customer_phone,
            currency: payload.currency.unwrap_or_else(|| "ILS".to_string()),
            final_amount: payload.final_amount,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(deal)))
}

pub async fn get_deal(
    State(state): State<AppState>,
    Path(deal_id): Path<Uuid>,
) -> Result<Json<Deal>, AppError> {
    let deal = state
        .db
        .get_deal(deal_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Deal not found")))?;
    Ok(Json(deal))
}
