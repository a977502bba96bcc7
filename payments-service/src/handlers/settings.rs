//! Gateway settings endpoints.

use crate::models::{GatewaySettings, UpsertGatewaySettings};
use crate::AppState;
use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct UpsertGatewaySettingsRequest {
    pub gateway: String,
    pub is_active: Option<bool>,
    pub is_default: Option<bool>,
    pub terminal_id: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub webhook_secret: Option<String>,
    pub vat_rate: Option<Decimal>,
    pub invoice_prefix: Option<String>,
    pub receipt_prefix: Option<String>,
    pub settings: Option<serde_json::Value>,
}

/// Settings without credentials; secrets never leave the service.
#[derive(Debug, Serialize)]
pub struct GatewaySettingsResponse {
    pub gateway: String,
    pub is_active: bool,
    pub is_default: bool,
    pub terminal_id: Option<String>,
    pub has_credentials: bool,
    pub vat_rate: Decimal,
    pub invoice_prefix: String,
    pub receipt_prefix: String,
    pub settings: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl From<GatewaySettings> for GatewaySettingsResponse {
    fn from(s: GatewaySettings) -> Self {
        Self {
            gateway: s.gateway,
            is_active: s.is_active,
            is_default: s.is_default,
            terminal_id: s.terminal_id,
            has_credentials: s.api_key.is_some() || s.api_secret.is_some(),
            vat_rate: s.vat_rate,
            invoice_prefix: s.invoice_prefix,
            receipt_prefix: s.receipt_prefix,
            settings: s.settings,
            created_utc: s.created_utc,
            updated_utc: s.updated_utc,
        }
    }
}

pub async fn upsert_settings(
    State(state): State<AppState>,
    Json(payload): Json<UpsertGatewaySettingsRequest>,
) -> Result<(StatusCode, Json<GatewaySettingsResponse>), AppError> {
    if !state.registry.contains(&payload.gateway) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Unknown gateway '{}'",
            payload.gateway
        )));
    }
    if let Some(rate) = payload.vat_rate {
        if rate < Decimal::ZERO || rate > Decimal::from(100) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "VAT rate must be between 0 and 100"
            )));
        }
    }

    let settings = state
        .db
        .upsert_gateway_settings(&UpsertGatewaySettings {
            gateway: payload.gateway,
            is_active: payload.is_active,
            is_default: payload.is_default,
            terminal_id: payload.terminal_id,
            api_key: payload.api_key,
            api_secret: payload.api_secret,
            webhook_secret: payload.webhook_secret,
            vat_rate: payload.vat_rate,
            invoice_prefix: payload.invoice_prefix,
            receipt_prefix: payload.receipt_prefix,
            settings: payload.settings,
        })
        .await?;

    Ok((StatusCode::OK, Json(settings.into())))
}

pub async fn list_settings(
    State(state): State<AppState>,
) -> Result<Json<Vec<GatewaySettingsResponse>>, AppError> {
    let settings = state.db.list_gateway_settings().await?;
    Ok(Json(settings.into_iter().map(Into::into).collect()))
}
