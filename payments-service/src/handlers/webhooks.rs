//! Gateway webhook intake.
//!
//! The raw body is verified against the gateway's webhook secret before
//! any parsing; an unverifiable delivery is rejected, never applied.

use crate::services::charges::apply_webhook_event;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use service_core::error::AppError;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub applied: bool,
}

pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(gateway_name): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, AppError> {
    let settings = state
        .db
        .get_gateway_settings(&gateway_name)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Gateway '{}' is not configured", gateway_name))
        })?;

    let gateway = state.registry.build(&settings)?;

    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !gateway.verify_webhook(&body, signature) {
        warn!(gateway = %gateway_name, "Webhook signature verification failed");
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Invalid webhook signature"
        )));
    }

    let event = gateway.parse_webhook(&body)?;
    let applied = apply_webhook_event(&state.db, &event).await?;

    info!(
        gateway = %gateway_name,
        transaction_id = %event.transaction_id,
        applied = applied,
        "Webhook processed"
    );
    Ok(Json(WebhookResponse { applied }))
}
