//! Recurring payment endpoints.

use crate::models::{BillingCycle, CreateSubscription, Payment, RecurringPayment, SubscriptionStatus};
use crate::services::subscriptions::monthly_recurring_revenue;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub contact_id: Option<Uuid>,
    pub deal_id: Option<Uuid>,
    pub description: Option<String>,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub billing_cycle: BillingCycle,
    pub start_date: NaiveDate,
}

pub async fn create_subscription(
    State(state): State<AppState>,
    Json(payload): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<RecurringPayment>), AppError> {
    if payload.amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Subscription amount must be positive"
        )));
    }

    let subscription = state
        .db
        .create_subscription(&CreateSubscription {
            contact_id: payload.contact_id,
            deal_id: payload.deal_id,
            description: payload.description,
            amount: payload.amount,
            currency: payload.currency.unwrap_or_else(|| "ILS".to_string()),
            billing_cycle: payload.billing_cycle,
            start_date: payload.start_date,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
) -> Result<Json<RecurringPayment>, AppError> {
    let subscription = state
        .db
        .get_subscription(subscription_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;
    Ok(Json(subscription))
}

#[derive(Debug, Serialize)]
pub struct CycleResponse {
    pub payment: Payment,
    pub subscription: RecurringPayment,
}

/// Bill one cycle now.
pub async fn charge_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
) -> Result<(StatusCode, Json<CycleResponse>), AppError> {
    let (payment, subscription) = state.db.charge_subscription(subscription_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(CycleResponse {
            payment,
            subscription,
        }),
    ))
}

pub async fn pause_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
) -> Result<Json<RecurringPayment>, AppError> {
    let subscription = state
        .db
        .update_subscription_status(subscription_id, SubscriptionStatus::Paused)
        .await?;
    Ok(Json(subscription))
}

pub async fn resume_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
) -> Result<Json<RecurringPayment>, AppError> {
    let subscription = state
        .db
        .update_subscription_status(subscription_id, SubscriptionStatus::Active)
        .await?;
    Ok(Json(subscription))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
) -> Result<Json<RecurringPayment>, AppError> {
    let subscription = state
        .db
        .update_subscription_status(subscription_id, SubscriptionStatus::Cancelled)
        .await?;
    Ok(Json(subscription))
}

#[derive(Debug, Serialize)]
pub struct MrrResponse {
    pub mrr: Decimal,
    pub active_subscriptions: usize,
}

/// Monthly recurring revenue over the active subscriptions.
pub async fn mrr_report(State(state): State<AppState>) -> Result<Json<MrrResponse>, AppError> {
    let subscriptions = state.db.list_active_subscriptions().await?;
    Ok(Json(MrrResponse {
        mrr: monthly_recurring_revenue(&subscriptions),
        active_subscriptions: subscriptions.len(),
    }))
}
