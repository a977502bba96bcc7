//! Payment plan endpoints.

use crate::models::{CreatePlan, Payment, PaymentFrequency, PaymentPlan, PlanStatus};
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
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePlanRequest {
    pub deal_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub total_amount: Decimal,
    #[validate(range(min = 1, max = 60))]
    pub number_of_payments: i32,
    pub payment_frequency: PaymentFrequency,
    pub start_date: NaiveDate,
}

pub async fn create_plan(
    State(state): State<AppState>,
    Json(payload): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<PaymentPlan>), AppError> {
    payload.validate().map_err(AppError::ValidationError)?;
    if payload.total_amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Plan total must be positive"
        )));
    }

    let plan = state
        .db
        .create_plan(&CreatePlan {
            deal_id: payload.deal_id,
            contact_id: payload.contact_id,
            total_amount: payload.total_amount,
            number_of_payments: payload.number_of_payments,
            payment_frequency: payload.payment_frequency,
            start_date: payload.start_date,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn get_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<PaymentPlan>, AppError> {
    let plan = state
        .db
        .get_plan(plan_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment plan not found")))?;
    Ok(Json(plan))
}

#[derive(Debug, Deserialize, Default)]
pub struct RecordInstallmentRequest {
    /// Omit to charge the even split of the plan total.
    pub amount: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct InstallmentResponse {
    pub payment: Payment,
    pub plan: PaymentPlan,
}

pub async fn record_installment(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
    payload: Option<Json<RecordInstallmentRequest>>,
) -> Result<(StatusCode, Json<InstallmentResponse>), AppError> {
    let amount = payload.and_then(|Json(p)| p.amount);
    if let Some(amount) = amount {
        if amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Installment amount must be positive"
            )));
        }
    }

    let (payment, plan) = state.db.record_installment(plan_id, amount).await?;
    Ok((
        StatusCode::CREATED,
        Json(InstallmentResponse { payment, plan }),
    ))
}

pub async fn pause_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<PaymentPlan>, AppError> {
    let plan = state
        .db
        .update_plan_status(plan_id, PlanStatus::Paused)
        .await?;
    Ok(Json(plan))
}

pub async fn resume_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<PaymentPlan>, AppError> {
    let plan = state
        .db
        .update_plan_status(plan_id, PlanStatus::Active)
        .await?;
    Ok(Json(plan))
}

pub async fn cancel_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<PaymentPlan>, AppError> {
    let plan = state
        .db
        .update_plan_status(plan_id, PlanStatus::Cancelled)
        .await?;
    Ok(Json(plan))
}

pub async fn delete_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.db.delete_plan(plan_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
