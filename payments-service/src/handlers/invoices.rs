//! Invoice endpoints.

use crate::models::{Invoice, InvoiceType};
use crate::services::invoices::{create_invoice_from_payment, render_invoice_html};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Html,
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    pub payment_id: Uuid,
    pub invoice_type: InvoiceType,
}

pub async fn create_invoice(
    State(state): State<AppState>,
    Json(payload): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<Invoice>), AppError> {
    let invoice =
        create_invoice_from_payment(&state.db, payload.payment_id, payload.invoice_type).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Invoice>, AppError> {
    let invoice = state
        .db
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;
    Ok(Json(invoice))
}

/// Printable document for the browser's print-to-PDF flow.
pub async fn get_invoice_html(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Html<String>, AppError> {
    let invoice = state
        .db
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;
    Ok(Html(render_invoice_html(&invoice, &state.business)))
}
