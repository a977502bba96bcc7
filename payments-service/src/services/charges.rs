//! Charge and refund orchestration.
//!
//! Gateway resolution, the adapter call and persistence live here so
//! handlers stay thin. Declines are persisted as failed payments, not
//! surfaced as errors.

use crate::gateways::{
    GatewayRegistry, PaymentGateway, PaymentRequest, RefundRequest, RefundResponse, WebhookEvent,
    WebhookEventType, WebhookStatus,
};
use crate::models::{GatewaySettings, NewPayment, Payment, PaymentStatus};
use crate::services::database::Database;
use crate::services::metrics::{PAYMENTS_TOTAL, REFUNDS_TOTAL};
use anyhow::anyhow;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A charge to run, with the ledger context the gateway never sees.
#[derive(Debug, Clone)]
pub struct ChargeInput {
    pub deal_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    /// None selects the default gateway.
    pub gateway: Option<String>,
    pub payment_method: String,
    pub request: PaymentRequest,
}

/// The persisted payment together with the normalized gateway response
/// (which carries the saved-card token when one was issued).
#[derive(Debug)]
pub struct ChargeOutcome {
    pub payment: Payment,
    pub response: crate::gateways::PaymentResponse,
}

#[derive(Debug)]
pub struct RefundOutcome {
    pub payment: Payment,
    pub response: RefundResponse,
}

/// Pick the adapter for a charge: the named gateway, or the configured
/// default. Inactive and unknown gateways are configuration errors.
pub async fn resolve_gateway(
    db: &Database,
    registry: &GatewayRegistry,
    name: Option<&str>,
) -> Result<(Arc<dyn PaymentGateway>, GatewaySettings), AppError> {
    let settings = match name {
        Some(name) => db.get_gateway_settings(name).await?.ok_or_else(|| {
            AppError::ConfigError(anyhow!("Gateway '{}' is not configured", name))
        })?,
        None => db.default_gateway_settings().await?.ok_or_else(|| {
            AppError::ConfigError(anyhow!("No active payment gateway configured"))
        })?,
    };

    let gateway = registry.build(&settings)?;
    Ok((gateway, settings))
}

/// Run one charge end to end: resolve the gateway, call it, persist the
/// outcome. The payment row is written for declines too, carrying the
/// gateway's error code.
#[instrument(skip(db, registry, input), fields(deal_id = ?input.deal_id))]
pub async fn charge(
    db: &Database,
    registry: &GatewayRegistry,
    input: ChargeInput,
) -> Result<ChargeOutcome, AppError> {
    let (gateway, settings) = resolve_gateway(db, registry, input.gateway.as_deref()).await?;

    let response = gateway.process_payment(&input.request).await;
    let status = if response.success {
        PaymentStatus::Completed
    } else {
        PaymentStatus::Failed
    };

    PAYMENTS_TOTAL
        .with_label_values(&[&settings.gateway, status.as_str()])
        .inc();

    let payment = db
        .record_charge(&NewPayment {
            deal_id: input.deal_id,
            contact_id: input.contact_id,
            plan_id: None,
            subscription_id: None,
            amount: input.request.amount,
            currency: input.request.currency.iso_code().to_string(),
            payment_method: input.payment_method.clone(),
            gateway: Some(settings.gateway.clone()),
            status,
            transaction_id: response.transaction_id.clone(),
            auth_code: response.auth_code.clone(),
            last4_digits: response.last4_digits.clone(),
            card_brand: response.card_brand.map(|b| b.as_str().to_string()),
            error_code: response.error_code.clone(),
            error_message: response.error_message.clone(),
            completed_at: None,
        })
        .await?;

    info!(
        payment_id = %payment.payment_id,
        gateway = %settings.gateway,
        status = %payment.status,
        "Charge recorded"
    );
    Ok(ChargeOutcome { payment, response })
}

/// Refund a completed payment through its original gateway, fully when
/// no amount is given. A second refund of the same payment is a
/// conflict, not a second gateway call.
#[instrument(skip(db, registry))]
pub async fn refund(
    db: &Database,
    registry: &GatewayRegistry,
    payment_id: Uuid,
    amount: Option<Decimal>,
    reason: Option<String>,
) -> Result<RefundOutcome, AppError> {
    let payment = db
        .get_payment(payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow!("Payment not found")))?;

    let gateway_name = payment
        .gateway
        .as_deref()
        .ok_or_else(|| AppError::Conflict(anyhow!("Payment was not settled by a gateway")))?;
    let transaction_id = payment
        .transaction_id
        .clone()
        .ok_or_else(|| AppError::Conflict(anyhow!("Payment has no gateway transaction")))?;

    let refund_amount = amount.unwrap_or(payment.amount);
    if refund_amount <= Decimal::ZERO || refund_amount > payment.amount {
        return Err(AppError::BadRequest(anyhow!(
            "Refund amount must be positive and at most the payment amount"
        )));
    }

    let (gateway, settings) = resolve_gateway(db, registry, Some(gateway_name)).await?;

    // Claim the payment before calling out, so two concurrent refunds
    // cannot both reach the processor. The loser conflicts here.
    db.claim_refund(payment_id).await?;

    let response = gateway
        .refund_payment(&RefundRequest {
            transaction_id,
            amount,
            reason,
        })
        .await;

    REFUNDS_TOTAL
        .with_label_values(&[
            settings.gateway.as_str(),
            if response.success { "completed" } else { "failed" },
        ])
        .inc();

    if !response.success {
        db.release_refund_claim(payment_id).await?;
        warn!(
            payment_id = %payment.payment_id,
            error_code = ?response.error_code,
            "Gateway refused refund"
        );
        let payment = db
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("Payment not found")))?;
        return Ok(RefundOutcome { payment, response });
    }

    db.refund_payment_record(payment_id, refund_amount).await?;
    let payment = db
        .get_payment(payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow!("Payment not found")))?;

    info!(payment_id = %payment.payment_id, "Refund recorded");
    Ok(RefundOutcome { payment, response })
}

/// Apply a verified, normalized webhook event to the ledger. Returns
/// false when the event was already applied (redelivery is a no-op).
#[instrument(skip(db, event), fields(transaction_id = %event.transaction_id))]
pub async fn apply_webhook_event(db: &Database, event: &WebhookEvent) -> Result<bool, AppError> {
    let payment = db
        .get_payment_by_transaction_id(&event.transaction_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow!(
                "No payment for transaction '{}'",
                event.transaction_id
            ))
        })?;

    let applied = match (event.event_type, event.status) {
        (WebhookEventType::Payment, WebhookStatus::Completed) => {
            db.complete_payment_record(payment.payment_id).await?
        }
        (WebhookEventType::Payment, WebhookStatus::Failed) => {
            db.fail_payment_record(payment.payment_id, Some("gateway_failed"))
                .await?
        }
        (WebhookEventType::Refund, WebhookStatus::Completed) => {
            match db
                .refund_payment_record(payment.payment_id, payment.amount)
                .await
            {
                Ok(applied) => applied,
                // A refund notification for a never-settled payment is
                // stale; swallow it rather than fail the delivery.
                Err(AppError::Conflict(_)) => false,
                Err(err) => return Err(err),
            }
        }
        (WebhookEventType::Refund, WebhookStatus::Failed) => false,
    };

    if applied {
        info!(payment_id = %payment.payment_id, "Webhook event applied");
    }
    Ok(applied)
}
