//! PayPlus gateway adapter.
//!
//! PayPlus is a JSON API with ISO currency codes and an envelope of
//! `results` (status/code/description) plus `data` (transaction
//! fields). Approval is `results.status == "success"`.

use super::transport::{
    test_card_approves, GatewayTransport, HttpTransport, SimulatedTransport, TransportBody,
    TransportRequest, TransportResponse, DEFAULT_TIMEOUT,
};
use super::{
    validate_card, CardBrand, GatewayConfig, PaymentGateway, PaymentRequest, PaymentResponse,
    RefundRequest, RefundResponse, WebhookEvent, WebhookEventType, WebhookStatus,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

pub const GATEWAY_NAME: &str = "payplus";

const DEFAULT_API_URL: &str = "https://restapi.payplus.co.il/api/v1.0/Transactions";

pub fn factory(config: GatewayConfig) -> Arc<dyn PaymentGateway> {
    let transport: Arc<dyn GatewayTransport> = if config.tuning.live {
        Arc::new(HttpTransport::new(DEFAULT_TIMEOUT))
    } else {
        Arc::new(simulator())
    };
    Arc::new(PayPlusGateway::new(config, transport))
}

/// Response envelope shared by charge and refund calls.
#[derive(Debug, Deserialize)]
struct Envelope {
    results: EnvelopeResults,
    data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeResults {
    status: String,
    code: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    transaction_uid: Option<String>,
    approval_number: Option<String>,
    four_digits: Option<String>,
    token: Option<String>,
}

/// Webhook payload shape.
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    transaction_type: String,
    transaction_uid: String,
    status_code: String,
    #[serde(flatten)]
    rest: serde_json::Value,
}

pub struct PayPlusGateway {
    config: GatewayConfig,
    transport: Arc<dyn GatewayTransport>,
}

impl PayPlusGateway {
    pub fn new(config: GatewayConfig, transport: Arc<dyn GatewayTransport>) -> Self {
        Self { config, transport }
    }

    fn api_url(&self, action: &str) -> String {
        let base = self
            .config
            .tuning
            .api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        format!("{}/{}", base, action)
    }

    async fn send(&self, action: &str, body: serde_json::Value) -> Result<Envelope, String> {
        let request = TransportRequest {
            url: self.api_url(action),
            body: TransportBody::Json(body),
        };

        let response = self.transport.send(request).await.map_err(|e| {
            tracing::error!(gateway = GATEWAY_NAME, error = %e, "Transport failure");
            e.to_string()
        })?;

        serde_json::from_str::<Envelope>(&response.body).map_err(|e| {
            tracing::error!(gateway = GATEWAY_NAME, error = %e, "Malformed processor response");
            format!("malformed processor response: {}", e)
        })
    }
}

#[async_trait]
impl PaymentGateway for PayPlusGateway {
    fn name(&self) -> &'static str {
        GATEWAY_NAME
    }

    async fn process_payment(&self, request: &PaymentRequest) -> PaymentResponse {
        let mut body = json!({
            "terminal_uid": self.config.terminal_id,
            "api_key": self.config.api_key,
            "amount": format!("{:.2}", request.amount),
            "currency_code": request.currency.iso_code(),
            "payments": request.installments,
            "create_token": request.save_card,
        });

        let (last4, brand) = if let Some(token) = &request.saved_card_token {
            body["token"] = json!(token);
            (None, None)
        } else {
            let card = match validate_card(request) {
                Ok(card) => card,
                Err(response) => return response,
            };
            body["credit_card_number"] = json!(card.digits());
            body["card_date_mmyy"] =
                json!(format!("{:02}/{:02}", card.expiry_month, card.expiry_year % 100));
            body["cvv"] = json!(card.cvv);
            if let Some(holder) = &card.holder_name {
                body["card_holder_name"] = json!(holder);
            }
            (
                Some(card.last4()),
                Some(CardBrand::detect(&card.number)),
            )
        };

        let envelope = match self.send("Charge", body).await {
            Ok(envelope) => envelope,
            Err(message) => return PaymentResponse::transport_error(message),
        };

        if envelope.results.status == "success" {
            let data = envelope.data.unwrap_or(EnvelopeData {
                transaction_uid: None,
                approval_number: None,
                four_digits: None,
                token: None,
            });
            let transaction_id = data
                .transaction_uid
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            tracing::info!(
                gateway = GATEWAY_NAME,
                transaction_id = %transaction_id,
                "Charge approved"
            );
            PaymentResponse::approved(
                transaction_id,
                data.approval_number,
                last4.or(data.four_digits),
                brand,
                if request.save_card { data.token } else { None },
            )
        } else {
            tracing::info!(
                gateway = GATEWAY_NAME,
                code = %envelope.results.code,
                "Charge declined"
            );
            PaymentResponse::declined(
                format!("payplus_{}", envelope.results.code),
                envelope
                    .results
                    .description
                    .unwrap_or_else(|| "Transaction declined".to_string()),
            )
        }
    }

    async fn refund_payment(&self, request: &RefundRequest) -> RefundResponse {
        let mut body = json!({
            "terminal_uid": self.config.terminal_id,
            "api_key": self.config.api_key,
            "transaction_uid": request.transaction_id,
        });
        // Omitted amount means a full refund on the processor side.
        if let Some(amount) = request.amount {
            body["amount"] = json!(format!("{:.2}", amount));
        }
        if let Some(reason) = &request.reason {
            body["more_info"] = json!(reason);
        }

        let envelope = match self.send("RefundByTransactionUID", body).await {
            Ok(envelope) => envelope,
            Err(message) => return RefundResponse::failed("refund_gateway_error", message),
        };

        if envelope.results.status == "success" {
            let refund_id = envelope
                .data
                .and_then(|d| d.transaction_uid)
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            RefundResponse::approved(refund_id)
        } else {
            RefundResponse::failed(
                format!("refund_payplus_{}", envelope.results.code),
                envelope
                    .results
                    .description
                    .unwrap_or_else(|| "Refund declined".to_string()),
            )
        }
    }

    fn verify_webhook(&self, payload: &str, signature: &str) -> bool {
        self.config.verify_signature(payload, signature)
    }

    fn parse_webhook(&self, payload: &str) -> Result<WebhookEvent, AppError> {
        let parsed: WebhookPayload = serde_json::from_str(payload)
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid webhook payload: {}", e)))?;

        let event_type = match parsed.transaction_type.as_str() {
            "refund" => WebhookEventType::Refund,
            _ => WebhookEventType::Payment,
        };

        let status = match parsed.status_code.as_str() {
            "000" => WebhookStatus::Completed,
            _ => WebhookStatus::Failed,
        };

        Ok(WebhookEvent {
            event_type,
            transaction_id: parsed.transaction_uid,
            status,
            data: parsed.rest,
        })
    }
}

/// Simulated PayPlus processor: mirrors the JSON envelope the live API
/// returns, approving test-card prefixes, token charges and refunds.
pub fn simulator() -> SimulatedTransport {
    SimulatedTransport::new(|request: &TransportRequest| {
        let approve = |token: bool| {
            json!({
                "results": { "status": "success", "code": "000", "description": "approved" },
                "data": {
                    "transaction_uid": Uuid::new_v4().to_string(),
                    "approval_number": "0098765",
                    "four_digits": request
                        .json_field("credit_card_number")
                        .map(|n| n[n.len().saturating_sub(4)..].to_string()),
                    "token": if token { Some(format!("pp_{}", Uuid::new_v4().simple())) } else { None },
                }
            })
        };

        let body = if request.url.ends_with("RefundByTransactionUID") {
            approve(false)
        } else if request.json_field("token").is_some() {
            approve(false)
        } else {
            match request.json_field("credit_card_number") {
                Some(number) if test_card_approves(number) => approve(true),
                _ => json!({
                    "results": { "status": "error", "code": "033", "description": "Card declined" }
                }),
            }
        };

        TransportResponse {
            status: 200,
            body: body.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::super::{CardDetails, Currency};
    use super::*;
    use crate::models::GatewayTuning;
    use rust_decimal::Decimal;
    use secrecy::Secret;

    fn gateway() -> PayPlusGateway {
        PayPlusGateway::new(
            GatewayConfig {
                terminal_id: "term-1".to_string(),
                api_key: "key".to_string(),
                api_secret: Secret::new("secret".to_string()),
                webhook_secret: Secret::new("whsec".to_string()),
                tuning: GatewayTuning::default(),
            },
            Arc::new(simulator()),
        )
    }

    fn card_request(number: &str) -> PaymentRequest {
        PaymentRequest {
            amount: Decimal::new(11700, 2),
            currency: Currency::Usd,
            card: Some(CardDetails {
                number: number.to_string(),
                expiry_month: 12,
                expiry_year: 27,
                cvv: "456".to_string(),
                holder_name: None,
                holder_id: None,
            }),
            saved_card_token: None,
            installments: 1,
            save_card: false,
            description: None,
        }
    }

    #[tokio::test]
    async fn test_card_approves_charge() {
        let response = gateway().process_payment(&card_request("4111111111111111")).await;
        assert!(response.success);
        assert_eq!(response.card_brand, Some(CardBrand::Visa));
        assert_eq!(response.last4_digits.as_deref(), Some("1111"));
    }

    #[tokio::test]
    async fn other_card_declines_with_vendor_code() {
        let response = gateway().process_payment(&card_request("5100000000000008")).await;
        assert!(!response.success);
        assert_eq!(response.error_code.as_deref(), Some("payplus_033"));
    }

    #[tokio::test]
    async fn missing_card_and_token_rejected() {
        let mut request = card_request("x");
        request.card = None;
        let response = gateway().process_payment(&request).await;
        assert!(!response.success);
        assert_eq!(response.error_code.as_deref(), Some("missing_card"));
    }

    #[tokio::test]
    async fn partial_refund_approves() {
        let response = gateway()
            .refund_payment(&RefundRequest {
                transaction_id: "uid-1".to_string(),
                amount: Some(Decimal::from(50)),
                reason: Some("customer request".to_string()),
            })
            .await;
        assert!(response.success);
    }

    #[test]
    fn webhook_parse_maps_refund_and_failure() {
        let gw = gateway();
        let event = gw
            .parse_webhook(
                r#"{"transaction_type":"refund","transaction_uid":"uid-9","status_code":"000"}"#,
            )
            .unwrap();
        assert_eq!(event.event_type, WebhookEventType::Refund);
        assert_eq!(event.status, WebhookStatus::Completed);

        let event = gw
            .parse_webhook(
                r#"{"transaction_type":"charge","transaction_uid":"uid-9","status_code":"104"}"#,
            )
            .unwrap();
        assert_eq!(event.event_type, WebhookEventType::Payment);
        assert_eq!(event.status, WebhookStatus::Failed);
    }
}
