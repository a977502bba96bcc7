//! Tranzila gateway adapter.
//!
//! Tranzila speaks form-encoded key/value pairs in both directions and
//! identifies currencies by numeric code. Approval is `Response=000`;
//! everything else is a decline code from the issuer.

use super::transport::{
    test_card_approves, GatewayTransport, HttpTransport, SimulatedTransport, TransportBody,
    TransportRequest, TransportResponse, DEFAULT_TIMEOUT,
};
use super::{
    validate_card, CardBrand, CardDetails, Currency, GatewayConfig, PaymentGateway,
    PaymentRequest, PaymentResponse, RefundRequest, RefundResponse, WebhookEvent,
    WebhookEventType, WebhookStatus,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub const GATEWAY_NAME: &str = "tranzila";

const DEFAULT_API_URL: &str = "https://secure5.tranzila.com/cgi-bin/tranzila71u.cgi";

/// Registry factory: a fresh adapter per call, simulated unless the
/// stored settings switch it to live mode.
pub fn factory(config: GatewayConfig) -> Arc<dyn PaymentGateway> {
    let transport: Arc<dyn GatewayTransport> = if config.tuning.live {
        Arc::new(HttpTransport::new(DEFAULT_TIMEOUT))
    } else {
        Arc::new(simulator())
    };
    Arc::new(TranzilaGateway::new(config, transport))
}

pub struct TranzilaGateway {
    config: GatewayConfig,
    transport: Arc<dyn GatewayTransport>,
}

impl TranzilaGateway {
    pub fn new(config: GatewayConfig, transport: Arc<dyn GatewayTransport>) -> Self {
        Self { config, transport }
    }

    fn api_url(&self) -> String {
        self.config
            .tuning
            .api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// Tranzila's numeric currency codes.
    fn currency_code(currency: Currency) -> &'static str {
        match currency {
            Currency::Ils => "1",
            Currency::Usd => "2",
            Currency::Eur => "978",
            Currency::Gbp => "826",
        }
    }

    fn base_fields(&self) -> Vec<(String, String)> {
        vec![("supplier".to_string(), self.config.terminal_id.clone())]
    }

    async fn send(&self, fields: Vec<(String, String)>) -> Result<HashMap<String, String>, String> {
        let request = TransportRequest {
            url: self.api_url(),
            body: TransportBody::Form(fields),
        };

        let response = self.transport.send(request).await.map_err(|e| {
            tracing::error!(gateway = GATEWAY_NAME, error = %e, "Transport failure");
            e.to_string()
        })?;

        serde_urlencoded::from_str::<HashMap<String, String>>(&response.body).map_err(|e| {
            tracing::error!(gateway = GATEWAY_NAME, error = %e, "Malformed processor response");
            format!("malformed processor response: {}", e)
        })
    }
}

fn decline_message(code: &str) -> &'static str {
    match code {
        "001" => "Card is blocked",
        "002" => "Card is stolen",
        "003" => "Contact the credit company",
        "004" => "Card declined by issuer",
        "006" => "CVV verification failed",
        "036" => "Card is expired",
        _ => "Transaction declined",
    }
}

#[async_trait]
impl PaymentGateway for TranzilaGateway {
    fn name(&self) -> &'static str {
        GATEWAY_NAME
    }

    async fn process_payment(&self, request: &PaymentRequest) -> PaymentResponse {
        let mut fields = self.base_fields();
        fields.push((
            "sum".to_string(),
            format!("{:.2}", request.amount),
        ));
        fields.push((
            "currency".to_string(),
            Self::currency_code(request.currency).to_string(),
        ));

        let (last4, brand) = if let Some(token) = &request.saved_card_token {
            // Token charge: raw-card validation does not apply.
            fields.push(("TranzilaTK".to_string(), token.clone()));
            (None, None)
        } else {
            let card = match validate_card(request) {
                Ok(card) => card,
                Err(response) => return response,
            };
            fields.push(("ccno".to_string(), card.digits()));
            fields.push((
                "expdate".to_string(),
                format!("{:02}{:02}", card.expiry_month, card.expiry_year % 100),
            ));
            fields.push(("mycvv".to_string(), card.cvv.clone()));
            if let Some(holder_id) = &card.holder_id {
                fields.push(("myid".to_string(), holder_id.clone()));
            }
            (
                Some(card.last4()),
                Some(CardBrand::detect(&card.number)),
            )
        };

        if request.installments > 1 {
            let count = Decimal::from(request.installments);
            let per = crate::utils::round2(request.amount / count);
            let first = request.amount - per * (count - Decimal::ONE);
            fields.push(("cred_type".to_string(), "8".to_string()));
            fields.push(("fpay".to_string(), format!("{:.2}", first)));
            fields.push(("spay".to_string(), format!("{:.2}", per)));
            fields.push(("npay".to_string(), (request.installments - 1).to_string()));
        } else {
            fields.push(("cred_type".to_string(), "1".to_string()));
        }

        let reply = match self.send(fields).await {
            Ok(reply) => reply,
            Err(message) => return PaymentResponse::transport_error(message),
        };

        let code = reply.get("Response").map(String::as_str).unwrap_or("");
        if code == "000" {
            let transaction_id = reply
                .get("index")
                .cloned()
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
            let token = if request.save_card {
                reply.get("TranzilaTK").cloned()
            } else {
                None
            };
            tracing::info!(
                gateway = GATEWAY_NAME,
                transaction_id = %transaction_id,
                "Charge approved"
            );
            PaymentResponse::approved(
                transaction_id,
                reply.get("ConfirmationCode").cloned(),
                last4,
                brand,
                token,
            )
        } else {
            tracing::info!(gateway = GATEWAY_NAME, code = %code, "Charge declined");
            PaymentResponse::declined(format!("tranzila_{}", code), decline_message(code))
        }
    }

    async fn refund_payment(&self, request: &RefundRequest) -> RefundResponse {
        let mut fields = self.base_fields();
        fields.push(("tranmode".to_string(), "C".to_string()));
        fields.push(("index".to_string(), request.transaction_id.clone()));
        // Amount omitted means the processor refunds the full original sum.
        if let Some(amount) = request.amount {
            fields.push(("sum".to_string(), format!("{:.2}", amount)));
        }

        let reply = match self.send(fields).await {
            Ok(reply) => reply,
            Err(message) => return RefundResponse::failed("refund_gateway_error", message),
        };

        let code = reply.get("Response").map(String::as_str).unwrap_or("");
        if code == "000" {
            let refund_id = reply
                .get("index")
                .cloned()
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
            RefundResponse::approved(refund_id)
        } else {
            RefundResponse::failed(format!("refund_tranzila_{}", code), decline_message(code))
        }
    }

    fn verify_webhook(&self, payload: &str, signature: &str) -> bool {
        self.config.verify_signature(payload, signature)
    }

    fn parse_webhook(&self, payload: &str) -> Result<WebhookEvent, AppError> {
        let fields: HashMap<String, String> = serde_urlencoded::from_str(payload)
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid webhook payload: {}", e)))?;

        let transaction_id = fields
            .get("index")
            .cloned()
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Webhook missing index")))?;

        let event_type = match fields.get("tranmode").map(String::as_str) {
            Some("C") => WebhookEventType::Refund,
            _ => WebhookEventType::Payment,
        };

        // Vendor status codes are canonicalized here and nowhere else.
        let status = match fields.get("Response").map(String::as_str) {
            Some("000") => WebhookStatus::Completed,
            _ => WebhookStatus::Failed,
        };

        Ok(WebhookEvent {
            event_type,
            transaction_id,
            status,
            data: serde_json::to_value(&fields).unwrap_or_default(),
        })
    }
}

/// Simulated Tranzila processor: test-card prefixes approve, any other
/// valid-length number declines with issuer code 004. Token charges and
/// refunds always approve.
pub fn simulator() -> SimulatedTransport {
    SimulatedTransport::new(|request: &TransportRequest| {
        let body = if request.form_field("tranmode") == Some("C") {
            format!("Response=000&index=R{}", Uuid::new_v4().simple())
        } else if request.form_field("TranzilaTK").is_some() {
            format!(
                "Response=000&index=T{}&ConfirmationCode=0012345",
                Uuid::new_v4().simple()
            )
        } else {
            match request.form_field("ccno") {
                Some(number) if test_card_approves(number) => format!(
                    "Response=000&index=T{}&ConfirmationCode=0012345&TranzilaTK=tk_{}",
                    Uuid::new_v4().simple(),
                    Uuid::new_v4().simple()
                ),
                _ => "Response=004".to_string(),
            }
        };

        TransportResponse { status: 200, body }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GatewayTuning;
    use secrecy::Secret;

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            terminal_id: "demo123".to_string(),
            api_key: "key".to_string(),
            api_secret: Secret::new("secret".to_string()),
            webhook_secret: Secret::new("whsec".to_string()),
            tuning: GatewayTuning::default(),
        }
    }

    fn gateway() -> TranzilaGateway {
        TranzilaGateway::new(test_config(), Arc::new(simulator()))
    }

    fn card_request(number: &str) -> PaymentRequest {
        PaymentRequest {
            amount: Decimal::from(250),
            currency: Currency::Ils,
            card: Some(CardDetails {
                number: number.to_string(),
                expiry_month: 6,
                expiry_year: 28,
                cvv: "123".to_string(),
                holder_name: Some("Dana Levi".to_string()),
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
        let response = gateway().process_payment(&card_request("4580458045804580")).await;
        assert!(response.success);
        assert!(response.transaction_id.is_some());
        assert_eq!(response.last4_digits.as_deref(), Some("4580"));
        assert_eq!(response.card_brand, Some(CardBrand::Visa));
    }

    #[tokio::test]
    async fn other_card_declines() {
        let response = gateway().process_payment(&card_request("5500000000000004")).await;
        assert!(!response.success);
        assert_eq!(response.error_code.as_deref(), Some("tranzila_004"));
    }

    #[tokio::test]
    async fn short_card_rejected_before_transport() {
        let response = gateway().process_payment(&card_request("4580")).await;
        assert!(!response.success);
        assert_eq!(response.error_code.as_deref(), Some("invalid_card_number"));
    }

    #[tokio::test]
    async fn token_charge_bypasses_card_validation() {
        let mut request = card_request("ignored");
        request.card = None;
        request.saved_card_token = Some("tk_abc".to_string());
        let response = gateway().process_payment(&request).await;
        assert!(response.success);
    }

    #[tokio::test]
    async fn save_card_returns_token() {
        let mut request = card_request("4111111111111111");
        request.save_card = true;
        let response = gateway().process_payment(&request).await;
        assert!(response.success);
        assert!(response.saved_card_token.is_some());
    }

    #[tokio::test]
    async fn refund_approves() {
        let response = gateway()
            .refund_payment(&RefundRequest {
                transaction_id: "T123".to_string(),
                amount: None,
                reason: None,
            })
            .await;
        assert!(response.success);
        assert!(response.refund_id.is_some());
    }

    #[test]
    fn webhook_signature_round_trip() {
        let gw = gateway();
        let payload = "tranmode=A&index=T9&Response=000";
        let signature = super::super::hmac_sha256_hex(payload, "whsec").unwrap();
        assert!(gw.verify_webhook(payload, &signature));
        assert!(!gw.verify_webhook(payload, "bogus"));
    }

    #[test]
    fn webhook_parse_canonicalizes_status() {
        let gw = gateway();
        let event = gw.parse_webhook("tranmode=A&index=T9&Response=000").unwrap();
        assert_eq!(event.event_type, WebhookEventType::Payment);
        assert_eq!(event.status, WebhookStatus::Completed);
        assert_eq!(event.transaction_id, "T9");

        let event = gw.parse_webhook("tranmode=C&index=T9&Response=004").unwrap();
        assert_eq!(event.event_type, WebhookEventType::Refund);
        assert_eq!(event.status, WebhookStatus::Failed);
    }
}
