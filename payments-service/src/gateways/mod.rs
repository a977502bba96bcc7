//! Payment gateway abstraction.
//!
//! Every supported processor implements [`PaymentGateway`]; the
//! [`GatewayRegistry`] maps gateway names to factories and builds a
//! fresh, fully configured adapter per call so concurrent charges with
//! different credentials never share state.

pub mod card;
pub mod payplus;
pub mod transport;
pub mod tranzila;

pub use card::CardBrand;
pub use transport::{GatewayTransport, HttpTransport, SimulatedTransport};

use crate::models::{GatewaySettings, GatewayTuning};
use anyhow::anyhow;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;

/// Currencies the back-office charges in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Ils,
    Usd,
    Eur,
    Gbp,
}

impl Currency {
    pub fn iso_code(&self) -> &'static str {
        match self {
            Currency::Ils => "ILS",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        }
    }

    /// Parse an ISO code. Unknown codes are rejected; a typo must not
    /// silently bill in shekels.
    pub fn from_string(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ILS" => Some(Currency::Ils),
            "USD" => Some(Currency::Usd),
            "EUR" => Some(Currency::Eur),
            "GBP" => Some(Currency::Gbp),
            _ => None,
        }
    }
}

/// Raw card fields supplied on a first-time charge.
#[derive(Debug, Clone)]
pub struct CardDetails {
    pub number: String,
    pub expiry_month: u32,
    pub expiry_year: u32,
    pub cvv: String,
    pub holder_name: Option<String>,
    pub holder_id: Option<String>,
}

impl CardDetails {
    pub fn digits(&self) -> String {
        self.number
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect()
    }

    pub fn last4(&self) -> String {
        let digits = self.digits();
        let start = digits.len().saturating_sub(4);
        digits[start..].to_string()
    }
}

/// Common charge request every adapter consumes.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub amount: Decimal,
    pub currency: Currency,
    /// Present on first-time charges; absent on token charges.
    pub card: Option<CardDetails>,
    /// Present on repeat charges; bypasses raw-card validation.
    pub saved_card_token: Option<String>,
    pub installments: u32,
    pub save_card: bool,
    pub description: Option<String>,
}

/// Normalized charge outcome. Declines and transport failures are both
/// values here; adapters never propagate them as errors.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentResponse {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub auth_code: Option<String>,
    pub last4_digits: Option<String>,
    pub card_brand: Option<CardBrand>,
    pub saved_card_token: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl PaymentResponse {
    pub fn approved(
        transaction_id: String,
        auth_code: Option<String>,
        last4_digits: Option<String>,
        card_brand: Option<CardBrand>,
        saved_card_token: Option<String>,
    ) -> Self {
        Self {
            success: true,
            transaction_id: Some(transaction_id),
            auth_code,
            last4_digits,
            card_brand,
            saved_card_token,
            error_code: None,
            error_message: None,
        }
    }

    pub fn declined(error_code: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            transaction_id: None,
            auth_code: None,
            last4_digits: None,
            card_brand: None,
            saved_card_token: None,
            error_code: Some(error_code.into()),
            error_message: Some(error_message.into()),
        }
    }

    /// Transport-level failure converted to a generic decline.
    pub fn transport_error(error_message: impl Into<String>) -> Self {
        Self::declined("gateway_error", error_message)
    }
}

/// Refund request. Omitting `amount` means a full refund of the
/// original transaction.
#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub transaction_id: String,
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
}

/// Refund outcome. Error codes live in a `refund_` namespace so a
/// failed refund is never mistaken for a failed charge.
#[derive(Debug, Clone, Serialize)]
pub struct RefundResponse {
    pub success: bool,
    pub refund_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl RefundResponse {
    pub fn approved(refund_id: String) -> Self {
        Self {
            success: true,
            refund_id: Some(refund_id),
            error_code: None,
            error_message: None,
        }
    }

    pub fn failed(error_code: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            refund_id: None,
            error_code: Some(error_code.into()),
            error_message: Some(error_message.into()),
        }
    }
}

/// Webhook payload normalized at the adapter boundary; the core never
/// sees vendor status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    Payment,
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub event_type: WebhookEventType,
    pub transaction_id: String,
    pub status: WebhookStatus,
    pub data: serde_json::Value,
}

/// Credentials and tuning for one adapter instance, read from the
/// persisted settings row at charge time.
#[derive(Clone)]
pub struct GatewayConfig {
    pub terminal_id: String,
    pub api_key: String,
    pub api_secret: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub tuning: GatewayTuning,
}

impl GatewayConfig {
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            terminal_id: settings.terminal_id.clone().unwrap_or_default(),
            api_key: settings.api_key.clone().unwrap_or_default(),
            api_secret: Secret::new(settings.api_secret.clone().unwrap_or_default()),
            webhook_secret: Secret::new(settings.webhook_secret.clone().unwrap_or_default()),
            tuning: settings.tuning(),
        }
    }

    pub(crate) fn verify_signature(&self, payload: &str, signature: &str) -> bool {
        match hmac_sha256_hex(payload, self.webhook_secret.expose_secret()) {
            Ok(expected) => expected == signature,
            Err(_) => false,
        }
    }
}

/// HMAC-SHA256 hex digest used for webhook signature checks.
pub(crate) fn hmac_sha256_hex(payload: &str, secret: &str) -> anyhow::Result<String> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| anyhow!("Invalid key length"))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Card presence/length check shared by every adapter, performed before
/// any transport call. Token charges skip this entirely.
pub(crate) fn validate_card(request: &PaymentRequest) -> Result<&CardDetails, PaymentResponse> {
    let card = match &request.card {
        Some(card) => card,
        None => {
            return Err(PaymentResponse::declined(
                "missing_card",
                "Card details or a saved card token are required",
            ))
        }
    };

    let digits = card.digits();
    if digits.len() < 12 || digits.len() > 19 {
        return Err(PaymentResponse::declined(
            "invalid_card_number",
            "Card number length is invalid",
        ));
    }

    Ok(card)
}

/// Contract every gateway adapter fulfills. Construction from a
/// [`GatewayConfig`] is idempotent and side-effect-free.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Charge a card or a saved token. Never returns an error for a
    /// business decline; transport failures are converted to a generic
    /// failed response.
    async fn process_payment(&self, request: &PaymentRequest) -> PaymentResponse;

    /// Refund a prior transaction, fully when no amount is given.
    async fn refund_payment(&self, request: &RefundRequest) -> RefundResponse;

    /// Must pass before any webhook payload is trusted.
    fn verify_webhook(&self, payload: &str, signature: &str) -> bool;

    /// Normalize a vendor payload into the canonical event shape.
    fn parse_webhook(&self, payload: &str) -> Result<WebhookEvent, AppError>;
}

impl std::fmt::Debug for dyn PaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentGateway")
            .field("name", &self.name())
            .finish()
    }
}

pub type GatewayFactory = fn(GatewayConfig) -> Arc<dyn PaymentGateway>;

/// Name-to-factory map, built explicitly once at startup.
pub struct GatewayRegistry {
    factories: HashMap<String, GatewayFactory>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every built-in adapter registered.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(tranzila::GATEWAY_NAME, tranzila::factory);
        registry.register(payplus::GATEWAY_NAME, payplus::factory);
        registry
    }

    pub fn register(&mut self, name: &str, factory: GatewayFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build a fresh adapter from a settings row. Inactive rows and
    /// unregistered names are configuration errors, not declines.
    pub fn build(&self, settings: &GatewaySettings) -> Result<Arc<dyn PaymentGateway>, AppError> {
        if !settings.is_active {
            return Err(AppError::ConfigError(anyhow!(
                "Gateway '{}' is not active",
                settings.gateway
            )));
        }

        let factory = self.factories.get(&settings.gateway).ok_or_else(|| {
            AppError::ConfigError(anyhow!("Gateway '{}' is not registered", settings.gateway))
        })?;

        Ok(factory(GatewayConfig::from_settings(settings)))
    }
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_codes_parse_case_insensitively() {
        assert_eq!(Currency::from_string("ils"), Some(Currency::Ils));
        assert_eq!(Currency::from_string("USD"), Some(Currency::Usd));
        assert_eq!(Currency::from_string("eur"), Some(Currency::Eur));
        assert_eq!(Currency::from_string("GBP"), Some(Currency::Gbp));
    }

    #[test]
    fn unknown_currency_codes_are_rejected() {
        assert_eq!(Currency::from_string("UDS"), None);
        assert_eq!(Currency::from_string(""), None);
        assert_eq!(Currency::from_string("NIS"), None);
    }
}
