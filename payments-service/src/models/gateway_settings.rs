//! Gateway settings model: one row per configured payment processor.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One configured gateway. Credentials are read at charge time to build
/// a fresh adapter instance; the row itself never holds a live client.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GatewaySettings {
    pub gateway_settings_id: Uuid,
    pub gateway: String,
    pub is_active: bool,
    /// At most one default among active gateways; the upsert unsets the
    /// flag on every other row in the same transaction.
    pub is_default: bool,
    pub terminal_id: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub webhook_secret: Option<String>,
    pub vat_rate: Decimal,
    pub invoice_prefix: String,
    pub receipt_prefix: String,
    pub settings: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl GatewaySettings {
    /// Decode the free-form settings column, falling back to defaults for
    /// missing or legacy rows.
    pub fn tuning(&self) -> GatewayTuning {
        self.settings
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }
}

/// Typed view of the serialized `settings` column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayTuning {
    pub version: u32,
    /// When true the adapter talks to the processor over HTTP; otherwise
    /// the simulated processor is used.
    pub live: bool,
    pub api_url: Option<String>,
}

impl Default for GatewayTuning {
    fn default() -> Self {
        Self {
            version: 1,
            live: false,
            api_url: None,
        }
    }
}

/// Input for upserting a gateway settings row.
#[derive(Debug, Clone, Default)]
pub struct UpsertGatewaySettings {
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
