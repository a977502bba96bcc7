//! Invoice model: a derived financial document keyed 1:1 to a payment.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice type. Tax invoices record a VAT-inclusive amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    Invoice,
    Receipt,
    TaxInvoice,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::Invoice => "invoice",
            InvoiceType::Receipt => "receipt",
            InvoiceType::TaxInvoice => "tax_invoice",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "receipt" => InvoiceType::Receipt,
            "tax_invoice" => InvoiceType::TaxInvoice,
            _ => InvoiceType::Invoice,
        }
    }
}

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    Sent,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "draft" => InvoiceStatus::Draft,
            "sent" => InvoiceStatus::Sent,
            "paid" => InvoiceStatus::Paid,
            _ => InvoiceStatus::Issued,
        }
    }
}

/// One billed row on an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

/// Versioned container for the serialized line_items column, so the
/// stored shape can evolve without rereading old rows blind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItems {
    pub version: u32,
    pub items: Vec<LineItem>,
}

impl LineItems {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(items: Vec<LineItem>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            items,
        }
    }
}

/// A financial document derived from exactly one payment.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub payment_id: Uuid,
    pub invoice_number: String,
    pub invoice_type: String,
    pub subtotal: Decimal,
    pub vat_rate: Decimal,
    pub vat_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub line_items: serde_json::Value,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub status: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl Invoice {
    /// Decode the stored line items, tolerating unversioned legacy rows.
    pub fn decoded_line_items(&self) -> LineItems {
        serde_json::from_value(self.line_items.clone()).unwrap_or(LineItems {
            version: 0,
            items: Vec::new(),
        })
    }
}

/// Input for persisting an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub payment_id: Uuid,
    pub invoice_number: String,
    pub invoice_type: InvoiceType,
    pub subtotal: Decimal,
    pub vat_rate: Decimal,
    pub vat_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub line_items: LineItems,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
}
