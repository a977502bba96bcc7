//! Deal model: a commercial agreement with a running paid amount.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Deal status, derived from the comparison of paid_amount to final_amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    Pending,
    PartiallyPaid,
    Paid,
    Refunded,
    Cancelled,
}

impl DealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealStatus::Pending => "pending",
            DealStatus::PartiallyPaid => "partially_paid",
            DealStatus::Paid => "paid",
            DealStatus::Refunded => "refunded",
            DealStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "partially_paid" => DealStatus::PartiallyPaid,
            "paid" => DealStatus::Paid,
            "refunded" => DealStatus::Refunded,
            "cancelled" => DealStatus::Cancelled,
            _ => DealStatus::Pending,
        }
    }

    /// Status after a payment or refund moved the paid amount.
    ///
    /// Only the payment and refund paths may call this; no UI path
    /// mutates paid_amount directly.
    pub fn derive(paid_amount: Decimal, final_amount: Decimal) -> Self {
        if paid_amount >= final_amount {
            DealStatus::Paid
        } else if paid_amount > Decimal::ZERO {
            DealStatus::PartiallyPaid
        } else {
            DealStatus::Pending
        }
    }
}

/// A commercial agreement for one product at a negotiated amount.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Deal {
    pub deal_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub product_name: String,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub currency: String,
    pub final_amount: Decimal,
    pub paid_amount: Decimal,
    pub status: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for creating a deal.
#[derive(Debug, Clone)]
pub struct CreateDeal {
    pub contact_id: Option<Uuid>,
    pub product_name: String,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub currency: String,
    pub final_amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_tracks_paid_amount() {
        let final_amount = Decimal::from(300);
        assert_eq!(
            DealStatus::derive(Decimal::ZERO, final_amount),
            DealStatus::Pending
        );
        assert_eq!(
            DealStatus::derive(Decimal::from(100), final_amount),
            DealStatus::PartiallyPaid
        );
        assert_eq!(
            DealStatus::derive(Decimal::from(300), final_amount),
            DealStatus::Paid
        );
    }
}
