//! Recurring payment model: open-ended, cycle-based billing.

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription status. Only an explicit cancel ends a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "paused" => SubscriptionStatus::Paused,
            "cancelled" => SubscriptionStatus::Cancelled,
            _ => SubscriptionStatus::Active,
        }
    }
}

/// Billing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Weekly => "weekly",
            BillingCycle::Monthly => "monthly",
            BillingCycle::Quarterly => "quarterly",
            BillingCycle::Yearly => "yearly",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "weekly" => BillingCycle::Weekly,
            "quarterly" => BillingCycle::Quarterly,
            "yearly" => BillingCycle::Yearly,
            _ => BillingCycle::Monthly,
        }
    }

    /// Advance a billing date by one cycle.
    pub fn advance(&self, from: NaiveDate) -> NaiveDate {
        match self {
            BillingCycle::Weekly => from + Days::new(7),
            BillingCycle::Monthly => from + Months::new(1),
            BillingCycle::Quarterly => from + Months::new(3),
            BillingCycle::Yearly => from + Months::new(12),
        }
    }

    /// Monthly-equivalent value of an amount billed on this cycle.
    ///
    /// The constants (weekly x4, quarterly /3, yearly /12) are fixed for
    /// reporting parity; do not change them without migrating reports.
    pub fn monthly_equivalent(&self, amount: Decimal) -> Decimal {
        match self {
            BillingCycle::Weekly => amount * Decimal::from(4),
            BillingCycle::Monthly => amount,
            BillingCycle::Quarterly => amount / Decimal::from(3),
            BillingCycle::Yearly => amount / Decimal::from(12),
        }
    }
}

/// An open-ended billing arrangement against one contact.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RecurringPayment {
    pub subscription_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub deal_id: Option<Uuid>,
    pub description: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub billing_cycle: String,
    pub start_date: NaiveDate,
    pub next_billing_date: Option<NaiveDate>,
    pub total_charges: i32,
    pub total_revenue: Decimal,
    pub status: String,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for creating a subscription.
#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub contact_id: Option<Uuid>,
    pub deal_id: Option<Uuid>,
    pub description: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub start_date: NaiveDate,
}
