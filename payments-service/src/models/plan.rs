//! Payment plan model: a fixed-count installment schedule against one deal.

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Plan status. Completed and cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Active,
    Paused,
    Cancelled,
    Completed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Active => "active",
            PlanStatus::Paused => "paused",
            PlanStatus::Cancelled => "cancelled",
            PlanStatus::Completed => "completed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "paused" => PlanStatus::Paused,
            "cancelled" => PlanStatus::Cancelled,
            "completed" => PlanStatus::Completed,
            _ => PlanStatus::Active,
        }
    }
}

/// Installment frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentFrequency {
    Weekly,
    Biweekly,
    Monthly,
}

impl PaymentFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentFrequency::Weekly => "weekly",
            PaymentFrequency::Biweekly => "biweekly",
            PaymentFrequency::Monthly => "monthly",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "weekly" => PaymentFrequency::Weekly,
            "biweekly" => PaymentFrequency::Biweekly,
            _ => PaymentFrequency::Monthly,
        }
    }

    /// Advance a due date by one frequency step.
    pub fn advance(&self, from: NaiveDate) -> NaiveDate {
        match self {
            PaymentFrequency::Weekly => from + Days::new(7),
            PaymentFrequency::Biweekly => from + Days::new(14),
            PaymentFrequency::Monthly => from + Months::new(1),
        }
    }
}

/// An installment schedule. Invariant: paid_installments <= number_of_payments,
/// and status is completed exactly when they are equal.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentPlan {
    pub plan_id: Uuid,
    pub deal_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub total_amount: Decimal,
    pub number_of_payments: i32,
    pub payment_frequency: String,
    pub start_date: NaiveDate,
    pub next_payment_date: Option<NaiveDate>,
    pub paid_amount: Decimal,
    pub paid_installments: i32,
    pub status: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for creating a payment plan.
#[derive(Debug, Clone)]
pub struct CreatePlan {
    pub deal_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub total_amount: Decimal,
    pub number_of_payments: i32,
    pub payment_frequency: PaymentFrequency,
    pub start_date: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_steps_by_frequency() {
        let from = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        assert_eq!(
            PaymentFrequency::Weekly.advance(from),
            NaiveDate::from_ymd_opt(2026, 1, 22).unwrap()
        );
        assert_eq!(
            PaymentFrequency::Biweekly.advance(from),
            NaiveDate::from_ymd_opt(2026, 1, 29).unwrap()
        );
        assert_eq!(
            PaymentFrequency::Monthly.advance(from),
            NaiveDate::from_ymd_opt(2026, 2, 15).unwrap()
        );
    }

    #[test]
    fn monthly_advance_clamps_month_end() {
        let from = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        assert_eq!(
            PaymentFrequency::Monthly.advance(from),
            NaiveDate::from_ymd_opt(2026, 2, 28).unwrap()
        );
    }
}
