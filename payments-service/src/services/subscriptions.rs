//! Recurring subscription billing.
//!
//! Same transactional shape as the plan state machine but open-ended:
//! cycles accumulate charges and revenue, and only an explicit cancel
//! ends a subscription.

use crate::models::{BillingCycle, RecurringPayment, SubscriptionStatus};
use crate::utils::round2;
use anyhow::anyhow;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

/// The subscription's next state after one billed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub amount: Decimal,
    pub total_charges: i32,
    pub total_revenue: Decimal,
    pub next_billing_date: NaiveDate,
}

/// Compute the next state for one billing cycle. Active subscriptions
/// only; never transitions to a terminal state on its own.
pub fn apply_cycle(
    subscription: &RecurringPayment,
    today: NaiveDate,
) -> Result<CycleOutcome, AppError> {
    let status = SubscriptionStatus::from_string(&subscription.status);
    if status != SubscriptionStatus::Active {
        return Err(AppError::Conflict(anyhow!(
            "Cannot bill a {} subscription",
            subscription.status
        )));
    }

    let cycle = BillingCycle::from_string(&subscription.billing_cycle);
    let next_billing_date = cycle.advance(subscription.next_billing_date.unwrap_or(today));

    Ok(CycleOutcome {
        amount: subscription.amount,
        total_charges: subscription.total_charges + 1,
        total_revenue: subscription.total_revenue + subscription.amount,
        next_billing_date,
    })
}

pub fn synthetic_transaction_id(subscription_id: Uuid, charge_index: i32) -> String {
    format!("SUB-{}-{}", subscription_id, charge_index)
}

/// Manual transitions; cancelled is terminal.
pub fn check_transition(
    current: SubscriptionStatus,
    target: SubscriptionStatus,
) -> Result<(), AppError> {
    let allowed = matches!(
        (current, target),
        (SubscriptionStatus::Active, SubscriptionStatus::Paused)
            | (SubscriptionStatus::Active, SubscriptionStatus::Cancelled)
            | (SubscriptionStatus::Paused, SubscriptionStatus::Active)
            | (SubscriptionStatus::Paused, SubscriptionStatus::Cancelled)
    );

    if allowed {
        Ok(())
    } else {
        Err(AppError::Conflict(anyhow!(
            "Cannot move a {} subscription to {}",
            current.as_str(),
            target.as_str()
        )))
    }
}

/// Monthly recurring revenue over the active subscriptions, rounded to
/// cents after summation.
pub fn monthly_recurring_revenue(subscriptions: &[RecurringPayment]) -> Decimal {
    let total = subscriptions
        .iter()
        .filter(|s| SubscriptionStatus::from_string(&s.status) == SubscriptionStatus::Active)
        .map(|s| BillingCycle::from_string(&s.billing_cycle).monthly_equivalent(s.amount))
        .sum::<Decimal>();
    round2(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn subscription(amount: i64, cycle: &str, status: &str) -> RecurringPayment {
        RecurringPayment {
            subscription_id: Uuid::new_v4(),
            contact_id: None,
            deal_id: None,
            description: None,
            amount: Decimal::from(amount),
            currency: "ILS".to_string(),
            billing_cycle: cycle.to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            next_billing_date: Some(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()),
            total_charges: 3,
            total_revenue: Decimal::from(amount * 3),
            status: status.to_string(),
            cancelled_at: None,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()
    }

    #[test]
    fn cycle_accumulates_and_advances() {
        let outcome = apply_cycle(&subscription(200, "monthly", "active"), today()).unwrap();
        assert_eq!(outcome.total_charges, 4);
        assert_eq!(outcome.total_revenue, Decimal::from(800));
        assert_eq!(
            outcome.next_billing_date,
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
        );
    }

    #[test]
    fn quarterly_and_yearly_advance_by_months() {
        let outcome = apply_cycle(&subscription(300, "quarterly", "active"), today()).unwrap();
        assert_eq!(
            outcome.next_billing_date,
            NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()
        );
        let outcome = apply_cycle(&subscription(1200, "yearly", "active"), today()).unwrap();
        assert_eq!(
            outcome.next_billing_date,
            NaiveDate::from_ymd_opt(2027, 2, 1).unwrap()
        );
    }

    #[test]
    fn paused_and_cancelled_cannot_bill() {
        assert!(apply_cycle(&subscription(200, "monthly", "paused"), today()).is_err());
        assert!(apply_cycle(&subscription(200, "monthly", "cancelled"), today()).is_err());
    }

    #[test]
    fn mrr_normalization_constants() {
        let subs = vec![subscription(120, "yearly", "active")];
        assert_eq!(monthly_recurring_revenue(&subs), Decimal::from(10));

        let subs = vec![subscription(25, "weekly", "active")];
        assert_eq!(monthly_recurring_revenue(&subs), Decimal::from(100));

        let subs = vec![subscription(300, "quarterly", "active")];
        assert_eq!(monthly_recurring_revenue(&subs), Decimal::from(100));

        let subs = vec![subscription(80, "monthly", "active")];
        assert_eq!(monthly_recurring_revenue(&subs), Decimal::from(80));
    }

    #[test]
    fn mrr_skips_inactive_subscriptions() {
        let subs = vec![
            subscription(120, "yearly", "active"),
            subscription(500, "monthly", "cancelled"),
            subscription(500, "monthly", "paused"),
        ];
        assert_eq!(monthly_recurring_revenue(&subs), Decimal::from(10));
    }
}
