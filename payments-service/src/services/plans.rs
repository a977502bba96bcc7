//! Installment plan state machine.
//!
//! The transition math lives here as pure functions; the database layer
//! applies an [`InstallmentOutcome`] together with the payment insert
//! and the deal update inside one transaction.

use crate::models::{PaymentFrequency, PaymentPlan, PlanStatus};
use crate::utils::round2;
use anyhow::anyhow;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

/// The new plan state after one recorded installment.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallmentOutcome {
    /// Amount actually charged for this installment.
    pub amount: Decimal,
    pub paid_amount: Decimal,
    pub paid_installments: i32,
    pub completed: bool,
    /// None exactly when the plan completed.
    pub next_payment_date: Option<NaiveDate>,
}

/// Compute the plan's next state for one installment.
///
/// Rejects non-active plans. The installment amount defaults to an even
/// split of the total; callers may override it for irregular payments.
pub fn apply_installment(
    plan: &PaymentPlan,
    amount_override: Option<Decimal>,
    today: NaiveDate,
) -> Result<InstallmentOutcome, AppError> {
    let status = PlanStatus::from_string(&plan.status);
    if status != PlanStatus::Active {
        return Err(AppError::Conflict(anyhow!(
            "Cannot record an installment on a {} plan",
            plan.status
        )));
    }

    let amount = amount_override
        .unwrap_or_else(|| round2(plan.total_amount / Decimal::from(plan.number_of_payments)));

    let paid_installments = plan.paid_installments + 1;
    let completed = paid_installments >= plan.number_of_payments;

    let next_payment_date = if completed {
        None
    } else {
        let frequency = PaymentFrequency::from_string(&plan.payment_frequency);
        Some(frequency.advance(plan.next_payment_date.unwrap_or(today)))
    };

    Ok(InstallmentOutcome {
        amount,
        paid_amount: plan.paid_amount + amount,
        paid_installments,
        completed,
        next_payment_date,
    })
}

/// Synthetic transaction id for installments the gateway did not settle.
pub fn synthetic_transaction_id(plan_id: Uuid, installment_index: i32) -> String {
    format!("PLAN-{}-{}", plan_id, installment_index)
}

/// Check a manual transition. Completed and cancelled plans are
/// terminal; pause only from active, resume only from paused.
pub fn check_transition(current: PlanStatus, target: PlanStatus) -> Result<(), AppError> {
    let allowed = matches!(
        (current, target),
        (PlanStatus::Active, PlanStatus::Paused)
            | (PlanStatus::Active, PlanStatus::Cancelled)
            | (PlanStatus::Paused, PlanStatus::Active)
            | (PlanStatus::Paused, PlanStatus::Cancelled)
    );

    if allowed {
        Ok(())
    } else {
        Err(AppError::Conflict(anyhow!(
            "Cannot move a {} plan to {}",
            current.as_str(),
            target.as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn plan(paid: i32, total: i32, status: PlanStatus) -> PaymentPlan {
        let per = Decimal::from(100);
        PaymentPlan {
            plan_id: Uuid::new_v4(),
            deal_id: Uuid::new_v4(),
            contact_id: None,
            total_amount: per * Decimal::from(total),
            number_of_payments: total,
            payment_frequency: "monthly".to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            next_payment_date: Some(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()),
            paid_amount: per * Decimal::from(paid),
            paid_installments: paid,
            status: status.as_str().to_string(),
            completed_at: None,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()
    }

    #[test]
    fn even_split_is_default_amount() {
        let outcome = apply_installment(&plan(0, 3, PlanStatus::Active), None, today()).unwrap();
        assert_eq!(outcome.amount, Decimal::from(100));
        assert_eq!(outcome.paid_installments, 1);
        assert!(!outcome.completed);
        assert_eq!(
            outcome.next_payment_date,
            Some(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap())
        );
    }

    #[test]
    fn override_amount_wins() {
        let outcome =
            apply_installment(&plan(0, 3, PlanStatus::Active), Some(Decimal::from(40)), today())
                .unwrap();
        assert_eq!(outcome.amount, Decimal::from(40));
        assert_eq!(outcome.paid_amount, Decimal::from(40));
    }

    #[test]
    fn completes_exactly_on_last_installment() {
        let outcome = apply_installment(&plan(2, 3, PlanStatus::Active), None, today()).unwrap();
        assert!(outcome.completed);
        assert_eq!(outcome.paid_installments, 3);
        assert_eq!(outcome.next_payment_date, None);
    }

    #[test]
    fn rejects_paused_and_terminal_plans() {
        for status in [PlanStatus::Paused, PlanStatus::Cancelled, PlanStatus::Completed] {
            let err = apply_installment(&plan(1, 3, status), None, today()).unwrap_err();
            assert!(matches!(err, AppError::Conflict(_)));
        }
    }

    #[test]
    fn uneven_total_rounds_installment() {
        let mut p = plan(0, 3, PlanStatus::Active);
        p.total_amount = Decimal::from(100);
        let outcome = apply_installment(&p, None, today()).unwrap();
        assert_eq!(outcome.amount, Decimal::new(3333, 2));
    }

    #[test]
    fn manual_transitions_are_guarded() {
        assert!(check_transition(PlanStatus::Active, PlanStatus::Paused).is_ok());
        assert!(check_transition(PlanStatus::Paused, PlanStatus::Active).is_ok());
        assert!(check_transition(PlanStatus::Paused, PlanStatus::Cancelled).is_ok());
        assert!(check_transition(PlanStatus::Completed, PlanStatus::Active).is_err());
        assert!(check_transition(PlanStatus::Cancelled, PlanStatus::Active).is_err());
    }

    #[test]
    fn synthetic_id_embeds_plan_and_index() {
        let id = Uuid::new_v4();
        assert_eq!(
            synthetic_transaction_id(id, 2),
            format!("PLAN-{}-2", id)
        );
    }
}
