//! Database-backed tests for the deal ledger: paid_at semantics on the
//! increment path and the single-winner refund claim.

mod common;

use common::TestApp;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::str::FromStr;

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

#[tokio::test]
async fn deal_paid_at_is_set_only_on_the_transition_to_paid() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let deal = app.seed_deal(d("200")).await;

    app.completed_charge(&deal, d("120")).await;
    let partially = app.db.get_deal(deal.deal_id).await.unwrap().unwrap();
    assert_eq!(partially.status, "partially_paid");
    assert_eq!(partially.paid_amount, d("120"));
    assert!(partially.paid_at.is_none());

    app.completed_charge(&deal, d("80")).await;
    let paid = app.db.get_deal(deal.deal_id).await.unwrap().unwrap();
    assert_eq!(paid.status, "paid");
    assert!(paid.paid_at.is_some());

    // A later payment must not move the original paid_at.
    app.completed_charge(&deal, d("50")).await;
    let still_paid = app.db.get_deal(deal.deal_id).await.unwrap().unwrap();
    assert_eq!(still_paid.status, "paid");
    assert_eq!(still_paid.paid_at, paid.paid_at);
}

#[tokio::test]
async fn a_payment_is_claimed_for_refund_exactly_once() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let deal = app.seed_deal(d("100")).await;
    let payment = app.completed_charge(&deal, d("100")).await;

    let claimed = app.db.claim_refund(payment.payment_id).await.unwrap();
    assert_eq!(claimed.status, "processing");

    // A competing refund loses the claim instead of reaching the
    // processor a second time.
    let competing = app.db.claim_refund(payment.payment_id).await;
    assert!(matches!(competing, Err(AppError::Conflict(_))));

    // A gateway refusal releases the claim for a later retry.
    app.db.release_refund_claim(payment.payment_id).await.unwrap();
    app.db.claim_refund(payment.payment_id).await.unwrap();

    // Settling the claim refunds the payment and pulls the amount back
    // out of the deal.
    assert!(app
        .db
        .refund_payment_record(payment.payment_id, d("100"))
        .await
        .unwrap());
    let refunded = app.db.get_payment(payment.payment_id).await.unwrap().unwrap();
    assert_eq!(refunded.status, "refunded");
    let deal = app.db.get_deal(deal.deal_id).await.unwrap().unwrap();
    assert_eq!(deal.status, "refunded");
    assert_eq!(deal.paid_amount, Decimal::ZERO);

    // Redelivery and late claims are rejected without side effects.
    assert!(!app
        .db
        .refund_payment_record(payment.payment_id, d("100"))
        .await
        .unwrap());
    let late = app.db.claim_refund(payment.payment_id).await;
    assert!(matches!(late, Err(AppError::Conflict(_))));
}
