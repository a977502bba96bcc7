//! Database-backed tests for invoice creation: the one-invoice-per-
//! payment guard and the unique-constraint dispatch behind the
//! numbering retry.

mod common;

use common::TestApp;
use payments_service::models::{CreateInvoice, InvoiceType, LineItem, LineItems};
use payments_service::services::database::InvoiceInsertError;
use payments_service::services::invoices::{self, format_invoice_number};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::str::FromStr;

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

#[tokio::test]
async fn invoicing_a_payment_twice_is_a_conflict() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let deal = app.seed_deal(d("117")).await;
    let payment = app.completed_charge(&deal, d("117")).await;

    let invoice =
        invoices::create_invoice_from_payment(&app.db, payment.payment_id, InvoiceType::TaxInvoice)
            .await
            .expect("Failed to create invoice");
    assert!(invoice.invoice_number.ends_with("-0001"));
    assert_eq!(invoice.subtotal + invoice.vat_amount, invoice.total_amount);

    let second =
        invoices::create_invoice_from_payment(&app.db, payment.payment_id, InvoiceType::TaxInvoice)
            .await;
    assert!(matches!(second, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn invoice_numbers_allocate_sequentially_per_bucket() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let deal = app.seed_deal(d("300")).await;
    let first = app.completed_charge(&deal, d("117")).await;
    let second = app.completed_charge(&deal, d("117")).await;

    let one =
        invoices::create_invoice_from_payment(&app.db, first.payment_id, InvoiceType::TaxInvoice)
            .await
            .expect("Failed to create first invoice");
    let two =
        invoices::create_invoice_from_payment(&app.db, second.payment_id, InvoiceType::TaxInvoice)
            .await
            .expect("Failed to create second invoice");

    assert!(one.invoice_number.ends_with("-0001"));
    assert!(two.invoice_number.ends_with("-0002"));
}

/// The numbering retry in create_invoice_from_payment relies on the
/// insert distinguishing a taken number from an already-invoiced
/// payment. Drive the insert directly to pin both dispatch arms.
#[tokio::test]
async fn insert_dispatches_number_and_payment_collisions_separately() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let deal = app.seed_deal(d("300")).await;
    let first = app.completed_charge(&deal, d("117")).await;
    let second = app.completed_charge(&deal, d("117")).await;

    let invoice =
        invoices::create_invoice_from_payment(&app.db, first.payment_id, InvoiceType::TaxInvoice)
            .await
            .expect("Failed to create invoice");

    let template = CreateInvoice {
        payment_id: second.payment_id,
        invoice_number: invoice.invoice_number.clone(),
        invoice_type: InvoiceType::TaxInvoice,
        subtotal: d("100.00"),
        vat_rate: d("17"),
        vat_amount: d("17.00"),
        total_amount: d("117.00"),
        currency: "ILS".to_string(),
        line_items: LineItems::new(vec![LineItem {
            description: "Pilates course".to_string(),
            quantity: Decimal::ONE,
            unit_price: d("100.00"),
            amount: d("100.00"),
        }]),
        customer_name: deal.customer_name.clone(),
        customer_email: deal.customer_email.clone(),
        customer_phone: deal.customer_phone.clone(),
    };

    // Same number, different payment: the arm the retry loop acts on.
    let number_clash = app.db.insert_invoice(&template).await;
    assert!(matches!(number_clash, Err(InvoiceInsertError::NumberTaken)));

    // Fresh number, already-invoiced payment: a business conflict.
    let payment_clash = app
        .db
        .insert_invoice(&CreateInvoice {
            payment_id: first.payment_id,
            invoice_number: format_invoice_number("INV", 2099, 9999),
            ..template
        })
        .await;
    assert!(matches!(
        payment_clash,
        Err(InvoiceInsertError::DuplicatePayment)
    ));
}
