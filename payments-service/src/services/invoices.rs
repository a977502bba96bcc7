//! Invoice numbering, VAT computation and document rendering.
//!
//! Two VAT paths coexist on purpose. `calculate_vat` adds VAT forward
//! onto a net subtotal; `extract_vat` derives the subtotal backward
//! from a tax-inclusive total, which is how Israeli tax invoices record
//! payments. The two can disagree by a cent on edge amounts and must
//! not be unified without a product decision.

use crate::models::{
    CreateInvoice, Deal, Invoice, InvoiceType, LineItem, LineItems, Payment, PaymentStatus,
};
use crate::services::database::{Database, InvoiceInsertError};
use crate::services::metrics::INVOICES_TOTAL;
use crate::utils::round2;
use anyhow::anyhow;
use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

/// Forward VAT: add tax onto a net subtotal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VatForward {
    pub vat_amount: Decimal,
    pub total_amount: Decimal,
}

pub fn calculate_vat(subtotal: Decimal, vat_rate: Decimal) -> VatForward {
    let vat_amount = round2(subtotal * vat_rate / Decimal::from(100));
    VatForward {
        vat_amount,
        total_amount: subtotal + vat_amount,
    }
}

/// Backward VAT: split a tax-inclusive total into subtotal and VAT.
/// The VAT is the exact remainder, so subtotal + vat == total always.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VatExtraction {
    pub subtotal: Decimal,
    pub vat_amount: Decimal,
}

pub fn extract_vat(total: Decimal, vat_rate: Decimal) -> VatExtraction {
    let divisor = Decimal::ONE + vat_rate / Decimal::from(100);
    let subtotal = round2(total / divisor);
    VatExtraction {
        subtotal,
        vat_amount: round2(total - subtotal),
    }
}

pub fn format_invoice_number(prefix: &str, year: i32, sequence: i64) -> String {
    format!("{}-{}-{:04}", prefix, year, sequence)
}

/// Trailing sequence of a number in the given prefix+year bucket, or
/// None when the number belongs to another bucket.
pub fn parse_invoice_sequence(number: &str, prefix: &str, year: i32) -> Option<i64> {
    let bucket = format!("{}-{}-", prefix, year);
    number.strip_prefix(&bucket)?.parse().ok()
}

/// Seller identity printed on every document.
#[derive(Debug, Clone)]
pub struct BusinessProfile {
    pub name: String,
    pub address: String,
    pub tax_id: String,
    pub email: String,
    pub phone: String,
}

const INSERT_ATTEMPTS: u32 = 3;

/// Derive an invoice from a completed payment.
///
/// At most one invoice per payment, ever; a second call is a conflict.
/// The numbering scan only picks a candidate; the unique constraint on
/// invoice_number is the real guard, retried on collision.
pub async fn create_invoice_from_payment(
    db: &Database,
    payment_id: Uuid,
    invoice_type: InvoiceType,
) -> Result<Invoice, AppError> {
    let payment = db
        .get_payment(payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow!("Payment not found")))?;

    if PaymentStatus::from_string(&payment.status) != PaymentStatus::Completed {
        return Err(AppError::Conflict(anyhow!(
            "Only completed payments can be invoiced"
        )));
    }

    if db.get_invoice_by_payment(payment_id).await?.is_some() {
        return Err(AppError::Conflict(anyhow!(
            "An invoice already exists for this payment"
        )));
    }

    let settings = match &payment.gateway {
        Some(name) => db.get_gateway_settings(name).await?,
        None => db.default_gateway_settings().await?,
    };

    let (vat_rate, prefix) = match &settings {
        Some(s) => (
            s.vat_rate,
            match invoice_type {
                InvoiceType::Receipt => s.receipt_prefix.clone(),
                _ => s.invoice_prefix.clone(),
            },
        ),
        None => (
            Decimal::from(17),
            match invoice_type {
                InvoiceType::Receipt => "RCP".to_string(),
                _ => "INV".to_string(),
            },
        ),
    };

    let deal = match payment.deal_id {
        Some(deal_id) => db.get_deal(deal_id).await?,
        None => None,
    };

    // The recorded payment amount is tax-inclusive; derive backward.
    let extraction = extract_vat(payment.amount, vat_rate);
    let line_items = LineItems::new(vec![line_item_for(&payment, deal.as_ref(), &extraction)]);

    let (customer_name, customer_email, customer_phone) = match &deal {
        Some(d) => (
            d.customer_name.clone(),
            d.customer_email.clone(),
            d.customer_phone.clone(),
        ),
        None => ("Unknown customer".to_string(), None, None),
    };

    let year = Utc::now().year();
    let mut attempt = 0;
    loop {
        let sequence = db.max_invoice_sequence(&prefix, year).await? + 1;
        let input = CreateInvoice {
            payment_id,
            invoice_number: format_invoice_number(&prefix, year, sequence),
            invoice_type,
            subtotal: extraction.subtotal,
            vat_rate,
            vat_amount: extraction.vat_amount,
            total_amount: payment.amount,
            currency: payment.currency.clone(),
            line_items: line_items.clone(),
            customer_name: customer_name.clone(),
            customer_email: customer_email.clone(),
            customer_phone: customer_phone.clone(),
        };

        match db.insert_invoice(&input).await {
            Ok(invoice) => {
                INVOICES_TOTAL
                    .with_label_values(&[invoice_type.as_str()])
                    .inc();
                tracing::info!(
                    invoice_id = %invoice.invoice_id,
                    invoice_number = %invoice.invoice_number,
                    payment_id = %payment_id,
                    "Invoice created"
                );
                return Ok(invoice);
            }
            Err(InvoiceInsertError::DuplicatePayment) => {
                return Err(AppError::Conflict(anyhow!(
                    "An invoice already exists for this payment"
                )));
            }
            Err(InvoiceInsertError::NumberTaken) => {
                attempt += 1;
                if attempt >= INSERT_ATTEMPTS {
                    return Err(AppError::Conflict(anyhow!(
                        "Could not allocate a unique invoice number"
                    )));
                }
                tracing::warn!(
                    prefix = %prefix,
                    attempt = attempt,
                    "Invoice number collision, retrying"
                );
            }
            Err(InvoiceInsertError::Db(err)) => return Err(err),
        }
    }
}

fn line_item_for(payment: &Payment, deal: Option<&Deal>, extraction: &VatExtraction) -> LineItem {
    let description = match deal {
        Some(d) => d.product_name.clone(),
        None => match &payment.gateway {
            Some(gateway) => format!("Payment via {}", gateway),
            None => "Payment".to_string(),
        },
    };
    LineItem {
        description,
        quantity: Decimal::ONE,
        unit_price: extraction.subtotal,
        amount: extraction.subtotal,
    }
}

/// Render the invoice as a printable HTML document: a pure function of
/// the stored invoice and the business profile, same output every time.
pub fn render_invoice_html(invoice: &Invoice, business: &BusinessProfile) -> String {
    let invoice_type = InvoiceType::from_string(&invoice.invoice_type);
    let title = match invoice_type {
        InvoiceType::Invoice => "Invoice",
        InvoiceType::Receipt => "Receipt",
        InvoiceType::TaxInvoice => "Tax Invoice",
    };
    let issued = invoice.created_utc.format("%-d %B %Y");

    let mut rows = String::new();
    for item in &invoice.decoded_line_items().items {
        rows.push_str(&format!(
            "      <tr><td>{}</td><td class=\"num\">{}</td><td class=\"num\">{} {:.2}</td><td class=\"num\">{} {:.2}</td></tr>\n",
            item.description, item.quantity, invoice.currency, item.unit_price, invoice.currency, item.amount
        ));
    }

    let mut contact_parts = Vec::new();
    if let Some(email) = invoice.customer_email.as_deref() {
        contact_parts.push(email);
    }
    if let Some(phone) = invoice.customer_phone.as_deref() {
        contact_parts.push(phone);
    }
    let customer_contact = contact_parts.join(" | ");

    format!(
        r#"<!DOCTYPE html>
<html dir="ltr">
<head>
  <meta charset="utf-8">
  <title>{title} {number}</title>
  <style>
    body {{ font-family: sans-serif; margin: 40px; color: #222; }}
    header {{ display: flex; justify-content: space-between; }}
    table {{ width: 100%; border-collapse: collapse; margin-top: 24px; }}
    th, td {{ border-bottom: 1px solid #ddd; padding: 8px; text-align: left; }}
    .num {{ text-align: right; }}
    .totals {{ margin-top: 16px; width: 40%; margin-left: auto; }}
    .totals td {{ border: none; }}
    .grand {{ font-weight: bold; border-top: 2px solid #222; }}
  </style>
</head>
<body>
  <header>
    <div>
      <h1>{business_name}</h1>
      <p>{business_address}<br>Tax ID: {business_tax_id}<br>{business_email} | {business_phone}</p>
    </div>
    <div>
      <h2>{title} {number}</h2>
      <p>Date: {issued}<br>Status: {status}</p>
    </div>
  </header>
  <section>
    <h3>Billed to</h3>
    <p>{customer_name}<br>{customer_contact}</p>
  </section>
  <table>
    <thead>
      <tr><th>Description</th><th class="num">Qty</th><th class="num">Unit price</th><th class="num">Amount</th></tr>
    </thead>
    <tbody>
{rows}    </tbody>
  </table>
  <table class="totals">
    <tr><td>Subtotal</td><td class="num">{currency} {subtotal:.2}</td></tr>
    <tr><td>VAT ({vat_rate}%)</td><td class="num">{currency} {vat_amount:.2}</td></tr>
    <tr class="grand"><td>Total</td><td class="num">{currency} {total:.2}</td></tr>
  </table>
</body>
</html>
"#,
        title = title,
        number = invoice.invoice_number,
        business_name = business.name,
        business_address = business.address,
        business_tax_id = business.tax_id,
        business_email = business.email,
        business_phone = business.phone,
        issued = issued,
        status = invoice.status,
        customer_name = invoice.customer_name,
        customer_contact = customer_contact,
        rows = rows,
        currency = invoice.currency,
        subtotal = invoice.subtotal,
        vat_rate = invoice.vat_rate,
        vat_amount = invoice.vat_amount,
        total = invoice.total_amount,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn forward_vat_standard_rate() {
        let vat = calculate_vat(d("100"), d("17"));
        assert_eq!(vat.vat_amount, d("17"));
        assert_eq!(vat.total_amount, d("117"));
    }

    #[test]
    fn forward_vat_rounds_half_up() {
        let vat = calculate_vat(d("99.99"), d("17"));
        // 16.9983 rounds to 17.00
        assert_eq!(vat.vat_amount, d("17.00"));
        assert_eq!(vat.total_amount, d("116.99"));
    }

    #[test]
    fn backward_extraction_standard_rate() {
        let split = extract_vat(d("117"), d("17"));
        assert_eq!(split.subtotal, d("100.00"));
        assert_eq!(split.vat_amount, d("17.00"));
    }

    #[test]
    fn backward_extraction_never_loses_a_cent() {
        for total in ["117", "99.99", "0.01", "333.33", "1000", "49.90"] {
            for rate in ["0", "17", "18", "25", "100"] {
                let split = extract_vat(d(total), d(rate));
                assert_eq!(
                    split.subtotal + split.vat_amount,
                    d(total),
                    "total {} rate {}",
                    total,
                    rate
                );
            }
        }
    }

    #[test]
    fn zero_rate_extracts_full_subtotal() {
        let split = extract_vat(d("50"), d("0"));
        assert_eq!(split.subtotal, d("50"));
        assert_eq!(split.vat_amount, d("0"));
    }

    #[test]
    fn rendering_is_deterministic_and_complete() {
        let invoice = Invoice {
            invoice_id: Uuid::nil(),
            payment_id: Uuid::nil(),
            invoice_number: "INV-2026-0042".to_string(),
            invoice_type: "tax_invoice".to_string(),
            subtotal: d("100.00"),
            vat_rate: d("17"),
            vat_amount: d("17.00"),
            total_amount: d("117.00"),
            currency: "ILS".to_string(),
            line_items: serde_json::to_value(LineItems::new(vec![LineItem {
                description: "Pilates course".to_string(),
                quantity: Decimal::ONE,
                unit_price: d("100.00"),
                amount: d("100.00"),
            }]))
            .unwrap(),
            customer_name: "Dana Levi".to_string(),
            customer_email: Some("dana@example.com".to_string()),
            customer_phone: None,
            status: "issued".to_string(),
            sent_at: None,
            created_utc: chrono::DateTime::parse_from_rfc3339("2026-03-15T10:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
        };
        let business = BusinessProfile {
            name: "Studio North".to_string(),
            address: "12 Herzl St, Tel Aviv".to_string(),
            tax_id: "514000000".to_string(),
            email: "office@example.com".to_string(),
            phone: "03-5550000".to_string(),
        };

        let html = render_invoice_html(&invoice, &business);
        assert_eq!(html, render_invoice_html(&invoice, &business));
        for expected in [
            "Tax Invoice INV-2026-0042",
            "Pilates course",
            "Dana Levi",
            "dana@example.com",
            "15 March 2026",
            "ILS 100.00",
            "ILS 17.00",
            "ILS 117.00",
            "Studio North",
            "514000000",
        ] {
            assert!(html.contains(expected), "missing: {}", expected);
        }
    }

    #[test]
    fn numbering_round_trip() {
        let number = format_invoice_number("INV", 2026, 1);
        assert_eq!(number, "INV-2026-0001");
        assert_eq!(parse_invoice_sequence(&number, "INV", 2026), Some(1));
        assert_eq!(parse_invoice_sequence(&number, "RCP", 2026), None);
        assert_eq!(parse_invoice_sequence(&number, "INV", 2025), None);
        assert_eq!(
            parse_invoice_sequence("INV-2026-10234", "INV", 2026),
            Some(10234)
        );
    }
}
