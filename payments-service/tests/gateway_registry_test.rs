//! Registry-driven gateway flows against the simulated processors.

use chrono::Utc;
use payments_service::gateways::{
    CardDetails, Currency, GatewayRegistry, PaymentRequest, RefundRequest,
};
use payments_service::models::GatewaySettings;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

fn settings(gateway: &str, is_active: bool) -> GatewaySettings {
    GatewaySettings {
        gateway_settings_id: Uuid::new_v4(),
        gateway: gateway.to_string(),
        is_active,
        is_default: false,
        terminal_id: Some("term-1".to_string()),
        api_key: Some("key".to_string()),
        api_secret: Some("secret".to_string()),
        webhook_secret: Some("whsec".to_string()),
        vat_rate: Decimal::from(17),
        invoice_prefix: "INV".to_string(),
        receipt_prefix: "RCP".to_string(),
        settings: None,
        created_utc: Utc::now(),
        updated_utc: Utc::now(),
    }
}

fn card_request(number: &str) -> PaymentRequest {
    PaymentRequest {
        amount: Decimal::new(35000, 2),
        currency: Currency::Ils,
        card: Some(CardDetails {
            number: number.to_string(),
            expiry_month: 9,
            expiry_year: 28,
            cvv: "123".to_string(),
            holder_name: Some("Noa Cohen".to_string()),
            holder_id: None,
        }),
        saved_card_token: None,
        installments: 1,
        save_card: false,
        description: Some("Yoga course".to_string()),
    }
}

#[test]
fn registry_knows_builtin_gateways() {
    let registry = GatewayRegistry::with_builtin();
    assert!(registry.contains("tranzila"));
    assert!(registry.contains("payplus"));
    assert!(!registry.contains("stripe"));
}

#[test]
fn inactive_settings_are_a_config_error() {
    let registry = GatewayRegistry::with_builtin();
    let err = registry.build(&settings("tranzila", false)).unwrap_err();
    assert!(matches!(err, AppError::ConfigError(_)));
}

#[test]
fn unregistered_gateway_is_a_config_error() {
    let registry = GatewayRegistry::with_builtin();
    let err = registry.build(&settings("stripe", true)).unwrap_err();
    assert!(matches!(err, AppError::ConfigError(_)));
}

#[tokio::test]
async fn charge_then_refund_through_each_gateway() {
    let registry = GatewayRegistry::with_builtin();

    for name in ["tranzila", "payplus"] {
        let gateway = registry.build(&settings(name, true)).unwrap();

        let charge = gateway.process_payment(&card_request("4580458045804580")).await;
        assert!(charge.success, "{} charge should approve", name);
        let transaction_id = charge.transaction_id.expect("approved charge has an id");

        let refund = gateway
            .refund_payment(&RefundRequest {
                transaction_id,
                amount: None,
                reason: None,
            })
            .await;
        assert!(refund.success, "{} refund should approve", name);
    }
}

#[tokio::test]
async fn saved_token_charges_again_without_card() {
    let registry = GatewayRegistry::with_builtin();
    let gateway = registry.build(&settings("tranzila", true)).unwrap();

    let mut first = card_request("4111111111111111");
    first.save_card = true;
    let response = gateway.process_payment(&first).await;
    assert!(response.success);
    let token = response.saved_card_token.expect("save_card returns a token");

    let repeat = PaymentRequest {
        amount: Decimal::from(100),
        currency: Currency::Ils,
        card: None,
        saved_card_token: Some(token),
        installments: 1,
        save_card: false,
        description: None,
    };
    let response = gateway.process_payment(&repeat).await;
    assert!(response.success);
}

#[tokio::test]
async fn declines_are_responses_not_errors() {
    let registry = GatewayRegistry::with_builtin();
    let gateway = registry.build(&settings("payplus", true)).unwrap();

    let response = gateway.process_payment(&card_request("5500005555555559")).await;
    assert!(!response.success);
    assert!(response.error_code.is_some());
    assert!(response.transaction_id.is_none());
}
