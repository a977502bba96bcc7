//! Live-mode adapters against a mock HTTP processor.

use chrono::Utc;
use payments_service::gateways::{CardDetails, Currency, GatewayRegistry, PaymentRequest};
use payments_service::models::GatewaySettings;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn live_settings(gateway: &str, api_url: &str) -> GatewaySettings {
    GatewaySettings {
        gateway_settings_id: Uuid::new_v4(),
        gateway: gateway.to_string(),
        is_active: true,
        is_default: true,
        terminal_id: Some("term-live".to_string()),
        api_key: Some("key-live".to_string()),
        api_secret: Some("secret".to_string()),
        webhook_secret: Some("whsec".to_string()),
        vat_rate: Decimal::from(17),
        invoice_prefix: "INV".to_string(),
        receipt_prefix: "RCP".to_string(),
        settings: Some(json!({ "version": 1, "live": true, "api_url": api_url })),
        created_utc: Utc::now(),
        updated_utc: Utc::now(),
    }
}

fn card_request() -> PaymentRequest {
    PaymentRequest {
        amount: Decimal::new(11700, 2),
        currency: Currency::Ils,
        card: Some(CardDetails {
            number: "4580458045804580".to_string(),
            expiry_month: 3,
            expiry_year: 29,
            cvv: "123".to_string(),
            holder_name: None,
            holder_id: None,
        }),
        saved_card_token: None,
        installments: 1,
        save_card: false,
        description: None,
    }
}

#[tokio::test]
async fn tranzila_live_parses_form_encoded_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tranzila"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("Response=000&index=T4321&ConfirmationCode=0055555"),
        )
        .mount(&server)
        .await;

    let registry = GatewayRegistry::with_builtin();
    let settings = live_settings("tranzila", &format!("{}/tranzila", server.uri()));
    let gateway = registry.build(&settings).unwrap();

    let response = gateway.process_payment(&card_request()).await;
    assert!(response.success);
    assert_eq!(response.transaction_id.as_deref(), Some("T4321"));
    assert_eq!(response.auth_code.as_deref(), Some("0055555"));
}

#[tokio::test]
async fn payplus_live_parses_json_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/Charge"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": { "status": "success", "code": "000", "description": "approved" },
            "data": {
                "transaction_uid": "pp-uid-77",
                "approval_number": "0012399",
                "four_digits": "4580",
                "token": null
            }
        })))
        .mount(&server)
        .await;

    let registry = GatewayRegistry::with_builtin();
    let settings = live_settings("payplus", &server.uri());
    let gateway = registry.build(&settings).unwrap();

    let response = gateway.process_payment(&card_request()).await;
    assert!(response.success);
    assert_eq!(response.transaction_id.as_deref(), Some("pp-uid-77"));
}

#[tokio::test]
async fn transport_failure_becomes_failed_response() {
    // Bind a server to learn a free port, then shut it down so the
    // charge hits a refused connection. A builder-created server is
    // exclusive (not pooled), so dropping it actually frees the port.
    let server = MockServer::builder().start().await;
    let dead_uri = format!("{}/tranzila", server.uri());
    drop(server);

    let registry = GatewayRegistry::with_builtin();
    let settings = live_settings("tranzila", &dead_uri);
    let gateway = registry.build(&settings).unwrap();

    let response = gateway.process_payment(&card_request()).await;
    assert!(!response.success);
    assert_eq!(response.error_code.as_deref(), Some("gateway_error"));
}
