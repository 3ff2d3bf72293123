use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use payment_intake::config::Config;
use payment_intake::db::InMemoryLedger;
use payment_intake::gateways::{gateway_b, signature, GatewayRegistry};
use payment_intake::{create_app, AppState};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const ADMIN_TOKEN: &str = "admin-test-token";
const GATEWAY_B_SECRET: &str = "secret_test";

fn app_with(extra: &[(&str, String)]) -> Router {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("APP_PROFILE".to_string(), "development".to_string()),
        ("ADMIN_API_TOKEN".to_string(), ADMIN_TOKEN.to_string()),
    ]);
    for (key, value) in extra {
        vars.insert(key.to_string(), value.clone());
    }
    let config = Config::from_lookup(|key| vars.get(key).cloned())
        .unwrap()
        .config;
    let registry = GatewayRegistry::from_config(&config);
    let state = AppState::new(
        config,
        Arc::new(InMemoryLedger::with_default_plans()),
        registry,
    )
    .unwrap();
    create_app(state)
}

fn app() -> Router {
    app_with(&[])
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn user_request(method: &str, uri: &str, user: Uuid, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", user.to_string());
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn admin_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {ADMIN_TOKEN}"));
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn start_bank_transfer(app: &Router, user: Uuid, reference: &str) -> String {
    let (status, body) = send(
        app,
        user_request(
            "POST",
            "/payments/checkout/bank-transfer",
            user,
            Some(json!({"plan_id": "starter", "currency": "TRY", "bank_reference": reference})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["transaction_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_and_metrics() {
    let app = app();

    let (status, body) = send(
        &app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["dependencies"]["ledger"]["status"], "healthy");

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_openapi_document() {
    let (status, body) = send(
        &app(),
        Request::builder()
            .uri("/api-docs/openapi.json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/payments/checkout/{method}"].is_object());
    assert!(body["paths"]["/payments/admin/analytics"].is_object());
    for path in [
        "/payments/transactions",
        "/payments/account",
        "/payments/transactions/{id}/cancel",
        "/payments/events",
        "/payments/admin/plans",
        "/payments/admin/plans/{id}",
        "/payments/admin/plans/{id}/deactivate",
        "/payments/admin/accounts/{user_id}/credits",
    ] {
        assert!(body["paths"][path].is_object(), "{path} missing from the document");
    }
}

#[tokio::test]
async fn test_plans_and_bank_accounts() {
    let app = app();

    let (status, body) = send(
        &app,
        Request::builder().uri("/payments/plans").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["plans"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["starter", "pro", "enterprise", "unlimited_monthly"]);

    let (status, body) = send(
        &app,
        Request::builder()
            .uri("/payments/bank-accounts?currency=USD")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let accounts = body["accounts"].as_array().unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0]["currency"], "USD");
    assert!(body["instructions"].as_str().unwrap().contains("receipt"));
}

#[tokio::test]
async fn test_checkout_requires_user() {
    let request = Request::builder()
        .method("POST")
        .uri("/payments/checkout/bank_transfer")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"plan_id": "starter", "currency": "TRY", "bank_reference": "EFT-1"}).to_string(),
        ))
        .unwrap();

    let (status, body) = send(&app(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_checkout_validation_errors() {
    let app = app();
    let user = Uuid::new_v4();

    let (status, body) = send(
        &app,
        user_request(
            "POST",
            "/payments/checkout/bank_transfer",
            user,
            Some(json!({"plan_id": "starter", "currency": "TRY"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = send(
        &app,
        user_request(
            "POST",
            "/payments/checkout/paypal",
            user,
            Some(json!({"plan_id": "starter", "currency": "TRY"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, user_request("GET", "/payments/transactions", user, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["transactions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_bank_transfer_end_to_end() {
    let app = app();
    let user = Uuid::new_v4();
    let tx_id = start_bank_transfer(&app, user, "EFT-9931").await;

    let (status, body) = send(
        &app,
        user_request("GET", &format!("/payments/status/{tx_id}"), user, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert!(body.get("credits_added").is_none());

    let (status, body) = send(
        &app,
        admin_request(
            "PATCH",
            &format!("/payments/admin/transactions/{tx_id}/approve"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transaction"]["status"], "completed");
    assert_eq!(body["account"]["remaining_credits"], 10);

    let (status, body) = send(
        &app,
        admin_request(
            "PATCH",
            &format!("/payments/admin/transactions/{tx_id}/approve"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, body) = send(
        &app,
        user_request("GET", &format!("/payments/status/{tx_id}?wait=true"), user, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["credits_added"], 10);

    let (_, body) = send(&app, user_request("GET", "/payments/account", user, None)).await;
    assert_eq!(body["remaining_credits"], 10);
    assert_eq!(body["has_unlimited_credits"], false);

    // Other users cannot see the transaction.
    let (status, _) = send(
        &app,
        user_request("GET", &format!("/payments/status/{tx_id}"), Uuid::new_v4(), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_reject_requires_reason() {
    let app = app();
    let user = Uuid::new_v4();
    let tx_id = start_bank_transfer(&app, user, "EFT-404").await;
    let uri = format!("/payments/admin/transactions/{tx_id}/reject");

    let (status, _) = send(&app, admin_request("PATCH", &uri, Some(json!({"reason": ""})))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = send(
        &app,
        admin_request("PATCH", &uri, Some(json!({"reason": "reference not found"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transaction"]["status"], "failed");
    assert_eq!(body["transaction"]["resolution_note"], "reference not found");

    let (status, body) = send(
        &app,
        admin_request(
            "GET",
            "/payments/admin/transactions?status=failed&payment_method=bank_transfer",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn test_admin_auth() {
    let app = app();

    let (status, _) = send(
        &app,
        Request::builder()
            .uri("/payments/admin/analytics")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        Request::builder()
            .uri("/payments/admin/analytics")
            .header("authorization", "Bearer wrong")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, admin_request("GET", "/payments/admin/analytics", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_transactions"], 0);
    assert_eq!(body["by_status"]["completed"], 0);
    assert_eq!(body["by_status"]["failed"], 0);
    assert_eq!(body["by_method"]["bank_transfer"], 0);
}

#[tokio::test]
async fn test_admin_disabled_without_token() {
    let vars = [("APP_PROFILE", "development")];
    let config = Config::from_lookup(|key| {
        vars.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    })
    .unwrap()
    .config;
    let registry = GatewayRegistry::from_config(&config);
    let app = create_app(
        AppState::new(config, Arc::new(InMemoryLedger::with_default_plans()), registry).unwrap(),
    );

    let (status, body) = send(&app, admin_request("GET", "/payments/admin/analytics", None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn test_admin_catalog_and_credit_override() {
    let app = app();

    let (status, body) = send(
        &app,
        admin_request(
            "POST",
            "/payments/admin/plans",
            Some(json!({
                "id": "trial",
                "name": "Deneme",
                "name_en": "Trial",
                "plan_type": "package",
                "credits": 2,
                "prices": {"USD": "1.50"}
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], true);

    let (status, _) = send(
        &app,
        admin_request(
            "PUT",
            "/payments/admin/plans/trial",
            Some(json!({"sort_order": 9, "is_popular": true})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        admin_request("PATCH", "/payments/admin/plans/trial/deactivate", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], false);

    let user = Uuid::new_v4();
    let (status, body) = send(
        &app,
        admin_request(
            "PATCH",
            &format!("/payments/admin/accounts/{user}/credits"),
            Some(json!({"amount": 25, "reason": "goodwill"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["remaining_credits"], 25);

    // Overrides never show up as transactions.
    let (_, body) = send(
        &app,
        admin_request("GET", &format!("/payments/admin/transactions?user_id={user}"), None),
    )
    .await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_gateway_b_webhook_flow() {
    let mut server = mockito::Server::new_async().await;
    let _init = server
        .mock("POST", "/payment/checkoutform/initialize")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"success","token":"tok_123","paymentPageUrl":"https://pay.test/tok_123"}"#)
        .create_async()
        .await;

    let app = app_with(&[
        ("GATEWAY_B_BASE_URL", server.url()),
        ("GATEWAY_B_API_KEY", "api_test".to_string()),
        ("GATEWAY_B_SECRET_KEY", GATEWAY_B_SECRET.to_string()),
    ]);
    let user = Uuid::new_v4();

    let (status, body) = send(
        &app,
        user_request(
            "POST",
            "/payments/checkout/gateway_b",
            user,
            Some(json!({"plan_id": "pro", "currency": "TRY"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checkout_url"], "https://pay.test/tok_123");

    let payload = json!({"token": "tok_123", "status": "SUCCESS"}).to_string();
    let callback = || {
        Request::builder()
            .method("POST")
            .uri("/payments/webhooks/gateway_b")
            .header("content-type", "application/json")
            .header(
                gateway_b::SIGNATURE_HEADER,
                signature::sign(GATEWAY_B_SECRET, payload.as_bytes()),
            )
            .body(Body::from(payload.clone()))
            .unwrap()
    };

    let (status, body) = send(&app, callback()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "applied");

    let (status, body) = send(&app, callback()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");

    let (_, body) = send(&app, user_request("GET", "/payments/account", user, None)).await;
    assert_eq!(body["remaining_credits"], 50);

    let forged = Request::builder()
        .method("POST")
        .uri("/payments/webhooks/gateway_b")
        .header(gateway_b::SIGNATURE_HEADER, "00ff")
        .body(Body::from(payload.clone()))
        .unwrap();
    let (status, _) = send(&app, forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_gateway_b_cancel_keeps_token_payable() {
    let mut server = mockito::Server::new_async().await;
    let _init = server
        .mock("POST", "/payment/checkoutform/initialize")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"success","token":"tok_9","paymentPageUrl":"https://pay.test/tok_9"}"#)
        .create_async()
        .await;

    let app = app_with(&[
        ("GATEWAY_B_BASE_URL", server.url()),
        ("GATEWAY_B_API_KEY", "api_test".to_string()),
        ("GATEWAY_B_SECRET_KEY", GATEWAY_B_SECRET.to_string()),
    ]);
    let user = Uuid::new_v4();

    let (_, body) = send(
        &app,
        user_request(
            "POST",
            "/payments/checkout/gateway_b",
            user,
            Some(json!({"plan_id": "pro", "currency": "TRY"})),
        ),
    )
    .await;
    let tx_id = body["transaction_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        user_request("POST", &format!("/payments/transactions/{tx_id}/cancel"), user, None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "external_gateway_error");

    let (_, body) = send(
        &app,
        user_request("GET", &format!("/payments/status/{tx_id}"), user, None),
    )
    .await;
    assert_eq!(body["status"], "pending");

    // The payer finishes the still open form.
    let payload = json!({"token": "tok_9", "status": "SUCCESS"}).to_string();
    let callback = Request::builder()
        .method("POST")
        .uri("/payments/webhooks/gateway_b")
        .header("content-type", "application/json")
        .header(
            gateway_b::SIGNATURE_HEADER,
            signature::sign(GATEWAY_B_SECRET, payload.as_bytes()),
        )
        .body(Body::from(payload))
        .unwrap();
    let (status, body) = send(&app, callback).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "applied");

    let (_, body) = send(&app, user_request("GET", "/payments/account", user, None)).await;
    assert_eq!(body["remaining_credits"], 50);
}

#[tokio::test]
async fn test_owner_cancels_bank_transfer_over_http() {
    let app = app();
    let user = Uuid::new_v4();
    let tx_id = start_bank_transfer(&app, user, "EFT-3001").await;
    let uri = format!("/payments/transactions/{tx_id}/cancel");

    let (status, _) = send(&app, user_request("POST", &uri, Uuid::new_v4(), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, user_request("POST", &uri, user, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["transaction"]["status"], "cancelled");

    let (status, body) = send(&app, user_request("POST", &uri, user, None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}
