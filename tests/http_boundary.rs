//! Router-level checks that never reach the database: authentication, role gates,
//! callback pre-validation and the error envelope.

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bookstore_api::{
    config::AppConfig, models::Role, routes::build_router, services::auth_service::issue_token,
    state::AppState,
};
use sea_orm::DatabaseConnection;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

fn app() -> Router {
    build_router(AppState::new(
        DatabaseConnection::Disconnected,
        AppConfig::for_tests(),
    ))
}

fn bearer(role: Role) -> String {
    let login = issue_token(&AppConfig::for_tests(), Uuid::new_v4(), role).unwrap();
    format!("Bearer {}", login.token)
}

async fn send(request: Request<Body>) -> (StatusCode, Value) {
    let response = app().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn json_request(method: &str, uri: &str, auth: Option<String>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let request = Request::get("/api/orders").body(Body::empty()).unwrap();
    let (status, body) = send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authorization header required");
}

#[tokio::test]
async fn tampered_tokens_are_rejected() {
    let token = bearer(Role::Admin);
    let request = Request::get("/api/transactions")
        .header(header::AUTHORIZATION, format!("{token}x"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn customers_cannot_use_admin_routes() {
    let customer = bearer(Role::Customer);

    let (status, body) = send(json_request(
        "POST",
        "/api/categories",
        Some(customer.clone()),
        json!({ "name": "Poetry" }),
    ))
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Access denied");

    let request = Request::get("/api/transactions")
        .header(header::AUTHORIZATION, customer.clone())
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(json_request(
        "PUT",
        &format!("/api/orders/{}/status", Uuid::new_v4()),
        Some(customer),
        json!({ "status": "PAID" }),
    ))
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_routes_use_the_error_envelope() {
    let request = Request::get("/api/nothing-here").body(Body::empty()).unwrap();
    let (status, body) = send(request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "Route not found" }));
}

#[tokio::test]
async fn unsigned_verify_without_a_token_is_unauthorized() {
    let (status, _) = send(json_request(
        "POST",
        "/api/transactions/esewa/verify",
        None,
        json!({ "transaction_code": Uuid::new_v4().to_string(), "status": "COMPLETE" }),
    ))
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn verify_rejects_malformed_transaction_codes() {
    let (status, body) = send(json_request(
        "POST",
        "/api/transactions/esewa/verify",
        Some(bearer(Role::Customer)),
        json!({ "transaction_code": "not-a-uuid", "status": "COMPLETE" }),
    ))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid transaction code");
}

#[tokio::test]
async fn gateway_redirect_must_be_signed() {
    let payload = json!({
        "transaction_uuid": Uuid::new_v4().to_string(),
        "status": "COMPLETE",
        "total_amount": "25.00",
    });
    let data = STANDARD.encode(payload.to_string());
    let request = Request::get(format!(
        "/api/transactions/esewa/callback?data={}",
        urlencode(&data)
    ))
    .body(Body::empty())
    .unwrap();
    let (status, body) = send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "gateway callback is not signed");
}

#[tokio::test]
async fn gateway_redirect_with_forged_signature_is_rejected() {
    let payload = json!({
        "transaction_uuid": Uuid::new_v4().to_string(),
        "status": "COMPLETE",
        "total_amount": "25.00",
        "signed_field_names": "transaction_uuid,status,total_amount",
        "signature": STANDARD.encode("forged"),
    });
    let data = STANDARD.encode(payload.to_string());
    let request = Request::get(format!(
        "/api/transactions/esewa/callback?data={}",
        urlencode(&data)
    ))
    .body(Body::empty())
    .unwrap();
    let (status, body) = send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "gateway signature mismatch");
}

fn urlencode(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

#[tokio::test]
async fn customers_cannot_report_an_unsigned_success() {
    let (status, body) = send(json_request(
        "POST",
        "/api/transactions/esewa/verify",
        Some(bearer(Role::Customer)),
        json!({ "transaction_uuid": Uuid::new_v4().to_string(), "status": "COMPLETE" }),
    ))
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Access denied");
}

#[tokio::test]
async fn initiation_signature_replayed_as_callback_is_rejected() {
    let config = AppConfig::for_tests();
    let id = Uuid::new_v4();
    let url = bookstore_api::esewa::build_payment_url(
        &config.esewa,
        &bookstore_api::esewa::PaymentRedirect {
            transaction_id: id,
            amount: 2500,
            product_code: "EPAYTEST",
            success_url: "http://localhost/ok",
            failure_url: "http://localhost/fail",
        },
    )
    .unwrap();
    let params: std::collections::HashMap<_, _> =
        url::Url::parse(&url).unwrap().query_pairs().into_owned().collect();

    let replayed = json!({
        "transaction_uuid": params["transaction_uuid"],
        "total_amount": params["total_amount"],
        "product_code": params["product_code"],
        "status": "COMPLETE",
        "signed_field_names": params["signed_field_names"],
        "signature": params["signature"],
    });
    let data = STANDARD.encode(replayed.to_string());
    let request = Request::get(format!(
        "/api/transactions/esewa/callback?data={}",
        urlencode(&data)
    ))
    .body(Body::empty())
    .unwrap();
    let (status, body) = send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "gateway signature does not cover status");
}
