use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    dto::transactions::{
        CreateTransactionRequest, EsewaCallbackQuery, EsewaPaymentRequest, TransactionIdQuery,
        TransactionList, TransactionQuery, TransactionUpdateRequest,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    models::Transaction,
    response::ApiResponse,
    services::transaction_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_transactions).post(create_transaction))
        .route("/esewa/initiate", post(initiate_esewa))
        .route("/esewa/verify", post(verify_esewa))
        .route("/esewa/callback", get(esewa_callback))
        .route("/order/{order_id}", get(get_by_order))
        .route("/user/my-transactions", get(my_transactions))
        .route(
            "/{id}",
            get(get_transaction).delete(delete_transaction),
        )
        .route("/{id}/status", put(update_status))
}

#[utoipa::path(
    post,
    path = "/api/transactions",
    request_body = CreateTransactionRequest,
    responses(
        (status = 201, description = "Create transaction", body = ApiResponse<Transaction>),
        (status = 400, description = "Amount does not match the order total"),
        (status = 403, description = "Not the order owner"),
        (status = 409, description = "Order already has a transaction")
    ),
    security(("bearer_auth" = [])),
    tag = "Transactions"
)]
pub async fn create_transaction(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateTransactionRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Transaction>>)> {
    let resp = transaction_service::create_transaction(&state, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    get,
    path = "/api/transactions",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("status" = Option<String>, Query, description = "PENDING, SUCCESS, FAILED or CANCELLED"),
    ),
    responses(
        (status = 200, description = "All transactions", body = ApiResponse<TransactionList>),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Transactions"
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<TransactionQuery>,
) -> AppResult<Json<ApiResponse<TransactionList>>> {
    Ok(Json(
        transaction_service::list_transactions(&state, &user, query).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/transactions/user/my-transactions",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("status" = Option<String>, Query, description = "PENDING, SUCCESS, FAILED or CANCELLED"),
    ),
    responses(
        (status = 200, description = "The caller's transactions", body = ApiResponse<TransactionList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Transactions"
)]
pub async fn my_transactions(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<TransactionQuery>,
) -> AppResult<Json<ApiResponse<TransactionList>>> {
    Ok(Json(
        transaction_service::my_transactions(&state, &user, query).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/transactions/{id}",
    params(("id" = Uuid, Path, description = "Transaction id")),
    responses(
        (status = 200, description = "Get transaction", body = ApiResponse<Transaction>),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Transactions"
)]
pub async fn get_transaction(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Transaction>>> {
    Ok(Json(
        transaction_service::get_transaction(&state, &user, id).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/transactions/order/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Transaction of an order", body = ApiResponse<Transaction>),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Transactions"
)]
pub async fn get_by_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Transaction>>> {
    Ok(Json(
        transaction_service::get_transaction_by_order(&state, &user, order_id).await?,
    ))
}

#[utoipa::path(
    put,
    path = "/api/transactions/{id}/status",
    params(("id" = Uuid, Path, description = "Transaction id")),
    request_body = TransactionUpdateRequest,
    responses(
        (status = 200, description = "Update transaction status", body = ApiResponse<Transaction>),
        (status = 400, description = "Unknown status"),
        (status = 409, description = "Transaction is already settled")
    ),
    security(("bearer_auth" = [])),
    tag = "Transactions"
)]
pub async fn update_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransactionUpdateRequest>,
) -> AppResult<Json<ApiResponse<Transaction>>> {
    Ok(Json(
        transaction_service::update_transaction_status(&state, &user, id, payload).await?,
    ))
}

#[utoipa::path(
    delete,
    path = "/api/transactions/{id}",
    params(("id" = Uuid, Path, description = "Transaction id")),
    responses(
        (status = 200, description = "Delete transaction"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Transactions"
)]
pub async fn delete_transaction(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Value>>> {
    Ok(Json(
        transaction_service::delete_transaction(&state, &user, id).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/api/transactions/esewa/initiate",
    params(("transaction_id" = Option<Uuid>, Query, description = "Overrides `transaction_id` in the body")),
    request_body = EsewaPaymentRequest,
    responses(
        (status = 200, description = "Signed gateway redirect stored on the transaction", body = ApiResponse<Transaction>),
        (status = 400, description = "Transaction is not pending"),
        (status = 403, description = "Not the owner")
    ),
    security(("bearer_auth" = [])),
    tag = "Transactions"
)]
pub async fn initiate_esewa(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<TransactionIdQuery>,
    Json(payload): Json<EsewaPaymentRequest>,
) -> AppResult<Json<ApiResponse<Transaction>>> {
    Ok(Json(
        transaction_service::initiate_esewa_payment(&state, &user, query.transaction_id, payload)
            .await?,
    ))
}

/// Accepts the gateway's callback payload. Signed payloads need no token; an unsigned one
/// is only accepted from the transaction owner or an admin.
#[utoipa::path(
    post,
    path = "/api/transactions/esewa/verify",
    request_body(content = Object, description = "Gateway callback payload"),
    responses(
        (status = 200, description = "Settled transaction", body = ApiResponse<Transaction>),
        (status = 400, description = "Bad signature, amount or transaction code"),
        (status = 409, description = "Transaction is already settled differently")
    ),
    security((), ("bearer_auth" = [])),
    tag = "Transactions"
)]
pub async fn verify_esewa(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Json(payload): Json<Value>,
) -> AppResult<Json<ApiResponse<Transaction>>> {
    Ok(Json(
        transaction_service::verify_esewa_payment(&state, user.as_ref(), payload, false).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/transactions/esewa/callback",
    params(("data" = String, Query, description = "Base64 JSON payload from the gateway redirect")),
    responses(
        (status = 200, description = "Settled transaction", body = ApiResponse<Transaction>),
        (status = 400, description = "Unsigned or tampered payload")
    ),
    tag = "Transactions"
)]
pub async fn esewa_callback(
    State(state): State<AppState>,
    Query(query): Query<EsewaCallbackQuery>,
) -> AppResult<Json<ApiResponse<Transaction>>> {
    Ok(Json(
        transaction_service::esewa_callback(&state, &query.data).await?,
    ))
}
