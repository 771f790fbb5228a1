//! Payment transactions and their settlement.
//!
//! A transaction starts PENDING and settles exactly once into SUCCESS, FAILED or CANCELLED.
//! Every state change runs inside a database transaction holding a row lock on the
//! transaction (and on its order when the order moves to PAID), so the two rows always
//! commit or roll back together.

use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait,
    DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    audit,
    db::map_constraint_err,
    dto::transactions::{
        CreateTransactionRequest, EsewaPaymentRequest, TransactionList, TransactionQuery,
        TransactionUpdateRequest,
    },
    entity::transactions::{
        ActiveModel as TransactionActive, Column as TransactionCol, Entity as Transactions,
        Model as TransactionModel,
    },
    esewa::{self, GatewayCallback, PaymentRedirect},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin, ensure_owner_or_admin},
    models::{OrderStatus, PaymentMethod, Transaction, TransactionStatus},
    money,
    response::{ApiResponse, Meta},
    services::{
        loaders::{resolve_transaction, resolve_transactions},
        order_service::{lock_order, transition_order},
    },
    state::AppState,
};

const DEFAULT_PRODUCT_NAME: &str = "Book Order";
const DUPLICATE_TRANSACTION: &str = "A transaction already exists for this order";

/// Fields a settlement may write. `None` leaves the stored value alone.
#[derive(Debug)]
struct Settlement {
    status: TransactionStatus,
    external_reference: Option<String>,
    failure_reason: Option<String>,
    gateway_response: Option<Value>,
}

fn stored_status(model: &TransactionModel) -> AppResult<TransactionStatus> {
    model
        .status
        .parse()
        .map_err(|_| AppError::Internal(anyhow::anyhow!("unexpected stored transaction status")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

async fn lock_transaction<C: ConnectionTrait>(conn: &C, id: Uuid) -> AppResult<TransactionModel> {
    Transactions::find_by_id(id)
        .lock(LockType::Update)
        .one(conn)
        .await?
        .ok_or_else(|| AppError::not_found("Transaction"))
}

/// Apply `settlement` to a locked transaction.
///
/// Returns `None` when the transaction is already settled with the same status, in which
/// case nothing is written. A SUCCESS moves the linked order to PAID in the same database
/// transaction.
async fn settle(
    txn: &DatabaseTransaction,
    model: TransactionModel,
    settlement: Settlement,
) -> AppResult<Option<TransactionModel>> {
    let current = stored_status(&model)?;
    let next = settlement.status;

    if current.is_settled() && current == next {
        return Ok(None);
    }
    if !current.can_transition_to(next) {
        return Err(AppError::Conflict(format!(
            "transaction is already {current} and cannot become {next}"
        )));
    }

    let order_id = model.order_id;
    let mut active: TransactionActive = model.into();
    active.status = Set(next.as_str().to_string());
    if let Some(reference) = settlement.external_reference {
        active.external_reference = Set(Some(reference));
    }
    if let Some(reason) = settlement.failure_reason {
        active.failure_reason = Set(Some(reason));
    }
    if let Some(response) = settlement.gateway_response {
        active.gateway_response = Set(Some(response));
    }
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(txn).await?;

    if next == TransactionStatus::Success {
        let order = lock_order(txn, order_id).await?;
        transition_order(txn, order, OrderStatus::Paid).await?;
    }

    tracing::info!(transaction_id = %updated.id, from = %current, to = %next, "transaction status changed");
    Ok(Some(updated))
}

pub async fn create_transaction(
    state: &AppState,
    user: &AuthUser,
    payload: CreateTransactionRequest,
) -> AppResult<ApiResponse<Transaction>> {
    let payment_method: PaymentMethod = payload.payment_method.trim().parse()?;
    if payload.amount <= 0 {
        return Err(AppError::bad_request("amount must be greater than zero"));
    }

    let txn = state.orm.begin().await?;

    let order = lock_order(&txn, payload.order_id).await?;
    if order.user_id != user.user_id {
        return Err(AppError::forbidden());
    }

    let existing = Transactions::find()
        .filter(TransactionCol::OrderId.eq(order.id))
        .one(&txn)
        .await?;
    if existing.is_some() {
        return Err(AppError::Conflict(DUPLICATE_TRANSACTION.into()));
    }

    if payload.amount != order.total_price {
        return Err(AppError::bad_request(format!(
            "amount {} does not match order total {}",
            money::format_amount(payload.amount),
            money::format_amount(order.total_price)
        )));
    }

    let transaction = TransactionActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        user_id: Set(user.user_id),
        payment_method: Set(payment_method.as_str().to_string()),
        amount: Set(payload.amount),
        status: Set(TransactionStatus::Pending.as_str().to_string()),
        external_reference: Set(None),
        payment_url: Set(None),
        merchant_code: Set(None),
        product_code: Set(None),
        product_name: Set(Some(DEFAULT_PRODUCT_NAME.to_string())),
        gateway_response: Set(None),
        failure_reason: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await
    .map_err(|e| map_constraint_err(e, DUPLICATE_TRANSACTION))?;

    txn.commit()
        .await
        .map_err(|e| map_constraint_err(e, DUPLICATE_TRANSACTION))?;

    tracing::info!(transaction_id = %transaction.id, order_id = %order.id, "transaction created");
    audit::record(
        &state.orm,
        Some(user.user_id),
        "transaction_create",
        "transactions",
        serde_json::json!({
            "transaction_id": transaction.id,
            "order_id": order.id,
            "amount": transaction.amount,
        }),
    )
    .await;

    Ok(ApiResponse::success(
        "Transaction created",
        resolve_transaction(&state.orm, transaction).await?,
        Some(Meta::empty()),
    ))
}

pub async fn initiate_esewa_payment(
    state: &AppState,
    user: &AuthUser,
    transaction_id: Option<Uuid>,
    payload: EsewaPaymentRequest,
) -> AppResult<ApiResponse<Transaction>> {
    let id = transaction_id
        .or(payload.transaction_id)
        .ok_or_else(|| AppError::bad_request("transaction_id is required"))?;
    let product_code = payload.product_code.trim().to_string();
    if product_code.is_empty() {
        return Err(AppError::bad_request("product_code is required"));
    }

    let txn = state.orm.begin().await?;
    let model = lock_transaction(&txn, id).await?;
    if model.user_id != user.user_id {
        return Err(AppError::forbidden());
    }
    if stored_status(&model)? != TransactionStatus::Pending {
        return Err(AppError::bad_request("transaction is not in pending status"));
    }
    if payload.amount.is_some_and(|amount| amount != model.amount) {
        return Err(AppError::bad_request("amount does not match transaction amount"));
    }

    let config = &state.config.esewa;
    let success_url = non_empty(payload.success_url).unwrap_or_else(|| config.success_url.clone());
    let failure_url = non_empty(payload.failure_url).unwrap_or_else(|| config.failure_url.clone());
    let payment_url = esewa::build_payment_url(
        config,
        &PaymentRedirect {
            transaction_id: model.id,
            amount: model.amount,
            product_code: &product_code,
            success_url: &success_url,
            failure_url: &failure_url,
        },
    )?;

    let product_name = non_empty(Some(payload.product_name)).or(model.product_name.clone());
    let mut active: TransactionActive = model.into();
    active.merchant_code = Set(Some(config.merchant_code.clone()));
    active.product_code = Set(Some(product_code));
    active.product_name = Set(product_name);
    active.payment_url = Set(Some(payment_url));
    active.updated_at = Set(Utc::now().into());
    let transaction = active.update(&txn).await?;
    txn.commit().await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "payment_initiate",
        "transactions",
        serde_json::json!({ "transaction_id": transaction.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Payment initiated",
        resolve_transaction(&state.orm, transaction).await?,
        Some(Meta::empty()),
    ))
}

/// Settle a transaction from an eSewa callback payload.
///
/// Signed payloads are checked against the merchant secret. An unsigned payload is only
/// trusted from an authenticated caller who owns the transaction (or an admin), and never
/// when `require_signature` is set. Only an admin may report an unsigned success.
pub async fn verify_esewa_payment(
    state: &AppState,
    caller: Option<&AuthUser>,
    payload: Value,
    require_signature: bool,
) -> AppResult<ApiResponse<Transaction>> {
    let callback = GatewayCallback::from_value(&payload);
    let id = callback.transaction_id()?;

    if callback.is_signed() {
        if let Err(err) = esewa::verify_signature(&payload, &state.config.esewa.secret_key) {
            tracing::warn!(transaction_id = %id, "rejected gateway callback: bad signature");
            return Err(err);
        }
    } else if require_signature {
        tracing::warn!(transaction_id = %id, "rejected gateway callback: unsigned");
        return Err(AppError::bad_request("gateway callback is not signed"));
    } else {
        let Some(caller) = caller else {
            return Err(AppError::Unauthorized("Authorization header required".into()));
        };
        if callback.outcome() == TransactionStatus::Success && !caller.is_admin() {
            tracing::warn!(transaction_id = %id, user_id = %caller.user_id, "rejected unsigned success callback");
            return Err(AppError::forbidden());
        }
    }

    let txn = state.orm.begin().await?;
    let model = lock_transaction(&txn, id).await?;
    if !callback.is_signed() {
        if let Some(caller) = caller {
            ensure_owner_or_admin(caller, model.user_id)?;
        }
    }

    if let Some(raw) = callback.total_amount.as_deref() {
        let total = money::parse_amount(raw)?;
        if total != model.amount {
            tracing::warn!(transaction_id = %id, total, amount = model.amount, "rejected gateway callback: amount mismatch");
            return Err(AppError::bad_request("total_amount does not match transaction amount"));
        }
    }

    let outcome = callback.outcome();
    let failure_reason = match outcome {
        TransactionStatus::Failed => non_empty(callback.message.clone()),
        _ => None,
    };
    let settlement = Settlement {
        status: outcome,
        external_reference: non_empty(callback.external_reference()),
        failure_reason,
        gateway_response: Some(payload),
    };

    let user_id = model.user_id;
    let transaction = match settle(&txn, model.clone(), settlement).await? {
        Some(updated) => {
            txn.commit().await?;
            audit::record(
                &state.orm,
                caller.map(|c| c.user_id).or(Some(user_id)),
                "payment_verify",
                "transactions",
                serde_json::json!({ "transaction_id": updated.id, "status": outcome.as_str() }),
            )
            .await;
            updated
        }
        None => {
            tracing::debug!(transaction_id = %id, "duplicate gateway callback ignored");
            txn.rollback().await?;
            model
        }
    };

    Ok(ApiResponse::success(
        "Payment verified",
        resolve_transaction(&state.orm, transaction).await?,
        Some(Meta::empty()),
    ))
}

/// The gateway's browser redirect: `data` is base64 JSON and must be signed.
pub async fn esewa_callback(state: &AppState, data: &str) -> AppResult<ApiResponse<Transaction>> {
    let payload = esewa::decode_redirect_payload(data)?;
    verify_esewa_payment(state, None, payload, true).await
}

pub async fn update_transaction_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: TransactionUpdateRequest,
) -> AppResult<ApiResponse<Transaction>> {
    ensure_admin(user)?;
    let status: TransactionStatus = payload.status.trim().parse()?;

    let settlement = Settlement {
        status,
        external_reference: non_empty(payload.external_reference),
        failure_reason: non_empty(payload.failure_reason),
        gateway_response: payload.gateway_response.filter(|v| !v.is_null()),
    };

    let txn = state.orm.begin().await?;
    let model = lock_transaction(&txn, id).await?;
    let transaction = match settle(&txn, model.clone(), settlement).await? {
        Some(updated) => {
            txn.commit().await?;
            audit::record(
                &state.orm,
                Some(user.user_id),
                "transaction_status_update",
                "transactions",
                serde_json::json!({ "transaction_id": updated.id, "status": status.as_str() }),
            )
            .await;
            updated
        }
        None => {
            txn.rollback().await?;
            model
        }
    };

    Ok(ApiResponse::success(
        "Transaction updated",
        resolve_transaction(&state.orm, transaction).await?,
        Some(Meta::empty()),
    ))
}

pub async fn get_transaction(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Transaction>> {
    let model = Transactions::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("Transaction"))?;
    ensure_owner_or_admin(user, model.user_id)?;

    Ok(ApiResponse::success(
        "OK",
        resolve_transaction(&state.orm, model).await?,
        Some(Meta::empty()),
    ))
}

pub async fn get_transaction_by_order(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<Transaction>> {
    let model = Transactions::find()
        .filter(TransactionCol::OrderId.eq(order_id))
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("Transaction"))?;
    ensure_owner_or_admin(user, model.user_id)?;

    Ok(ApiResponse::success(
        "OK",
        resolve_transaction(&state.orm, model).await?,
        Some(Meta::empty()),
    ))
}

async fn list_filtered(
    state: &AppState,
    owner: Option<Uuid>,
    query: TransactionQuery,
) -> AppResult<ApiResponse<TransactionList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all();
    if let Some(owner) = owner {
        condition = condition.add(TransactionCol::UserId.eq(owner));
    }
    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        let status: TransactionStatus = status.parse()?;
        condition = condition.add(TransactionCol::Status.eq(status.as_str()));
    }

    let finder = Transactions::find()
        .filter(condition)
        .order_by_desc(TransactionCol::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;
    let models = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;
    let items = resolve_transactions(&state.orm, models).await?;

    Ok(ApiResponse::success(
        "Ok",
        TransactionList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

pub async fn list_transactions(
    state: &AppState,
    user: &AuthUser,
    query: TransactionQuery,
) -> AppResult<ApiResponse<TransactionList>> {
    ensure_admin(user)?;
    list_filtered(state, None, query).await
}

pub async fn my_transactions(
    state: &AppState,
    user: &AuthUser,
    query: TransactionQuery,
) -> AppResult<ApiResponse<TransactionList>> {
    list_filtered(state, Some(user.user_id), query).await
}

pub async fn delete_transaction(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let result = Transactions::delete_by_id(id).exec(&state.orm).await?;
    if result.rows_affected == 0 {
        return Err(AppError::not_found("Transaction"));
    }

    audit::record(
        &state.orm,
        Some(user.user_id),
        "transaction_delete",
        "transactions",
        serde_json::json!({ "transaction_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}
