use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    db::map_constraint_err,
    dto::orders::{CreateOrderRequest, OrderItemRequest, OrderList, UpdateOrderStatusRequest},
    entity::{
        books::{Column as BookCol, Entity as Books},
        order_items::ActiveModel as OrderItemActive,
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin, ensure_owner_or_admin},
    models::{Order, OrderStatus},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::loaders::{resolve_order, resolve_orders},
    state::AppState,
};

/// Sum of `price * quantity` over the items, rejecting empty orders and bad lines.
pub fn order_total(items: &[OrderItemRequest]) -> AppResult<i64> {
    if items.is_empty() {
        return Err(AppError::bad_request("order must contain at least one item"));
    }

    items.iter().try_fold(0i64, |total, item| {
        if item.quantity < 1 {
            return Err(AppError::bad_request("quantity must be at least 1"));
        }
        if item.price < 0 {
            return Err(AppError::bad_request("price must not be negative"));
        }
        item.price
            .checked_mul(i64::from(item.quantity))
            .and_then(|line| total.checked_add(line))
            .ok_or_else(|| AppError::bad_request("order total is too large"))
    })
}

/// Lock an order row for the rest of the surrounding database transaction.
pub(crate) async fn lock_order<C: ConnectionTrait>(conn: &C, id: Uuid) -> AppResult<OrderModel> {
    Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(conn)
        .await?
        .ok_or_else(|| AppError::not_found("Order"))
}

/// Move a locked order to `next`, enforcing the order transition table.
/// Re-asserting the current status leaves the row untouched.
pub(crate) async fn transition_order<C: ConnectionTrait>(
    conn: &C,
    order: OrderModel,
    next: OrderStatus,
) -> AppResult<OrderModel> {
    let current: OrderStatus = order
        .status
        .parse()
        .map_err(|_| AppError::Internal(anyhow::anyhow!("unexpected stored order status")))?;

    if current == next {
        return Ok(order);
    }
    if !current.can_transition_to(next) {
        return Err(AppError::Conflict(format!(
            "order is already {current} and cannot become {next}"
        )));
    }

    let mut active: OrderActive = order.into();
    active.status = Set(next.as_str().to_string());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(conn).await?;
    tracing::info!(order_id = %order.id, from = %current, to = %next, "order status changed");
    Ok(order)
}

pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<Order>> {
    let total_price = order_total(&payload.items)?;

    let mut book_ids: Vec<Uuid> = payload.items.iter().map(|i| i.book_id).collect();
    book_ids.sort_unstable();
    book_ids.dedup();

    let txn = state.orm.begin().await?;

    let found = Books::find()
        .filter(BookCol::Id.is_in(book_ids.clone()))
        .count(&txn)
        .await?;
    if found as usize != book_ids.len() {
        return Err(AppError::not_found("Book"));
    }

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        status: Set(OrderStatus::Pending.as_str().to_string()),
        total_price: Set(total_price),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    for item in &payload.items {
        OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            book_id: Set(item.book_id),
            quantity: Set(item.quantity),
            price: Set(item.price),
        }
        .insert(&txn)
        .await
        .map_err(|e| map_constraint_err(e, "Book was removed"))?;
    }

    txn.commit().await?;

    tracing::info!(order_id = %order.id, user_id = %user.user_id, total_price, "order created");
    audit::record(
        &state.orm,
        Some(user.user_id),
        "order_create",
        "orders",
        serde_json::json!({ "order_id": order.id, "total_price": total_price }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order created",
        resolve_order(&state.orm, order).await?,
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all();
    if !user.is_admin() {
        condition = condition.add(OrderCol::UserId.eq(user.user_id));
    }
    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        let status: OrderStatus = status.parse()?;
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }

    let mut finder = Orders::find().filter(condition);
    finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let models = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;
    let items = resolve_orders(&state.orm, models).await?;

    Ok(ApiResponse::success(
        "Ok",
        OrderList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Order>> {
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("Order"))?;
    ensure_owner_or_admin(user, order.user_id)?;

    Ok(ApiResponse::success(
        "OK",
        resolve_order(&state.orm, order).await?,
        Some(Meta::empty()),
    ))
}

pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;
    let next: OrderStatus = payload.status.trim().parse()?;

    let txn = state.orm.begin().await?;
    let order = lock_order(&txn, id).await?;
    let previous = order.status.clone();
    let order = transition_order(&txn, order, next).await?;
    txn.commit().await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "order_status_update",
        "orders",
        serde_json::json!({ "order_id": order.id, "from": previous, "to": next.as_str() }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order status updated",
        resolve_order(&state.orm, order).await?,
        Some(Meta::empty()),
    ))
}

pub async fn delete_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let result = Orders::delete_by_id(id)
        .exec(&state.orm)
        .await
        .map_err(|e| map_constraint_err(e, "Order has a transaction"))?;

    if result.rows_affected == 0 {
        return Err(AppError::not_found("Order"));
    }

    audit::record(
        &state.orm,
        Some(user.user_id),
        "order_delete",
        "orders",
        serde_json::json!({ "order_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}
