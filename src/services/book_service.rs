use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::{
    audit,
    db::map_constraint_err,
    dto::books::{BookList, BookQuery, CreateBookRequest, UpdateBookRequest},
    entity::{
        Categories,
        books::{ActiveModel, Column, Entity as Books},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Book,
    response::{ApiResponse, Meta},
    services::loaders::{resolve_book, resolve_books},
    state::AppState,
};

fn validate_text(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::bad_request(format!("{field} is required")));
    }
    Ok(())
}

fn validate_amounts(price: Option<i64>, stock: Option<i32>) -> AppResult<()> {
    if price.is_some_and(|p| p < 0) {
        return Err(AppError::bad_request("price must not be negative"));
    }
    if stock.is_some_and(|s| s < 0) {
        return Err(AppError::bad_request("stock must not be negative"));
    }
    Ok(())
}

async fn ensure_category_exists(state: &AppState, category_id: Uuid) -> AppResult<()> {
    Categories::find_by_id(category_id)
        .one(&state.orm)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::not_found("Category"))
}

pub async fn list_books(state: &AppState, query: BookQuery) -> AppResult<ApiResponse<BookList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all();
    if let Some(category_id) = query.category_id {
        condition = condition.add(Column::CategoryId.eq(category_id));
    }

    let finder = Books::find()
        .filter(condition)
        .order_by_desc(Column::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;

    let models = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;
    let items = resolve_books(&state.orm, models).await?;

    Ok(ApiResponse::success(
        "Books",
        BookList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

pub async fn get_book(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Book>> {
    let book = Books::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("Book"))?;
    Ok(ApiResponse::success(
        "Book",
        resolve_book(&state.orm, book).await?,
        None,
    ))
}

pub async fn create_book(
    state: &AppState,
    user: &AuthUser,
    payload: CreateBookRequest,
) -> AppResult<ApiResponse<Book>> {
    ensure_admin(user)?;
    validate_text("title", &payload.title)?;
    validate_text("author", &payload.author)?;
    validate_amounts(Some(payload.price), Some(payload.stock))?;
    ensure_category_exists(state, payload.category_id).await?;

    let book = ActiveModel {
        id: Set(Uuid::new_v4()),
        title: Set(payload.title.trim().to_string()),
        author: Set(payload.author.trim().to_string()),
        description: Set(payload.description),
        price: Set(payload.price),
        stock: Set(payload.stock),
        category_id: Set(payload.category_id),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await
    .map_err(|e| map_constraint_err(e, "Category was removed"))?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "book_create",
        "books",
        serde_json::json!({ "book_id": book.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Book created",
        resolve_book(&state.orm, book).await?,
        Some(Meta::empty()),
    ))
}

pub async fn update_book(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateBookRequest,
) -> AppResult<ApiResponse<Book>> {
    ensure_admin(user)?;
    validate_amounts(payload.price, payload.stock)?;

    let existing = Books::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("Book"))?;

    let mut active: ActiveModel = existing.into();
    if let Some(title) = payload.title {
        validate_text("title", &title)?;
        active.title = Set(title.trim().to_string());
    }
    if let Some(author) = payload.author {
        validate_text("author", &author)?;
        active.author = Set(author.trim().to_string());
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(price) = payload.price {
        active.price = Set(price);
    }
    if let Some(stock) = payload.stock {
        active.stock = Set(stock);
    }
    if let Some(category_id) = payload.category_id {
        ensure_category_exists(state, category_id).await?;
        active.category_id = Set(category_id);
    }
    active.updated_at = Set(Utc::now().into());

    let book = active
        .update(&state.orm)
        .await
        .map_err(|e| map_constraint_err(e, "Category was removed"))?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "book_update",
        "books",
        serde_json::json!({ "book_id": book.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Updated",
        resolve_book(&state.orm, book).await?,
        Some(Meta::empty()),
    ))
}

pub async fn delete_book(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let result = Books::delete_by_id(id)
        .exec(&state.orm)
        .await
        .map_err(|e| map_constraint_err(e, "Book is referenced by an order"))?;

    if result.rows_affected == 0 {
        return Err(AppError::not_found("Book"));
    }

    audit::record(
        &state.orm,
        Some(user.user_id),
        "book_delete",
        "books",
        serde_json::json!({ "book_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}
