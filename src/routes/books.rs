use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::books::{BookList, BookQuery, CreateBookRequest, UpdateBookRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    models::Book,
    response::ApiResponse,
    services::book_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_books).post(create_book))
        .route("/{id}", get(get_book).put(update_book).delete(delete_book))
}

#[utoipa::path(
    get,
    path = "/api/books",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("category_id" = Option<Uuid>, Query, description = "Only books in this category"),
    ),
    responses(
        (status = 200, description = "List books", body = ApiResponse<BookList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Books"
)]
pub async fn list_books(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<BookQuery>,
) -> AppResult<Json<ApiResponse<BookList>>> {
    Ok(Json(book_service::list_books(&state, query).await?))
}

#[utoipa::path(
    post,
    path = "/api/books",
    request_body = CreateBookRequest,
    responses(
        (status = 201, description = "Create book", body = ApiResponse<Book>),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Category not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Books"
)]
pub async fn create_book(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateBookRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Book>>)> {
    let resp = book_service::create_book(&state, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    get,
    path = "/api/books/{id}",
    params(("id" = Uuid, Path, description = "Book id")),
    responses(
        (status = 200, description = "Get book", body = ApiResponse<Book>),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Books"
)]
pub async fn get_book(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Book>>> {
    Ok(Json(book_service::get_book(&state, id).await?))
}

#[utoipa::path(
    put,
    path = "/api/books/{id}",
    params(("id" = Uuid, Path, description = "Book id")),
    request_body = UpdateBookRequest,
    responses(
        (status = 200, description = "Update book", body = ApiResponse<Book>)
    ),
    security(("bearer_auth" = [])),
    tag = "Books"
)]
pub async fn update_book(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateBookRequest>,
) -> AppResult<Json<ApiResponse<Book>>> {
    Ok(Json(
        book_service::update_book(&state, &user, id, payload).await?,
    ))
}

#[utoipa::path(
    delete,
    path = "/api/books/{id}",
    params(("id" = Uuid, Path, description = "Book id")),
    responses(
        (status = 200, description = "Delete book"),
        (status = 409, description = "Book is referenced by an order")
    ),
    security(("bearer_auth" = [])),
    tag = "Books"
)]
pub async fn delete_book(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    Ok(Json(book_service::delete_book(&state, &user, id).await?))
}
