use axum::{Router, http::Uri, routing::get};

use crate::{error::AppError, state::AppState};

pub mod auth;
pub mod books;
pub mod categories;
pub mod doc;
pub mod health;
pub mod orders;
pub mod params;
pub mod transactions;

// Build the API router without binding state; it will be provided at the top level.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::router())
        .nest("/categories", categories::router())
        .nest("/books", books::router())
        .nest("/orders", orders::router())
        .nest("/transactions", transactions::router())
}

/// Health, `/api` and the docs UI with state bound. Transport layers are added by the binary.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", create_api_router())
        .merge(doc::scalar_docs())
        .fallback(not_found)
        .with_state(state)
}

async fn not_found(uri: Uri) -> AppError {
    tracing::debug!(path = %uri.path(), "no route");
    AppError::not_found("Route")
}
