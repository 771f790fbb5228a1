use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{LoginRequest, LoginResponse, RegisterRequest},
        books::{BookList, CreateBookRequest, UpdateBookRequest},
        categories::{CategoryList, CategoryRequest},
        orders::{CreateOrderRequest, OrderItemRequest, OrderList, UpdateOrderStatusRequest},
        transactions::{
            CreateTransactionRequest, EsewaPaymentRequest, TransactionList,
            TransactionUpdateRequest,
        },
    },
    error::ErrorBody,
    models::{
        Book, Category, Order, OrderItem, OrderStatus, PaymentMethod, Role, Transaction,
        TransactionStatus, User,
    },
    response::{ApiResponse, Meta},
    routes::{auth, books, categories, health, orders, params, transactions},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "Bookstore API", description = "Catalog, orders and eSewa payments"),
    paths(
        health::health_check,
        auth::register,
        auth::login,
        auth::me,
        categories::list_categories,
        categories::create_category,
        categories::get_category,
        categories::update_category,
        categories::delete_category,
        books::list_books,
        books::create_book,
        books::get_book,
        books::update_book,
        books::delete_book,
        orders::list_orders,
        orders::create_order,
        orders::get_order,
        orders::update_order_status,
        orders::delete_order,
        transactions::create_transaction,
        transactions::list_transactions,
        transactions::my_transactions,
        transactions::get_transaction,
        transactions::get_by_order,
        transactions::update_status,
        transactions::delete_transaction,
        transactions::initiate_esewa,
        transactions::verify_esewa,
        transactions::esewa_callback
    ),
    components(
        schemas(
            User,
            Role,
            Category,
            Book,
            Order,
            OrderItem,
            OrderStatus,
            Transaction,
            TransactionStatus,
            PaymentMethod,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            CategoryRequest,
            CategoryList,
            CreateBookRequest,
            UpdateBookRequest,
            BookList,
            CreateOrderRequest,
            OrderItemRequest,
            UpdateOrderStatusRequest,
            OrderList,
            CreateTransactionRequest,
            TransactionUpdateRequest,
            EsewaPaymentRequest,
            TransactionList,
            params::SortOrder,
            health::HealthData,
            ErrorBody,
            Meta,
            ApiResponse<User>,
            ApiResponse<Book>,
            ApiResponse<Order>,
            ApiResponse<Transaction>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Categories", description = "Category endpoints"),
        (name = "Books", description = "Book endpoints"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Transactions", description = "Payment transactions and eSewa callbacks"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_payment_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/transactions/esewa/verify"));
        assert!(doc.paths.paths.contains_key("/api/orders/{id}/status"));
        assert!(doc
            .components
            .as_ref()
            .is_some_and(|c| c.security_schemes.contains_key("bearer_auth")));
    }
}
