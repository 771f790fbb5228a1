use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;

macro_rules! string_enum {
    ($name:ident, $what:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(AppError::BadRequest(format!("invalid {}: {}", $what, s))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Admin,
}

string_enum!(Role, "role", { Customer => "customer", Admin => "admin" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
}

string_enum!(OrderStatus, "order status", {
    Pending => "PENDING",
    Paid => "PAID",
    Cancelled => "CANCELLED",
});

impl OrderStatus {
    /// PENDING may move anywhere; PAID and CANCELLED only accept themselves.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        self == OrderStatus::Pending || self == next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
}

string_enum!(TransactionStatus, "transaction status", {
    Pending => "PENDING",
    Success => "SUCCESS",
    Failed => "FAILED",
    Cancelled => "CANCELLED",
});

impl TransactionStatus {
    pub fn is_settled(self) -> bool {
        self != TransactionStatus::Pending
    }

    /// Settled transactions never move again; re-asserting the same status is allowed.
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        !self.is_settled() || self == next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Esewa,
    Cash,
    Card,
}

string_enum!(PaymentMethod, "payment method", {
    Esewa => "ESEWA",
    Cash => "CASH",
    Card => "CARD",
});

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Prices are minor currency units (paisa).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub description: Option<String>,
    pub price: i64,
    pub stock: i32,
    pub category_id: Uuid,
    pub category: Option<Category>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub book_id: Uuid,
    pub book: Option<Book>,
    pub quantity: i32,
    pub price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user: Option<User>,
    pub status: OrderStatus,
    pub total_price: i64,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order: Option<Order>,
    pub user_id: Uuid,
    pub user: Option<User>,
    pub payment_method: PaymentMethod,
    pub amount: i64,
    pub status: TransactionStatus,
    pub external_reference: Option<String>,
    pub payment_url: Option<String>,
    pub merchant_code: Option<String>,
    pub product_code: Option<String>,
    pub product_name: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub gateway_response: Option<Value>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
