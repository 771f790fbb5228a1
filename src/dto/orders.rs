use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Order, OrderStatus};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct OrderItemRequest {
    pub book_id: Uuid,
    pub quantity: i32,
    /// Unit price in minor units, locked in at order time.
    pub price: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}

impl UpdateOrderStatusRequest {
    pub fn new(status: OrderStatus) -> Self {
        Self {
            status: status.as_str().to_string(),
        }
    }
}
