use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    models::{Transaction, TransactionStatus},
    routes::params::Pagination,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTransactionRequest {
    pub order_id: Uuid,
    pub payment_method: String,
    /// Minor units; must equal the order total.
    pub amount: i64,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TransactionUpdateRequest {
    pub status: String,
    pub external_reference: Option<String>,
    pub failure_reason: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub gateway_response: Option<Value>,
}

impl TransactionUpdateRequest {
    pub fn status(status: TransactionStatus) -> Self {
        Self {
            status: status.as_str().to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct EsewaPaymentRequest {
    /// May also be given as the `transaction_id` query parameter.
    pub transaction_id: Option<Uuid>,
    /// Minor units; when present it must equal the transaction amount.
    pub amount: Option<i64>,
    pub product_code: String,
    pub product_name: String,
    pub success_url: Option<String>,
    pub failure_url: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TransactionIdQuery {
    pub transaction_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EsewaCallbackQuery {
    /// Base64-encoded JSON sent by the gateway on redirect.
    pub data: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TransactionQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
}

impl TransactionQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TransactionList {
    pub items: Vec<Transaction>,
}
