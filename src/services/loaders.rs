//! Turns stored rows into the linked API graph: books carry their category, orders carry
//! their user and items (each with its book), transactions carry their order and user.
//! Every loader batches its lookups by id and works on any connection, including an open
//! database transaction.

use std::{collections::HashMap, str::FromStr};

use chrono::Utc;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::{
    entity::{
        books::{Column as BookCol, Entity as Books, Model as BookModel},
        categories::{Column as CategoryCol, Entity as Categories, Model as CategoryModel},
        order_items::{Column as OrderItemCol, Entity as OrderItems, Model as OrderItemModel},
        orders::{Column as OrderCol, Entity as Orders, Model as OrderModel},
        transactions::Model as TransactionModel,
        users::{Column as UserCol, Entity as Users, Model as UserModel},
    },
    error::{AppError, AppResult},
    models::{Book, Category, Order, OrderItem, Transaction, User},
};

fn stored<T: FromStr>(column: &str, raw: &str) -> AppResult<T> {
    raw.parse::<T>().map_err(|_| {
        AppError::Internal(anyhow::anyhow!("unexpected stored {column} value: {raw}"))
    })
}

fn unique_ids(ids: impl IntoIterator<Item = Uuid>) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

pub fn user_from_entity(model: UserModel) -> AppResult<User> {
    Ok(User {
        id: model.id,
        role: stored("role", &model.role)?,
        name: model.name,
        email: model.email,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

pub fn category_from_entity(model: CategoryModel) -> Category {
    Category {
        id: model.id,
        name: model.name,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn book_from_entity(model: BookModel, category: Option<Category>) -> Book {
    Book {
        id: model.id,
        title: model.title,
        author: model.author,
        description: model.description,
        price: model.price,
        stock: model.stock,
        category_id: model.category_id,
        category,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

async fn load_users<C: ConnectionTrait>(
    conn: &C,
    ids: impl IntoIterator<Item = Uuid>,
) -> AppResult<HashMap<Uuid, User>> {
    let ids = unique_ids(ids);
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    Users::find()
        .filter(UserCol::Id.is_in(ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|u| user_from_entity(u).map(|u| (u.id, u)))
        .collect()
}

pub async fn resolve_books<C: ConnectionTrait>(
    conn: &C,
    books: Vec<BookModel>,
) -> AppResult<Vec<Book>> {
    let ids = unique_ids(books.iter().map(|b| b.category_id));
    let categories: HashMap<Uuid, Category> = if ids.is_empty() {
        HashMap::new()
    } else {
        Categories::find()
            .filter(CategoryCol::Id.is_in(ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|c| (c.id, category_from_entity(c)))
            .collect()
    };

    Ok(books
        .into_iter()
        .map(|b| {
            let category = categories.get(&b.category_id).cloned();
            book_from_entity(b, category)
        })
        .collect())
}

pub async fn resolve_book<C: ConnectionTrait>(conn: &C, book: BookModel) -> AppResult<Book> {
    resolve_books(conn, vec![book])
        .await?
        .pop()
        .ok_or_else(|| AppError::not_found("Book"))
}

pub async fn resolve_orders<C: ConnectionTrait>(
    conn: &C,
    orders: Vec<OrderModel>,
) -> AppResult<Vec<Order>> {
    if orders.is_empty() {
        return Ok(Vec::new());
    }

    let users = load_users(conn, orders.iter().map(|o| o.user_id)).await?;

    let items: Vec<OrderItemModel> = OrderItems::find()
        .filter(OrderItemCol::OrderId.is_in(orders.iter().map(|o| o.id).collect::<Vec<_>>()))
        .all(conn)
        .await?;

    let book_ids = unique_ids(items.iter().map(|i| i.book_id));
    let book_models = if book_ids.is_empty() {
        Vec::new()
    } else {
        Books::find()
            .filter(BookCol::Id.is_in(book_ids))
            .all(conn)
            .await?
    };
    let books: HashMap<Uuid, Book> = resolve_books(conn, book_models)
        .await?
        .into_iter()
        .map(|b| (b.id, b))
        .collect();

    let mut items_by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
    for item in items {
        items_by_order
            .entry(item.order_id)
            .or_default()
            .push(OrderItem {
                id: item.id,
                order_id: item.order_id,
                book_id: item.book_id,
                book: books.get(&item.book_id).cloned(),
                quantity: item.quantity,
                price: item.price,
            });
    }

    orders
        .into_iter()
        .map(|o| {
            Ok(Order {
                id: o.id,
                user_id: o.user_id,
                user: users.get(&o.user_id).cloned(),
                status: stored("order status", &o.status)?,
                total_price: o.total_price,
                items: items_by_order.remove(&o.id).unwrap_or_default(),
                created_at: o.created_at.with_timezone(&Utc),
                updated_at: o.updated_at.with_timezone(&Utc),
            })
        })
        .collect()
}

pub async fn resolve_order<C: ConnectionTrait>(conn: &C, order: OrderModel) -> AppResult<Order> {
    resolve_orders(conn, vec![order])
        .await?
        .pop()
        .ok_or_else(|| AppError::not_found("Order"))
}

pub async fn resolve_transactions<C: ConnectionTrait>(
    conn: &C,
    transactions: Vec<TransactionModel>,
) -> AppResult<Vec<Transaction>> {
    if transactions.is_empty() {
        return Ok(Vec::new());
    }

    let users = load_users(conn, transactions.iter().map(|t| t.user_id)).await?;
    let order_models = Orders::find()
        .filter(OrderCol::Id.is_in(unique_ids(transactions.iter().map(|t| t.order_id))))
        .all(conn)
        .await?;
    let mut orders: HashMap<Uuid, Order> = resolve_orders(conn, order_models)
        .await?
        .into_iter()
        .map(|o| (o.id, o))
        .collect();

    transactions
        .into_iter()
        .map(|t| {
            Ok(Transaction {
                id: t.id,
                order_id: t.order_id,
                order: orders.remove(&t.order_id),
                user_id: t.user_id,
                user: users.get(&t.user_id).cloned(),
                payment_method: stored("payment method", &t.payment_method)?,
                amount: t.amount,
                status: stored("transaction status", &t.status)?,
                external_reference: t.external_reference,
                payment_url: t.payment_url,
                merchant_code: t.merchant_code,
                product_code: t.product_code,
                product_name: t.product_name,
                gateway_response: t.gateway_response,
                failure_reason: t.failure_reason,
                created_at: t.created_at.with_timezone(&Utc),
                updated_at: t.updated_at.with_timezone(&Utc),
            })
        })
        .collect()
}

pub async fn resolve_transaction<C: ConnectionTrait>(
    conn: &C,
    transaction: TransactionModel,
) -> AppResult<Transaction> {
    resolve_transactions(conn, vec![transaction])
        .await?
        .pop()
        .ok_or_else(|| AppError::not_found("Transaction"))
}
