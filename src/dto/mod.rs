pub mod auth;
pub mod books;
pub mod categories;
pub mod orders;
pub mod transactions;
