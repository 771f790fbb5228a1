pub mod auth_service;
pub mod book_service;
pub mod category_service;
pub mod loaders;
pub mod order_service;
pub mod transaction_service;
