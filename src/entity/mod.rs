pub mod audit_logs;
pub mod books;
pub mod categories;
pub mod order_items;
pub mod orders;
pub mod transactions;
pub mod users;

pub use audit_logs::Entity as AuditLogs;
pub use books::Entity as Books;
pub use categories::Entity as Categories;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use transactions::Entity as Transactions;
pub use users::Entity as Users;
