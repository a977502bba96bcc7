pub mod charges;
pub mod database;
pub mod invoices;
pub mod metrics;
pub mod plans;
pub mod subscriptions;

pub use database::Database;
pub use invoices::BusinessProfile;
