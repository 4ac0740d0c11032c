mod database;
mod error;
mod schema;
mod sqlite;

pub use database::Database;
pub use error::StoreError;
pub use sqlite::SqliteStorage;
