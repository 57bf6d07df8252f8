pub mod postgres;
pub mod rows;
pub mod sqlite;
pub mod trait_def;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;
pub use trait_def::{EventStore, StateChange, TestPageKey};
