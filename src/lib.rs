pub mod api;
pub mod app;
pub mod attribution;
pub mod clock;
pub mod config;
pub mod cursor;
pub mod error;
pub mod experiments;
pub mod ingest;
pub mod models;
pub mod realtime;
pub mod reporting;
pub mod storage;
pub mod tasks;

pub use app::{open_store, App};
