//! SQLite persistence for profiles, credit entries, and generation jobs.

pub mod database;

pub use database::{Database, PoolConfig, SharedDatabase};
