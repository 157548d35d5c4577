//! Data layer module
//!
//! Handles all data persistence and caching:
//! - SQLite database operations
//! - Local emoji cache (volatile)

mod cache;
mod database;
mod models;

pub use cache::EmojiCache;
pub use database::{Database, DatabaseError};
pub use models::*;

#[cfg(test)]
mod database_test;
