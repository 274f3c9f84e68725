//! Postgres-backed articles and tags.

pub mod connection;
pub mod models;
pub mod repositories;

pub use connection::DbPool;
