//! # Database Module
//!
//! Postgres integration using tokio-postgres with a deadpool connection pool.
//! Includes connection management, models, migrations and the storage traits
//! the services depend on.

pub mod connection;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod store;

pub use connection::{DatabaseConfig, DatabaseConnection};
pub use models::*;
pub use store::{EventStore, PortfolioStore, SagaStore};
