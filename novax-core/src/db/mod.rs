//! Database layer for novax
//!
//! This module provides the durable session ledger using SQLite with:
//! - Schema migrations
//! - Repository queries implementing [`SessionLedger`](crate::SessionLedger)

pub mod repo;
pub mod schema;

pub use repo::Database;
