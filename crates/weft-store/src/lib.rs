//! # weft-store
//!
//! Durable SQLite tier for the Weft event core.
//!
//! This crate owns everything that touches disk:
//!
//! - **Connections**: `r2d2`-pooled `rusqlite` connections with WAL mode,
//!   foreign keys, and busy-timeout pragmas
//! - **Migrations**: version-tracked schema evolution embedded at compile time
//! - **Repositories**: stateless structs over `&Connection` for contexts, the
//!   recorded event log, rule mirrors, and the rule audit trail
//!
//! Higher layers decide *when* to read and write (single-writer queues,
//! `spawn_blocking` reads); this crate only knows *how*.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod migrations;
pub mod repositories;
pub mod row_types;

pub use connection::{ConnectionConfig, ConnectionPool, PooledConnection};
pub use errors::{Result, StoreError};
