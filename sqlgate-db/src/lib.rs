//! # sqlgate-db — driver-free data access
//!
//! This crate defines the **pure abstraction layer** between the gateway
//! and a relational database: the opaque [`Connection`] capability and the
//! [`OperationDao`] that routes an operation to the right SQL handler and
//! materializes row sets into nested maps.
//!
//! No database driver appears here; a concrete backend implements
//! [`Connection`]/[`ConnectionProvider`] over its own pool and wire
//! protocol. The DAO never commits or rolls back - the transaction
//! boundary belongs to the caller.

pub mod connection;
pub mod dao;

pub use connection::{Connection, ConnectionProvider, QueryOutput};
pub use dao::{OperationDao, OperationExecutor};
