//! # sqlgate-http — the gateway boundary
//!
//! Consumes gateway-shaped events (method, path, query string, body,
//! authorizer context), turns them into canonical operations, runs them
//! through the DAO or the batch orchestrator inside a transaction, and
//! shapes the response envelope. Field-name case conversion and scope
//! enforcement happen here and only here; everything behind this crate
//! speaks snake_case and permission tables.

pub mod adapter;
pub mod case;
pub mod event;
pub mod scope;
pub mod service;

pub use adapter::{marshal, unmarshal};
pub use event::{GatewayEvent, GatewayResponse, RequestContext};
pub use service::GatewayService;
