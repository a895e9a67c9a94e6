//! QueryBase Protocol
//!
//! HTTP surface over the query engine.
//!
//! # Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                    QueryBase HTTP API                       |
//! +-------------------------------------------------------------+
//! |  GET /health            liveness + uptime                   |
//! |  GET /api/queries       active catalog entries              |
//! |  GET /api/query/:slug   execute with query-string params    |
//! +-------------------------------------------------------------+
//! |  Handler -> QueryEngine -> Catalog / Cache / DataSource     |
//! +-------------------------------------------------------------+
//! ```
//!
//! # Module Structure
//!
//! - `handler` - Shared request state
//! - `rest` - Routing, DTOs, error mapping and server lifecycle

pub mod handler;
pub mod rest;

pub use handler::Handler;

/// Path prefix of per-query endpoints
pub const QUERY_ENDPOINT_PREFIX: &str = "/api/query/";
