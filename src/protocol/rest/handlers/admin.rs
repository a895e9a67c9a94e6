//! Admin Handlers
//!
//! Liveness endpoint.

use std::sync::Arc;

use axum::{Extension, Json};

use crate::protocol::rest::dto::HealthDto;
use crate::protocol::Handler;

/// Health check endpoint
pub async fn health(Extension(handler): Extension<Arc<Handler>>) -> Json<HealthDto> {
    Json(HealthDto {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: handler.uptime_seconds(),
        query_count: handler.total_queries(),
    })
}
