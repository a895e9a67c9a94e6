//! REST API Error Types
//!
//! Maps engine failures to status codes and JSON bodies.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::dto::ErrorBody;
use crate::execution::{EngineError, ValidationErrors};

/// REST API error that can be returned from handlers
#[derive(Debug)]
pub struct RestError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl RestError {
    pub fn not_found(slug: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorBody {
                error: "query not found".to_string(),
                slug: Some(slug.into()),
                details: Some(details.into()),
                ..Default::default()
            },
        }
    }

    pub fn validation(slug: impl Into<String>, errors: &ValidationErrors) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                error: "invalid parameters".to_string(),
                slug: Some(slug.into()),
                validation: Some(errors.as_map().clone()),
                ..Default::default()
            },
        }
    }

    pub fn execution(slug: impl Into<String>, details: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorBody {
                error: "query execution failed".to_string(),
                slug: Some(slug.into()),
                details: Some(details.into()),
                duration: Some(format!("{duration:?}")),
                ..Default::default()
            },
        }
    }

    pub fn catalog(slug: Option<String>, details: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorBody {
                error: "query catalog unavailable".to_string(),
                slug,
                details: Some(details.into()),
                ..Default::default()
            },
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorBody {
                error: message.into(),
                ..Default::default()
            },
        }
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

// Conversions from domain errors
impl From<EngineError> for RestError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound { slug, details } => RestError::not_found(slug, details),
            EngineError::Validation { slug, errors } => RestError::validation(slug, &errors),
            EngineError::Execution {
                slug,
                source,
                duration,
            } => RestError::execution(slug, source.to_string(), duration),
            EngineError::Catalog { slug, source } => RestError::catalog(slug, source.to_string()),
        }
    }
}
