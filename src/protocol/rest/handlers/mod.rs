//! REST API Handlers
//!
//! Contains all HTTP endpoint handlers organized by domain.

pub mod admin;
pub mod query;
