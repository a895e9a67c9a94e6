//! REST API Data Transfer Objects
//!
//! Response bodies for the REST API endpoints.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::catalog::{ParameterDefinition, QueryDefinition};
use crate::execution::{QueryOutcome, ResolvedParams};
use crate::protocol::QUERY_ENDPOINT_PREFIX;
use crate::value::Record;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthDto {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub query_count: u64,
}

/// One catalog entry as advertised by `GET /api/queries`
#[derive(Debug, Serialize)]
pub struct QueryEndpointDto {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub endpoint: String,
    pub cache_ttl: u64,
    pub parameters: Vec<ParameterDefinition>,
}

impl From<&QueryDefinition> for QueryEndpointDto {
    fn from(def: &QueryDefinition) -> Self {
        QueryEndpointDto {
            slug: def.slug.clone(),
            name: def.name.clone(),
            description: def.description.clone(),
            endpoint: format!("{QUERY_ENDPOINT_PREFIX}{}", def.slug),
            cache_ttl: def.cache_ttl,
            parameters: def.parameters.clone(),
        }
    }
}

/// List of active queries
#[derive(Debug, Serialize)]
pub struct QueryListDto {
    pub queries: Vec<QueryEndpointDto>,
    pub count: usize,
}

/// Execution metadata
#[derive(Debug, Serialize)]
pub struct QueryMetaDto {
    pub slug: String,
    pub name: String,
    pub count: usize,
    pub cache_hit: bool,
    pub duration: String,
    pub parameters: ResolvedParams,
}

/// Successful `GET /api/query/:slug`
#[derive(Debug, Serialize)]
pub struct QueryResultDto {
    pub data: Vec<Record>,
    pub meta: QueryMetaDto,
}

impl From<QueryOutcome> for QueryResultDto {
    fn from(outcome: QueryOutcome) -> Self {
        let meta = QueryMetaDto {
            slug: outcome.definition.slug.clone(),
            name: outcome.definition.name.clone(),
            count: outcome.records.len(),
            cache_hit: outcome.cache_hit,
            duration: format!("{:?}", outcome.duration),
            parameters: outcome.parameters,
        };
        QueryResultDto {
            data: outcome.records,
            meta,
        }
    }
}

/// Error body; absent fields are omitted
#[derive(Debug, Default, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}
