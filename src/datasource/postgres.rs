//! Postgres data source.
//!
//! Statements are prepared (and cached per connection) so the server's
//! inferred placeholder types are known before binding. Each [`ParamValue`]
//! is then converted to the Rust type the placeholder expects.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::Pool;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use bytes::BytesMut;
use tokio_postgres::types::{to_sql_checked, Format, IsNull, ToSql, Type};
use tokio_postgres::{CancelToken, NoTls, Row};
use tracing::debug;

use super::DataSource;
use crate::execution::ExecutionError;
use crate::value::{ParamValue, Record, DATE_FORMAT};

fn datasource_error(e: impl std::fmt::Display) -> ExecutionError {
    ExecutionError::DataSource(e.to_string())
}

/// A string sent in Postgres text format, so the server parses it for
/// whatever type the placeholder has (uuid, inet, int4, ...).
#[derive(Debug, Clone, PartialEq)]
struct TextFormat(Option<String>);

impl ToSql for TextFormat {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match &self.0 {
            Some(text) => {
                out.extend_from_slice(text.as_bytes());
                Ok(IsNull::No)
            }
            None => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}

/// A bound argument, typed for its placeholder.
#[derive(Debug, Clone, PartialEq)]
enum PgArg {
    Bool(Option<bool>),
    Int2(Option<i16>),
    Int4(Option<i32>),
    Int8(Option<i64>),
    Float4(Option<f32>),
    Float8(Option<f64>),
    Numeric(Option<Decimal>),
    Text(Option<String>),
    Date(Option<NaiveDate>),
    Timestamp(Option<NaiveDateTime>),
    TimestampTz(Option<DateTime<Utc>>),
    Json(Option<Value>),
    /// Any other placeholder type, server-side parsed
    Raw(TextFormat),
}

impl PgArg {
    fn as_tosql(&self) -> &(dyn ToSql + Sync) {
        match self {
            PgArg::Bool(value) => value,
            PgArg::Int2(value) => value,
            PgArg::Int4(value) => value,
            PgArg::Int8(value) => value,
            PgArg::Float4(value) => value,
            PgArg::Float8(value) => value,
            PgArg::Numeric(value) => value,
            PgArg::Text(value) => value,
            PgArg::Date(value) => value,
            PgArg::Timestamp(value) => value,
            PgArg::TimestampTz(value) => value,
            PgArg::Json(value) => value,
            PgArg::Raw(value) => value,
        }
    }

    /// A typed NULL for `ty`
    fn null(ty: &Type) -> Self {
        match *ty {
            Type::BOOL => PgArg::Bool(None),
            Type::INT2 => PgArg::Int2(None),
            Type::INT4 => PgArg::Int4(None),
            Type::INT8 => PgArg::Int8(None),
            Type::FLOAT4 => PgArg::Float4(None),
            Type::FLOAT8 => PgArg::Float8(None),
            Type::NUMERIC => PgArg::Numeric(None),
            Type::DATE => PgArg::Date(None),
            Type::TIMESTAMP => PgArg::Timestamp(None),
            Type::TIMESTAMPTZ => PgArg::TimestampTz(None),
            Type::JSON | Type::JSONB => PgArg::Json(None),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => PgArg::Text(None),
            _ => PgArg::Raw(TextFormat(None)),
        }
    }

    /// Convert `value` for a placeholder of type `ty`.
    fn bind(value: Option<&ParamValue>, ty: &Type) -> Result<Self, String> {
        let Some(value) = value else {
            return Ok(PgArg::null(ty));
        };

        let arg = match (ty, value) {
            (&Type::TEXT | &Type::VARCHAR | &Type::BPCHAR | &Type::NAME | &Type::UNKNOWN, _) => {
                PgArg::Text(Some(value.to_string()))
            }
            // Strings (and unrecognized catalog types) go through as text
            (_, ParamValue::String(s)) => PgArg::Raw(TextFormat(Some(s.clone()))),
            (&Type::BOOL, ParamValue::Boolean(b)) => PgArg::Bool(Some(*b)),
            (&Type::INT2, _) => PgArg::Int2(Some(narrow(value, ty)?)),
            (&Type::INT4, _) => PgArg::Int4(Some(narrow(value, ty)?)),
            (&Type::INT8, ParamValue::Integer(i)) => PgArg::Int8(Some(*i)),
            (&Type::FLOAT4, ParamValue::Number(n)) => PgArg::Float4(Some(*n as f32)),
            (&Type::FLOAT4, ParamValue::Integer(i)) => PgArg::Float4(Some(*i as f32)),
            (&Type::FLOAT8, ParamValue::Number(n)) => PgArg::Float8(Some(*n)),
            (&Type::FLOAT8, ParamValue::Integer(i)) => PgArg::Float8(Some(*i as f64)),
            (&Type::NUMERIC, ParamValue::Integer(i)) => PgArg::Numeric(Some(Decimal::from(*i))),
            (&Type::NUMERIC, ParamValue::Number(n)) => PgArg::Numeric(Some(
                Decimal::try_from(*n).map_err(|e| format!("{n} is not representable as {ty}: {e}"))?,
            )),
            (&Type::DATE, ParamValue::Date(d)) => PgArg::Date(Some(*d)),
            (&Type::DATE, ParamValue::DateTime(dt)) => PgArg::Date(Some(dt.date())),
            (&Type::TIMESTAMP, ParamValue::DateTime(dt)) => PgArg::Timestamp(Some(*dt)),
            (&Type::TIMESTAMP, ParamValue::Date(d)) => {
                PgArg::Timestamp(Some(d.and_time(NaiveTime::MIN)))
            }
            (&Type::TIMESTAMPTZ, ParamValue::DateTime(dt)) => PgArg::TimestampTz(Some(dt.and_utc())),
            (&Type::TIMESTAMPTZ, ParamValue::Date(d)) => {
                PgArg::TimestampTz(Some(d.and_time(NaiveTime::MIN).and_utc()))
            }
            (&Type::JSON | &Type::JSONB, _) => PgArg::Json(Some(value.to_json())),
            _ => {
                return Err(format!(
                    "cannot bind {} value to {ty} parameter",
                    value.param_type()
                ))
            }
        };
        Ok(arg)
    }
}

fn narrow<T: TryFrom<i64>>(value: &ParamValue, ty: &Type) -> Result<T, String> {
    match value {
        ParamValue::Integer(i) => {
            T::try_from(*i).map_err(|_| format!("value {i} out of range for {ty}"))
        }
        other => Err(format!(
            "cannot bind {} value to {ty} parameter",
            other.param_type()
        )),
    }
}

fn float_value(v: f64) -> Value {
    Number::from_f64(v).map_or(Value::Null, Value::Number)
}

/// JSON number when representable, otherwise the exact decimal text.
fn decimal_value(d: Decimal) -> Value {
    if d.fract().is_zero() {
        if let Some(i) = d.to_i64() {
            return Value::from(i);
        }
    }
    d.to_f64()
        .and_then(Number::from_f64)
        .map_or_else(|| Value::String(d.to_string()), Value::Number)
}

fn column_value(row: &Row, idx: usize, ty: &Type) -> Result<Value, tokio_postgres::Error> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(Value::from),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(Value::from),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::from),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| float_value(f64::from(v))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(float_value),
        Type::NUMERIC => row.try_get::<_, Option<Decimal>>(idx)?.map(decimal_value),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .map(|d| Value::String(d.format(DATE_FORMAT).to_string())),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|dt| Value::String(dt.to_rfc3339())),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(idx)?,
        _ => row.try_get::<_, Option<String>>(idx)?.map(Value::String),
    };
    Ok(value.unwrap_or(Value::Null))
}

fn row_to_record(row: &Row) -> Result<Record, ExecutionError> {
    let mut record = Record::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = column_value(row, idx, column.type_()).map_err(|e| {
            ExecutionError::DataSource(format!(
                "cannot decode column {} of type {}: {e}",
                column.name(),
                column.type_()
            ))
        })?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

/// Sends a server-side cancel if dropped while the statement is running.
struct CancelOnDrop {
    token: Option<CancelToken>,
}

impl CancelOnDrop {
    fn arm(token: CancelToken) -> Self {
        CancelOnDrop { token: Some(token) }
    }

    fn disarm(&mut self) {
        self.token = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                match token.cancel_query(NoTls).await {
                    Ok(()) => debug!("statement_cancelled"),
                    Err(e) => debug!(error = %e, "statement_cancel_failed"),
                }
            });
        }
    }
}

/// Pooled Postgres executor.
#[derive(Clone)]
pub struct PgDataSource {
    pool: Pool,
}

impl PgDataSource {
    pub fn new(pool: Pool) -> Self {
        PgDataSource { pool }
    }
}

#[async_trait]
impl DataSource for PgDataSource {
    async fn run(&self, sql: &str, args: &[Option<ParamValue>]) -> Result<Vec<Record>, ExecutionError> {
        let client = self.pool.get().await.map_err(datasource_error)?;
        let statement = client.prepare_cached(sql).await.map_err(datasource_error)?;

        let types = statement.params();
        if types.len() != args.len() {
            return Err(ExecutionError::DataSource(format!(
                "statement expects {} parameters, {} bound",
                types.len(),
                args.len()
            )));
        }

        let bound = args
            .iter()
            .zip(types)
            .map(|(value, ty)| PgArg::bind(value.as_ref(), ty))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ExecutionError::DataSource)?;
        let params: Vec<&(dyn ToSql + Sync)> = bound.iter().map(PgArg::as_tosql).collect();

        let mut cancel = CancelOnDrop::arm(client.cancel_token());
        let result = client.query(&statement, &params).await;
        cancel.disarm();

        let rows = result.map_err(datasource_error)?;
        debug!(rows = rows.len(), "statement_completed");
        rows.iter().map(row_to_record).collect()
    }
}
