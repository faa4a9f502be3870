//! Submission writes into dynamic tables.
//!
//! The EAV store keeps raw JSON values; before a value lands in a typed
//! column it goes through `coerce_value`. The same coercion path serves
//! ordinary inserts and the auditor's backfill, so the two representations
//! cannot drift by construction.
//!
//! Coercion rules worth knowing:
//! - geo-points arrive as (latitude, longitude) but PostgreSQL's `point`
//!   takes x (longitude) first, so the pair is reversed on the way in;
//! - a single-element selection array flattens to scalar text;
//! - a multi-element selection array joins with ", ".

use crate::error::SchemaError;
use crate::forms::FieldKind;
use crate::schema::{quote_ident, TableMapping};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres};
use std::collections::HashMap;
use tracing::debug;

/// Multi-choice values are joined with this fixed delimiter.
pub const CHOICE_DELIMITER: &str = ", ";

/// A JSON value coerced to its storage representation.
#[derive(Debug, Clone, PartialEq)]
pub enum CoercedValue {
    /// NULL, typed by the column's semantic kind.
    Null(FieldKind),
    Text(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(DateTime<Utc>),
    /// Longitude first: PostgreSQL point order, not GPS order.
    Point { lon: f64, lat: f64 },
}

/// Coerce one submitted JSON value to the storage type of its field.
pub fn coerce_value(
    field_id: &str,
    kind: FieldKind,
    value: &Value,
) -> Result<CoercedValue, SchemaError> {
    if value.is_null() {
        return Ok(CoercedValue::Null(kind));
    }

    let fail = |reason: String| SchemaError::ValueCoercion {
        field: field_id.to_string(),
        kind: kind.name(),
        reason,
    };

    match kind {
        FieldKind::ShortText
        | FieldKind::LongText
        | FieldKind::Email
        | FieldKind::Phone
        | FieldKind::Url
        | FieldKind::FileRef
        | FieldKind::ImageRef
        | FieldKind::Region
        | FieldKind::Facility => Ok(CoercedValue::Text(scalar_text(value))),

        FieldKind::SingleChoice | FieldKind::MultiChoice => match value {
            Value::Array(items) if items.len() == 1 => {
                Ok(CoercedValue::Text(scalar_text(&items[0])))
            }
            Value::Array(items) => Ok(CoercedValue::Text(
                items
                    .iter()
                    .map(scalar_text)
                    .collect::<Vec<_>>()
                    .join(CHOICE_DELIMITER),
            )),
            other => Ok(CoercedValue::Text(scalar_text(other))),
        },

        FieldKind::Number | FieldKind::Slider => match value {
            Value::Number(n) => n
                .as_f64()
                .map(CoercedValue::Float)
                .ok_or_else(|| fail(format!("{} is not representable as f64", n))),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(CoercedValue::Float)
                .map_err(|e| fail(format!("{:?}: {}", s, e))),
            other => Err(fail(format!("expected a number, got {}", other))),
        },

        FieldKind::Rating => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.round() as i64))
                .map(CoercedValue::Integer)
                .ok_or_else(|| fail(format!("{} is not representable as an integer", n))),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(CoercedValue::Integer)
                .map_err(|e| fail(format!("{:?}: {}", s, e))),
            other => Err(fail(format!("expected an integer, got {}", other))),
        },

        FieldKind::Date => {
            let s = value
                .as_str()
                .ok_or_else(|| fail(format!("expected a date string, got {}", value)))?;
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(CoercedValue::Date)
                .map_err(|e| fail(format!("{:?}: {}", s, e)))
        }

        FieldKind::Time => {
            let s = value
                .as_str()
                .ok_or_else(|| fail(format!("expected a time string, got {}", value)))?;
            let s = s.trim();
            NaiveTime::parse_from_str(s, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
                .map(CoercedValue::Time)
                .map_err(|e| fail(format!("{:?}: {}", s, e)))
        }

        FieldKind::Datetime => {
            let s = value
                .as_str()
                .ok_or_else(|| fail(format!("expected a datetime string, got {}", value)))?;
            DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| CoercedValue::Timestamp(dt.with_timezone(&Utc)))
                .map_err(|e| fail(format!("{:?}: {}", s, e)))
        }

        FieldKind::GeoPoint => {
            let (lat, lon) = match value {
                Value::Array(pair) if pair.len() == 2 => {
                    let lat = pair[0]
                        .as_f64()
                        .ok_or_else(|| fail(format!("latitude {} is not a number", pair[0])))?;
                    let lon = pair[1]
                        .as_f64()
                        .ok_or_else(|| fail(format!("longitude {} is not a number", pair[1])))?;
                    (lat, lon)
                }
                Value::Object(map) => {
                    let lat = map
                        .get("lat")
                        .and_then(Value::as_f64)
                        .ok_or_else(|| fail("missing numeric \"lat\"".to_string()))?;
                    let lon = map
                        .get("lng")
                        .or_else(|| map.get("lon"))
                        .and_then(Value::as_f64)
                        .ok_or_else(|| fail("missing numeric \"lng\"".to_string()))?;
                    (lat, lon)
                }
                other => {
                    return Err(fail(format!(
                        "expected [lat, lon] or {{lat, lng}}, got {}",
                        other
                    )))
                }
            };
            Ok(CoercedValue::Point { lon, lat })
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Insert one main-form submission row. `values` maps field id to the
/// submitted JSON value; fields without a value are left NULL by omission.
pub async fn insert_main_form_row(
    pool: &PgPool,
    mapping: &TableMapping,
    submission_id: &str,
    username: Option<&str>,
    values: &HashMap<String, Value>,
) -> Result<(), SchemaError> {
    let mut row = vec![
        (
            "id".to_string(),
            CoercedValue::Text(submission_id.to_string()),
        ),
        ("submitted_by".to_string(), owner_value(username)),
    ];
    row.extend(field_values(mapping, values)?);

    execute_insert(pool, &mapping.table_name, row).await?;
    debug!(
        "inserted submission {:?} into {:?}",
        submission_id, mapping.table_name
    );
    Ok(())
}

/// Insert one sub-form row. The parent submission id is enforced by the
/// table's foreign key: a missing parent fails the insert instead of
/// creating an orphan. `main_row_id` carries the actual main-table row id,
/// which can diverge from the EAV parent id operationally.
pub async fn insert_sub_form_row(
    pool: &PgPool,
    mapping: &TableMapping,
    parent_submission_id: &str,
    main_row_id: &str,
    username: Option<&str>,
    values: &HashMap<String, Value>,
    row_index: i32,
) -> Result<(), SchemaError> {
    let mut row = vec![
        (
            "parent_submission_id".to_string(),
            CoercedValue::Text(parent_submission_id.to_string()),
        ),
        (
            "main_row_id".to_string(),
            CoercedValue::Text(main_row_id.to_string()),
        ),
        (
            "row_index".to_string(),
            CoercedValue::Integer(row_index as i64),
        ),
        ("submitted_by".to_string(), owner_value(username)),
    ];
    row.extend(field_values(mapping, values)?);

    execute_insert(pool, &mapping.table_name, row).await?;
    debug!(
        "inserted sub-form row (parent {:?}, index {}) into {:?}",
        parent_submission_id, row_index, mapping.table_name
    );
    Ok(())
}

fn owner_value(username: Option<&str>) -> CoercedValue {
    match username {
        Some(name) => CoercedValue::Text(name.to_string()),
        None => CoercedValue::Null(FieldKind::ShortText),
    }
}

/// Coerce the submitted values this table has columns for, in mapping
/// order. Unknown field ids are ignored; they belong to other scopes.
fn field_values(
    mapping: &TableMapping,
    values: &HashMap<String, Value>,
) -> Result<Vec<(String, CoercedValue)>, SchemaError> {
    let mut row = Vec::new();
    for column in &mapping.columns {
        if let Some(value) = values.get(&column.field_id) {
            let coerced = coerce_value(&column.field_id, column.kind, value)?;
            row.push((column.column.clone(), coerced));
        }
    }
    Ok(row)
}

/// Render the INSERT statement. Geo-points expand to a `point($n, $m)`
/// expression with two bound doubles; everything else binds one parameter.
fn build_insert_sql(table: &str, row: &[(String, CoercedValue)]) -> String {
    let columns: Vec<String> = row.iter().map(|(c, _)| quote_ident(c)).collect();

    let mut exprs = Vec::with_capacity(row.len());
    let mut idx = 1;
    for (_, value) in row {
        if is_point(value) {
            exprs.push(format!("point(${}, ${})", idx, idx + 1));
            idx += 2;
        } else {
            exprs.push(format!("${}", idx));
            idx += 1;
        }
    }

    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns.join(", "),
        exprs.join(", ")
    )
}

fn is_point(value: &CoercedValue) -> bool {
    matches!(
        value,
        CoercedValue::Point { .. } | CoercedValue::Null(FieldKind::GeoPoint)
    )
}

async fn execute_insert(
    pool: &PgPool,
    table: &str,
    row: Vec<(String, CoercedValue)>,
) -> Result<(), SchemaError> {
    let sql = build_insert_sql(table, &row);
    let mut query = sqlx::query(&sql);
    for (_, value) in row {
        query = bind_value(query, value);
    }
    query.execute(pool).await?;
    Ok(())
}

fn bind_value(
    query: Query<'_, Postgres, PgArguments>,
    value: CoercedValue,
) -> Query<'_, Postgres, PgArguments> {
    match value {
        CoercedValue::Null(kind) => bind_null(query, kind),
        CoercedValue::Text(s) => query.bind(s),
        CoercedValue::Integer(i) => query.bind(i),
        CoercedValue::Float(f) => query.bind(f),
        CoercedValue::Date(d) => query.bind(d),
        CoercedValue::Time(t) => query.bind(t),
        CoercedValue::Timestamp(ts) => query.bind(ts),
        CoercedValue::Point { lon, lat } => query.bind(lon).bind(lat),
    }
}

/// NULLs must be bound with the column's parameter type; a text-typed NULL
/// does not coerce to date or numeric columns.
fn bind_null(
    query: Query<'_, Postgres, PgArguments>,
    kind: FieldKind,
) -> Query<'_, Postgres, PgArguments> {
    match kind {
        FieldKind::Number | FieldKind::Slider => query.bind(Option::<f64>::None),
        FieldKind::Rating => query.bind(Option::<i64>::None),
        FieldKind::Date => query.bind(Option::<NaiveDate>::None),
        FieldKind::Time => query.bind(Option::<NaiveTime>::None),
        FieldKind::Datetime => query.bind(Option::<DateTime<Utc>>::None),
        // point(NULL, NULL) evaluates to NULL.
        FieldKind::GeoPoint => query.bind(Option::<f64>::None).bind(Option::<f64>::None),
        _ => query.bind(Option::<String>::None),
    }
}
