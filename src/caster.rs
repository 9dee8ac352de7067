//! Schema-aware value casting and row validation.
//!
//! [`cast_value`] coerces one raw value against its field declaration;
//! [`schema_validator`] wraps a row iterator and casts every declared field
//! (or an explicit subset) lazily as rows are pulled. Cast failures go
//! through a pluggable [`CastPolicy`]: the default raises a
//! [`ValidationError`], or a handler decides per failure whether the row is
//! kept or dropped. Fields not in the schema pass through unmodified and
//! are warned about once per field per validator instance.

use crate::errors::{CastError, ValidationError};
use crate::schema::{Field, FieldType, ResourceDescriptor};
use crate::stream::RowIter;
use crate::value::{Row, Value};
use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::HashSet;
use std::sync::Arc;

/// Handler invoked on a cast failure. Returning `Ok(true)` keeps the row
/// (the handler may mutate it, e.g. clearing the offending field),
/// `Ok(false)` drops it.
pub type CastHandler =
    Arc<dyn Fn(&str, &mut Row, usize, &CastError) -> Result<bool> + Send + Sync>;

/// What to do when a value fails type coercion.
#[derive(Clone, Default)]
pub enum CastPolicy {
    /// Raise a [`ValidationError`] (the default).
    #[default]
    Raise,
    /// Delegate the keep/drop decision to a handler.
    Handler(CastHandler),
}

impl CastPolicy {
    /// Keep the row with the raw value left in place.
    pub fn ignore() -> Self {
        CastPolicy::Handler(Arc::new(|_, _, _, _| Ok(true)))
    }

    /// Drop any row containing a failing value.
    pub fn drop_row() -> Self {
        CastPolicy::Handler(Arc::new(|_, _, _, _| Ok(false)))
    }

    /// Keep the row but null out the offending field.
    pub fn clear_field() -> Self {
        CastPolicy::Handler(Arc::new(|_, row, _, err| {
            row.insert(err.field.clone(), Value::Null);
            Ok(true)
        }))
    }
}

fn parse_error(field: &Field, value: &Value, reason: impl Into<String>) -> CastError {
    CastError::new(field.name.clone(), field.field_type, value.clone(), reason)
}

fn normalize_numeric_string(field: &Field, raw: &str) -> String {
    let mut s = raw.trim().to_string();
    if let Some(g) = field.group_char {
        s = s.replace(g, "");
    }
    if let Some(d) = field.decimal_char {
        s = s.replace(d, ".");
    }
    s
}

fn cast_date(field: &Field, s: &str) -> Option<NaiveDate> {
    match field.format.as_deref() {
        Some(fmt) if fmt != "any" && fmt != "default" => NaiveDate::parse_from_str(s, fmt).ok(),
        _ => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
    }
}

fn cast_time(field: &Field, s: &str) -> Option<NaiveTime> {
    match field.format.as_deref() {
        Some(fmt) if fmt != "any" && fmt != "default" => NaiveTime::parse_from_str(s, fmt).ok(),
        _ => NaiveTime::parse_from_str(s, "%H:%M:%S%.f").ok(),
    }
}

fn cast_datetime(field: &Field, s: &str) -> Option<NaiveDateTime> {
    match field.format.as_deref() {
        Some(fmt) if fmt != "any" && fmt != "default" => NaiveDateTime::parse_from_str(s, fmt).ok(),
        _ => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
            .ok(),
    }
}

const TRUE_VALUES: [&str; 4] = ["true", "True", "TRUE", "1"];
const FALSE_VALUES: [&str; 4] = ["false", "False", "FALSE", "0"];

/// Cast one raw value against its field declaration. Casting a value
/// already of the declared type is the identity.
pub fn cast_value(field: &Field, value: Value, missing_values: &[String]) -> Result<Value, CastError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    if let Value::String(s) = &value {
        if missing_values.iter().any(|m| m == s) {
            return Ok(Value::Null);
        }
    }
    match field.field_type {
        FieldType::Any => Ok(value),
        FieldType::String => match value {
            v @ Value::String(_) => Ok(v),
            other => Err(parse_error(field, &other, format!("expected string, got {}", other.type_name()))),
        },
        FieldType::Integer => match value {
            v @ Value::Integer(_) => Ok(v),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                Ok(Value::Integer(n as i64))
            }
            Value::String(s) => normalize_numeric_string(field, &s)
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|e| parse_error(field, &Value::String(s), e.to_string())),
            other => Err(parse_error(field, &other, "not an integer")),
        },
        FieldType::Number => match value {
            v @ Value::Number(_) => Ok(v),
            Value::Integer(i) => Ok(Value::Number(i as f64)),
            Value::String(s) => normalize_numeric_string(field, &s)
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|e| parse_error(field, &Value::String(s), e.to_string())),
            other => Err(parse_error(field, &other, "not a number")),
        },
        FieldType::Boolean => match value {
            v @ Value::Bool(_) => Ok(v),
            Value::String(s) => {
                if TRUE_VALUES.contains(&s.as_str()) {
                    Ok(Value::Bool(true))
                } else if FALSE_VALUES.contains(&s.as_str()) {
                    Ok(Value::Bool(false))
                } else {
                    Err(parse_error(field, &Value::String(s), "not a boolean"))
                }
            }
            other => Err(parse_error(field, &other, "not a boolean")),
        },
        FieldType::Date => match value {
            v @ Value::Date(_) => Ok(v),
            Value::DateTime(dt) => Ok(Value::Date(dt.date())),
            Value::String(s) => cast_date(field, &s)
                .map(Value::Date)
                .ok_or_else(|| parse_error(field, &Value::String(s), "unparseable date")),
            other => Err(parse_error(field, &other, "not a date")),
        },
        FieldType::Time => match value {
            v @ Value::Time(_) => Ok(v),
            Value::String(s) => cast_time(field, &s)
                .map(Value::Time)
                .ok_or_else(|| parse_error(field, &Value::String(s), "unparseable time")),
            other => Err(parse_error(field, &other, "not a time")),
        },
        FieldType::DateTime => match value {
            v @ Value::DateTime(_) => Ok(v),
            Value::String(s) => cast_datetime(field, &s)
                .map(Value::DateTime)
                .ok_or_else(|| parse_error(field, &Value::String(s), "unparseable datetime")),
            other => Err(parse_error(field, &other, "not a datetime")),
        },
        FieldType::Array => match value {
            v @ Value::Array(_) => Ok(v),
            Value::String(s) => match serde_json::from_str::<serde_json::Value>(&s) {
                Ok(json @ serde_json::Value::Array(_)) => Ok(Value::from_json(json)),
                _ => Err(parse_error(field, &Value::String(s), "not a JSON array")),
            },
            other => Err(parse_error(field, &other, "not an array")),
        },
        FieldType::Object => match value {
            v @ Value::Object(_) => Ok(v),
            Value::String(s) => match serde_json::from_str::<serde_json::Value>(&s) {
                Ok(json @ serde_json::Value::Object(_)) => Ok(Value::from_json(json)),
                _ => Err(parse_error(field, &Value::String(s), "not a JSON object")),
            },
            other => Err(parse_error(field, &other, "not an object")),
        },
        FieldType::GeoPoint => match value {
            Value::Array(items) if items.len() == 2 && items.iter().all(|v| v.as_f64().is_some()) => {
                Ok(Value::Array(items))
            }
            Value::String(s) => {
                let parts: Vec<&str> = s.split(',').map(str::trim).collect();
                let coords: Option<Vec<Value>> = if parts.len() == 2 {
                    parts
                        .iter()
                        .map(|p| p.parse::<f64>().ok().map(Value::Number))
                        .collect()
                } else {
                    None
                };
                coords
                    .map(Value::Array)
                    .ok_or_else(|| parse_error(field, &Value::String(s), "not a \"lon,lat\" pair"))
            }
            other => Err(parse_error(field, &other, "not a geopoint")),
        },
    }
}

struct SchemaValidatorIter {
    resource: String,
    fields: Vec<Field>,
    known: HashSet<String>,
    missing_values: Vec<String>,
    policy: CastPolicy,
    warned: HashSet<String>,
    index: usize,
    rows: RowIter,
}

impl Iterator for SchemaValidatorIter {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        'rows: loop {
            let mut row = match self.rows.next()? {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            let index = self.index;
            self.index += 1;

            for field in &self.fields {
                let raw = row.get(&field.name).cloned().unwrap_or(Value::Null);
                match cast_value(field, raw, &self.missing_values) {
                    Ok(casted) => {
                        row.insert(field.name.clone(), casted);
                    }
                    Err(cause) => match &self.policy {
                        CastPolicy::Raise => {
                            return Some(Err(anyhow::Error::new(ValidationError {
                                resource: self.resource.clone(),
                                row,
                                index,
                                cause,
                            })));
                        }
                        CastPolicy::Handler(handler) => {
                            match handler(&self.resource, &mut row, index, &cause) {
                                Ok(true) => {}
                                Ok(false) => continue 'rows,
                                Err(e) => return Some(Err(e)),
                            }
                        }
                    },
                }
            }

            for name in row.keys() {
                if !self.known.contains(name) && !self.warned.contains(name) {
                    self.warned.insert(name.clone());
                    tracing::warn!(resource = %self.resource, field = %name, "field not in schema, passing through");
                }
            }

            return Some(Ok(row));
        }
    }
}

/// Wrap `rows` in a lazy caster for every field declared by `descriptor`.
pub fn schema_validator(descriptor: &ResourceDescriptor, rows: RowIter, policy: CastPolicy) -> RowIter {
    schema_validator_fields(descriptor, rows, None, policy)
}

/// Like [`schema_validator`], restricted to an explicit subset of field
/// names when `only` is given.
pub fn schema_validator_fields(
    descriptor: &ResourceDescriptor,
    rows: RowIter,
    only: Option<&[String]>,
    policy: CastPolicy,
) -> RowIter {
    let known: HashSet<String> = descriptor
        .schema
        .fields
        .iter()
        .map(|f| f.name.clone())
        .collect();
    let fields: Vec<Field> = descriptor
        .schema
        .fields
        .iter()
        .filter(|f| only.is_none_or(|names| names.iter().any(|n| n == &f.name)))
        .cloned()
        .collect();
    Box::new(SchemaValidatorIter {
        resource: descriptor.name.clone(),
        fields,
        known,
        missing_values: descriptor.schema.missing_values.clone(),
        policy,
        warned: HashSet::new(),
        index: 0,
        rows,
    })
}
