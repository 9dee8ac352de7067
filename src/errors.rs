//! Error taxonomy: cast failures, row validation failures, and step
//! attribution.
//!
//! Every error escaping a step's describe or row generation is wrapped
//! exactly once in a [`ProcessorError`] carrying the step's declared name
//! and its 1-based position in the flattened chain. Validation failures
//! raised by the schema caster additionally carry the resource name, the
//! offending row, and its index within that resource.

use crate::schema::FieldType;
use crate::value::{Row, Value};
use std::fmt;

/// A single value failed coercion against its field's declared type.
#[derive(Debug, Clone)]
pub struct CastError {
    pub field: String,
    pub field_type: FieldType,
    pub value: Value,
    pub reason: String,
}

impl CastError {
    pub fn new(
        field: impl Into<String>,
        field_type: FieldType,
        value: Value,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            field_type,
            value,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot cast field {:?} to {}: {} (value: {:?})",
            self.field, self.field_type, self.reason, self.value
        )
    }
}

impl std::error::Error for CastError {}

/// A row failed schema validation. Carries enough context to identify the
/// exact row within its resource.
#[derive(Debug)]
pub struct ValidationError {
    pub resource: String,
    pub row: Row,
    pub index: usize,
    pub cause: CastError,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "validation failed in resource {:?}, row {}: {}",
            self.resource, self.index, self.cause
        )
    }
}

impl std::error::Error for ValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Wraps any exception from a step's describe/stream phase with the step's
/// identity and flattened position (1-based).
#[derive(Debug)]
pub struct ProcessorError {
    pub processor_name: String,
    pub position: usize,
    pub source: anyhow::Error,
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step {} ({}) failed: {}",
            self.position, self.processor_name, self.source
        )
    }
}

impl std::error::Error for ProcessorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Wrap an error with step attribution, unless it is already attributed.
/// Attribution happens once, at the step where the error first surfaces.
pub(crate) fn attribute(err: anyhow::Error, name: &str, position: usize) -> anyhow::Error {
    if err.downcast_ref::<ProcessorError>().is_some() {
        err
    } else {
        anyhow::Error::new(ProcessorError {
            processor_name: name.to_string(),
            position,
            source: err,
        })
    }
}
