//! Unwinding an array field into one row per element.

use crate::matcher::ResourceMatcher;
use crate::processor::Processor;
use crate::schema::{Field, FieldType, PackageDescriptor};
use crate::stream::{ResourceStream, RowIter};
use crate::value::{Row, Value};
use anyhow::{Context, Result, bail};
use std::sync::Arc;

type ValueMapFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Emits one row per element of an array field, setting the element onto a
/// target field.
///
/// A non-array value passes through as a single row with the value copied
/// onto the target; an empty array drops the row. The source field is
/// removed from both schema and rows unless [`Unwind::keep_source`] is set.
pub struct Unwind {
    from_key: String,
    to_key: String,
    resources: ResourceMatcher,
    keep_source: bool,
    transform: Option<ValueMapFn>,
}

impl Unwind {
    pub fn new(from_key: impl Into<String>, to_key: impl Into<String>) -> Self {
        Self {
            from_key: from_key.into(),
            to_key: to_key.into(),
            resources: ResourceMatcher::All,
            keep_source: false,
            transform: None,
        }
    }

    pub fn resources(mut self, resources: impl Into<ResourceMatcher>) -> Self {
        self.resources = resources.into();
        self
    }

    /// Keep the source field on the schema and the emitted rows.
    pub fn keep_source(mut self) -> Self {
        self.keep_source = true;
        self
    }

    /// Transform each unwound element before it lands on the target field.
    pub fn map<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(f));
        self
    }
}

fn unwound(
    mut row: Row,
    from: &str,
    to: &str,
    keep: bool,
    transform: Option<&ValueMapFn>,
) -> Vec<Result<Row>> {
    let value = if keep {
        row.get(from).cloned()
    } else {
        row.remove(from)
    };
    let items = match value.unwrap_or(Value::Null) {
        Value::Array(items) => items,
        other => vec![other],
    };
    items
        .into_iter()
        .map(|v| {
            let v = match transform {
                Some(f) => f(v),
                None => v,
            };
            let mut out = row.clone();
            out.insert(to.to_string(), v);
            Ok(out)
        })
        .collect()
}

impl Processor for Unwind {
    fn name(&self) -> String {
        "unwind".to_string()
    }

    fn describe(&mut self, package: &mut PackageDescriptor) -> Result<()> {
        for resource in &mut package.resources {
            if !self.resources.matches(&resource.name) {
                continue;
            }
            resource
                .schema
                .field(&self.from_key)
                .with_context(|| {
                    format!(
                        "unwind source {:?} not declared on resource {:?}",
                        self.from_key, resource.name
                    )
                })?;
            if self.to_key == self.from_key {
                if let Some(field) = resource.schema.field_mut(&self.to_key) {
                    field.field_type = FieldType::Any;
                }
                continue;
            }
            if resource.schema.field(&self.to_key).is_some() {
                bail!(
                    "field {:?} already declared on resource {:?}",
                    self.to_key,
                    resource.name
                );
            }
            if !self.keep_source {
                resource.schema.fields.retain(|f| f.name != self.from_key);
            }
            resource
                .schema
                .fields
                .push(Field::new(&self.to_key, FieldType::Any));
        }
        Ok(())
    }

    fn stream(&mut self, resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        Ok(resources
            .into_iter()
            .map(|rs| {
                if !self.resources.matches(&rs.descriptor.name) {
                    return rs;
                }
                let from = self.from_key.clone();
                let to = self.to_key.clone();
                let keep = self.keep_source;
                let transform = self.transform.clone();
                let rows: RowIter = Box::new(rs.rows.flat_map(move |item| match item {
                    Ok(row) => unwound(row, &from, &to, keep, transform.as_ref()),
                    Err(e) => vec![Err(e)],
                }));
                ResourceStream::new(rs.descriptor, rows)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ResourceDescriptor, Schema};
    use crate::stream::rows_from_vec;

    fn run(p: &mut Unwind, input: Vec<Row>) -> Vec<Row> {
        let out = p
            .stream(vec![ResourceStream::new(
                ResourceDescriptor::new("r"),
                rows_from_vec(input),
            )])
            .unwrap();
        out.into_iter().next().unwrap().rows.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn array_elements_become_rows_without_the_source() {
        let mut row = Row::new();
        row.insert("id".into(), Value::Integer(1));
        row.insert(
            "tags".into(),
            Value::Array(vec!["a".into(), "b".into(), "c".into()]),
        );
        let mut p = Unwind::new("tags", "tag");
        let rows = run(&mut p, vec![row]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1]["tag"], Value::String("b".into()));
        assert_eq!(rows[1]["id"], Value::Integer(1));
        assert!(!rows[1].contains_key("tags"));
    }

    #[test]
    fn scalar_passes_through_and_empty_array_drops_the_row() {
        let mut scalar = Row::new();
        scalar.insert("tags".into(), Value::String("solo".into()));
        let mut empty = Row::new();
        empty.insert("tags".into(), Value::Array(Vec::new()));

        let mut p = Unwind::new("tags", "tag");
        let rows = run(&mut p, vec![scalar, empty]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["tag"], Value::String("solo".into()));
    }

    #[test]
    fn transformer_applies_per_element() {
        let mut row = Row::new();
        row.insert(
            "ns".into(),
            Value::Array(vec![Value::Integer(1), Value::Integer(2)]),
        );
        let mut p = Unwind::new("ns", "n").map(|v| match v {
            Value::Integer(i) => Value::Integer(i * 10),
            other => other,
        });
        let rows = run(&mut p, vec![row]);
        assert_eq!(rows[0]["n"], Value::Integer(10));
        assert_eq!(rows[1]["n"], Value::Integer(20));
    }

    #[test]
    fn describe_swaps_the_field_declarations() {
        let mut pkg = PackageDescriptor::new();
        pkg.add_resource(
            ResourceDescriptor::new("r").with_schema(Schema::new(vec![
                Field::new("id", FieldType::Integer),
                Field::new("tags", FieldType::Array),
            ])),
        )
        .unwrap();
        let mut p = Unwind::new("tags", "tag");
        p.describe(&mut pkg).unwrap();
        let schema = &pkg.get_resource("r").unwrap().schema;
        assert!(schema.field("tags").is_none());
        assert_eq!(schema.field("tag").unwrap().field_type, FieldType::Any);
    }
}
