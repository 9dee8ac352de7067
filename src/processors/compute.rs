//! Derived columns computed from sibling fields in the same row.

use super::aggregations::Aggregation;
use crate::matcher::ResourceMatcher;
use crate::processor::Processor;
use crate::schema::{Field, FieldType, PackageDescriptor, Schema};
use crate::sortkey::KeyCalc;
use crate::stream::{ResourceStream, RowIter};
use crate::value::{Row, Value};
use anyhow::{Context, Result, bail};

/// One derived column: values from `sources` fold through the aggregation,
/// nulls skipped. `Const` ignores sources; `Format` expands its `{field}`
/// template against the whole row.
#[derive(Clone)]
pub struct ComputedField {
    target: String,
    sources: Vec<String>,
    aggregate: Aggregation,
}

impl ComputedField {
    pub fn new(target: impl Into<String>, aggregate: Aggregation) -> Self {
        Self {
            target: target.into(),
            sources: Vec::new(),
            aggregate,
        }
    }

    /// Fields whose values feed the aggregation, in order.
    pub fn sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }
}

/// Appends computed columns to matched resources and fills them per row.
pub struct AddComputedField {
    fields: Vec<ComputedField>,
    resources: ResourceMatcher,
}

impl AddComputedField {
    pub fn new(fields: impl IntoIterator<Item = ComputedField>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
            resources: ResourceMatcher::All,
        }
    }

    pub fn resources(mut self, resources: impl Into<ResourceMatcher>) -> Self {
        self.resources = resources.into();
        self
    }

    /// Pre-parse any `Format` templates; other aggregations need no plan.
    fn plan(&self) -> Result<Vec<(ComputedField, Option<KeyCalc>)>> {
        self.fields
            .iter()
            .map(|cf| {
                let calc = match &cf.aggregate {
                    Aggregation::Format(tpl) => Some(KeyCalc::new(tpl)?),
                    _ => None,
                };
                Ok((cf.clone(), calc))
            })
            .collect()
    }
}

/// Declared type of a computed column, following the source declarations.
fn output_type(cf: &ComputedField, schema: &Schema) -> FieldType {
    if let Some(ft) = cf.aggregate.data_type() {
        return ft;
    }
    let types: Vec<FieldType> = cf
        .sources
        .iter()
        .filter_map(|s| schema.field(s))
        .map(|f| f.field_type)
        .collect();
    if types.contains(&FieldType::Any) {
        return FieldType::Any;
    }
    if matches!(cf.aggregate, Aggregation::Avg) || types.contains(&FieldType::Number) {
        return FieldType::Number;
    }
    types.first().copied().unwrap_or(FieldType::Any)
}

fn compute(cf: &ComputedField, format: Option<&KeyCalc>, row: &Row) -> Result<Value> {
    match &cf.aggregate {
        Aggregation::Const(v) => Ok(v.clone()),
        Aggregation::Format(_) => {
            let calc = format.context("format template not planned")?;
            Ok(Value::String(calc.plain(row)?))
        }
        agg => {
            let mut state: Option<Value> = None;
            for name in &cf.sources {
                let value = row.get(name).cloned().unwrap_or(Value::Null);
                if value.is_null() {
                    continue;
                }
                state = Some(agg.step(state, value)?);
            }
            Ok(match state {
                Some(s) => agg.finalize(s),
                None => Value::Null,
            })
        }
    }
}

impl Processor for AddComputedField {
    fn name(&self) -> String {
        "add_computed_field".to_string()
    }

    fn describe(&mut self, package: &mut PackageDescriptor) -> Result<()> {
        // Surfaces bad format templates before any row moves.
        self.plan()?;
        for resource in &mut package.resources {
            if !self.resources.matches(&resource.name) {
                continue;
            }
            for cf in &self.fields {
                if resource.schema.field(&cf.target).is_some() {
                    bail!(
                        "field {:?} already declared on resource {:?}",
                        cf.target,
                        resource.name
                    );
                }
                let ft = output_type(cf, &resource.schema);
                resource.schema.fields.push(Field::new(&cf.target, ft));
            }
        }
        Ok(())
    }

    fn stream(&mut self, resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        let planned = self.plan()?;
        Ok(resources
            .into_iter()
            .map(|rs| {
                if !self.resources.matches(&rs.descriptor.name) {
                    return rs;
                }
                let planned = planned.clone();
                let rows: RowIter = Box::new(rs.rows.map(move |item| {
                    let mut row = item?;
                    for (cf, calc) in &planned {
                        let value = compute(cf, calc.as_ref(), &row)?;
                        row.insert(cf.target.clone(), value);
                    }
                    Ok(row)
                }));
                ResourceStream::new(rs.descriptor, rows)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ResourceDescriptor;
    use crate::stream::rows_from_vec;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn run(p: &mut AddComputedField, input: Vec<Row>) -> Vec<Row> {
        let out = p
            .stream(vec![ResourceStream::new(
                ResourceDescriptor::new("r"),
                rows_from_vec(input),
            )])
            .unwrap();
        out.into_iter().next().unwrap().rows.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn folds_source_fields_per_row() {
        let mut p = AddComputedField::new([
            ComputedField::new("total", Aggregation::Sum).sources(["a", "b"]),
            ComputedField::new("biggest", Aggregation::Max).sources(["a", "b"]),
        ]);
        let rows = run(
            &mut p,
            vec![row(&[("a", Value::Integer(2)), ("b", Value::Integer(5))])],
        );
        assert_eq!(rows[0]["total"], Value::Integer(7));
        assert_eq!(rows[0]["biggest"], Value::Integer(5));
    }

    #[test]
    fn format_expands_against_the_whole_row() {
        let mut p = AddComputedField::new([ComputedField::new(
            "label",
            Aggregation::Format("{name}-{n}".into()),
        )]);
        let rows = run(
            &mut p,
            vec![row(&[
                ("name", Value::String("x".into())),
                ("n", Value::Integer(3)),
            ])],
        );
        assert_eq!(rows[0]["label"], Value::String("x-3".into()));
    }

    #[test]
    fn declared_type_follows_sources_and_operation() {
        let mut pkg = PackageDescriptor::new();
        pkg.add_resource(
            ResourceDescriptor::new("r").with_schema(Schema::new(vec![
                Field::new("a", FieldType::Integer),
                Field::new("b", FieldType::Integer),
            ])),
        )
        .unwrap();
        let mut p = AddComputedField::new([
            ComputedField::new("total", Aggregation::Sum).sources(["a", "b"]),
            ComputedField::new("mean", Aggregation::Avg).sources(["a", "b"]),
            ComputedField::new("label", Aggregation::Format("{a}".into())),
        ]);
        p.describe(&mut pkg).unwrap();
        let schema = &pkg.get_resource("r").unwrap().schema;
        assert_eq!(schema.field("total").unwrap().field_type, FieldType::Integer);
        assert_eq!(schema.field("mean").unwrap().field_type, FieldType::Number);
        assert_eq!(schema.field("label").unwrap().field_type, FieldType::String);
    }

    #[test]
    fn nulls_are_skipped_in_the_fold() {
        let mut p = AddComputedField::new([
            ComputedField::new("total", Aggregation::Sum).sources(["a", "b"]),
        ]);
        let rows = run(
            &mut p,
            vec![row(&[("a", Value::Null), ("b", Value::Integer(4))])],
        );
        assert_eq!(rows[0]["total"], Value::Integer(4));
    }
}
