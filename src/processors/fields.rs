//! Field-level schema surgery: add, delete, select.

use crate::matcher::{ResourceMatcher, field_matches};
use crate::processor::Processor;
use crate::schema::{Field, FieldType, PackageDescriptor};
use crate::stream::{ResourceStream, RowIter};
use crate::value::Value;
use anyhow::{Result, bail};
use std::collections::BTreeMap;

/// Declares a new field on matched resources and fills it with a default
/// value in every row.
pub struct AddField {
    name: String,
    field_type: FieldType,
    default: Value,
    resources: ResourceMatcher,
}

impl AddField {
    pub fn new(name: impl Into<String>, field_type: FieldType, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            field_type,
            default: default.into(),
            resources: ResourceMatcher::All,
        }
    }

    pub fn resources(mut self, resources: impl Into<ResourceMatcher>) -> Self {
        self.resources = resources.into();
        self
    }
}

impl Processor for AddField {
    fn name(&self) -> String {
        "add_field".to_string()
    }

    fn describe(&mut self, package: &mut PackageDescriptor) -> Result<()> {
        for resource in &mut package.resources {
            if !self.resources.matches(&resource.name) {
                continue;
            }
            if resource.schema.field(&self.name).is_some() {
                bail!(
                    "field {:?} already declared on resource {:?}",
                    self.name,
                    resource.name
                );
            }
            resource
                .schema
                .fields
                .push(Field::new(&self.name, self.field_type));
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
                let name = self.name.clone();
                let default = self.default.clone();
                let rows: RowIter = Box::new(rs.rows.map(move |item| {
                    let mut row = item?;
                    row.insert(name.clone(), default.clone());
                    Ok(row)
                }));
                ResourceStream::new(rs.descriptor, rows)
            })
            .collect())
    }
}

/// Removes fields matching the given selectors (exact names or anchored
/// regex patterns) from matched resources.
pub struct DeleteFields {
    selectors: Vec<String>,
    resources: ResourceMatcher,
    // resource name -> concrete field names resolved during describe
    resolved: BTreeMap<String, Vec<String>>,
}

impl DeleteFields {
    pub fn new<I, S>(selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selectors: selectors.into_iter().map(Into::into).collect(),
            resources: ResourceMatcher::All,
            resolved: BTreeMap::new(),
        }
    }

    pub fn resources(mut self, resources: impl Into<ResourceMatcher>) -> Self {
        self.resources = resources.into();
        self
    }
}

impl Processor for DeleteFields {
    fn name(&self) -> String {
        "delete_fields".to_string()
    }

    fn describe(&mut self, package: &mut PackageDescriptor) -> Result<()> {
        for resource in &mut package.resources {
            if !self.resources.matches(&resource.name) {
                continue;
            }
            let mut names = Vec::new();
            for selector in &self.selectors {
                let matched: Vec<String> = resource
                    .schema
                    .fields
                    .iter()
                    .filter(|f| field_matches(selector, &f.name))
                    .map(|f| f.name.clone())
                    .collect();
                if matched.is_empty() {
                    bail!(
                        "field selector {:?} matched nothing on resource {:?}",
                        selector,
                        resource.name
                    );
                }
                names.extend(matched);
            }
            resource.schema.fields.retain(|f| !names.contains(&f.name));
            self.resolved.insert(resource.name.clone(), names);
        }
        Ok(())
    }

    fn stream(&mut self, resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        Ok(resources
            .into_iter()
            .map(|rs| {
                let Some(names) = self.resolved.get(&rs.descriptor.name).cloned() else {
                    return rs;
                };
                let rows: RowIter = Box::new(rs.rows.map(move |item| {
                    let mut row = item?;
                    for name in &names {
                        row.remove(name);
                    }
                    Ok(row)
                }));
                ResourceStream::new(rs.descriptor, rows)
            })
            .collect())
    }
}

/// Keeps only the listed fields, in the listed order, on matched resources.
pub struct SelectFields {
    names: Vec<String>,
    resources: ResourceMatcher,
}

impl SelectFields {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            resources: ResourceMatcher::All,
        }
    }

    pub fn resources(mut self, resources: impl Into<ResourceMatcher>) -> Self {
        self.resources = resources.into();
        self
    }
}

impl Processor for SelectFields {
    fn name(&self) -> String {
        "select_fields".to_string()
    }

    fn describe(&mut self, package: &mut PackageDescriptor) -> Result<()> {
        for resource in &mut package.resources {
            if !self.resources.matches(&resource.name) {
                continue;
            }
            let mut kept = Vec::with_capacity(self.names.len());
            for name in &self.names {
                match resource.schema.field(name) {
                    Some(f) => kept.push(f.clone()),
                    None => bail!(
                        "field {:?} not found on resource {:?}",
                        name,
                        resource.name
                    ),
                }
            }
            resource.schema.fields = kept;
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
                let names = self.names.clone();
                let rows: RowIter = Box::new(rs.rows.map(move |item| {
                    let mut row = item?;
                    row.retain(|k, _| names.iter().any(|n| n == k));
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
    use crate::schema::{ResourceDescriptor, Schema};
    use crate::stream::rows_from_vec;
    use crate::value::Row;

    fn package_with(fields: Vec<Field>) -> PackageDescriptor {
        let mut pkg = PackageDescriptor::new();
        pkg.add_resource(ResourceDescriptor::new("r").with_schema(Schema::new(fields)))
            .unwrap();
        pkg
    }

    #[test]
    fn add_field_declares_and_fills() {
        let mut pkg = package_with(vec![Field::new("a", FieldType::Integer)]);
        let mut p = AddField::new("flag", FieldType::Boolean, true);
        p.describe(&mut pkg).unwrap();
        assert!(pkg.get_resource("r").unwrap().schema.field("flag").is_some());

        let mut row = Row::new();
        row.insert("a".into(), Value::Integer(1));
        let out = p
            .stream(vec![ResourceStream::new(
                ResourceDescriptor::new("r"),
                rows_from_vec(vec![row]),
            )])
            .unwrap();
        let rows: Vec<Row> = out.into_iter().next().unwrap().rows.map(|r| r.unwrap()).collect();
        assert_eq!(rows[0]["flag"], Value::Bool(true));
    }

    #[test]
    fn delete_fields_accepts_patterns() {
        let mut pkg = package_with(vec![
            Field::new("keep", FieldType::String),
            Field::new("col1", FieldType::Integer),
            Field::new("col2", FieldType::Integer),
        ]);
        let mut p = DeleteFields::new(["col[0-9]"]);
        p.describe(&mut pkg).unwrap();
        assert_eq!(
            pkg.get_resource("r").unwrap().schema.field_names(),
            vec!["keep"]
        );
    }

    #[test]
    fn delete_unknown_selector_is_an_error() {
        let mut pkg = package_with(vec![Field::new("a", FieldType::Integer)]);
        let mut p = DeleteFields::new(["missing"]);
        assert!(p.describe(&mut pkg).is_err());
    }

    #[test]
    fn select_fields_keeps_listed_order() {
        let mut pkg = package_with(vec![
            Field::new("a", FieldType::Integer),
            Field::new("b", FieldType::Integer),
            Field::new("c", FieldType::Integer),
        ]);
        let mut p = SelectFields::new(["c", "a"]);
        p.describe(&mut pkg).unwrap();
        assert_eq!(
            pkg.get_resource("r").unwrap().schema.field_names(),
            vec!["c", "a"]
        );
    }
}
