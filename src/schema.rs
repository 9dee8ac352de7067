//! Descriptor data model: fields, schemas, resources and packages.
//!
//! These types serialize to the persisted descriptor document
//! (`datapackage.json`) that is the sole contract with external source and
//! sink adapters: per resource `name`, `schema.fields[] = {name, type,
//! format, ...}`, optional `schema.primaryKey` / `schema.missingValues`,
//! plus a `path`/`format` location hint and free-form metadata.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declared type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Date,
    Time,
    DateTime,
    Array,
    Object,
    GeoPoint,
    Any,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Time => "time",
            FieldType::DateTime => "datetime",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::GeoPoint => "geopoint",
            FieldType::Any => "any",
        };
        f.write_str(name)
    }
}

/// A single field declaration within a schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Temporal parse format (strftime-style) where applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Thousands separator tolerated when casting numbers from strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_char: Option<char>,
    /// Decimal mark used when casting numbers from strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimal_char: Option<char>,
    /// Output-only format override; ignored by the caster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            format: None,
            title: None,
            group_char: None,
            decimal_char: None,
            output_format: None,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// An ordered field list plus optional primary key and missing-value
/// sentinels.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_values: Vec<String>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            primary_key: Vec::new(),
            missing_values: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

/// Metadata for one named resource: schema plus location hints and
/// free-form extras.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub schema: Schema,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// The ordered collection of resource descriptors for a whole pipeline.
///
/// Resource order is significant: it is the zip key between the descriptor
/// and the runtime stream sequence. The package is mutated by `describe`
/// calls and frozen once streaming starts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PackageDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resource. Names must be unique within the package.
    pub fn add_resource(&mut self, resource: ResourceDescriptor) -> Result<()> {
        if self.get_resource(&resource.name).is_some() {
            bail!("duplicate resource name {:?} in package", resource.name);
        }
        self.resources.push(resource);
        Ok(())
    }

    /// Insert a resource right after the named one.
    pub fn insert_resource_after(&mut self, after: &str, resource: ResourceDescriptor) -> Result<()> {
        if self.get_resource(&resource.name).is_some() {
            bail!("duplicate resource name {:?} in package", resource.name);
        }
        let Some(pos) = self.resources.iter().position(|r| r.name == after) else {
            bail!("resource {after:?} not found in package");
        };
        self.resources.insert(pos + 1, resource);
        Ok(())
    }

    pub fn get_resource(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn get_resource_mut(&mut self, name: &str) -> Option<&mut ResourceDescriptor> {
        self.resources.iter_mut().find(|r| r.name == name)
    }

    /// Remove and return the named resource, if present.
    pub fn remove_resource(&mut self, name: &str) -> Option<ResourceDescriptor> {
        let pos = self.resources.iter().position(|r| r.name == name)?;
        Some(self.resources.remove(pos))
    }

    pub fn resource_names(&self) -> Vec<String> {
        self.resources.iter().map(|r| r.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_wire_format() {
        let mut schema = Schema::new(vec![
            Field::new("a", FieldType::Integer),
            Field::new("when", FieldType::Date).with_format("%d/%m/%Y"),
        ]);
        schema.primary_key = vec!["a".into()];
        let rd = ResourceDescriptor::new("events")
            .with_schema(schema)
            .with_path("events.jsonl");

        let json = serde_json::to_value(&rd).unwrap();
        assert_eq!(json["schema"]["fields"][0]["type"], "integer");
        assert_eq!(json["schema"]["fields"][1]["type"], "date");
        assert_eq!(json["schema"]["primaryKey"][0], "a");
        assert_eq!(json["path"], "events.jsonl");

        let back: ResourceDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, rd);
    }

    #[test]
    fn package_rejects_duplicate_names() {
        let mut pkg = PackageDescriptor::new();
        pkg.add_resource(ResourceDescriptor::new("a")).unwrap();
        assert!(pkg.add_resource(ResourceDescriptor::new("a")).is_err());
    }

    #[test]
    fn insert_after_keeps_order() {
        let mut pkg = PackageDescriptor::new();
        pkg.add_resource(ResourceDescriptor::new("a")).unwrap();
        pkg.add_resource(ResourceDescriptor::new("b")).unwrap();
        pkg.insert_resource_after("a", ResourceDescriptor::new("a_copy"))
            .unwrap();
        assert_eq!(pkg.resource_names(), vec!["a", "a_copy", "b"]);
    }
}
