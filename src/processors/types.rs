//! Field re-typing and forced schema validation.

use crate::caster::{CastPolicy, schema_validator, schema_validator_fields};
use crate::matcher::{ResourceMatcher, field_matches};
use crate::processor::Processor;
use crate::schema::{FieldType, PackageDescriptor, ResourceDescriptor};
use crate::stream::ResourceStream;
use anyhow::{Result, bail};

/// Patches the declaration of matching field(s) and re-casts their values.
///
/// With no explicit resource selector the patch applies to the last
/// resource in the package, which is usually the one just loaded.
pub struct SetType {
    selector: String,
    field_type: Option<FieldType>,
    format: Option<String>,
    group_char: Option<char>,
    decimal_char: Option<char>,
    resources: Option<ResourceMatcher>,
    policy: CastPolicy,
    // (patched descriptor, patched field names) captured during describe
    patched: Vec<(ResourceDescriptor, Vec<String>)>,
}

impl SetType {
    pub fn new(selector: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            selector: selector.into(),
            field_type: Some(field_type),
            format: None,
            group_char: None,
            decimal_char: None,
            resources: None,
            policy: CastPolicy::default(),
            patched: Vec::new(),
        }
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn group_char(mut self, c: char) -> Self {
        self.group_char = Some(c);
        self
    }

    pub fn decimal_char(mut self, c: char) -> Self {
        self.decimal_char = Some(c);
        self
    }

    pub fn resources(mut self, resources: impl Into<ResourceMatcher>) -> Self {
        self.resources = Some(resources.into());
        self
    }

    pub fn policy(mut self, policy: CastPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Processor for SetType {
    fn name(&self) -> String {
        "set_type".to_string()
    }

    fn describe(&mut self, package: &mut PackageDescriptor) -> Result<()> {
        let targets: Vec<String> = match &self.resources {
            Some(m) => package
                .resources
                .iter()
                .filter(|r| m.matches(&r.name))
                .map(|r| r.name.clone())
                .collect(),
            None => match package.resources.last() {
                Some(r) => vec![r.name.clone()],
                None => bail!("set_type on an empty package"),
            },
        };

        for name in targets {
            let Some(resource) = package.get_resource_mut(&name) else {
                continue;
            };
            let mut names = Vec::new();
            for field in &mut resource.schema.fields {
                if !field_matches(&self.selector, &field.name) {
                    continue;
                }
                if let Some(ft) = self.field_type {
                    field.field_type = ft;
                }
                if self.format.is_some() {
                    field.format = self.format.clone();
                }
                if self.group_char.is_some() {
                    field.group_char = self.group_char;
                }
                if self.decimal_char.is_some() {
                    field.decimal_char = self.decimal_char;
                }
                names.push(field.name.clone());
            }
            if names.is_empty() {
                bail!(
                    "field selector {:?} matched nothing on resource {:?}",
                    self.selector,
                    name
                );
            }
            self.patched.push((resource.clone(), names));
        }
        Ok(())
    }

    fn stream(&mut self, resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        Ok(resources
            .into_iter()
            .map(|rs| {
                let Some((descriptor, names)) = self
                    .patched
                    .iter()
                    .find(|(d, _)| d.name == rs.descriptor.name)
                else {
                    return rs;
                };
                // Cast against the patched declarations, not the incoming
                // descriptor, which still carries the old types.
                let rows =
                    schema_validator_fields(descriptor, rs.rows, Some(names), self.policy.clone());
                ResourceStream::new(rs.descriptor, rows)
            })
            .collect())
    }
}

/// Forces full schema casting on matched resources.
pub struct Validate {
    resources: ResourceMatcher,
    policy: CastPolicy,
}

impl Validate {
    pub fn new() -> Self {
        Self {
            resources: ResourceMatcher::All,
            policy: CastPolicy::default(),
        }
    }

    pub fn resources(mut self, resources: impl Into<ResourceMatcher>) -> Self {
        self.resources = resources.into();
        self
    }

    pub fn policy(mut self, policy: CastPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Default for Validate {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Validate {
    fn name(&self) -> String {
        "validate".to_string()
    }

    fn stream(&mut self, resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        Ok(resources
            .into_iter()
            .map(|rs| {
                if !self.resources.matches(&rs.descriptor.name) {
                    return rs;
                }
                let rows = schema_validator(&rs.descriptor, rs.rows, self.policy.clone());
                ResourceStream::new(rs.descriptor, rows)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, Schema};
    use crate::stream::rows_from_vec;
    use crate::value::{Row, Value};

    #[test]
    fn retypes_and_recasts_last_resource() {
        let mut pkg = PackageDescriptor::new();
        pkg.add_resource(
            ResourceDescriptor::new("r")
                .with_schema(Schema::new(vec![Field::new("n", FieldType::String)])),
        )
        .unwrap();

        let mut p = SetType::new("n", FieldType::Integer);
        p.describe(&mut pkg).unwrap();
        assert_eq!(
            pkg.get_resource("r").unwrap().schema.field("n").unwrap().field_type,
            FieldType::Integer
        );

        let mut row = Row::new();
        row.insert("n".into(), Value::String("42".into()));
        let out = p
            .stream(vec![ResourceStream::new(
                ResourceDescriptor::new("r"),
                rows_from_vec(vec![row]),
            )])
            .unwrap();
        let rows: Vec<Row> = out.into_iter().next().unwrap().rows.map(|r| r.unwrap()).collect();
        assert_eq!(rows[0]["n"], Value::Integer(42));
    }

    #[test]
    fn unmatched_selector_is_an_error() {
        let mut pkg = PackageDescriptor::new();
        pkg.add_resource(
            ResourceDescriptor::new("r")
                .with_schema(Schema::new(vec![Field::new("a", FieldType::String)])),
        )
        .unwrap();
        let mut p = SetType::new("nope", FieldType::Integer);
        assert!(p.describe(&mut pkg).is_err());
    }
}
