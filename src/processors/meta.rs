//! Descriptor metadata edits: primary keys, package and resource patches.

use crate::matcher::ResourceMatcher;
use crate::processor::Processor;
use crate::schema::PackageDescriptor;
use anyhow::{Result, bail};
use serde_json::Value as Json;

/// Declares the primary key on the last resource (or matched resources).
pub struct SetPrimaryKey {
    fields: Vec<String>,
    resources: Option<ResourceMatcher>,
}

impl SetPrimaryKey {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            resources: None,
        }
    }

    pub fn resources(mut self, resources: impl Into<ResourceMatcher>) -> Self {
        self.resources = Some(resources.into());
        self
    }
}

impl Processor for SetPrimaryKey {
    fn name(&self) -> String {
        "set_primary_key".to_string()
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
                None => bail!("set_primary_key on an empty package"),
            },
        };
        for name in targets {
            let Some(resource) = package.get_resource_mut(&name) else {
                continue;
            };
            for field in &self.fields {
                if resource.schema.field(field).is_none() {
                    bail!(
                        "primary key field {:?} not declared on resource {:?}",
                        field,
                        name
                    );
                }
            }
            resource.schema.primary_key = self.fields.clone();
        }
        Ok(())
    }
}

/// Merges a JSON patch into the package's top-level metadata.
pub struct UpdatePackage {
    patch: serde_json::Map<String, Json>,
}

impl UpdatePackage {
    pub fn new(patch: serde_json::Map<String, Json>) -> Self {
        Self { patch }
    }
}

impl Processor for UpdatePackage {
    fn name(&self) -> String {
        "update_package".to_string()
    }

    fn describe(&mut self, package: &mut PackageDescriptor) -> Result<()> {
        for (key, value) in &self.patch {
            if key == "resources" {
                bail!("cannot patch \"resources\" through update_package");
            }
            package.extra.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

/// Merges a JSON patch into matched resource descriptors. The `path` and
/// `format` keys map onto the descriptor's own fields; renaming through a
/// patch is rejected since resource names key the stream order.
pub struct UpdateResource {
    resources: ResourceMatcher,
    patch: serde_json::Map<String, Json>,
}

impl UpdateResource {
    pub fn new(
        resources: impl Into<ResourceMatcher>,
        patch: serde_json::Map<String, Json>,
    ) -> Self {
        Self {
            resources: resources.into(),
            patch,
        }
    }
}

impl Processor for UpdateResource {
    fn name(&self) -> String {
        "update_resource".to_string()
    }

    fn describe(&mut self, package: &mut PackageDescriptor) -> Result<()> {
        for resource in &mut package.resources {
            if !self.resources.matches(&resource.name) {
                continue;
            }
            for (key, value) in &self.patch {
                match key.as_str() {
                    "name" => bail!("cannot rename a resource through update_resource"),
                    "path" => resource.path = value.as_str().map(str::to_string),
                    "format" => resource.format = value.as_str().map(str::to_string),
                    _ => {
                        resource.extra.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        Ok(())
    }
}
