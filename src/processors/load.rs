//! Source adapters: persisted snapshots and in-memory row lists.

use crate::caster::{CastPolicy, schema_validator};
use crate::matcher::ResourceMatcher;
use crate::processor::Processor;
use crate::schema::{Field, FieldType, PackageDescriptor, ResourceDescriptor, Schema};
use crate::stream::{ResourceStream, RowIter, lazy_rows, rows_from_vec};
use crate::value::{Row, Value, row_from_json};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

/// Resolves `env://VAR` indirection in load locations. Injectable so tests
/// never touch the process environment.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Loads resources from a persisted snapshot directory.
///
/// The directory's `datapackage.json` supplies the descriptors; each
/// resource's JSONL row file streams lazily through the schema caster so
/// values come back with their declared types. The location may be the
/// directory, its `datapackage.json` path, or `env://VAR` naming an
/// environment variable holding either.
pub struct Load {
    location: String,
    resources: ResourceMatcher,
    policy: CastPolicy,
    env: EnvLookup,
    planned: Vec<(ResourceDescriptor, PathBuf)>,
}

impl Load {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            resources: ResourceMatcher::All,
            policy: CastPolicy::default(),
            env: Arc::new(|name| std::env::var(name).ok()),
            planned: Vec::new(),
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

    /// Override the environment lookup used for `env://` locations.
    pub fn lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    fn base_dir(&self) -> Result<PathBuf> {
        let location = match self.location.strip_prefix("env://") {
            Some(var) => (self.env)(var)
                .with_context(|| format!("environment variable {var:?} is not set"))?,
            None => self.location.clone(),
        };
        let path = PathBuf::from(location);
        if path.file_name().is_some_and(|f| f == "datapackage.json") {
            Ok(path.parent().unwrap_or(&path).to_path_buf())
        } else {
            Ok(path)
        }
    }
}

impl Processor for Load {
    fn name(&self) -> String {
        "load".to_string()
    }

    fn describe(&mut self, package: &mut PackageDescriptor) -> Result<()> {
        let dir = self.base_dir()?;
        let doc_path = dir.join("datapackage.json");
        let doc = std::fs::read_to_string(&doc_path)
            .with_context(|| format!("reading descriptor {}", doc_path.display()))?;
        let loaded: PackageDescriptor = serde_json::from_str(&doc)
            .with_context(|| format!("parsing descriptor {}", doc_path.display()))?;

        for resource in loaded.resources {
            if !self.resources.matches(&resource.name) {
                continue;
            }
            let path = resource
                .path
                .clone()
                .with_context(|| format!("resource {:?} has no path", resource.name))?;
            let file = dir.join(path);
            package.add_resource(resource.clone())?;
            self.planned.push((resource, file));
        }
        Ok(())
    }

    fn stream(&mut self, mut resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        for (descriptor, path) in self.planned.drain(..) {
            let raw = lazy_rows(move || {
                let file = File::open(&path)
                    .with_context(|| format!("opening row file {}", path.display()))?;
                let lines = BufReader::new(file).lines();
                Ok(Box::new(lines.map(|line| {
                    let line = line.context("reading row file")?;
                    let json = serde_json::from_str(&line).context("parsing row")?;
                    row_from_json(json)
                })) as RowIter)
            });
            let rows = schema_validator(&descriptor, raw, self.policy.clone());
            resources.push(ResourceStream::new(descriptor, rows));
        }
        Ok(resources)
    }
}

/// Appends an in-memory row list as a new resource, inferring the schema
/// from the first row's value types.
pub struct FromRows {
    name: String,
    rows: Option<Vec<Row>>,
}

impl FromRows {
    pub fn new(name: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            name: name.into(),
            rows: Some(rows),
        }
    }
}

fn inferred_type(value: &Value) -> FieldType {
    match value {
        Value::Bool(_) => FieldType::Boolean,
        Value::Integer(_) => FieldType::Integer,
        Value::Number(_) => FieldType::Number,
        Value::String(_) => FieldType::String,
        Value::Date(_) => FieldType::Date,
        Value::Time(_) => FieldType::Time,
        Value::DateTime(_) => FieldType::DateTime,
        Value::Array(_) => FieldType::Array,
        Value::Object(_) => FieldType::Object,
        Value::Null => FieldType::Any,
    }
}

impl Processor for FromRows {
    fn name(&self) -> String {
        "from_rows".to_string()
    }

    fn describe(&mut self, package: &mut PackageDescriptor) -> Result<()> {
        let fields = match self.rows.as_ref().and_then(|rows| rows.first()) {
            Some(first) => first
                .iter()
                .map(|(name, value)| Field::new(name, inferred_type(value)))
                .collect(),
            None => Vec::new(),
        };
        package.add_resource(
            ResourceDescriptor::new(&self.name).with_schema(Schema::new(fields)),
        )
    }

    fn stream(&mut self, mut resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        let rows = self.rows.take().unwrap_or_default();
        resources.push(ResourceStream::new(
            ResourceDescriptor::new(&self.name),
            rows_from_vec(rows),
        ));
        Ok(resources)
    }
}
