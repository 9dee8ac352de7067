//! The standard processor catalog.
//!
//! Each processor is a [`Processor`](crate::processor::Processor) that
//! plugs into a [`Flow`](crate::flow::Flow); the free functions here are
//! the usual way to build them.

mod aggregations;
mod cache;
mod checkpoint;
mod compute;
mod dedup;
mod dump;
mod duplicate;
mod fields;
mod filter;
mod join;
mod load;
mod meta;
mod parallelize;
mod replace;
mod sort;
mod types;
mod unwind;

pub use aggregations::Aggregation;
pub use cache::Cache;
pub use checkpoint::{Checkpoint, DEFAULT_CHECKPOINT_ROOT};
pub use compute::{AddComputedField, ComputedField};
pub use dedup::Deduplicate;
pub use dump::{COMPLETE_MARKER, Dump};
pub use duplicate::Duplicate;
pub use fields::{AddField, DeleteFields, SelectFields};
pub use filter::FilterRows;
pub use join::{Join, JoinField, JoinMode, KeySpec};
pub use load::{EnvLookup, FromRows, Load};
pub use meta::{SetPrimaryKey, UpdatePackage, UpdateResource};
pub use parallelize::Parallelize;
pub use replace::FindReplace;
pub use sort::SortRows;
pub use types::{SetType, Validate};
pub use unwind::Unwind;

use crate::flow::Flow;
use crate::matcher::ResourceMatcher;
use crate::schema::FieldType;
use crate::value::{Row, Value};
use anyhow::Result;
use std::path::PathBuf;

/// Sort matched resources by a `{field}` key template.
pub fn sort_rows(key: impl Into<String>) -> SortRows {
    SortRows::new(key)
}

/// Keep one row per distinct primary-key value.
pub fn deduplicate() -> Deduplicate {
    Deduplicate::new()
}

/// Copy a resource, inserting the copy right after the source.
pub fn duplicate(source: impl Into<String>, target: impl Into<String>) -> Duplicate {
    Duplicate::new(source, target)
}

/// Join a source resource into an existing target resource.
pub fn join(
    source: impl Into<String>,
    source_key: impl Into<KeySpec>,
    target: impl Into<String>,
    target_key: impl Into<KeySpec>,
) -> Join {
    Join::new(source, source_key, target, target_key)
}

/// Group a source resource by key into a new resource.
pub fn join_with_self(
    source: impl Into<String>,
    key: impl Into<KeySpec>,
    target: impl Into<String>,
) -> Join {
    Join::with_self(source, key, target)
}

/// Cover the preceding steps with a named snapshot checkpoint.
pub fn checkpoint(name: impl Into<String>) -> Checkpoint {
    Checkpoint::new(name)
}

/// Wrap an explicit sub-flow behind a snapshot at `path`.
pub fn cache(flow: Flow, path: impl Into<PathBuf>) -> Cache {
    Cache::new(flow, path)
}

/// Apply a row function on a worker pool; output order is not preserved.
pub fn parallelize<F>(f: F) -> Parallelize
where
    F: Fn(&mut Row) -> Result<()> + Send + Sync + 'static,
{
    Parallelize::new(f)
}

/// Load resources from a persisted snapshot (directory, descriptor path,
/// or `env://VAR`).
pub fn load(location: impl Into<String>) -> Load {
    Load::new(location)
}

/// Append an in-memory row list as a new resource.
pub fn from_rows(name: impl Into<String>, rows: Vec<Row>) -> FromRows {
    FromRows::new(name, rows)
}

/// Persist matched resources to a snapshot directory.
pub fn dump_to_path(dir: impl Into<PathBuf>) -> Dump {
    Dump::new(dir)
}

/// Keep only rows matching a predicate.
pub fn filter_rows<F>(predicate: F) -> FilterRows
where
    F: Fn(&Row) -> bool + Send + Sync + 'static,
{
    FilterRows::new(predicate)
}

/// Append computed columns derived from sibling fields in the same row.
pub fn add_computed_field(fields: impl IntoIterator<Item = ComputedField>) -> AddComputedField {
    AddComputedField::new(fields)
}

/// Rewrite field values through ordered regex substitutions.
pub fn find_replace() -> FindReplace {
    FindReplace::new()
}

/// Emit one row per element of an array field.
pub fn unwind(from_key: impl Into<String>, to_key: impl Into<String>) -> Unwind {
    Unwind::new(from_key, to_key)
}

/// Declare a new field and fill it with a default value.
pub fn add_field(
    name: impl Into<String>,
    field_type: FieldType,
    default: impl Into<Value>,
) -> AddField {
    AddField::new(name, field_type, default)
}

/// Remove fields matching the given selectors.
pub fn delete_fields<I, S>(selectors: I) -> DeleteFields
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    DeleteFields::new(selectors)
}

/// Keep only the listed fields, in the listed order.
pub fn select_fields<I, S>(names: I) -> SelectFields
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    SelectFields::new(names)
}

/// Re-declare matching field(s) and re-cast their values.
pub fn set_type(selector: impl Into<String>, field_type: FieldType) -> SetType {
    SetType::new(selector, field_type)
}

/// Force full schema casting on matched resources.
pub fn validate() -> Validate {
    Validate::new()
}

/// Declare the primary key on the last (or matched) resource.
pub fn set_primary_key<I, S>(fields: I) -> SetPrimaryKey
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    SetPrimaryKey::new(fields)
}

/// Merge a JSON patch into the package's top-level metadata.
pub fn update_package(patch: serde_json::Map<String, serde_json::Value>) -> UpdatePackage {
    UpdatePackage::new(patch)
}

/// Alias for [`update_package`].
pub fn add_metadata(patch: serde_json::Map<String, serde_json::Value>) -> UpdatePackage {
    UpdatePackage::new(patch)
}

/// Merge a JSON patch into matched resource descriptors.
pub fn update_resource(
    resources: impl Into<ResourceMatcher>,
    patch: serde_json::Map<String, serde_json::Value>,
) -> UpdateResource {
    UpdateResource::new(resources, patch)
}
