//! Row filtering.

use crate::matcher::ResourceMatcher;
use crate::processor::Processor;
use crate::stream::{ResourceStream, RowIter};
use crate::value::{Row, Value};
use anyhow::Result;
use std::sync::Arc;

type RowPredicate = Arc<dyn Fn(&Row) -> bool + Send + Sync>;

/// Keeps only rows matching a predicate on matched resources. Errors
/// already in the stream pass through untouched.
pub struct FilterRows {
    predicate: RowPredicate,
    resources: ResourceMatcher,
}

impl FilterRows {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Row) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            resources: ResourceMatcher::All,
        }
    }

    /// Keep rows whose `field` equals `value`.
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field = field.into();
        let value = value.into();
        Self::new(move |row| row.get(&field) == Some(&value))
    }

    /// Keep rows whose `field` differs from `value`.
    pub fn not_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field = field.into();
        let value = value.into();
        Self::new(move |row| row.get(&field) != Some(&value))
    }

    pub fn resources(mut self, resources: impl Into<ResourceMatcher>) -> Self {
        self.resources = resources.into();
        self
    }
}

impl Processor for FilterRows {
    fn name(&self) -> String {
        "filter_rows".to_string()
    }

    fn stream(&mut self, resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        Ok(resources
            .into_iter()
            .map(|rs| {
                if !self.resources.matches(&rs.descriptor.name) {
                    return rs;
                }
                let predicate = Arc::clone(&self.predicate);
                let rows: RowIter = Box::new(rs.rows.filter(move |item| match item {
                    Ok(row) => predicate(row),
                    Err(_) => true,
                }));
                ResourceStream::new(rs.descriptor, rows)
            })
            .collect())
    }
}
