//! External sort over a keyed store.

use crate::kvstore::KeyedStore;
use crate::matcher::ResourceMatcher;
use crate::processor::Processor;
use crate::schema::PackageDescriptor;
use crate::sortkey::{KeyCalc, stable_suffix};
use crate::stream::{ResourceStream, RowIter, lazy_rows};
use anyhow::Result;

/// Sorts matched resources by a `{field}` key template.
///
/// Rows drain into a [`KeyedStore`] under the order-preserving key encoding
/// plus a stable original-index suffix, so equal keys keep their input
/// order and repeated sorts are idempotent. Draining happens on the first
/// pull, not at composition time.
pub struct SortRows {
    spec: String,
    resources: ResourceMatcher,
    reverse: bool,
    key: Option<KeyCalc>,
}

impl SortRows {
    pub fn new(spec: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            resources: ResourceMatcher::All,
            reverse: false,
            key: None,
        }
    }

    pub fn resources(mut self, resources: impl Into<ResourceMatcher>) -> Self {
        self.resources = resources.into();
        self
    }

    /// Emit in descending key order, the exact mirror of the ascending one.
    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }
}

impl Processor for SortRows {
    fn name(&self) -> String {
        "sort_rows".to_string()
    }

    fn describe(&mut self, _package: &mut PackageDescriptor) -> Result<()> {
        self.key = Some(KeyCalc::new(&self.spec)?);
        Ok(())
    }

    fn stream(&mut self, resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        let key = match &self.key {
            Some(k) => k.clone(),
            None => KeyCalc::new(&self.spec)?,
        };
        let mut out = Vec::with_capacity(resources.len());
        for rs in resources {
            if !self.resources.matches(&rs.descriptor.name) {
                out.push(rs);
                continue;
            }
            let key = key.clone();
            let reverse = self.reverse;
            let rows = rs.rows;
            let sorted = lazy_rows(move || {
                let mut store = KeyedStore::new();
                for (index, row) in rows.enumerate() {
                    let row = row?;
                    let k = format!("{}{}", key.key(&row)?, stable_suffix(index));
                    store.set(&k, &row)?;
                }
                Ok(Box::new(store.into_items(reverse).map(|item| item.map(|(_, row)| row)))
                    as RowIter)
            });
            out.push(ResourceStream::new(rs.descriptor, sorted));
        }
        Ok(out)
    }
}
