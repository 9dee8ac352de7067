//! Primary-key deduplication.

use crate::kvstore::KeyedStore;
use crate::matcher::ResourceMatcher;
use crate::processor::Processor;
use crate::sortkey::KeyCalc;
use crate::stream::{ResourceStream, RowIter, lazy_rows};
use anyhow::{Result, bail};

/// Keeps exactly one row per distinct primary-key value on matched
/// resources. The first-seen row wins; output is in key order.
pub struct Deduplicate {
    resources: ResourceMatcher,
}

impl Deduplicate {
    pub fn new() -> Self {
        Self {
            resources: ResourceMatcher::All,
        }
    }

    pub fn resources(mut self, resources: impl Into<ResourceMatcher>) -> Self {
        self.resources = resources.into();
        self
    }
}

impl Default for Deduplicate {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Deduplicate {
    fn name(&self) -> String {
        "deduplicate".to_string()
    }

    fn stream(&mut self, resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        let mut out = Vec::with_capacity(resources.len());
        for rs in resources {
            if !self.resources.matches(&rs.descriptor.name) {
                out.push(rs);
                continue;
            }
            let pk = rs.descriptor.schema.primary_key.clone();
            if pk.is_empty() {
                bail!(
                    "cannot deduplicate resource {:?}: no primary key declared",
                    rs.descriptor.name
                );
            }
            let calc = KeyCalc::from_fields(&pk);
            let rows = rs.rows;
            let deduped = lazy_rows(move || {
                let mut store = KeyedStore::new();
                for row in rows {
                    let row = row?;
                    let key = calc.key(&row)?;
                    if !store.contains(&key) {
                        store.set(&key, &row)?;
                    }
                }
                Ok(Box::new(store.into_items(false).map(|item| item.map(|(_, row)| row)))
                    as RowIter)
            });
            out.push(ResourceStream::new(rs.descriptor, deduped));
        }
        Ok(out)
    }
}
