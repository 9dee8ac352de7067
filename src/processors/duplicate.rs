//! Resource duplication through the keyed store.

use crate::kvstore::KeyedStore;
use crate::processor::Processor;
use crate::schema::PackageDescriptor;
use crate::sortkey::stable_suffix;
use crate::stream::{ResourceStream, RowIter, lazy_rows, lock};
use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};

/// Copies a resource, inserting the copy right after the source.
///
/// The source is drained once into two index-keyed stores on the first pull
/// of either output, so the copy works regardless of which resource the
/// consumer reads first and peak memory stays bounded by the store's spill
/// threshold.
pub struct Duplicate {
    source: String,
    target_name: String,
    target_path: Option<String>,
}

impl Duplicate {
    pub fn new(source: impl Into<String>, target_name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target_name: target_name.into(),
            target_path: None,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.target_path = Some(path.into());
        self
    }
}

struct TeeState {
    rows: Option<RowIter>,
    first: Option<KeyedStore>,
    second: Option<KeyedStore>,
}

fn drain(state: &Mutex<TeeState>) -> Result<()> {
    let mut st = lock(state);
    let Some(rows) = st.rows.take() else {
        return Ok(());
    };
    let mut a = KeyedStore::new();
    let mut b = KeyedStore::new();
    for (index, row) in rows.enumerate() {
        let row = row?;
        let key = stable_suffix(index);
        a.set(&key, &row)?;
        b.set(&key, &row)?;
    }
    st.first = Some(a);
    st.second = Some(b);
    Ok(())
}

fn store_rows(
    state: Arc<Mutex<TeeState>>,
    take: fn(&mut TeeState) -> Option<KeyedStore>,
) -> RowIter {
    lazy_rows(move || {
        drain(&state)?;
        let store = take(&mut lock(&state)).context("duplicate store already consumed")?;
        Ok(Box::new(store.into_items(false).map(|item| item.map(|(_, row)| row))) as RowIter)
    })
}

impl Processor for Duplicate {
    fn name(&self) -> String {
        "duplicate".to_string()
    }

    fn describe(&mut self, package: &mut PackageDescriptor) -> Result<()> {
        let source = package
            .get_resource(&self.source)
            .with_context(|| format!("resource {:?} not found in package", self.source))?;
        let mut copy = source.clone();
        copy.name = self.target_name.clone();
        copy.path = self.target_path.clone().or(copy.path);
        package.insert_resource_after(&self.source, copy)
    }

    fn stream(&mut self, mut resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        let pos = resources
            .iter()
            .position(|rs| rs.descriptor.name == self.source)
            .with_context(|| format!("resource {:?} not found in stream", self.source))?;
        let source = resources.remove(pos);

        let state = Arc::new(Mutex::new(TeeState {
            rows: Some(source.rows),
            first: None,
            second: None,
        }));

        let mut copy_descriptor = source.descriptor.clone();
        copy_descriptor.name = self.target_name.clone();

        resources.insert(
            pos,
            ResourceStream::new(
                source.descriptor,
                store_rows(Arc::clone(&state), |st| st.first.take()),
            ),
        );
        resources.insert(
            pos + 1,
            ResourceStream::new(copy_descriptor, store_rows(state, |st| st.second.take())),
        );
        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ResourceDescriptor;
    use crate::stream::rows_from_vec;
    use crate::value::{Row, Value};

    #[test]
    fn both_outputs_see_every_row_in_order() {
        let rows: Vec<Row> = (0..5)
            .map(|i| {
                let mut r = Row::new();
                r.insert("n".into(), Value::Integer(i));
                r
            })
            .collect();

        let mut pkg = PackageDescriptor::new();
        pkg.add_resource(ResourceDescriptor::new("src")).unwrap();
        let mut p = Duplicate::new("src", "copy");
        p.describe(&mut pkg).unwrap();
        assert_eq!(pkg.resource_names(), vec!["src", "copy"]);

        let out = p
            .stream(vec![ResourceStream::new(
                ResourceDescriptor::new("src"),
                rows_from_vec(rows.clone()),
            )])
            .unwrap();
        assert_eq!(out.len(), 2);

        // Pull the copy first to exercise order independence.
        let mut it = out.into_iter();
        let src = it.next().unwrap();
        let copy = it.next().unwrap();
        let copied: Vec<Row> = copy.rows.map(|r| r.unwrap()).collect();
        let original: Vec<Row> = src.rows.map(|r| r.unwrap()).collect();
        assert_eq!(copied, rows);
        assert_eq!(original, rows);
    }
}
