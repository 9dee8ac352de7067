//! Lazy row streams, resource streams and pipeline stats.

use crate::schema::ResourceDescriptor;
use crate::value::Row;
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// A single-pass lazy sequence of rows. Not restartable once consumed.
pub type RowIter = Box<dyn Iterator<Item = Result<Row>> + Send>;

/// Accumulated counters contributed by steps, merged left-to-right;
/// later writers win on key collision.
pub type Stats = BTreeMap<String, serde_json::Value>;

/// Shared handle a processor uses to publish stats while rows flow.
pub type StatsHandle = Arc<Mutex<Stats>>;

/// A named, schema-bound lazy row sequence.
pub struct ResourceStream {
    pub descriptor: ResourceDescriptor,
    pub rows: RowIter,
}

impl ResourceStream {
    pub fn new(descriptor: ResourceDescriptor, rows: RowIter) -> Self {
        Self { descriptor, rows }
    }
}

/// Lift an in-memory row list into a lazy stream.
pub fn rows_from_vec(rows: Vec<Row>) -> RowIter {
    Box::new(rows.into_iter().map(Ok))
}

/// Defer iterator construction until the first pull. Construction failures
/// surface as a single `Err` item.
pub fn lazy_rows<F>(build: F) -> RowIter
where
    F: FnOnce() -> Result<RowIter> + Send + 'static,
{
    Box::new(
        std::iter::once_with(move || match build() {
            Ok(rows) => rows,
            Err(e) => Box::new(std::iter::once(Err(e))) as RowIter,
        })
        .flatten(),
    )
}

/// Lock a mutex, recovering the guard when a holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Merge stats maps left-to-right; later values win on collision.
pub fn merge_stats<I: IntoIterator<Item = Stats>>(parts: I) -> Stats {
    let mut merged = Stats::new();
    for part in parts {
        merged.extend(part);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn lazy_rows_defers_and_surfaces_errors() {
        let mut it = lazy_rows(|| Err(anyhow!("nope")));
        assert!(it.next().unwrap().is_err());
        assert!(it.next().is_none());
    }

    #[test]
    fn lock_recovers_stats_from_a_poisoned_handle() {
        let handle: StatsHandle = Arc::new(Mutex::new(Stats::new()));
        lock(&handle).insert("rows".into(), serde_json::json!(5));

        let poisoner = Arc::clone(&handle);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the handle");
        })
        .join();

        assert!(handle.lock().is_err());
        assert_eq!(lock(&handle)["rows"], serde_json::json!(5));
    }

    #[test]
    fn stats_merge_is_last_write_wins() {
        let mut a = Stats::new();
        a.insert("rows".into(), serde_json::json!(1));
        a.insert("bytes".into(), serde_json::json!(10));
        let mut b = Stats::new();
        b.insert("rows".into(), serde_json::json!(2));
        let merged = merge_stats([a, b]);
        assert_eq!(merged["rows"], serde_json::json!(2));
        assert_eq!(merged["bytes"], serde_json::json!(10));
    }
}
