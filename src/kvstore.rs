//! Ordered, disk-spilling key-value store.
//!
//! The substrate for sorting, grouping, joining, deduplicating and
//! duplicating a resource: rows are written under byte-lexicographic string
//! keys and streamed back out in key order (or reversed).
//!
//! Keys stay resident in a `BTreeMap`; values buffer in memory and, once
//! the buffered bytes cross a threshold, the whole buffered batch is
//! appended to an anonymous temp file and the slots switch to
//! (offset, length) references. This bounds peak memory independent of
//! resource size. A store is exclusively owned by the single operation that
//! created it - strictly single-writer-then-single-reader - and dropping it
//! releases the spill file.

use crate::value::Row;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

/// Default spill threshold for buffered value bytes.
const DEFAULT_SPILL_THRESHOLD: usize = 32 * 1024 * 1024;

#[derive(Debug)]
enum Slot {
    Inline(Vec<u8>),
    Spilled { offset: u64, len: u32 },
}

/// An ordered key to row store with batch spill-to-disk.
#[derive(Debug)]
pub struct KeyedStore {
    slots: BTreeMap<String, Slot>,
    spill: Option<File>,
    buffered_bytes: usize,
    threshold: usize,
}

impl Default for KeyedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyedStore {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_SPILL_THRESHOLD)
    }

    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            slots: BTreeMap::new(),
            spill: None,
            buffered_bytes: 0,
            threshold: threshold.max(1),
        }
    }

    /// Insert or overwrite the row stored under `key`.
    pub fn set(&mut self, key: &str, row: &Row) -> Result<()> {
        let bytes = serde_json::to_vec(row).context("serializing keyed store value")?;
        if let Some(Slot::Inline(old)) = self.slots.get(key) {
            self.buffered_bytes -= old.len();
        }
        self.buffered_bytes += bytes.len();
        self.slots.insert(key.to_string(), Slot::Inline(bytes));
        if self.buffered_bytes > self.threshold {
            self.flush_batch()?;
        }
        Ok(())
    }

    /// Read back the row under `key`, following spilled slots to disk.
    pub fn get(&mut self, key: &str) -> Result<Option<Row>> {
        let Some(slot) = self.slots.get(key) else {
            return Ok(None);
        };
        let row = match slot {
            Slot::Inline(bytes) => serde_json::from_slice(bytes)?,
            Slot::Spilled { offset, len } => {
                let bytes = read_spilled(self.spill.as_mut(), *offset, *len)?;
                serde_json::from_slice(&bytes)?
            }
        };
        Ok(Some(row))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Write every buffered value out to the spill file as one batch.
    fn flush_batch(&mut self) -> Result<()> {
        if self.spill.is_none() {
            self.spill = Some(tempfile::tempfile().context("creating keyed store spill file")?);
        }
        let file = self.spill.as_mut().context("spill file missing after creation")?;
        let mut offset = file.seek(SeekFrom::End(0))?;
        tracing::debug!(bytes = self.buffered_bytes, keys = self.slots.len(), "spilling keyed store batch");
        for slot in self.slots.values_mut() {
            if let Slot::Inline(bytes) = slot {
                file.write_all(bytes)?;
                let len = bytes.len() as u32;
                *slot = Slot::Spilled { offset, len };
                offset += u64::from(len);
            }
        }
        file.flush()?;
        self.buffered_bytes = 0;
        Ok(())
    }

    /// Consume the store, yielding `(key, row)` pairs in key order, or
    /// descending order when `reverse` is set.
    pub fn into_items(self, reverse: bool) -> KeyedStoreIter {
        let mut entries: Vec<(String, Slot)> = self.slots.into_iter().collect();
        if reverse {
            entries.reverse();
        }
        KeyedStoreIter {
            entries: entries.into_iter(),
            spill: self.spill,
        }
    }
}

fn read_spilled(spill: Option<&mut File>, offset: u64, len: u32) -> Result<Vec<u8>> {
    let file = spill.context("spilled slot without a spill file")?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Iterator over a consumed [`KeyedStore`].
pub struct KeyedStoreIter {
    entries: std::vec::IntoIter<(String, Slot)>,
    spill: Option<File>,
}

impl Iterator for KeyedStoreIter {
    type Item = Result<(String, Row)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, slot) = self.entries.next()?;
        let decoded = match slot {
            Slot::Inline(bytes) => serde_json::from_slice(&bytes).map_err(Into::into),
            Slot::Spilled { offset, len } => read_spilled(self.spill.as_mut(), offset, len)
                .and_then(|bytes| serde_json::from_slice(&bytes).map_err(Into::into)),
        };
        Some(decoded.map(|row| (key, row)))
    }
}
