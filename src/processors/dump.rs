//! Sink adapter: persisted JSONL snapshots.

use crate::matcher::ResourceMatcher;
use crate::processor::Processor;
use crate::schema::PackageDescriptor;
use crate::stream::{ResourceStream, RowIter, Stats, StatsHandle, lock};
use crate::value::{Row, row_to_json};
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Writes matched resources to a snapshot directory as rows flow through.
///
/// One JSONL file per resource, then `datapackage.json` with per-resource
/// `bytes`, `count_of_rows` and sha-256 `hash` metadata, and finally a
/// `.complete` marker. The marker is written last so an interrupted run
/// leaves a snapshot that reads as absent.
pub struct Dump {
    dir: PathBuf,
    resources: ResourceMatcher,
    stats: StatsHandle,
    snapshot: Option<PackageDescriptor>,
}

/// Marker file whose presence makes a snapshot readable.
pub const COMPLETE_MARKER: &str = ".complete";

impl Dump {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            resources: ResourceMatcher::All,
            stats: Arc::new(Mutex::new(Stats::new())),
            snapshot: None,
        }
    }

    pub fn resources(mut self, resources: impl Into<ResourceMatcher>) -> Self {
        self.resources = resources.into();
        self
    }
}

struct DumpState {
    dir: PathBuf,
    package: PackageDescriptor,
    pending: usize,
    stats: StatsHandle,
}

impl DumpState {
    /// Record one finished resource; the last one writes the descriptor
    /// and then the completion marker.
    fn finish_resource(&mut self, name: &str, bytes: u64, count: u64, hash: String) -> Result<()> {
        if let Some(resource) = self.package.get_resource_mut(name) {
            resource.extra.insert("bytes".into(), bytes.into());
            resource.extra.insert("count_of_rows".into(), count.into());
            resource.extra.insert("hash".into(), hash.into());
        }
        {
            let mut stats = lock(&self.stats);
            bump(&mut stats, "bytes", bytes);
            bump(&mut stats, "count_of_rows", count);
        }
        self.pending -= 1;
        if self.pending == 0 {
            self.write_descriptor()?;
        }
        Ok(())
    }

    fn write_descriptor(&self) -> Result<()> {
        let doc = serde_json::to_string_pretty(&self.package)?;
        let path = self.dir.join("datapackage.json");
        std::fs::write(&path, doc)
            .with_context(|| format!("writing descriptor {}", path.display()))?;
        let marker = self.dir.join(COMPLETE_MARKER);
        std::fs::write(&marker, b"")
            .with_context(|| format!("writing marker {}", marker.display()))?;
        tracing::info!(path = %self.dir.display(), "snapshot complete");
        Ok(())
    }
}

fn bump(stats: &mut Stats, key: &str, by: u64) {
    let current = stats.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
    stats.insert(key.to_string(), (current + by).into());
}

impl Processor for Dump {
    fn name(&self) -> String {
        "dump_to_path".to_string()
    }

    fn describe(&mut self, package: &mut PackageDescriptor) -> Result<()> {
        let mut snap = PackageDescriptor::new();
        snap.extra = package.extra.clone();
        for resource in &package.resources {
            if !self.resources.matches(&resource.name) {
                continue;
            }
            let mut resource = resource.clone();
            resource.path = Some(format!("{}.jsonl", resource.name));
            resource.format = Some("jsonl".into());
            snap.add_resource(resource)?;
        }
        self.snapshot = Some(snap);
        Ok(())
    }

    fn stream(&mut self, resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        let snapshot = match self.snapshot.take() {
            Some(s) => s,
            None => PackageDescriptor::new(),
        };
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating snapshot directory {}", self.dir.display()))?;

        let pending = snapshot.len();
        let state = Arc::new(Mutex::new(DumpState {
            dir: self.dir.clone(),
            package: snapshot,
            pending,
            stats: Arc::clone(&self.stats),
        }));
        if pending == 0 {
            lock(&state).write_descriptor()?;
            return Ok(resources);
        }

        Ok(resources
            .into_iter()
            .map(|rs| {
                if lock(&state).package.get_resource(&rs.descriptor.name).is_none() {
                    return rs;
                }
                let name = rs.descriptor.name.clone();
                let writer: RowIter = Box::new(DumpIter {
                    rows: rs.rows,
                    path: self.dir.join(format!("{name}.jsonl")),
                    name,
                    writer: None,
                    hasher: Sha256::new(),
                    bytes: 0,
                    count: 0,
                    state: Arc::clone(&state),
                    done: false,
                });
                ResourceStream::new(rs.descriptor, writer)
            })
            .collect())
    }

    fn stats_handle(&self) -> Option<StatsHandle> {
        Some(Arc::clone(&self.stats))
    }
}

struct DumpIter {
    rows: RowIter,
    path: PathBuf,
    name: String,
    writer: Option<BufWriter<File>>,
    hasher: Sha256,
    bytes: u64,
    count: u64,
    state: Arc<Mutex<DumpState>>,
    done: bool,
}

impl DumpIter {
    fn write_row(&mut self, row: &Row) -> Result<()> {
        if self.writer.is_none() {
            let file = File::create(&self.path)
                .with_context(|| format!("creating row file {}", self.path.display()))?;
            self.writer = Some(BufWriter::new(file));
        }
        let mut line = serde_json::to_vec(&row_to_json(row))?;
        line.push(b'\n');
        if let Some(w) = self.writer.as_mut() {
            w.write_all(&line)?;
        }
        self.hasher.update(&line);
        self.bytes += line.len() as u64;
        self.count += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.writer.is_none() {
            // Zero-row resources still produce an (empty) file.
            let file = File::create(&self.path)
                .with_context(|| format!("creating row file {}", self.path.display()))?;
            self.writer = Some(BufWriter::new(file));
        }
        if let Some(mut w) = self.writer.take() {
            w.flush()?;
        }
        let hash = format!("{:x}", std::mem::take(&mut self.hasher).finalize());
        lock(&self.state).finish_resource(&self.name, self.bytes, self.count, hash)
    }
}

impl Iterator for DumpIter {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rows.next() {
            Some(Ok(row)) => {
                if let Err(e) = self.write_row(&row) {
                    return Some(Err(e));
                }
                Some(Ok(row))
            }
            Some(Err(e)) => Some(Err(e)),
            None => {
                if !self.done {
                    self.done = true;
                    if let Err(e) = self.finish() {
                        return Some(Err(e));
                    }
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldType, ResourceDescriptor, Schema};
    use crate::stream::rows_from_vec;
    use crate::value::Value;

    #[test]
    fn writes_rows_descriptor_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut pkg = PackageDescriptor::new();
        pkg.add_resource(
            ResourceDescriptor::new("r")
                .with_schema(Schema::new(vec![Field::new("n", FieldType::Integer)])),
        )
        .unwrap();

        let mut p = Dump::new(dir.path());
        p.describe(&mut pkg).unwrap();

        let rows: Vec<Row> = (0..3)
            .map(|i| {
                let mut r = Row::new();
                r.insert("n".into(), Value::Integer(i));
                r
            })
            .collect();
        let out = p
            .stream(vec![ResourceStream::new(
                ResourceDescriptor::new("r"),
                rows_from_vec(rows),
            )])
            .unwrap();
        // Rows pass through while being persisted.
        let passed: Vec<Row> = out.into_iter().next().unwrap().rows.map(|r| r.unwrap()).collect();
        assert_eq!(passed.len(), 3);

        assert!(dir.path().join("r.jsonl").is_file());
        assert!(dir.path().join(COMPLETE_MARKER).is_file());
        let doc = std::fs::read_to_string(dir.path().join("datapackage.json")).unwrap();
        let pkg: PackageDescriptor = serde_json::from_str(&doc).unwrap();
        let r = pkg.get_resource("r").unwrap();
        assert_eq!(r.extra["count_of_rows"], serde_json::json!(3));
        assert_eq!(r.path.as_deref(), Some("r.jsonl"));

        let stats = lock(&p.stats);
        assert_eq!(stats["count_of_rows"], serde_json::json!(3));
    }

    #[test]
    fn interrupted_stream_leaves_no_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut pkg = PackageDescriptor::new();
        pkg.add_resource(ResourceDescriptor::new("r")).unwrap();

        let mut p = Dump::new(dir.path());
        p.describe(&mut pkg).unwrap();
        let out = p
            .stream(vec![ResourceStream::new(
                ResourceDescriptor::new("r"),
                rows_from_vec(vec![Row::new(), Row::new()]),
            )])
            .unwrap();
        let mut rows = out.into_iter().next().unwrap().rows;
        rows.next(); // pull one row, then drop the iterator
        drop(rows);
        assert!(!dir.path().join(COMPLETE_MARKER).exists());
    }
}
