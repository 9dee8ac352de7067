//! Parallel per-row transformation over a bounded worker pool.

use crate::matcher::ResourceMatcher;
use crate::processor::Processor;
use crate::stream::{ResourceStream, RowIter, lazy_rows};
use crate::value::Row;
use anyhow::Result;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

type ParallelRowFn = Arc<dyn Fn(&mut Row) -> Result<()> + Send + Sync>;
type RowPredicate = Arc<dyn Fn(&Row) -> bool + Send + Sync>;

/// Applies a row function to matched resources on a fixed worker pool.
///
/// A producer thread feeds a bounded queue; workers pull rows, apply the
/// function and push results to a fan-in channel the output iterator
/// drains. The output multiset equals the input's, but ordering is not
/// preserved. A worker panic is caught and logged and drops only the row
/// being processed. Dropping the output iterator closes the channels,
/// which winds the producer and workers down cooperatively.
pub struct Parallelize {
    f: ParallelRowFn,
    workers: usize,
    resources: ResourceMatcher,
    predicate: Option<RowPredicate>,
}

impl Parallelize {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut Row) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(f),
            workers: num_cpus::get() * 2,
            resources: ResourceMatcher::All,
            predicate: None,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn resources(mut self, resources: impl Into<ResourceMatcher>) -> Self {
        self.resources = resources.into();
        self
    }

    /// Rows failing the predicate bypass the pool and pass through
    /// unchanged.
    pub fn predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Row) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }
}

impl Processor for Parallelize {
    fn name(&self) -> String {
        "parallelize".to_string()
    }

    fn stream(&mut self, resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        let mut out = Vec::with_capacity(resources.len());
        for rs in resources {
            if !self.resources.matches(&rs.descriptor.name) {
                out.push(rs);
                continue;
            }
            let f = Arc::clone(&self.f);
            let predicate = self.predicate.clone();
            let workers = self.workers;
            let rows = rs.rows;
            let pooled = lazy_rows(move || Ok(pooled_rows(rows, f, predicate, workers)));
            out.push(ResourceStream::new(rs.descriptor, pooled));
        }
        Ok(out)
    }
}

fn pooled_rows(
    rows: RowIter,
    f: ParallelRowFn,
    predicate: Option<RowPredicate>,
    workers: usize,
) -> RowIter {
    let (work_tx, work_rx) = sync_channel::<Row>(workers * 2);
    let (out_tx, out_rx) = sync_channel::<Result<Row>>(workers * 2);
    let work_rx = Arc::new(Mutex::new(work_rx));

    let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(workers + 1);
    for _ in 0..workers {
        let work_rx = Arc::clone(&work_rx);
        let out_tx = out_tx.clone();
        let f = Arc::clone(&f);
        handles.push(std::thread::spawn(move || worker_loop(work_rx, out_tx, f)));
    }
    handles.push(std::thread::spawn(move || {
        producer_loop(rows, predicate, work_tx, out_tx)
    }));

    Box::new(PooledIter {
        out_rx,
        handles,
    })
}

fn producer_loop(
    rows: RowIter,
    predicate: Option<RowPredicate>,
    work_tx: SyncSender<Row>,
    out_tx: SyncSender<Result<Row>>,
) {
    for item in rows {
        let sent = match item {
            Err(e) => out_tx.send(Err(e)).is_ok(),
            Ok(row) => {
                if predicate.as_ref().is_some_and(|p| !p(&row)) {
                    out_tx.send(Ok(row)).is_ok()
                } else {
                    work_tx.send(row).is_ok()
                }
            }
        };
        // A closed channel means the consumer went away; stop pulling.
        if !sent {
            return;
        }
    }
}

fn worker_loop(
    work_rx: Arc<Mutex<Receiver<Row>>>,
    out_tx: SyncSender<Result<Row>>,
    f: ParallelRowFn,
) {
    loop {
        let row = {
            let rx = match work_rx.lock() {
                Ok(rx) => rx,
                Err(_) => return,
            };
            match rx.recv() {
                Ok(row) => row,
                Err(_) => return,
            }
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let mut row = row;
            let result = f(&mut row);
            (result, row)
        }));
        let sent = match outcome {
            Ok((Ok(()), row)) => out_tx.send(Ok(row)).is_ok(),
            Ok((Err(e), _)) => out_tx.send(Err(e)).is_ok(),
            Err(_) => {
                tracing::warn!("worker panicked, dropping row");
                true
            }
        };
        if !sent {
            return;
        }
    }
}

struct PooledIter {
    out_rx: Receiver<Result<Row>>,
    handles: Vec<JoinHandle<()>>,
}

impl Iterator for PooledIter {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.out_rx.recv() {
            Ok(item) => Some(item),
            // Every sender dropped: producer and workers are done.
            Err(_) => {
                for handle in self.handles.drain(..) {
                    let _ = handle.join();
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ResourceDescriptor;
    use crate::stream::rows_from_vec;
    use crate::value::Value;

    fn rows(n: i64) -> Vec<Row> {
        (0..n)
            .map(|i| {
                let mut r = Row::new();
                r.insert("n".into(), Value::Integer(i));
                r
            })
            .collect()
    }

    fn run(p: &mut Parallelize, input: Vec<Row>) -> Vec<Result<Row>> {
        let out = p
            .stream(vec![ResourceStream::new(
                ResourceDescriptor::new("r"),
                rows_from_vec(input),
            )])
            .unwrap();
        out.into_iter().next().unwrap().rows.collect()
    }

    #[test]
    fn preserves_the_multiset_without_order() {
        let mut p = Parallelize::new(|row| {
            if let Some(Value::Integer(n)) = row.get("n").cloned() {
                row.insert("n".into(), Value::Integer(n * 10));
            }
            Ok(())
        })
        .workers(4);
        let items = run(&mut p, rows(50));
        let mut got: Vec<i64> = items
            .into_iter()
            .map(|r| match r.unwrap()["n"] {
                Value::Integer(i) => i,
                _ => panic!("expected integer"),
            })
            .collect();
        got.sort();
        let want: Vec<i64> = (0..50).map(|i| i * 10).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn a_panicking_row_is_dropped_not_fatal() {
        let mut p = Parallelize::new(|row| {
            if row["n"] == Value::Integer(3) {
                panic!("bad row");
            }
            Ok(())
        })
        .workers(2);
        let items = run(&mut p, rows(10));
        let ok: Vec<Row> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(ok.len(), 9);
    }

    #[test]
    fn predicate_bypasses_the_pool() {
        let mut p = Parallelize::new(|row| {
            row.insert("seen".into(), Value::Bool(true));
            Ok(())
        })
        .workers(2)
        .predicate(|row| row["n"] == Value::Integer(0));
        let items = run(&mut p, rows(2));
        let seen = items
            .into_iter()
            .map(|r| r.unwrap())
            .filter(|r| r.contains_key("seen"))
            .count();
        assert_eq!(seen, 1);
    }
}
