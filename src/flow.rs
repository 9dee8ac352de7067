//! Flow composition and two-phase execution.
//!
//! A [`Flow`] is an ordered chain of steps. Running it flattens nested
//! flows, applies checkpoint/cache chain rewrites, then executes in two
//! phases: every step's `describe` runs to completion first (each sees the
//! cumulative descriptor so far), and only then are the lazy row iterators
//! threaded through every step's `stream`. Nothing executes until a
//! consumer pulls from the resulting iterators.
//!
//! Any error - from `describe` or surfacing later through a row iterator -
//! is wrapped exactly once with the responsible step's name and 1-based
//! position in the flattened chain.

use crate::errors::attribute;
use crate::processor::{PackageFnProcessor, Processor, RowFnProcessor, RowsFnProcessor, Step};
use crate::schema::PackageDescriptor;
use crate::stream::{ResourceStream, RowIter, Stats, StatsHandle, lock, merge_stats};
use crate::value::Row;
use anyhow::{Result, anyhow};

/// A flattened step ready for execution.
pub(crate) struct NamedStep {
    pub(crate) name: String,
    pub(crate) proc: Box<dyn Processor>,
}

impl NamedStep {
    pub(crate) fn new(proc: Box<dyn Processor>) -> Self {
        Self {
            name: proc.name(),
            proc,
        }
    }
}

/// An ordered composition of steps (and nested flows) executed as one unit.
#[derive(Default)]
pub struct Flow {
    steps: Vec<Step>,
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step; accepts processors, nested flows, checkpoints,
    /// caches, and the closure shapes from [`Step`].
    pub fn step(mut self, step: impl Into<Step>) -> Self {
        self.steps.push(step.into());
        self
    }

    pub(crate) fn into_steps(self) -> Vec<Step> {
        self.steps
    }

    /// Flatten nested flows and apply chain rewrites, yielding the final
    /// ordered step list used for position numbering.
    fn flatten(self) -> Result<Vec<NamedStep>> {
        let mut out = Vec::new();
        flatten_into(self.steps, &mut out)?;
        Ok(out)
    }

    /// Run both phases and hand back the lazy streams plus the final,
    /// frozen descriptor.
    pub fn datastream(self) -> Result<DataStream> {
        let mut steps = self.flatten()?;

        // Phase one: all describes, in order, each seeing the cumulative
        // descriptor. A snapshot is kept per position for re-syncing the
        // stream sequence below.
        let mut package = PackageDescriptor::new();
        let mut snapshots: Vec<PackageDescriptor> = Vec::with_capacity(steps.len());
        for (i, step) in steps.iter_mut().enumerate() {
            step.proc
                .describe(&mut package)
                .map_err(|e| attribute(e, &step.name, i + 1))?;
            snapshots.push(package.clone());
        }

        // Phase two: thread the lazy iterators through every step. After
        // each step the stream order is re-synced against that step's
        // descriptor snapshot; resource add/remove outside describe is an
        // error here.
        let mut streams: Vec<ResourceStream> = Vec::new();
        for (i, step) in steps.iter_mut().enumerate() {
            let position = i + 1;
            streams = step
                .proc
                .stream(streams)
                .map_err(|e| attribute(e, &step.name, position))?;

            let declared = &snapshots[i].resources;
            if streams.len() != declared.len() {
                return Err(attribute(
                    anyhow!(
                        "declared {} resource(s) but produced {} stream(s)",
                        declared.len(),
                        streams.len()
                    ),
                    &step.name,
                    position,
                ));
            }
            streams = streams
                .into_iter()
                .zip(declared.iter())
                .map(|(mut rs, rd)| {
                    rs.descriptor = rd.clone();
                    rs.rows = attribute_rows(rs.rows, step.name.clone(), position);
                    rs
                })
                .collect();
        }

        let stats_handles = steps.iter().filter_map(|s| s.proc.stats_handle()).collect();
        Ok(DataStream {
            package,
            resources: streams,
            stats_handles,
        })
    }

    /// Run the flow and materialize every resource's rows in memory.
    pub fn results(self) -> Result<(Vec<Vec<Row>>, PackageDescriptor, Stats)> {
        let ds = self.datastream()?;
        let mut all = Vec::with_capacity(ds.resources.len());
        for rs in ds.resources {
            let rows: Result<Vec<Row>> = rs.rows.collect();
            all.push(rows?);
        }
        let stats = collect_stats(&ds.stats_handles);
        Ok((all, ds.package, stats))
    }

    /// Run the flow for its side effects, discarding rows.
    pub fn process(self) -> Result<(PackageDescriptor, Stats)> {
        let ds = self.datastream()?;
        for rs in ds.resources {
            for row in rs.rows {
                row?;
            }
        }
        let stats = collect_stats(&ds.stats_handles);
        Ok((ds.package, stats))
    }
}

fn flatten_into(steps: Vec<Step>, out: &mut Vec<NamedStep>) -> Result<()> {
    for step in steps {
        match step {
            Step::Nested(flow) => flatten_into(flow.into_steps(), out)?,
            Step::Checkpoint(cp) => {
                // The checkpoint absorbs everything flattened so far into
                // its own sub-chain, so one checkpoint covers the whole
                // upstream prefix.
                let preceding = std::mem::take(out);
                out.extend(cp.rewrite(preceding)?);
            }
            Step::Cache(cache) => out.extend(cache.rewrite()?),
            Step::Chain(proc) => out.push(NamedStep::new(proc)),
            Step::Row { f, resources } => {
                out.push(NamedStep::new(Box::new(RowFnProcessor::new(f, resources))));
            }
            Step::Rows { f, resources } => {
                out.push(NamedStep::new(Box::new(RowsFnProcessor::new(f, resources))));
            }
            Step::Package { describe, stream } => {
                out.push(NamedStep::new(Box::new(PackageFnProcessor::new(
                    describe, stream,
                ))));
            }
        }
    }
    Ok(())
}

/// Flatten a sub-chain (used by checkpoint/cache rewrites).
pub(crate) fn flatten_steps(steps: Vec<Step>) -> Result<Vec<NamedStep>> {
    let mut out = Vec::new();
    flatten_into(steps, &mut out)?;
    Ok(out)
}

/// Wrap a row iterator so lazy failures attribute to the given step.
fn attribute_rows(rows: RowIter, name: String, position: usize) -> RowIter {
    Box::new(rows.map(move |item| item.map_err(|e| attribute(e, &name, position))))
}

/// The product of a flow run: a frozen descriptor and one lazy stream per
/// resource, in descriptor order.
pub struct DataStream {
    pub package: PackageDescriptor,
    pub resources: Vec<ResourceStream>,
    pub(crate) stats_handles: Vec<StatsHandle>,
}

impl DataStream {
    /// Merge the stats every step published so far (left-to-right,
    /// last write wins).
    pub fn merge_stats(&self) -> Stats {
        collect_stats(&self.stats_handles)
    }
}

fn collect_stats(handles: &[StatsHandle]) -> Stats {
    // Poison recovery keeps stats published before a worker panic.
    merge_stats(handles.iter().map(|h| lock(h).clone()))
}
