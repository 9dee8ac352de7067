//! The two-phase processor contract and the step shapes a flow accepts.
//!
//! A [`Processor`] first gets to inspect and mutate the package descriptor
//! (`describe`), then to rewire the per-resource row iterators (`stream`).
//! Nothing pulls a row until the terminal consumer does, so `stream`
//! implementations wrap iterators rather than drain them.
//!
//! Plain closures are adapted into processors at composition time through
//! a closed set of [`Step`] shapes: a row function, a rows function, a
//! package function pair, a full processor, a nested flow, or a
//! checkpoint/cache rewrite.

use crate::matcher::ResourceMatcher;
use crate::processors::{Cache, Checkpoint};
use crate::schema::PackageDescriptor;
use crate::stream::{ResourceStream, RowIter, StatsHandle};
use crate::value::Row;
use anyhow::Result;
use std::sync::Arc;

/// A transformation unit with a describe phase and a stream phase.
pub trait Processor: Send {
    /// Name used in error attribution; defaults to the type name.
    fn name(&self) -> String {
        short_type_name::<Self>()
    }

    /// Pure metadata transform; may add fields or resources, reorder, or
    /// copy through. Runs to completion for every step before any row
    /// streaming begins.
    fn describe(&mut self, _package: &mut PackageDescriptor) -> Result<()> {
        Ok(())
    }

    /// Wrap or replace the per-resource row iterators. Must return one
    /// stream per resource declared by this step's describe phase.
    fn stream(&mut self, resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        Ok(resources)
    }

    /// Stats this step publishes while rows flow, if any.
    fn stats_handle(&self) -> Option<StatsHandle> {
        None
    }
}

pub(crate) fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full).to_string()
}

type RowFn = Arc<dyn Fn(&mut Row) -> Result<()> + Send + Sync>;
type RowsFn = Box<dyn FnMut(RowIter) -> RowIter + Send>;
type DescribeFn = Box<dyn FnMut(&mut PackageDescriptor) -> Result<()> + Send>;
type StreamFn = Box<dyn FnMut(Vec<ResourceStream>) -> Result<Vec<ResourceStream>> + Send>;

/// One link in a flow's chain.
pub enum Step {
    /// A full two-phase processor.
    Chain(Box<dyn Processor>),
    /// A per-row mutation applied to every matched resource.
    Row { f: RowFn, resources: ResourceMatcher },
    /// A whole-iterator rewrite applied to every matched resource.
    Rows { f: RowsFn, resources: ResourceMatcher },
    /// A package-level transform: a descriptor mutation plus a stream
    /// rewrite that may add, remove or reorder resources.
    Package { describe: DescribeFn, stream: StreamFn },
    /// A nested flow, flattened in place.
    Nested(crate::flow::Flow),
    /// A checkpoint, rewritten at flatten time (may absorb the steps that
    /// precede it).
    Checkpoint(Checkpoint),
    /// A cache, rewritten at flatten time.
    Cache(Cache),
}

impl Step {
    /// Adapt a plain row function into a step.
    pub fn row<F>(f: F) -> Step
    where
        F: Fn(&mut Row) -> Result<()> + Send + Sync + 'static,
    {
        Step::Row {
            f: Arc::new(f),
            resources: ResourceMatcher::All,
        }
    }

    /// A row function restricted to matched resources.
    pub fn row_for<F>(resources: impl Into<ResourceMatcher>, f: F) -> Step
    where
        F: Fn(&mut Row) -> Result<()> + Send + Sync + 'static,
    {
        Step::Row {
            f: Arc::new(f),
            resources: resources.into(),
        }
    }

    /// Adapt a whole-iterator function into a step.
    pub fn rows<F>(f: F) -> Step
    where
        F: FnMut(RowIter) -> RowIter + Send + 'static,
    {
        Step::Rows {
            f: Box::new(f),
            resources: ResourceMatcher::All,
        }
    }

    /// A rows function restricted to matched resources.
    pub fn rows_for<F>(resources: impl Into<ResourceMatcher>, f: F) -> Step
    where
        F: FnMut(RowIter) -> RowIter + Send + 'static,
    {
        Step::Rows {
            f: Box::new(f),
            resources: resources.into(),
        }
    }

    /// Adapt a package-level function pair into a step: `describe` mutates
    /// the descriptor, `stream` rewires the resource iterators.
    pub fn package<D, S>(describe: D, stream: S) -> Step
    where
        D: FnMut(&mut PackageDescriptor) -> Result<()> + Send + 'static,
        S: FnMut(Vec<ResourceStream>) -> Result<Vec<ResourceStream>> + Send + 'static,
    {
        Step::Package {
            describe: Box::new(describe),
            stream: Box::new(stream),
        }
    }
}

impl<P: Processor + 'static> From<P> for Step {
    fn from(p: P) -> Step {
        Step::Chain(Box::new(p))
    }
}

impl From<crate::flow::Flow> for Step {
    fn from(f: crate::flow::Flow) -> Step {
        Step::Nested(f)
    }
}

impl From<Checkpoint> for Step {
    fn from(cp: Checkpoint) -> Step {
        Step::Checkpoint(cp)
    }
}

impl From<Cache> for Step {
    fn from(c: Cache) -> Step {
        Step::Cache(c)
    }
}

/// Adapter turning a row function into a processor.
pub(crate) struct RowFnProcessor {
    f: RowFn,
    resources: ResourceMatcher,
}

impl RowFnProcessor {
    pub(crate) fn new(f: RowFn, resources: ResourceMatcher) -> Self {
        Self { f, resources }
    }
}

impl Processor for RowFnProcessor {
    fn name(&self) -> String {
        "row_fn".to_string()
    }

    fn stream(&mut self, resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        Ok(resources
            .into_iter()
            .map(|rs| {
                if !self.resources.matches(&rs.descriptor.name) {
                    return rs;
                }
                let f = Arc::clone(&self.f);
                let rows: RowIter = Box::new(rs.rows.map(move |row| {
                    let mut row = row?;
                    f(&mut row)?;
                    Ok(row)
                }));
                ResourceStream::new(rs.descriptor, rows)
            })
            .collect())
    }
}

/// Adapter turning a whole-iterator function into a processor.
pub(crate) struct RowsFnProcessor {
    f: RowsFn,
    resources: ResourceMatcher,
}

impl RowsFnProcessor {
    pub(crate) fn new(f: RowsFn, resources: ResourceMatcher) -> Self {
        Self { f, resources }
    }
}

impl Processor for RowsFnProcessor {
    fn name(&self) -> String {
        "rows_fn".to_string()
    }

    fn stream(&mut self, resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        Ok(resources
            .into_iter()
            .map(|rs| {
                if !self.resources.matches(&rs.descriptor.name) {
                    return rs;
                }
                let rows = (self.f)(rs.rows);
                ResourceStream::new(rs.descriptor, rows)
            })
            .collect())
    }
}

/// Adapter turning a package-function pair into a processor.
pub(crate) struct PackageFnProcessor {
    describe: DescribeFn,
    stream: StreamFn,
}

impl PackageFnProcessor {
    pub(crate) fn new(describe: DescribeFn, stream: StreamFn) -> Self {
        Self { describe, stream }
    }
}

impl Processor for PackageFnProcessor {
    fn name(&self) -> String {
        "package_fn".to_string()
    }

    fn describe(&mut self, package: &mut PackageDescriptor) -> Result<()> {
        (self.describe)(package)
    }

    fn stream(&mut self, resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        (self.stream)(resources)
    }
}
