//! # Tabflow
//!
//! A **tabular dataflow engine** for Rust: lazy, schema-aware processing
//! pipelines over named streams of rows, in the spirit of frictionless
//! data packages.
//!
//! ## Key Features
//!
//! - **Declarative flows** - compose processors, closures, and nested
//!   flows into one pipeline
//! - **Two-phase execution** - every step describes its metadata before a
//!   single row moves; streaming is fully lazy after that
//! - **Schema casting** - raw values coerce to declared field types with
//!   a pluggable on-error policy
//! - **External sort/group/join/dedup** - a disk-spilling keyed store
//!   bounds memory independent of resource size
//! - **Checkpoints and caches** - persisted snapshots substitute for
//!   expensive prefixes on later runs
//! - **Parallel row transforms** - a bounded worker pool with cooperative
//!   teardown
//! - **Precise error attribution** - any failure names the responsible
//!   step and its position in the chain
//!
//! ## Quick Start
//!
//! ```ignore
//! use tabflow::prelude::*;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let (results, package, _stats) = Flow::new()
//!     .step(from_rows("events", rows))
//!     .step(set_type("amount", FieldType::Number))
//!     .step(filter_rows(|row| row["amount"] != Value::Null))
//!     .step(sort_rows("{amount}"))
//!     .step(dump_to_path("out/events"))
//!     .results()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Flow
//!
//! A [`Flow`] is an ordered chain of steps executed as one unit. Running
//! it flattens nested flows, applies checkpoint/cache rewrites, runs every
//! step's describe phase, then wires up the lazy row iterators. Nothing
//! executes until a consumer pulls.
//!
//! ### Processor
//!
//! A [`Processor`] transforms the pipeline in two phases: `describe`
//! mutates the [`PackageDescriptor`], `stream` rewires the per-resource
//! row iterators. Plain closures adapt into processors through
//! [`Step::row`], [`Step::rows`] and [`Step::package`].
//!
//! ### Resources
//!
//! A resource is one named, schema-bound stream of [`Row`]s. Descriptor
//! order always matches runtime stream order, and no step may add or
//! remove resources once describing has finished.

pub mod caster;
pub mod errors;
pub mod flow;
pub mod kvstore;
pub mod matcher;
pub mod processor;
pub mod processors;
pub mod schema;
pub mod sortkey;
pub mod stream;
pub mod value;

pub use caster::{CastHandler, CastPolicy};
pub use errors::{CastError, ProcessorError, ValidationError};
pub use flow::{DataStream, Flow};
pub use kvstore::KeyedStore;
pub use matcher::ResourceMatcher;
pub use processor::{Processor, Step};
pub use schema::{Field, FieldType, PackageDescriptor, ResourceDescriptor, Schema};
pub use stream::{ResourceStream, RowIter, Stats};
pub use value::{Row, Value};

/// Everything needed to build and run a typical flow.
pub mod prelude {
    pub use crate::caster::CastPolicy;
    pub use crate::flow::Flow;
    pub use crate::matcher::ResourceMatcher;
    pub use crate::processor::{Processor, Step};
    pub use crate::processors::*;
    pub use crate::schema::{Field, FieldType, PackageDescriptor, ResourceDescriptor, Schema};
    pub use crate::stream::{ResourceStream, RowIter};
    pub use crate::value::{Row, Value};
}
