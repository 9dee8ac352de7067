//! Caches: like checkpoints, but wrapping an explicit step list.

use super::checkpoint::snapshot_complete;
use super::dump::Dump;
use super::load::Load;
use crate::flow::{Flow, NamedStep, flatten_steps};
use crate::processor::Step;
use anyhow::Result;
use std::path::PathBuf;

/// Wraps an explicit sub-flow behind a persisted snapshot at a caller-given
/// path. A complete snapshot replaces the whole sub-flow with a single
/// load step; otherwise the sub-flow runs followed by a dump step. Caches
/// nest: a cache inside the sub-flow rewrites independently.
pub struct Cache {
    steps: Vec<Step>,
    path: PathBuf,
}

impl Cache {
    pub fn new(flow: Flow, path: impl Into<PathBuf>) -> Self {
        Self {
            steps: flow.into_steps(),
            path: path.into(),
        }
    }

    pub(crate) fn rewrite(self) -> Result<Vec<NamedStep>> {
        if snapshot_complete(&self.path) {
            tracing::info!(path = %self.path.display(), "cache hit, loading snapshot");
            return Ok(vec![NamedStep::new(Box::new(Load::new(
                self.path.to_string_lossy(),
            )))]);
        }
        tracing::info!(path = %self.path.display(), "cache miss, snapshot will be written");
        let mut out = flatten_steps(self.steps)?;
        out.push(NamedStep::new(Box::new(Dump::new(self.path))));
        Ok(out)
    }
}
