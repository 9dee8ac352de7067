//! Checkpoints: chain rewriting against a persisted snapshot.

use super::dump::{COMPLETE_MARKER, Dump};
use super::load::Load;
use crate::flow::{NamedStep, flatten_steps};
use crate::matcher::ResourceMatcher;
use crate::processor::Step;
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Default root directory for named checkpoints.
pub const DEFAULT_CHECKPOINT_ROOT: &str = ".checkpoints";

/// A snapshot is readable only when both the descriptor and the completion
/// marker exist; the marker is written last by the dump step.
pub(crate) fn snapshot_complete(dir: &Path) -> bool {
    dir.join("datapackage.json").is_file() && dir.join(COMPLETE_MARKER).is_file()
}

/// A named checkpoint covering everything before it in the owning flow.
///
/// At flatten time the checkpoint absorbs the flattened steps preceding it
/// (plus any steps added with [`Checkpoint::step`]). If its snapshot
/// directory holds a complete snapshot, that whole prefix is replaced by a
/// single snapshot-load step; otherwise the prefix runs as declared,
/// followed by a snapshot-dump step. Staleness is presence-only: remove
/// the directory to invalidate.
pub struct Checkpoint {
    name: String,
    root: PathBuf,
    steps: Vec<Step>,
    resources: ResourceMatcher,
}

impl Checkpoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: PathBuf::from(DEFAULT_CHECKPOINT_ROOT),
            steps: Vec::new(),
            resources: ResourceMatcher::All,
        }
    }

    /// Root directory holding checkpoint snapshots, one subdirectory per
    /// checkpoint name.
    pub fn path(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Append a step to the covered prefix.
    pub fn step(mut self, step: impl Into<Step>) -> Self {
        self.steps.push(step.into());
        self
    }

    /// Restrict which resources are persisted and reloaded.
    pub fn resources(mut self, resources: impl Into<ResourceMatcher>) -> Self {
        self.resources = resources.into();
        self
    }

    pub(crate) fn rewrite(self, preceding: Vec<NamedStep>) -> Result<Vec<NamedStep>> {
        let dir = self.root.join(&self.name);
        if snapshot_complete(&dir) {
            tracing::info!(checkpoint = %self.name, path = %dir.display(), "checkpoint hit, loading snapshot");
            let load = Load::new(dir.to_string_lossy()).resources(self.resources);
            return Ok(vec![NamedStep::new(Box::new(load))]);
        }
        tracing::info!(checkpoint = %self.name, path = %dir.display(), "checkpoint miss, snapshot will be written");
        let mut out = preceding;
        out.extend(flatten_steps(self.steps)?);
        out.push(NamedStep::new(Box::new(
            Dump::new(dir).resources(self.resources),
        )));
        Ok(out)
    }
}
