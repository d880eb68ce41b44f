use crate::error::{Error, Result};
use crate::models::{RefUpdate, SnapshotId};
use crate::store::TreeStore;
use std::sync::Arc;
use tracing::{debug, info};

/// Bookmark name reserved for the last acknowledged state.
pub const DEFAULT_BOOKMARK: &str = "acknowledged";

pub const ACKNOWLEDGE_MESSAGE: &str = "Acknowledged changed entries";

/// How a missing bookmark is treated when resolving the diff base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaseResolution {
    /// A missing bookmark resolves to the destination: first use sees no changes.
    #[default]
    Bootstrap,
    /// A missing bookmark is an error.
    Strict,
}

/// The two ends of a diff together with the bookmark value observed when
/// they were resolved. The observed value is the expectation for the
/// compare-and-set on acknowledge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedPair {
    pub base: SnapshotId,
    pub dest: SnapshotId,
    pub observed: Option<SnapshotId>,
}

/// Resolves and advances one named bookmark of a store.
#[derive(Clone)]
pub struct BookmarkTracker {
    store: Arc<dyn TreeStore>,
    name: String,
    resolution: BaseResolution,
}

impl BookmarkTracker {
    pub fn new(store: Arc<dyn TreeStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            resolution: BaseResolution::default(),
        }
    }

    pub fn with_resolution(mut self, resolution: BaseResolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolution(&self) -> BaseResolution {
        self.resolution
    }

    pub fn store(&self) -> &Arc<dyn TreeStore> {
        &self.store
    }

    pub fn current(&self) -> Result<Option<SnapshotId>> {
        self.store.resolve_ref(&self.name)
    }

    /// The bookmarked snapshot, or `dest` when the bookmark does not exist
    /// and the tracker bootstraps.
    pub fn resolve_base(&self, dest: &SnapshotId) -> Result<SnapshotId> {
        self.base_from(self.current()?, dest)
    }

    pub fn resolve_destination(&self) -> Result<SnapshotId> {
        self.store.head_snapshot()
    }

    /// Resolves destination then base in one step.
    pub fn pin(&self) -> Result<PinnedPair> {
        let dest = self.resolve_destination()?;
        let observed = self.current()?;
        let base = self.base_from(observed.clone(), &dest)?;

        info!("Pinned {}: {}..{}", self.name, base.short(), dest.short());
        Ok(PinnedPair {
            base,
            dest,
            observed,
        })
    }

    fn base_from(&self, observed: Option<SnapshotId>, dest: &SnapshotId) -> Result<SnapshotId> {
        match (observed, self.resolution) {
            (Some(base), _) => Ok(base),
            (None, BaseResolution::Bootstrap) => {
                debug!("Bookmark {} absent, bootstrapping at {}", self.name, dest.short());
                Ok(dest.clone())
            }
            (None, BaseResolution::Strict) => Err(Error::RefNotFound(self.name.clone())),
        }
    }

    /// Moves the bookmark from `expected` to `new` with a single
    /// compare-and-set. `Rejected` is returned as-is; callers decide.
    pub fn acknowledge(
        &self,
        expected: Option<&SnapshotId>,
        new: &SnapshotId,
    ) -> Result<RefUpdate> {
        let outcome = self
            .store
            .update_ref(&self.name, expected, new, ACKNOWLEDGE_MESSAGE)?;

        match outcome {
            RefUpdate::Rejected => debug!("Acknowledge of {} rejected", self.name),
            other => info!("Acknowledged {} at {} ({:?})", self.name, new.short(), other),
        }
        Ok(outcome)
    }

    /// Like [`acknowledge`](Self::acknowledge) but turns `Rejected` into
    /// [`Error::AcknowledgeRejected`].
    pub fn acknowledge_or_fail(
        &self,
        expected: Option<&SnapshotId>,
        new: &SnapshotId,
    ) -> Result<RefUpdate> {
        match self.acknowledge(expected, new)? {
            RefUpdate::Rejected => Err(Error::AcknowledgeRejected {
                bookmark: self.name.clone(),
                expected: expected.map(|s| s.to_string()),
                found: self.current()?.map(|s| s.to_string()),
            }),
            outcome => Ok(outcome),
        }
    }
}
