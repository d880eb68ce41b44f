use crate::bookmark::{BaseResolution, BookmarkTracker, PinnedPair, DEFAULT_BOOKMARK};
use crate::diff::diff_snapshots;
use crate::error::{Error, Result};
use crate::filter::FilterSet;
use crate::models::{ChangeEntry, ContentId, EntryKind, RefUpdate, SnapshotId};
use crate::store::TreeStore;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Access to blob bytes, by content id or by path.
pub trait ContentLoader {
    fn load_blob(&self, id: &ContentId) -> Result<Vec<u8>>;

    fn load_content(&self, path: &str) -> Result<Vec<u8>>;
}

/// A change list pinned to one (base, destination) pair.
///
/// The pair and the change list never change after construction. The only
/// mutable state is the one-shot acknowledged flag: acknowledging moves the
/// bookmark to the destination at most once per session.
pub struct DiffSession {
    tracker: BookmarkTracker,
    pair: PinnedPair,
    filters: FilterSet,
    changes: Vec<ChangeEntry>,
    acknowledged: RwLock<bool>,
}

impl std::fmt::Debug for DiffSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffSession")
            .field("bookmark", &self.tracker.name())
            .field("base", &self.pair.base)
            .field("dest", &self.pair.dest)
            .field("changes", &self.changes.len())
            .field("acknowledged", &self.is_acknowledged())
            .finish()
    }
}

impl DiffSession {
    /// Computes the change list for `pair` under `filters`. The filters are
    /// captured; later changes to the caller's set do not affect the session.
    pub fn new(tracker: BookmarkTracker, pair: PinnedPair, filters: FilterSet) -> Result<Self> {
        let effective = filters.effective();
        let changes = diff_snapshots(
            tracker.store().as_ref(),
            &pair.base,
            &pair.dest,
            effective.as_ref(),
        )?;

        Ok(Self {
            tracker,
            pair,
            filters,
            changes,
            acknowledged: RwLock::new(false),
        })
    }

    pub fn base(&self) -> &SnapshotId {
        &self.pair.base
    }

    pub fn dest(&self) -> &SnapshotId {
        &self.pair.dest
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn changes(&self) -> &[ChangeEntry] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn is_acknowledged(&self) -> bool {
        *self.acknowledged.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves the bookmark to the pinned destination.
    ///
    /// Returns `None` when the session was already acknowledged. A rejected
    /// compare-and-set is returned as [`Error::AcknowledgeRejected`] and
    /// leaves the session unacknowledged.
    pub fn acknowledge(&self) -> Result<Option<RefUpdate>> {
        let mut acknowledged = self
            .acknowledged
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if *acknowledged {
            debug!("Session already acknowledged");
            return Ok(None);
        }

        let outcome = self
            .tracker
            .acknowledge_or_fail(self.pair.observed.as_ref(), &self.pair.dest)?;
        *acknowledged = true;
        Ok(Some(outcome))
    }
}

impl ContentLoader for DiffSession {
    fn load_blob(&self, id: &ContentId) -> Result<Vec<u8>> {
        self.tracker.store().read_blob(id)
    }

    /// Reads `path` from the destination, falling back to the base.
    fn load_content(&self, path: &str) -> Result<Vec<u8>> {
        load_from_pair(self.tracker.store().as_ref(), &self.pair, path)
    }
}

pub(crate) fn load_from_pair(
    store: &dyn TreeStore,
    pair: &PinnedPair,
    path: &str,
) -> Result<Vec<u8>> {
    for snapshot in [&pair.dest, &pair.base] {
        if let Some(entry) = store.lookup(snapshot, path)? {
            if let EntryKind::Blob(_) = entry.kind {
                return store.read_blob(&entry.id);
            }
        }
    }
    Err(Error::ContentNotFound(path.to_string()))
}

/// One-shot entry point: resolves the current pair for a bookmark and wraps
/// the result in a [`DiffSession`].
pub struct MemorizedDiffer {
    tracker: BookmarkTracker,
}

impl MemorizedDiffer {
    /// Uses the default bookmark and bootstraps when it is missing.
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        Self::with_bookmark(store, DEFAULT_BOOKMARK)
    }

    pub fn with_bookmark(store: Arc<dyn TreeStore>, bookmark: impl Into<String>) -> Self {
        Self {
            tracker: BookmarkTracker::new(store, bookmark)
                .with_resolution(BaseResolution::Bootstrap),
        }
    }

    pub fn tracker(&self) -> &BookmarkTracker {
        &self.tracker
    }

    /// Every change since the bookmark.
    pub fn diff(&self) -> Result<DiffSession> {
        self.diff_filtered(FilterSet::default())
    }

    pub fn diff_filtered(&self, filters: FilterSet) -> Result<DiffSession> {
        let pair = self.tracker.pin()?;
        DiffSession::new(self.tracker.clone(), pair, filters)
    }
}
