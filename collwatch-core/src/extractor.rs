//! Long-lived, scoped change tracking for a collection store.
//!
//! A [`CollectionExtractor`] is shared between callers. The first query after
//! an acknowledge pins the (base, destination) pair; every query until the
//! next acknowledge reuses it, so one batch of changes is never split across
//! two acknowledgements when the head moves in between.

use crate::bookmark::{BaseResolution, BookmarkTracker, PinnedPair};
use crate::diff::diff_snapshots;
use crate::error::{Error, Result};
use crate::filter::{FilterSet, PathFilter};
use crate::models::{ChangeEntry, ContentId, RefUpdate};
use crate::session::{load_from_pair, ContentLoader};
use crate::store::TreeStore;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::debug;

/// Directory under which every user's collections live.
pub const COLLECTION_ROOT: &str = "collection-root";

pub struct CollectionExtractor {
    tracker: BookmarkTracker,
    filters: RwLock<FilterSet>,
    pinned: Mutex<Option<PinnedPair>>,
}

impl CollectionExtractor {
    /// Strict resolution: a missing bookmark fails with `RefNotFound`.
    pub fn new(store: Arc<dyn TreeStore>, bookmark: impl Into<String>) -> Self {
        Self {
            tracker: BookmarkTracker::new(store, bookmark).with_resolution(BaseResolution::Strict),
            filters: RwLock::new(FilterSet::new(COLLECTION_ROOT)),
            pinned: Mutex::new(None),
        }
    }

    pub fn with_resolution(mut self, resolution: BaseResolution) -> Self {
        self.tracker = self.tracker.with_resolution(resolution);
        self
    }

    /// Replaces the scope and structural filters wholesale.
    pub fn with_filters(mut self, filters: FilterSet) -> Self {
        self.filters = RwLock::new(filters);
        self
    }

    pub fn tracker(&self) -> &BookmarkTracker {
        &self.tracker
    }

    pub fn add_scope(&self, scope: impl Into<String>) {
        self.filters_mut().add_scope(scope);
    }

    pub fn remove_scope(&self, scope: &str) {
        self.filters_mut().remove_scope(scope);
    }

    pub fn add_filter(&self, filter: PathFilter) {
        self.filters_mut().add_filter(filter);
    }

    pub fn filters(&self) -> FilterSet {
        self.filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The currently pinned pair, if any.
    pub fn pinned(&self) -> Option<PinnedPair> {
        self.lock_pinned().clone()
    }

    /// Returns the pinned pair, resolving and pinning one if none is held.
    pub fn pin(&self) -> Result<PinnedPair> {
        let mut pinned = self.lock_pinned();
        match pinned.as_ref() {
            Some(pair) => Ok(pair.clone()),
            None => {
                let pair = self.tracker.pin()?;
                *pinned = Some(pair.clone());
                Ok(pair)
            }
        }
    }

    /// Changes between the pinned pair under the current filters.
    ///
    /// Only the pin bookkeeping is serialized; the tree walk runs unlocked.
    pub fn changes(&self) -> Result<Vec<ChangeEntry>> {
        let pair = self.pin()?;
        let effective = self.filters().effective();
        diff_snapshots(
            self.tracker.store().as_ref(),
            &pair.base,
            &pair.dest,
            effective.as_ref(),
        )
    }

    /// Moves the bookmark to the pinned destination and clears the pin.
    ///
    /// Returns `None` when nothing is pinned, since there is no observed
    /// state to acknowledge. A rejected update clears the pin as well, so the
    /// next query re-resolves against the bookmark's new value.
    pub fn acknowledge(&self) -> Result<Option<RefUpdate>> {
        let mut pinned = self.lock_pinned();
        let pair = match pinned.as_ref() {
            Some(pair) => pair.clone(),
            None => {
                debug!("Nothing pinned for {}, acknowledge skipped", self.tracker.name());
                return Ok(None);
            }
        };

        let outcome = self
            .tracker
            .acknowledge(pair.observed.as_ref(), &pair.dest)?;
        *pinned = None;

        match outcome {
            RefUpdate::Rejected => Err(Error::AcknowledgeRejected {
                bookmark: self.tracker.name().to_string(),
                expected: pair.observed.map(|s| s.to_string()),
                found: self.tracker.current()?.map(|s| s.to_string()),
            }),
            outcome => Ok(Some(outcome)),
        }
    }

    fn filters_mut(&self) -> std::sync::RwLockWriteGuard<'_, FilterSet> {
        self.filters.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pinned(&self) -> MutexGuard<'_, Option<PinnedPair>> {
        self.pinned.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ContentLoader for CollectionExtractor {
    fn load_blob(&self, id: &ContentId) -> Result<Vec<u8>> {
        self.tracker.store().read_blob(id)
    }

    /// Reads `path` from the pinned destination, falling back to the base.
    fn load_content(&self, path: &str) -> Result<Vec<u8>> {
        let pair = self.pin()?;
        load_from_pair(self.tracker.store().as_ref(), &pair, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmark::DEFAULT_BOOKMARK;
    use crate::models::ChangeKind;
    use crate::testing::{bookmark, head, paths, snapshot, store};

    #[test]
    fn test_add_event() {
        let store = store();
        let base = snapshot(&store, &[("collection-root/alice/cal/A.ics", "a")]);
        bookmark(&store, DEFAULT_BOOKMARK, &base);
        head(
            &store,
            &[
                ("collection-root/alice/cal/A.ics", "a"),
                ("collection-root/alice/cal/B.ics", "b"),
            ],
        );

        let extractor = CollectionExtractor::new(store, DEFAULT_BOOKMARK);
        let changes = extractor.changes().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Added);

        assert_eq!(extractor.acknowledge().unwrap(), Some(RefUpdate::Updated));
        assert!(extractor.changes().unwrap().is_empty());
    }

    #[test]
    fn test_strict_mode_requires_bookmark() {
        let store = store();
        head(&store, &[("collection-root/alice/A.ics", "a")]);

        let strict = CollectionExtractor::new(store.clone(), DEFAULT_BOOKMARK);
        assert!(matches!(strict.changes(), Err(Error::RefNotFound(_))));
        assert!(strict.pinned().is_none());

        let bootstrap = CollectionExtractor::new(store.clone(), DEFAULT_BOOKMARK)
            .with_resolution(BaseResolution::Bootstrap);
        assert!(bootstrap.changes().unwrap().is_empty());
        assert_eq!(bootstrap.acknowledge().unwrap(), Some(RefUpdate::Created));
        assert!(strict.changes().unwrap().is_empty());
    }

    #[test]
    fn test_scope_reveals_only_registered_users() {
        let store = store();
        let base = snapshot(
            &store,
            &[
                ("collection-root/alice/cal/A.ics", "1"),
                ("collection-root/bob/cal/B.ics", "1"),
            ],
        );
        bookmark(&store, DEFAULT_BOOKMARK, &base);
        head(
            &store,
            &[
                ("collection-root/alice/cal/A.ics", "2"),
                ("collection-root/bob/cal/B.ics", "2"),
            ],
        );

        let extractor = CollectionExtractor::new(store, DEFAULT_BOOKMARK);
        assert_eq!(extractor.changes().unwrap().len(), 2);

        extractor.add_scope("alice");
        assert_eq!(
            paths(&extractor.changes().unwrap()),
            vec!["collection-root/alice/cal/A.ics"]
        );

        extractor.remove_scope("alice");
        extractor.add_scope("bob");
        assert_eq!(
            paths(&extractor.changes().unwrap()),
            vec!["collection-root/bob/cal/B.ics"]
        );
    }

    #[test]
    fn test_scope_and_structural_filters_combine() {
        let store = store();
        let base = snapshot(&store, &[("collection-root/alice/cal/.props", "{}")]);
        bookmark(&store, DEFAULT_BOOKMARK, &base);
        head(
            &store,
            &[
                ("collection-root/alice/cal/.props", "{\"color\":1}"),
                ("collection-root/alice/cal/A.ics", "a"),
                ("collection-root/bob/cal/B.ics", "b"),
            ],
        );

        let extractor = CollectionExtractor::new(store, DEFAULT_BOOKMARK);
        extractor.add_scope("alice");
        extractor.add_filter(PathFilter::suffix(".ics"));

        assert_eq!(
            paths(&extractor.changes().unwrap()),
            vec!["collection-root/alice/cal/A.ics"]
        );
    }

    #[test]
    fn test_pin_is_reused_until_acknowledge() {
        let store = store();
        let base = snapshot(&store, &[("collection-root/alice/A.ics", "a")]);
        bookmark(&store, DEFAULT_BOOKMARK, &base);
        let first = head(
            &store,
            &[
                ("collection-root/alice/A.ics", "a"),
                ("collection-root/alice/B.ics", "b"),
            ],
        );

        let extractor = CollectionExtractor::new(store.clone(), DEFAULT_BOOKMARK);
        let before = extractor.changes().unwrap();

        head(
            &store,
            &[
                ("collection-root/alice/A.ics", "a"),
                ("collection-root/alice/B.ics", "b"),
                ("collection-root/alice/C.ics", "c"),
            ],
        );
        assert_eq!(extractor.changes().unwrap(), before);
        assert_eq!(extractor.pinned().unwrap().dest, first);

        extractor.acknowledge().unwrap();
        assert!(extractor.pinned().is_none());
        assert_eq!(store.resolve_ref(DEFAULT_BOOKMARK).unwrap(), Some(first));
        assert_eq!(
            paths(&extractor.changes().unwrap()),
            vec!["collection-root/alice/C.ics"]
        );
    }

    #[test]
    fn test_concurrent_queries_share_one_pin() {
        let store = store();
        let base = snapshot(&store, &[("collection-root/alice/A.ics", "a")]);
        bookmark(&store, DEFAULT_BOOKMARK, &base);
        head(&store, &[("collection-root/alice/B.ics", "b")]);

        let extractor = CollectionExtractor::new(store.clone(), DEFAULT_BOOKMARK);
        let shared = &extractor;
        let results: Vec<Vec<ChangeEntry>> = std::thread::scope(|scope| {
            let mover = scope.spawn(|| {
                for i in 0..5 {
                    let name = format!("collection-root/alice/{}.ics", i);
                    head(&store, &[(name.as_str(), "x")]);
                }
            });
            let readers: Vec<_> = (0..8)
                .map(|_| scope.spawn(move || shared.changes().unwrap()))
                .collect();
            mover.join().unwrap();
            readers.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let pinned = extractor.pinned().unwrap();
        let expected = diff_snapshots(&*store, &pinned.base, &pinned.dest, None).unwrap();
        assert!(results.iter().all(|r| r == &expected));
    }

    #[test]
    fn test_concurrent_acknowledge_moves_bookmark_once() {
        let store = store();
        let base = snapshot(&store, &[("collection-root/alice/A.ics", "a")]);
        bookmark(&store, DEFAULT_BOOKMARK, &base);
        let dest = head(&store, &[("collection-root/alice/B.ics", "b")]);

        let extractor = CollectionExtractor::new(store.clone(), DEFAULT_BOOKMARK);
        assert_eq!(extractor.changes().unwrap().len(), 2);

        let shared = &extractor;
        let outcomes: Vec<Option<RefUpdate>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(move || shared.acknowledge().unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let moved: Vec<_> = outcomes.iter().flatten().collect();
        assert_eq!(moved, vec![&RefUpdate::Updated]);
        assert_eq!(store.ref_log(DEFAULT_BOOKMARK, None).unwrap().len(), 2);
        assert_eq!(store.resolve_ref(DEFAULT_BOOKMARK).unwrap(), Some(dest));
        assert!(extractor.pinned().is_none());
    }

    #[test]
    fn test_queries_during_acknowledge_see_one_whole_pair() {
        let store = store();
        let base = snapshot(
            &store,
            &[
                ("collection-root/alice/A.ics", "a"),
                ("collection-root/bob/B.ics", "b"),
            ],
        );
        bookmark(&store, DEFAULT_BOOKMARK, &base);
        let dest = head(
            &store,
            &[
                ("collection-root/alice/A.ics", "a2"),
                ("collection-root/carol/C.ics", "c"),
            ],
        );
        let before = diff_snapshots(&*store, &base, &dest, None).unwrap();
        assert_eq!(before.len(), 3);

        let extractor = CollectionExtractor::new(store.clone(), DEFAULT_BOOKMARK);
        let shared = &extractor;
        let results: Vec<Vec<ChangeEntry>> = std::thread::scope(|scope| {
            let readers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(move || {
                        (0..20)
                            .map(|_| shared.changes().unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            let acker = scope.spawn(move || {
                shared.pin().unwrap();
                shared.acknowledge().unwrap()
            });

            assert_eq!(acker.join().unwrap(), Some(RefUpdate::Updated));
            readers
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        assert!(results.iter().all(|r| r == &before || r.is_empty()));
        assert_eq!(store.resolve_ref(DEFAULT_BOOKMARK).unwrap(), Some(dest));
    }

    #[test]
    fn test_acknowledge_without_pin_is_noop() {
        let store = store();
        let base = snapshot(&store, &[("A.ics", "a")]);
        bookmark(&store, DEFAULT_BOOKMARK, &base);
        head(&store, &[("B.ics", "b")]);

        let extractor = CollectionExtractor::new(store.clone(), DEFAULT_BOOKMARK);
        assert_eq!(extractor.acknowledge().unwrap(), None);
        assert_eq!(store.resolve_ref(DEFAULT_BOOKMARK).unwrap(), Some(base));
    }

    #[test]
    fn test_rejected_acknowledge_clears_pin() {
        let store = store();
        let base = snapshot(&store, &[("A.ics", "a")]);
        bookmark(&store, DEFAULT_BOOKMARK, &base);
        head(&store, &[("B.ics", "b")]);

        let extractor = CollectionExtractor::new(store.clone(), DEFAULT_BOOKMARK);
        extractor.changes().unwrap();

        let other = snapshot(&store, &[("Z.ics", "z")]);
        bookmark(&store, DEFAULT_BOOKMARK, &other);

        assert!(matches!(
            extractor.acknowledge(),
            Err(Error::AcknowledgeRejected { .. })
        ));
        assert!(extractor.pinned().is_none());
        assert_eq!(extractor.pin().unwrap().base, other);
    }

    #[test]
    fn test_load_content_uses_pinned_pair() {
        let store = store();
        let base = snapshot(&store, &[("collection-root/alice/cal/.props", "{}")]);
        bookmark(&store, DEFAULT_BOOKMARK, &base);
        head(&store, &[("collection-root/alice/cal/A.ics", "a")]);

        let extractor = CollectionExtractor::new(store.clone(), DEFAULT_BOOKMARK);
        extractor.changes().unwrap();
        head(&store, &[("collection-root/alice/cal/A.ics", "changed later")]);

        assert_eq!(
            extractor.load_content("collection-root/alice/cal/A.ics").unwrap(),
            b"a"
        );
        assert_eq!(
            extractor.load_content("collection-root/alice/cal/.props").unwrap(),
            b"{}"
        );
    }
}
