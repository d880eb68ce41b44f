//! # collwatch-core
//!
//! Core library for collwatch - memorized change sets over a versioned
//! collection store.
//!
//! A bookmark ref records the last state a consumer acknowledged. Each query
//! diffs that bookmark against the store head under composable path filters,
//! and acknowledging advances the bookmark with a compare-and-set so no change
//! is reported twice or lost between callers.

pub mod bookmark;
pub mod calendar;
pub mod config;
pub mod diff;
pub mod error;
pub mod extractor;
pub mod filter;
pub mod models;
pub mod session;
pub mod storage;
pub mod store;
pub mod textdiff;

#[cfg(test)]
mod testing;

pub use bookmark::{BaseResolution, BookmarkTracker, PinnedPair, DEFAULT_BOOKMARK};
pub use calendar::{
    Calendar, CalendarEventDelta, CalendarEventDiffer, CalendarParser, EventTime, IcsParser,
    StructuredEvent,
};
pub use config::Config;
pub use diff::diff_snapshots;
pub use error::{Error, Result};
pub use extractor::{CollectionExtractor, COLLECTION_ROOT};
pub use filter::{FilterSet, PathFilter};
pub use models::{
    ChangeEntry, ChangeKind, ContentId, EntryKind, FileEntry, FileMode, RefLogEntry, RefUpdate,
    SnapshotId, TreeEntry,
};
pub use session::{ContentLoader, DiffSession, MemorizedDiffer};
pub use storage::SqliteStore;
pub use store::{TreeStore, HEAD};
pub use textdiff::{ContentDiff, DiffLineType};
