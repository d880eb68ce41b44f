//! Fixture helpers shared by unit tests. Each test composes what it needs.

use crate::models::{ChangeEntry, SnapshotId};
use crate::storage::SqliteStore;
use crate::store::TreeStore;
use std::sync::Arc;

pub(crate) const CALENDAR_A: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//collwatch//test//EN\r\n\
BEGIN:VEVENT\r\n\
UID:event-a@example.com\r\n\
DTSTART:20240105T090000Z\r\n\
DTEND:20240105T100000Z\r\n\
SUMMARY:First event\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

pub(crate) const CALENDAR_A_MOVED: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//collwatch//test//EN\r\n\
BEGIN:VEVENT\r\n\
UID:event-a@example.com\r\n\
SEQUENCE:1\r\n\
DTSTART:20240106T090000Z\r\n\
DTEND:20240106T100000Z\r\n\
SUMMARY:First event (moved)\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

pub(crate) fn store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::in_memory().unwrap())
}

pub(crate) fn snapshot(store: &SqliteStore, files: &[(&str, &str)]) -> SnapshotId {
    store.commit_files(files.iter().copied()).unwrap()
}

/// Records `files` and makes them the head.
pub(crate) fn head(store: &SqliteStore, files: &[(&str, &str)]) -> SnapshotId {
    let snapshot = snapshot(store, files);
    store.set_head(&snapshot).unwrap();
    snapshot
}

/// Points `bookmark` at `snapshot` unconditionally.
pub(crate) fn bookmark(store: &SqliteStore, name: &str, snapshot: &SnapshotId) {
    let current = store.resolve_ref(name).unwrap();
    store
        .update_ref(name, current.as_ref(), snapshot, "test fixture")
        .unwrap();
}

pub(crate) fn paths(changes: &[ChangeEntry]) -> Vec<String> {
    changes.iter().map(|c| c.path().to_string()).collect()
}
