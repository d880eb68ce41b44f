//! The versioned tree store seam.
//!
//! Everything above this trait (filters, diffing, bookmarks, sessions) is
//! written against [`TreeStore`] only. [`crate::SqliteStore`] is the bundled
//! implementation.

use crate::error::{Error, Result};
use crate::models::{ContentId, EntryKind, FileEntry, RefUpdate, SnapshotId, TreeEntry};

/// Name of the ref that tracks the current head state.
pub const HEAD: &str = "HEAD";

pub trait TreeStore: Send + Sync {
    /// Looks up a ref. Absence is a valid state, not an error.
    fn resolve_ref(&self, name: &str) -> Result<Option<SnapshotId>>;

    /// Lists one tree level in canonical order.
    fn read_tree(&self, id: &ContentId) -> Result<Vec<TreeEntry>>;

    fn read_blob(&self, id: &ContentId) -> Result<Vec<u8>>;

    /// Atomically moves `name` to `new` provided it currently points at
    /// `expected` (`None` meaning "does not exist").
    ///
    /// Returns `Unchanged` when the ref already equals `new`, and `Rejected`
    /// when the current value matches neither.
    fn update_ref(
        &self,
        name: &str,
        expected: Option<&SnapshotId>,
        new: &SnapshotId,
        message: &str,
    ) -> Result<RefUpdate>;

    fn head_snapshot(&self) -> Result<SnapshotId> {
        self.resolve_ref(HEAD)?
            .ok_or_else(|| Error::RefNotFound(HEAD.to_string()))
    }

    /// Recursively lists every blob of a snapshot in path order.
    fn open_tree(&self, snapshot: &SnapshotId) -> Result<Vec<FileEntry>> {
        let mut files = Vec::new();
        walk(self, snapshot.root_tree(), "", &mut files)?;
        Ok(files)
    }

    /// Resolves a slash-separated path inside a snapshot.
    fn lookup(&self, snapshot: &SnapshotId, path: &str) -> Result<Option<TreeEntry>> {
        let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
        if segments.peek().is_none() {
            return Err(Error::InvalidPath(path.to_string()));
        }

        let mut tree = snapshot.root_tree().clone();
        while let Some(segment) = segments.next() {
            let entry = match self
                .read_tree(&tree)?
                .into_iter()
                .find(|e| e.name == segment)
            {
                Some(entry) => entry,
                None => return Ok(None),
            };

            if segments.peek().is_none() {
                return Ok(Some(entry));
            }
            if !entry.kind.is_tree() {
                return Ok(None);
            }
            tree = entry.id;
        }

        Ok(None)
    }
}

fn walk<S: TreeStore + ?Sized>(
    store: &S,
    tree: &ContentId,
    prefix: &str,
    files: &mut Vec<FileEntry>,
) -> Result<()> {
    for entry in store.read_tree(tree)? {
        let path = join_path(prefix, &entry.name);
        match entry.kind {
            EntryKind::Tree => walk(store, &entry.id, &path, files)?,
            EntryKind::Blob(mode) => files.push(FileEntry {
                path,
                id: entry.id,
                mode,
            }),
        }
    }
    Ok(())
}

pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}
