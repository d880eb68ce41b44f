//! Snapshot diff computation.
//!
//! [`diff_snapshots`] walks two snapshot trees side by side in canonical order
//! and reports every path whose content or mode differs. Identical subtrees
//! are skipped by id without being read.

use crate::error::Result;
use crate::filter::PathFilter;
use crate::models::{ChangeEntry, ContentId, EntryKind, SnapshotId, TreeEntry};
use crate::store::{join_path, TreeStore};
use std::cmp::Ordering;
use std::iter::Peekable;
use std::vec::IntoIter;
use tracing::debug;

/// Computes the ordered change list between `base` and `dest`.
///
/// With a filter, only matching file paths are reported, and directories the
/// filter rules out are not descended into. Without one, every change is
/// reported. Entries come back in ascending path order.
pub fn diff_snapshots(
    store: &dyn TreeStore,
    base: &SnapshotId,
    dest: &SnapshotId,
    filter: Option<&PathFilter>,
) -> Result<Vec<ChangeEntry>> {
    let mut changes = Vec::new();
    if base != dest {
        let walker = Walker { store, filter };
        walker.diff_trees(
            "",
            Some(base.root_tree()),
            Some(dest.root_tree()),
            &mut changes,
        )?;
    }

    debug!(
        "Diff {}..{} produced {} change(s)",
        base.short(),
        dest.short(),
        changes.len()
    );
    Ok(changes)
}

struct Walker<'a> {
    store: &'a dyn TreeStore,
    filter: Option<&'a PathFilter>,
}

impl Walker<'_> {
    fn diff_trees(
        &self,
        prefix: &str,
        old: Option<&ContentId>,
        new: Option<&ContentId>,
        changes: &mut Vec<ChangeEntry>,
    ) -> Result<()> {
        let mut old_entries = self.entries(old)?;
        let mut new_entries = self.entries(new)?;

        loop {
            let order = match (old_entries.peek(), new_entries.peek()) {
                (None, None) => break,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(o), Some(n)) => o.canonical_cmp(n),
            };

            match order {
                Ordering::Less => {
                    if let Some(entry) = old_entries.next() {
                        self.removed(prefix, entry, changes)?;
                    }
                }
                Ordering::Greater => {
                    if let Some(entry) = new_entries.next() {
                        self.added(prefix, entry, changes)?;
                    }
                }
                Ordering::Equal => {
                    if let (Some(o), Some(n)) = (old_entries.next(), new_entries.next()) {
                        self.both(prefix, o, n, changes)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn entries(&self, tree: Option<&ContentId>) -> Result<Peekable<IntoIter<TreeEntry>>> {
        let entries = match tree {
            Some(id) => self.store.read_tree(id)?,
            None => Vec::new(),
        };
        Ok(entries.into_iter().peekable())
    }

    fn removed(&self, prefix: &str, entry: TreeEntry, changes: &mut Vec<ChangeEntry>) -> Result<()> {
        let path = join_path(prefix, &entry.name);
        match entry.kind {
            EntryKind::Tree => {
                if self.may_enter(&path) {
                    self.diff_trees(&path, Some(&entry.id), None, changes)?;
                }
            }
            EntryKind::Blob(mode) => {
                if self.matches(&path) {
                    changes.push(ChangeEntry::deleted(path, entry.id, mode));
                }
            }
        }
        Ok(())
    }

    fn added(&self, prefix: &str, entry: TreeEntry, changes: &mut Vec<ChangeEntry>) -> Result<()> {
        let path = join_path(prefix, &entry.name);
        match entry.kind {
            EntryKind::Tree => {
                if self.may_enter(&path) {
                    self.diff_trees(&path, None, Some(&entry.id), changes)?;
                }
            }
            EntryKind::Blob(mode) => {
                if self.matches(&path) {
                    changes.push(ChangeEntry::added(path, entry.id, mode));
                }
            }
        }
        Ok(())
    }

    // Same name and same kind class (both trees or both blobs), since the
    // canonical order separates a tree from a blob of the same name.
    fn both(
        &self,
        prefix: &str,
        old: TreeEntry,
        new: TreeEntry,
        changes: &mut Vec<ChangeEntry>,
    ) -> Result<()> {
        if old.id == new.id && old.kind == new.kind {
            return Ok(());
        }

        let path = join_path(prefix, &new.name);
        match (old.kind, new.kind) {
            (EntryKind::Tree, EntryKind::Tree) => {
                if self.may_enter(&path) {
                    self.diff_trees(&path, Some(&old.id), Some(&new.id), changes)?;
                }
            }
            (EntryKind::Blob(old_mode), EntryKind::Blob(new_mode)) => {
                if self.matches(&path) {
                    changes.push(ChangeEntry::modified(
                        path,
                        (old.id, old_mode),
                        (new.id, new_mode),
                    ));
                }
            }
            _ => {
                self.removed(prefix, old, changes)?;
                self.added(prefix, new, changes)?;
            }
        }
        Ok(())
    }

    fn matches(&self, path: &str) -> bool {
        self.filter.map_or(true, |f| f.matches(path))
    }

    fn may_enter(&self, dir: &str) -> bool {
        self.filter.map_or(true, |f| f.may_enter(dir))
    }
}
