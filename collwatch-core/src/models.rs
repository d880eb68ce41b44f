use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// Content address of a blob or tree object held by a store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Id of a blob holding `content`.
    pub fn of(content: &[u8]) -> Self {
        Self::hash_object("blob", content)
    }

    /// SHA-256 over a `<kind> <len>\0` header followed by the payload, so
    /// blobs and trees with identical bytes never share an id.
    pub fn hash_object(kind: &str, data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{} {}\0", kind, data.len()).as_bytes());
        hasher.update(data);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a point-in-time tree state: the content id of its root tree.
/// Equal ids denote identical tree content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(ContentId);

impl SnapshotId {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(ContentId::new(hex))
    }

    pub fn from_tree(tree: ContentId) -> Self {
        Self(tree)
    }

    pub fn root_tree(&self) -> &ContentId {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn short(&self) -> &str {
        self.0.short()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileMode {
    Regular,
    Executable,
}

impl FileMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileMode::Regular => "100644",
            FileMode::Executable => "100755",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Tree,
    Blob(FileMode),
}

impl EntryKind {
    pub fn is_tree(&self) -> bool {
        matches!(self, EntryKind::Tree)
    }

    pub fn mode(&self) -> Option<FileMode> {
        match self {
            EntryKind::Tree => None,
            EntryKind::Blob(mode) => Some(*mode),
        }
    }
}

/// One named child of a tree object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub id: ContentId,
    pub kind: EntryKind,
}

impl TreeEntry {
    pub fn blob(name: impl Into<String>, id: ContentId, mode: FileMode) -> Self {
        Self {
            name: name.into(),
            id,
            kind: EntryKind::Blob(mode),
        }
    }

    pub fn tree(name: impl Into<String>, id: ContentId) -> Self {
        Self {
            name: name.into(),
            id,
            kind: EntryKind::Tree,
        }
    }

    /// Canonical tree order: names compare bytewise, with tree names compared
    /// as if they carried a trailing `/`. Walking depth-first in this order
    /// visits full paths in byte order.
    pub fn canonical_cmp(&self, other: &TreeEntry) -> Ordering {
        sort_key(&self.name, self.kind.is_tree())
            .cmp(sort_key(&other.name, other.kind.is_tree()))
    }
}

fn sort_key(name: &str, is_tree: bool) -> impl Iterator<Item = u8> + '_ {
    name.bytes().chain(is_tree.then_some(b'/'))
}

/// A blob reachable from a snapshot, as produced by a recursive walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub id: ContentId,
    pub mode: FileMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Deleted,
    Modified,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Modified => "modified",
        }
    }
}

/// One path-level difference between two snapshots.
///
/// `Added` carries only the new side, `Deleted` only the old side, `Modified`
/// both sides with differing content ids or modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub kind: ChangeKind,
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub old_id: Option<ContentId>,
    pub new_id: Option<ContentId>,
    pub old_mode: Option<FileMode>,
    pub new_mode: Option<FileMode>,
}

impl ChangeEntry {
    pub fn added(path: String, id: ContentId, mode: FileMode) -> Self {
        Self {
            kind: ChangeKind::Added,
            old_path: None,
            new_path: Some(path),
            old_id: None,
            new_id: Some(id),
            old_mode: None,
            new_mode: Some(mode),
        }
    }

    pub fn deleted(path: String, id: ContentId, mode: FileMode) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            old_path: Some(path),
            new_path: None,
            old_id: Some(id),
            new_id: None,
            old_mode: Some(mode),
            new_mode: None,
        }
    }

    pub fn modified(path: String, old: (ContentId, FileMode), new: (ContentId, FileMode)) -> Self {
        Self {
            kind: ChangeKind::Modified,
            old_path: Some(path.clone()),
            new_path: Some(path),
            old_id: Some(old.0),
            new_id: Some(new.0),
            old_mode: Some(old.1),
            new_mode: Some(new.1),
        }
    }

    /// The destination path when present, else the old path.
    pub fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or_default()
    }
}

/// Outcome of an atomic ref update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefUpdate {
    Created,
    Updated,
    Unchanged,
    Rejected,
}

/// One recorded movement of a ref.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefLogEntry {
    pub id: Uuid,
    pub name: String,
    pub old_target: Option<SnapshotId>,
    pub new_target: SnapshotId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl RefLogEntry {
    pub fn new(
        name: String,
        old_target: Option<SnapshotId>,
        new_target: SnapshotId,
        message: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            old_target,
            new_target,
            message,
            timestamp: Utc::now(),
        }
    }
}
