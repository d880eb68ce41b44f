use crate::error::{Error, Result};
use crate::models::{
    ContentId, EntryKind, FileMode, RefLogEntry, RefUpdate, SnapshotId, TreeEntry,
};
use crate::store::{TreeStore, HEAD};
use chrono::DateTime;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCHEMA_VERSION: i32 = 1;

const KIND_BLOB: &str = "blob";
const KIND_TREE: &str = "tree";

/// SQLite-backed content-addressable tree store with atomically updatable refs.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&mut self) -> Result<()> {
        let conn = self.conn.get_mut().unwrap_or_else(PoisonError::into_inner);
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS objects (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                data BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS refs (
                name TEXT PRIMARY KEY,
                target TEXT NOT NULL,
                updated TEXT NOT NULL,
                FOREIGN KEY (target) REFERENCES objects(id)
            );

            CREATE TABLE IF NOT EXISTS ref_log (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                old_target TEXT,
                new_target TEXT NOT NULL,
                message TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ref_log_name ON ref_log(name);
            CREATE INDEX IF NOT EXISTS idx_ref_log_timestamp ON ref_log(timestamp);
            "#,
        )?;

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .optional()?;

        if version.is_none() {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }

        Ok(())
    }

    // The connection holds no state that a panicking holder could leave
    // half-written outside of a transaction, so poisoning is ignored.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Object operations
    pub fn write_blob(&self, content: &[u8]) -> Result<ContentId> {
        insert_object(&self.conn(), KIND_BLOB, content)
    }

    /// Stores one tree level. Entries are put into canonical order first.
    pub fn write_tree(&self, entries: Vec<TreeEntry>) -> Result<ContentId> {
        insert_tree(&self.conn(), entries)
    }

    /// Records `files` (slash-separated path to content) as a snapshot.
    /// Every file gets the regular mode. The head is not moved.
    pub fn commit_files<I, P, C>(&self, files: I) -> Result<SnapshotId>
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: AsRef<[u8]>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut root = DirNode::default();
        for (path, content) in files {
            let id = insert_object(&tx, KIND_BLOB, content.as_ref())?;
            root.insert(path.as_ref(), id, FileMode::Regular)?;
        }

        let tree = root.write(&tx)?;
        tx.commit()?;

        debug!("Committed snapshot {}", tree.short());
        Ok(SnapshotId::from_tree(tree))
    }

    /// Records the files below `dir` as a snapshot, skipping any entry whose
    /// name is in `ignore`. Symlinks are not followed. The head is not moved.
    pub fn snapshot_directory(
        &self,
        dir: &Path,
        ignore: &[String],
        on_file: &mut dyn FnMut(&str),
    ) -> Result<SnapshotId> {
        let mut files = Vec::new();
        collect_files(dir, "", ignore, &mut files)?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut root = DirNode::default();
        for (path, fs_path, mode) in files {
            let content = std::fs::read(&fs_path)?;
            let id = insert_object(&tx, KIND_BLOB, &content)?;
            root.insert(&path, id, mode)?;
            on_file(&path);
        }

        let tree = root.write(&tx)?;
        tx.commit()?;

        info!("Snapshot {} recorded from {:?}", tree.short(), dir);
        Ok(SnapshotId::from_tree(tree))
    }

    // Ref operations
    /// Points HEAD at `snapshot` regardless of its previous value.
    pub fn set_head(&self, snapshot: &SnapshotId) -> Result<RefUpdate> {
        let current = self.resolve_ref(HEAD)?;
        self.update_ref(HEAD, current.as_ref(), snapshot, "Recorded new head")
    }

    /// Removes a ref. Returns whether it existed.
    pub fn delete_ref(&self, name: &str) -> Result<bool> {
        let removed = self
            .conn()
            .execute("DELETE FROM refs WHERE name = ?1", params![name])?;
        Ok(removed > 0)
    }

    /// Movements of `name`, newest first.
    pub fn ref_log(&self, name: &str, limit: Option<usize>) -> Result<Vec<RefLogEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, old_target, new_target, message, timestamp
             FROM ref_log WHERE name = ?1
             ORDER BY rowid DESC
             LIMIT ?2",
        )?;

        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let entries = stmt
            .query_map(params![name, limit], ref_log_from_row)?
            .collect::<rusqlite::Result<Vec<RefLogEntry>>>()?;

        Ok(entries)
    }
}

impl TreeStore for SqliteStore {
    fn resolve_ref(&self, name: &str) -> Result<Option<SnapshotId>> {
        let target: Option<String> = self
            .conn()
            .query_row(
                "SELECT target FROM refs WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        Ok(target.map(SnapshotId::new))
    }

    fn read_tree(&self, id: &ContentId) -> Result<Vec<TreeEntry>> {
        let data = read_object(&self.conn(), id, KIND_TREE)?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn read_blob(&self, id: &ContentId) -> Result<Vec<u8>> {
        read_object(&self.conn(), id, KIND_BLOB)
    }

    fn update_ref(
        &self,
        name: &str,
        expected: Option<&SnapshotId>,
        new: &SnapshotId,
        message: &str,
    ) -> Result<RefUpdate> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<SnapshotId> = tx
            .query_row(
                "SELECT target FROM refs WHERE name = ?1",
                params![name],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(SnapshotId::new);

        if current.as_ref() == Some(new) {
            return Ok(RefUpdate::Unchanged);
        }

        if current.as_ref() != expected {
            warn!(
                "Rejected update of {}: expected {:?}, found {:?}",
                name,
                expected.map(|s| s.short()),
                current.as_ref().map(|s| s.short())
            );
            return Ok(RefUpdate::Rejected);
        }

        let exists: Option<String> = tx
            .query_row(
                "SELECT kind FROM objects WHERE id = ?1",
                params![new.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.as_deref() != Some(KIND_TREE) {
            return Err(Error::ObjectNotFound(new.to_string()));
        }

        let entry = RefLogEntry::new(
            name.to_string(),
            current.clone(),
            new.clone(),
            message.to_string(),
        );

        tx.execute(
            "INSERT INTO refs (name, target, updated) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET target = excluded.target, updated = excluded.updated",
            params![name, new.as_str(), entry.timestamp.to_rfc3339()],
        )?;

        tx.execute(
            "INSERT INTO ref_log (id, name, old_target, new_target, message, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id.to_string(),
                entry.name,
                entry.old_target.as_ref().map(|s| s.as_str()),
                entry.new_target.as_str(),
                entry.message,
                entry.timestamp.to_rfc3339(),
            ],
        )?;

        tx.commit()?;

        info!("Moved {} to {}", name, new.short());
        Ok(if current.is_none() {
            RefUpdate::Created
        } else {
            RefUpdate::Updated
        })
    }
}

// Helper functions
fn insert_object(conn: &Connection, kind: &str, data: &[u8]) -> Result<ContentId> {
    let id = ContentId::hash_object(kind, data);
    conn.execute(
        "INSERT OR IGNORE INTO objects (id, kind, data) VALUES (?1, ?2, ?3)",
        params![id.as_str(), kind, data],
    )?;
    Ok(id)
}

fn insert_tree(conn: &Connection, mut entries: Vec<TreeEntry>) -> Result<ContentId> {
    let mut names = HashSet::with_capacity(entries.len());
    for entry in &entries {
        validate_segment(&entry.name)?;
        if !names.insert(entry.name.as_str()) {
            return Err(Error::InvalidPath(entry.name.clone()));
        }
    }
    entries.sort_by(|a, b| a.canonical_cmp(b));

    // The id covers the canonical text form; the stored payload is JSON.
    let mut canonical = String::new();
    for entry in &entries {
        let mode = match entry.kind {
            EntryKind::Tree => "40000",
            EntryKind::Blob(mode) => mode.as_str(),
        };
        canonical.push_str(&format!("{} {}\0{}\n", mode, entry.name, entry.id));
    }

    let id = ContentId::hash_object(KIND_TREE, canonical.as_bytes());
    conn.execute(
        "INSERT OR IGNORE INTO objects (id, kind, data) VALUES (?1, ?2, ?3)",
        params![id.as_str(), KIND_TREE, serde_json::to_vec(&entries)?],
    )?;
    Ok(id)
}

fn read_object(conn: &Connection, id: &ContentId, kind: &str) -> Result<Vec<u8>> {
    let row: Option<(String, Vec<u8>)> = conn
        .query_row(
            "SELECT kind, data FROM objects WHERE id = ?1",
            params![id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match row {
        Some((found, data)) if found == kind => Ok(data),
        _ => Err(Error::ObjectNotFound(format!("{} {}", kind, id))),
    }
}

fn validate_segment(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(Error::InvalidPath(name.to_string()));
    }
    Ok(())
}

fn collect_files(
    dir: &Path,
    prefix: &str,
    ignore: &[String],
    files: &mut Vec<(String, std::path::PathBuf, FileMode)>,
) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry
            .file_name()
            .into_string()
            .map_err(|raw| Error::InvalidPath(raw.to_string_lossy().to_string()))?;

        if ignore.iter().any(|pattern| pattern == &name) {
            continue;
        }

        let path = crate::store::join_path(prefix, &name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), &path, ignore, files)?;
        } else if file_type.is_file() {
            files.push((path, entry.path(), file_mode(&entry.metadata()?)));
        }
    }
    Ok(())
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> FileMode {
    use std::os::unix::fs::PermissionsExt;
    if metadata.permissions().mode() & 0o111 != 0 {
        FileMode::Executable
    } else {
        FileMode::Regular
    }
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> FileMode {
    FileMode::Regular
}

fn ref_log_from_row(row: &Row) -> rusqlite::Result<RefLogEntry> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let old_target: Option<String> = row.get(2)?;
    let new_target: String = row.get(3)?;
    let message: String = row.get(4)?;
    let timestamp: String = row.get(5)?;

    Ok(RefLogEntry {
        id: Uuid::parse_str(&id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?,
        name,
        old_target: old_target.map(SnapshotId::new),
        new_target: SnapshotId::new(new_target),
        message,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?
            .into(),
    })
}

/// In-memory directory used to assemble nested trees bottom-up.
#[derive(Default)]
struct DirNode {
    files: BTreeMap<String, (ContentId, FileMode)>,
    dirs: BTreeMap<String, DirNode>,
}

impl DirNode {
    fn insert(&mut self, path: &str, id: ContentId, mode: FileMode) -> Result<()> {
        let segments: Vec<&str> = path.split('/').collect();
        let (file_name, parents) = match segments.split_last() {
            Some(split) => split,
            None => return Err(Error::InvalidPath(path.to_string())),
        };

        let mut node = self;
        for segment in parents {
            validate_segment(segment)?;
            if node.files.contains_key(*segment) {
                return Err(Error::InvalidPath(path.to_string()));
            }
            node = node.dirs.entry(segment.to_string()).or_default();
        }

        validate_segment(file_name)?;
        if node.dirs.contains_key(*file_name) {
            return Err(Error::InvalidPath(path.to_string()));
        }
        node.files.insert(file_name.to_string(), (id, mode));
        Ok(())
    }

    fn write(self, conn: &Connection) -> Result<ContentId> {
        let mut entries = Vec::with_capacity(self.files.len() + self.dirs.len());
        for (name, (id, mode)) in self.files {
            entries.push(TreeEntry::blob(name, id, mode));
        }
        for (name, dir) in self.dirs {
            let id = dir.write(conn)?;
            entries.push(TreeEntry::tree(name, id));
        }
        insert_tree(conn, entries)
    }
}
