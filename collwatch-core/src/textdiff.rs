use crate::error::Result;
use crate::models::{ChangeEntry, ChangeKind, ContentId};
use crate::session::ContentLoader;
use similar::{ChangeTag, TextDiff};

/// Line-level view of one change entry.
#[derive(Debug, Clone)]
pub struct ContentDiff {
    pub path: String,
    pub kind: ChangeKind,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
    /// Set when either side exists but is not UTF-8.
    pub binary: bool,
    pub diff_lines: Vec<DiffLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub line_type: DiffLineType,
    pub content: String,
    pub old_line_number: Option<usize>,
    pub new_line_number: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLineType {
    Context,
    Addition,
    Deletion,
}

impl ContentDiff {
    /// Loads both sides of `entry` by content id. A missing side diffs as
    /// empty text, so additions and deletions show every line.
    pub fn from_entry(entry: &ChangeEntry, loader: &dyn ContentLoader) -> Result<Self> {
        let old = load(entry.old_id.as_ref(), loader)?;
        let new = load(entry.new_id.as_ref(), loader)?;
        Ok(Self::from_bytes(entry.path(), entry.kind, old, new))
    }

    pub fn from_bytes(
        path: &str,
        kind: ChangeKind,
        old: Option<Vec<u8>>,
        new: Option<Vec<u8>>,
    ) -> Self {
        let binary = [&old, &new]
            .iter()
            .any(|side| matches!(side, Some(bytes) if std::str::from_utf8(bytes).is_err()));
        let old_content = old.and_then(|bytes| String::from_utf8(bytes).ok());
        let new_content = new.and_then(|bytes| String::from_utf8(bytes).ok());

        let diff_lines = if binary {
            Vec::new()
        } else {
            compute_diff(
                old_content.as_deref().unwrap_or_default(),
                new_content.as_deref().unwrap_or_default(),
            )
        };

        Self {
            path: path.to_string(),
            kind,
            old_content,
            new_content,
            binary,
            diff_lines,
        }
    }

    pub fn additions(&self) -> usize {
        self.count(DiffLineType::Addition)
    }

    pub fn deletions(&self) -> usize {
        self.count(DiffLineType::Deletion)
    }

    fn count(&self, line_type: DiffLineType) -> usize {
        self.diff_lines
            .iter()
            .filter(|l| l.line_type == line_type)
            .count()
    }

    pub fn format_unified(&self, context_lines: usize) -> String {
        if self.binary {
            return format!("Binary content differs: {}\n", self.path);
        }

        let old = self.old_content.as_deref().unwrap_or_default();
        let new = self.new_content.as_deref().unwrap_or_default();
        let (old_header, new_header) = match self.kind {
            ChangeKind::Added => ("/dev/null".to_string(), format!("b/{}", self.path)),
            ChangeKind::Deleted => (format!("a/{}", self.path), "/dev/null".to_string()),
            ChangeKind::Modified => (format!("a/{}", self.path), format!("b/{}", self.path)),
        };

        TextDiff::from_lines(old, new)
            .unified_diff()
            .context_radius(context_lines)
            .header(&old_header, &new_header)
            .to_string()
    }
}

fn load(id: Option<&ContentId>, loader: &dyn ContentLoader) -> Result<Option<Vec<u8>>> {
    id.map(|id| loader.load_blob(id)).transpose()
}

fn compute_diff(old_text: &str, new_text: &str) -> Vec<DiffLine> {
    let diff = TextDiff::from_lines(old_text, new_text);
    let mut lines = Vec::new();

    for change in diff.iter_all_changes() {
        let line_type = match change.tag() {
            ChangeTag::Delete => DiffLineType::Deletion,
            ChangeTag::Insert => DiffLineType::Addition,
            ChangeTag::Equal => DiffLineType::Context,
        };

        lines.push(DiffLine {
            line_type,
            content: change.to_string(),
            old_line_number: change.old_index().map(|i| i + 1),
            new_line_number: change.new_index().map(|i| i + 1),
        });
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmark::DEFAULT_BOOKMARK;
    use crate::session::MemorizedDiffer;
    use crate::testing::{bookmark, head, snapshot, store};

    #[test]
    fn test_diff_computation() {
        let old_text = "line 1\nline 2\nline 3\n";
        let new_text = "line 1\nline 2 modified\nline 3\nline 4\n";
        let diff_lines = compute_diff(old_text, new_text);

        let deleted: Vec<_> = diff_lines
            .iter()
            .filter(|l| l.line_type == DiffLineType::Deletion)
            .collect();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].content, "line 2\n");
        assert_eq!(deleted[0].old_line_number, Some(2));

        let last = diff_lines.last().unwrap();
        assert_eq!(last.line_type, DiffLineType::Addition);
        assert_eq!(last.new_line_number, Some(4));
    }

    #[test]
    fn test_content_diff_from_entries() {
        let store = store();
        let base = snapshot(&store, &[("a.txt", "Hello\nWorld\n"), ("gone.txt", "x\ny\n")]);
        bookmark(&store, DEFAULT_BOOKMARK, &base);
        head(&store, &[("a.txt", "Hello\nRust\nWorld\n"), ("new.txt", "n\n")]);

        let session = MemorizedDiffer::new(store).diff().unwrap();
        let diffs: Vec<ContentDiff> = session
            .changes()
            .iter()
            .map(|entry| ContentDiff::from_entry(entry, &session).unwrap())
            .collect();

        assert_eq!(diffs[0].path, "a.txt");
        assert_eq!((diffs[0].additions(), diffs[0].deletions()), (1, 0));
        assert!(diffs[0].format_unified(3).contains("+Rust"));

        assert_eq!(diffs[1].kind, ChangeKind::Deleted);
        assert_eq!((diffs[1].additions(), diffs[1].deletions()), (0, 2));
        assert!(diffs[1].format_unified(3).starts_with("--- a/gone.txt\n+++ /dev/null\n"));

        assert_eq!(diffs[2].kind, ChangeKind::Added);
        assert_eq!(diffs[2].additions(), 1);
    }

    #[test]
    fn test_binary_content() {
        let diff = ContentDiff::from_bytes(
            "img.bin",
            ChangeKind::Modified,
            Some(vec![0xff, 0x00]),
            Some(b"text\n".to_vec()),
        );
        assert!(diff.binary);
        assert!(diff.diff_lines.is_empty());
        assert_eq!(diff.format_unified(3), "Binary content differs: img.bin\n");
    }
}
