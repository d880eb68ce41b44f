//! Composable path predicates.
//!
//! A [`PathFilter`] answers two questions: does a file path match, and could
//! anything below a directory match. The second lets the diff walk skip whole
//! subtrees. Filters combine with [`PathFilter::and`] / [`PathFilter::or`];
//! [`FilterSet`] assembles the per-scope OR group and the structural filters.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct PathFilter {
    matches: Predicate,
    may_enter: Predicate,
    label: String,
}

impl PathFilter {
    /// Matches `prefix` itself and everything below it.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        let label = format!("prefix({})", prefix);
        let enter = prefix.clone();
        Self {
            matches: Arc::new(move |path| is_within(path, &prefix)),
            may_enter: Arc::new(move |dir| is_within(dir, &enter) || is_within(&enter, dir)),
            label,
        }
    }

    pub fn suffix(suffix: impl Into<String>) -> Self {
        let suffix = suffix.into();
        let label = format!("suffix({})", suffix);
        Self {
            matches: Arc::new(move |path| path.ends_with(&suffix)),
            may_enter: Arc::new(|_| true),
            label,
        }
    }

    /// Wraps an arbitrary predicate. Subtrees are never pruned for it.
    pub fn from_fn<F>(label: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            matches: Arc::new(predicate),
            may_enter: Arc::new(|_| true),
            label: label.into(),
        }
    }

    pub fn and(self, other: PathFilter) -> Self {
        let (a, b) = (self.clone(), other.clone());
        Self {
            label: format!("({} AND {})", self.label, other.label),
            matches: Arc::new(move |path| (a.matches)(path) && (b.matches)(path)),
            may_enter: Arc::new(move |dir| (self.may_enter)(dir) && (other.may_enter)(dir)),
        }
    }

    pub fn or(self, other: PathFilter) -> Self {
        let (a, b) = (self.clone(), other.clone());
        Self {
            label: format!("({} OR {})", self.label, other.label),
            matches: Arc::new(move |path| (a.matches)(path) || (b.matches)(path)),
            may_enter: Arc::new(move |dir| (self.may_enter)(dir) || (other.may_enter)(dir)),
        }
    }

    /// OR of all filters; `None` for an empty input.
    pub fn any_of(filters: impl IntoIterator<Item = PathFilter>) -> Option<Self> {
        filters.into_iter().reduce(PathFilter::or)
    }

    /// AND of all filters; `None` for an empty input.
    pub fn all_of(filters: impl IntoIterator<Item = PathFilter>) -> Option<Self> {
        filters.into_iter().reduce(PathFilter::and)
    }

    pub fn matches(&self, path: &str) -> bool {
        (self.matches)(path)
    }

    /// Whether any path below directory `dir` can match.
    pub fn may_enter(&self, dir: &str) -> bool {
        (self.may_enter)(dir)
    }
}

impl fmt::Debug for PathFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

fn is_within(path: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}

/// Scopes plus structural filters, turned into one effective filter.
///
/// Scopes are opaque names (user names) that each select
/// `<root_prefix>/<scope>`; they OR together. Structural filters AND with each
/// other and with the scope group.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    root_prefix: String,
    scopes: BTreeSet<String>,
    structural: Vec<PathFilter>,
}

impl FilterSet {
    pub fn new(root_prefix: impl Into<String>) -> Self {
        Self {
            root_prefix: root_prefix.into(),
            ..Self::default()
        }
    }

    pub fn add_scope(&mut self, scope: impl Into<String>) -> &mut Self {
        self.scopes.insert(scope.into());
        self
    }

    pub fn remove_scope(&mut self, scope: &str) -> &mut Self {
        self.scopes.remove(scope);
        self
    }

    pub fn add_filter(&mut self, filter: PathFilter) -> &mut Self {
        self.structural.push(filter);
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.add_scope(scope);
        self
    }

    pub fn with_filter(mut self, filter: PathFilter) -> Self {
        self.add_filter(filter);
        self
    }

    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scopes.iter().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty() && self.structural.is_empty()
    }

    /// `None` means "no restriction": every actual change is reported.
    pub fn effective(&self) -> Option<PathFilter> {
        let root = self.root_prefix.trim_matches('/');
        let scope_group = PathFilter::any_of(
            self.scopes
                .iter()
                .map(|scope| PathFilter::prefix(crate::store::join_path(root, scope))),
        );

        PathFilter::all_of(scope_group.into_iter().chain(self.structural.iter().cloned()))
    }
}
