//! Path filtering for delivered records
//!
//! Exclusion is component aware: `/tmp/a` excludes `/tmp/a` and everything
//! below it, but not `/tmp/ab`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

/// Drops records under excluded subtrees
///
/// By default, excludes nothing.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    excluded: Arc<Vec<PathBuf>>,
}

impl ExclusionFilter {
    /// Create a filter that excludes nothing
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        paths
            .into_iter()
            .fold(Self::builder(), |builder, path| builder.add_path(path))
            .build()
    }

    /// Create with builder pattern
    pub fn builder() -> ExclusionFilterBuilder {
        ExclusionFilterBuilder::default()
    }

    /// Check if a path lies inside an excluded subtree
    pub fn is_excluded(&self, path: &Path) -> bool {
        match self.excluded.iter().find(|excluded| path.starts_with(excluded)) {
            Some(excluded) => {
                trace!("Excluding {:?} (under {:?})", path, excluded);
                true
            }
            None => false,
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.excluded
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }
}

/// Builder for ExclusionFilter
#[derive(Debug, Default)]
pub struct ExclusionFilterBuilder {
    paths: Vec<PathBuf>,
}

impl ExclusionFilterBuilder {
    /// Exclude a subtree
    pub fn add_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
        self
    }

    pub fn build(self) -> ExclusionFilter {
        ExclusionFilter {
            excluded: Arc::new(self.paths),
        }
    }
}

/// Admits only the roots themselves and their direct children
#[derive(Debug, Clone)]
pub struct DirectScope {
    roots: Arc<Vec<PathBuf>>,
}

impl DirectScope {
    pub fn new(roots: &[PathBuf]) -> Self {
        Self {
            roots: Arc::new(roots.to_vec()),
        }
    }

    pub fn admits(&self, path: &Path) -> bool {
        self.roots
            .iter()
            .any(|root| path == root || path.parent() == Some(root.as_path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_excludes_nothing() {
        let filter = ExclusionFilter::new();
        assert!(filter.is_empty());
        assert!(!filter.is_excluded(Path::new("/tmp/a/file")));
    }

    #[test]
    fn test_excludes_subtree() {
        let filter = ExclusionFilter::builder()
            .add_path("/tmp/a/ignored")
            .add_path("/tmp/a/ignored")
            .build();

        assert_eq!(filter.paths().len(), 1);
        assert!(filter.is_excluded(Path::new("/tmp/a/ignored")));
        assert!(filter.is_excluded(Path::new("/tmp/a/ignored/deep/file")));
        assert!(!filter.is_excluded(Path::new("/tmp/a/file")));
    }

    #[test]
    fn test_sibling_with_shared_prefix_is_kept() {
        let filter = ExclusionFilter::from_paths(["/tmp/a"]);

        assert!(filter.is_excluded(Path::new("/tmp/a/x")));
        assert!(!filter.is_excluded(Path::new("/tmp/ab/x")));
        assert!(!filter.is_excluded(Path::new("/tmp/ab")));
    }

    #[test]
    fn test_trailing_separator_is_ignored() {
        let filter = ExclusionFilter::from_paths(["/tmp/a/cache/"]);
        assert!(filter.is_excluded(Path::new("/tmp/a/cache/entry")));
    }

    #[test]
    fn test_direct_scope() {
        let scope = DirectScope::new(&[PathBuf::from("/tmp/a")]);

        assert!(scope.admits(Path::new("/tmp/a")));
        assert!(scope.admits(Path::new("/tmp/a/file")));
        assert!(!scope.admits(Path::new("/tmp/a/sub/file")));
        assert!(!scope.admits(Path::new("/tmp/ab")));
    }
}
