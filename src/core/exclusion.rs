//! Shared exclusion rules for the count and copy passes.
//!
//! Both passes of a synchronization run consult the same `ExclusionRules`,
//! so the progress denominator and the set of copied files cannot diverge.

use std::path::{Component, Path, PathBuf};

/// Substrings that mark caches, package stores and local application data.
pub const DEFAULT_EXCLUDED_SUBSTRINGS: &[&str] = &["go/pkg/mod", ".cache", ".local/share"];

#[derive(Debug, Clone)]
pub struct ExclusionRules {
    source_root: PathBuf,
    destination_root: PathBuf,
    substrings: Vec<String>,
}

impl ExclusionRules {
    /// Both roots are expected in absolute form.
    pub fn new(source_root: PathBuf, destination_root: PathBuf, substrings: Vec<String>) -> Self {
        Self {
            source_root,
            destination_root,
            substrings,
        }
    }

    /// Returns true if `path` (and, for a directory, its whole subtree) must be
    /// left out of the run.
    pub fn is_excluded(&self, path: &Path) -> bool {
        if path.starts_with(&self.destination_root) {
            return true;
        }

        let Ok(relative) = path.strip_prefix(&self.source_root) else {
            return false;
        };

        if relative.components().any(is_hidden) {
            return true;
        }

        let relative = relative.to_string_lossy();
        self.substrings
            .iter()
            .any(|needle| !needle.is_empty() && relative.contains(needle.as_str()))
    }
}

fn is_hidden(component: Component<'_>) -> bool {
    match component {
        Component::Normal(name) => name.as_encoded_bytes().starts_with(b"."),
        _ => false,
    }
}
