//! Tracking groups.
//!
//! A tracking group names a set of file-system roots governed by one
//! algorithm config and one key. Groups are created and edited by the
//! configuration surface; the pipeline consumes them read-only.

use std::path::{Path, PathBuf};

use crate::config::AlgorithmConfig;
use crate::key::Key;

/// A named set of tracked roots, with the key and config their backups
/// are produced under.
#[derive(Debug, Clone)]
pub struct TrackingGroup {
    /// Display name of the group.
    pub name: String,
    /// Key material for secure-mode embedding.
    pub key: Key,
    /// Carrier algorithm configuration.
    pub config: AlgorithmConfig,
    /// Directory roots to back up.
    pub tracked_roots: Vec<PathBuf>,
    /// Subtrees excluded from scanning.
    pub untracked_roots: Vec<PathBuf>,
    /// Whether to consult the tracking index to skip unchanged files.
    pub use_index: bool,
}

impl TrackingGroup {
    /// Creates a group with no roots yet.
    pub fn new(name: &str, key: Key, config: AlgorithmConfig) -> Self {
        Self {
            name: name.to_string(),
            key,
            config,
            tracked_roots: Vec::new(),
            untracked_roots: Vec::new(),
            use_index: true,
        }
    }

    /// Adds a tracked root.
    pub fn track<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.tracked_roots.push(root.into());
        self
    }

    /// Excludes a subtree from scanning.
    pub fn untrack<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.untracked_roots.push(root.into());
        self
    }

    /// Returns true if `path` falls under an untracked root.
    pub fn is_untracked(&self, path: &Path) -> bool {
        self.untracked_roots.iter().any(|root| path.starts_with(root))
    }
}
