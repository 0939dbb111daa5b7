//! Policy lists and the policy store.
//!
//! Three plain-text lists drive enforcement: protected processes, forbidden
//! processes and authorized users. Each file holds one name per line; lines
//! are trimmed, blank lines ignored, and all comparisons are
//! case-insensitive. The store reloads the files every tick and swaps in a
//! whole new snapshot. A list that cannot be read keeps its last good value.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use crate::config::PolicyPaths;

/// An ordered list of names with case-insensitive membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyList {
    entries: Vec<String>,
    folded: HashSet<String>,
}

impl PolicyList {
    /// Build a list, keeping entry order and duplicates.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries: Vec<String> = entries.into_iter().map(Into::into).collect();
        let folded = entries.iter().map(|e| fold(e)).collect();
        Self { entries, folded }
    }

    /// Parse file contents: one trimmed name per line, blank lines dropped.
    pub fn parse(contents: &str) -> Self {
        let contents = contents.strip_prefix('\u{feff}').unwrap_or(contents);
        Self::new(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty()),
        )
    }

    /// Case-insensitive membership test.
    pub fn contains(&self, name: &str) -> bool {
        self.folded.contains(&fold(name))
    }

    /// Entries in file order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Case folding used for every name comparison.
pub fn fold(name: &str) -> String {
    name.to_lowercase()
}

/// Strip a trailing extension (`guard.exe` → `guard`). Dotfiles keep their name.
pub fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// Whether a live process name satisfies a protected entry.
///
/// Both sides are compared without extension, case-insensitively.
pub fn matches_protected(entry: &str, process_name: &str) -> bool {
    fold(strip_extension(entry)) == fold(strip_extension(process_name))
}

/// One consistent view of all three lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySnapshot {
    /// Processes that must be running and not suspended.
    pub protected: PolicyList,
    /// Processes terminated on sight.
    pub forbidden: PolicyList,
    /// Accounts exempt from removal.
    pub authorized_users: PolicyList,
}

/// Read one list file. A missing file is an empty list.
///
/// # Errors
///
/// Returns the I/O error for anything other than a missing file.
pub async fn read_list(path: &Path) -> std::io::Result<PolicyList> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(PolicyList::parse(&String::from_utf8_lossy(&bytes))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(PolicyList::default()),
        Err(e) => Err(e),
    }
}

/// File-backed policy store with last-good-value semantics.
#[derive(Debug)]
pub struct PolicyStore {
    paths: PolicyPaths,
    current: RwLock<Arc<PolicySnapshot>>,
}

impl PolicyStore {
    /// A store with empty lists until the first reload.
    pub fn new(paths: PolicyPaths) -> Self {
        Self {
            paths,
            current: RwLock::new(Arc::new(PolicySnapshot::default())),
        }
    }

    /// Resolved file paths backing this store.
    pub fn paths(&self) -> &PolicyPaths {
        &self.paths
    }

    /// The snapshot from the most recent reload.
    pub fn current(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Re-read all three files and publish a new snapshot.
    ///
    /// A list whose file cannot be read is carried over from the previous
    /// snapshot and a warning is logged.
    pub async fn reload(&self) -> Arc<PolicySnapshot> {
        let previous = self.current();

        let protected = reload_list(&self.paths.protected_list, &previous.protected).await;
        let forbidden = reload_list(&self.paths.forbidden_list, &previous.forbidden).await;
        let authorized_users =
            reload_list(&self.paths.authorized_users, &previous.authorized_users).await;

        let next = Arc::new(PolicySnapshot {
            protected,
            forbidden,
            authorized_users,
        });
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&next);
        next
    }
}

async fn reload_list(path: &Path, previous: &PolicyList) -> PolicyList {
    match read_list(path).await {
        Ok(list) => list,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "failed to read policy list, keeping previous contents"
            );
            previous.clone()
        }
    }
}
