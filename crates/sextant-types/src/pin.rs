//! Path pinning for store handles.
//!
//! A store opened on a file owns that file for as long as the handle lives.
//! Opening a second handle of the same kind on the same file is a programming
//! error and fails immediately with [`PinError::AlreadyOpen`]. Different
//! store kinds (namespaces) may share one database file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use parking_lot::Mutex;
use tracing::debug;

/// Live (namespace, canonical path) pairs.
static PINNED: LazyLock<Mutex<HashSet<(&'static str, PathBuf)>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

/// Errors from acquiring a path pin.
#[derive(Debug, thiserror::Error)]
pub enum PinError {
    /// Another live handle of this kind is bound to the path.
    #[error("{namespace} store already open at {}", path.display())]
    AlreadyOpen {
        namespace: &'static str,
        path: PathBuf,
    },
}

/// Exclusive claim on a database path, released on drop.
#[derive(Debug)]
pub struct PathPin {
    namespace: &'static str,
    path: PathBuf,
}

impl PathPin {
    /// Claim `path` for `namespace`.
    pub fn acquire(namespace: &'static str, path: &Path) -> Result<Self, PinError> {
        let canonical = canonical_path(path);
        let mut pinned = PINNED.lock();
        if !pinned.insert((namespace, canonical.clone())) {
            return Err(PinError::AlreadyOpen {
                namespace,
                path: canonical,
            });
        }

        debug!(namespace, path = %canonical.display(), "Pinned store path");
        Ok(Self {
            namespace,
            path: canonical,
        })
    }

    /// The canonical path this pin holds.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathPin {
    fn drop(&mut self) {
        PINNED
            .lock()
            .remove(&(self.namespace, std::mem::take(&mut self.path)));
    }
}

/// Resolve a path that may not exist yet.
///
/// The parent directory is canonicalized when it exists so that `./a.db`
/// and `/abs/a.db` pin the same file.
fn canonical_path(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf()),
    }
}
