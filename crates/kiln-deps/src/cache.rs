//! Resolution cache keys and the per-project file cache.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::DepsError;
use crate::model::DependencySet;

/// Location of the file cache inside a project.
pub const CACHE_DIR: &str = ".kiln/work/dep-cache";

/// All inputs that contribute to a resolution cache key.
#[derive(Debug)]
pub struct KeyInputs<'a> {
    /// Requested scope.
    pub scope: &'a str,
    /// The scope followed by everything it extends.
    pub closure: &'a [String],
    pub dependencies: &'a DependencySet,
    /// Names of the repositories consulted, in order.
    pub repositories: &'a str,
}

/// Cache key of one resolution: the scope plus a SHA-256 hex string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolutionKey {
    scope: String,
    hash: String,
}

impl ResolutionKey {
    pub fn compute(inputs: &KeyInputs<'_>) -> Self {
        let closure = inputs.closure.join(",");
        let content = inputs.dependencies.content_hash();
        let hash = kiln_util::hash::digest_parts(&[
            inputs.scope,
            closure.as_str(),
            content.as_str(),
            inputs.repositories,
        ]);
        Self {
            scope: inputs.scope.to_owned(),
            hash,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Return the hex string of the dependency-set hash.
    pub fn as_hex(&self) -> &str {
        &self.hash
    }

    /// File name of the cache entry: `{scope}-{hash}.json`.
    pub fn file_name(&self) -> String {
        format!("{}-{}.json", self.scope, self.hash)
    }
}

impl fmt::Display for ResolutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.scope, self.hash)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    scope: String,
    key: String,
    /// Seconds since the Unix epoch.
    resolved_at: u64,
    files: Vec<PathBuf>,
}

/// Resolved file lists persisted across runs under [`CACHE_DIR`].
///
/// Entries are written atomically but not locked; only one run per project
/// should use the cache at a time.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The cache of the project rooted at `project_root`.
    pub fn for_project(project_root: &Path) -> Self {
        Self::new(project_root.join(CACHE_DIR))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, key: &ResolutionKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// The cached file list for `key`.
    ///
    /// Unreadable entries and entries naming files that no longer exist are
    /// misses.
    ///
    /// # Errors
    /// Returns an error if the entry exists but cannot be read.
    pub fn load(&self, key: &ResolutionKey) -> Result<Option<Vec<PathBuf>>, DepsError> {
        let path = self.entry_path(key);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(kiln_util::error::UtilError::Io {
                    path: path.display().to_string(),
                    source,
                }
                .into())
            }
        };
        let entry: CacheEntry = match serde_json::from_str(&text) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt dependency cache entry");
                return Ok(None);
            }
        };
        if let Some(missing) = entry.files.iter().find(|f| !f.exists()) {
            debug!(missing = %missing.display(), "dependency cache entry is stale");
            return Ok(None);
        }
        Ok(Some(entry.files))
    }

    /// Persist `files` as the resolution of `key`.
    ///
    /// # Errors
    /// Returns an error if the entry cannot be serialized or written.
    pub fn store(&self, key: &ResolutionKey, files: &[PathBuf]) -> Result<(), DepsError> {
        let path = self.entry_path(key);
        let entry = CacheEntry {
            scope: key.scope().to_owned(),
            key: key.as_hex().to_owned(),
            resolved_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            files: files.to_vec(),
        };
        let json = serde_json::to_string_pretty(&entry).map_err(|e| DepsError::Cache {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        kiln_util::fs::write_atomic(&path, json.as_bytes())?;
        Ok(())
    }

    /// Remove every entry.
    ///
    /// # Errors
    /// Returns an error if the cache directory cannot be removed.
    pub fn clear(&self) -> Result<(), DepsError> {
        kiln_util::fs::remove_dir_all_if_exists(&self.dir)?;
        Ok(())
    }
}
