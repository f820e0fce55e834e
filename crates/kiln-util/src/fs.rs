//! Filesystem utilities for Kiln.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::UtilError;

fn io_error(path: &Path, source: std::io::Error) -> UtilError {
    UtilError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Create a directory and all parent directories if they do not exist.
///
/// # Errors
/// Returns an error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> Result<(), UtilError> {
    std::fs::create_dir_all(path).map_err(|source| io_error(path, source))
}

/// Write `contents` to `path` atomically via a sibling temp file and a rename.
///
/// # Errors
/// Returns an error if the parent directory cannot be created or the file
/// cannot be written or renamed.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), UtilError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents).map_err(|source| io_error(&tmp, source))?;
    std::fs::rename(&tmp, path).map_err(|source| io_error(path, source))
}

/// Remove a directory and all its contents. No error if the directory is absent.
///
/// # Errors
/// Returns an error if the directory exists but cannot be removed.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<(), UtilError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(io_error(path, source)),
    }
}

/// Remove a file or a directory tree. No error if nothing exists at `path`.
///
/// # Errors
/// Returns an error if the entry exists but cannot be removed.
pub fn remove_if_exists(path: &Path) -> Result<(), UtilError> {
    if path.is_dir() {
        return remove_dir_all_if_exists(path);
    }
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(io_error(path, source)),
    }
}

/// Return the user's home directory.
///
/// Resolves via `HOME` (Unix) or `USERPROFILE` (Windows).
///
/// # Errors
/// Returns an error if neither environment variable is set.
pub fn home_dir() -> Result<PathBuf, UtilError> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .map_err(|_| UtilError::NoHomeDir)
}

/// Return the Kiln home directory (`~/.kiln`).
///
/// # Errors
/// Returns an error if the home directory cannot be determined.
pub fn kiln_home() -> Result<PathBuf, UtilError> {
    Ok(home_dir()?.join(".kiln"))
}

/// Resolve a user-supplied path against `base`, expanding a leading `~/`.
///
/// # Errors
/// Returns an error if the path starts with `~/` and the home directory
/// cannot be determined.
pub fn resolve_path(base: &Path, raw: &str) -> Result<PathBuf, UtilError> {
    if let Some(rest) = raw.strip_prefix("~/") {
        return Ok(home_dir()?.join(rest));
    }
    let path = Path::new(raw);
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(base.join(path))
    }
}

/// Canonicalize `path` when it exists, otherwise return it unchanged.
pub fn canonical_or_self(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Expand a glob `pattern` relative to `base` into the matching files, sorted.
///
/// A pattern without glob metacharacters resolves to the single path it names,
/// whether or not it exists.
///
/// # Errors
/// Returns an error if the pattern is not a valid glob expression.
pub fn expand_glob(base: &Path, pattern: &str) -> Result<Vec<PathBuf>, UtilError> {
    let full = resolve_path(base, pattern)?;
    if !pattern.contains(['*', '?', '[']) {
        return Ok(vec![full]);
    }
    let full_str = full.display().to_string();
    let mut paths: Vec<PathBuf> = glob::glob(&full_str)
        .map_err(|e| UtilError::GlobPattern {
            pattern: full_str.clone(),
            message: e.to_string(),
        })?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}

/// Return the most recent modification time among `paths`, skipping missing ones.
pub fn newest_modification(paths: &[PathBuf]) -> Option<SystemTime> {
    paths
        .iter()
        .filter_map(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok())
        .max()
}

/// Return the oldest modification time among `paths`, or `None` if any is missing.
pub fn oldest_modification(paths: &[PathBuf]) -> Option<SystemTime> {
    let mut oldest: Option<SystemTime> = None;
    for path in paths {
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
        oldest = Some(oldest.map_or(modified, |o| o.min(modified)));
    }
    oldest
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn ensure_dir_creates_nested() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b").join("c");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn write_atomic_creates_parents_and_replaces() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("work").join("dep-cache").join("entry.json");
        write_atomic(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn remove_dir_all_if_exists_absent_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        remove_dir_all_if_exists(&tmp.path().join("nonexistent")).unwrap();
    }

    #[test]
    fn remove_if_exists_handles_files_and_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("out.jar");
        let dir = tmp.path().join("classes");
        fs::write(&file, b"x").unwrap();
        fs::create_dir_all(dir.join("nested")).unwrap();

        remove_if_exists(&file).unwrap();
        remove_if_exists(&dir).unwrap();
        remove_if_exists(&file).unwrap();
        assert!(!file.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn resolve_path_relative_and_absolute() {
        let base = Path::new("/work/project");
        assert_eq!(
            resolve_path(base, "libs/a.jar").unwrap(),
            PathBuf::from("/work/project/libs/a.jar")
        );
        assert_eq!(
            resolve_path(base, "/opt/a.jar").unwrap(),
            PathBuf::from("/opt/a.jar")
        );
    }

    #[test]
    fn expand_glob_matches_sorted_files() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("libs")).unwrap();
        fs::write(tmp.path().join("libs/b.jar"), b"b").unwrap();
        fs::write(tmp.path().join("libs/a.jar"), b"a").unwrap();
        fs::write(tmp.path().join("libs/readme.md"), b"r").unwrap();

        let files = expand_glob(tmp.path(), "libs/*.jar").unwrap();
        assert_eq!(
            files,
            vec![tmp.path().join("libs/a.jar"), tmp.path().join("libs/b.jar")]
        );
    }

    #[test]
    fn expand_glob_literal_path_kept_even_if_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let files = expand_glob(tmp.path(), "out/missing.jar").unwrap();
        assert_eq!(files, vec![tmp.path().join("out/missing.jar")]);
    }

    #[test]
    fn expand_glob_invalid_pattern() {
        let tmp = tempfile::tempdir().unwrap();
        let err = expand_glob(tmp.path(), "libs/[*.jar").unwrap_err();
        assert!(err.to_string().contains("invalid glob pattern"), "error was: {err}");
    }

    #[test]
    fn oldest_modification_none_when_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let present = tmp.path().join("a.jar");
        fs::write(&present, b"a").unwrap();
        assert!(oldest_modification(&[present.clone()]).is_some());
        assert!(oldest_modification(&[present, tmp.path().join("b.jar")]).is_none());
    }

    #[test]
    fn newest_modification_skips_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let present = tmp.path().join("a.kt");
        fs::write(&present, b"a").unwrap();
        assert!(newest_modification(&[tmp.path().join("gone.kt"), present]).is_some());
        assert!(newest_modification(&[]).is_none());
    }
}
