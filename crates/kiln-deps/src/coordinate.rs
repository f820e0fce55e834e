//! Module coordinate parsing and repository layout.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::DepsError;
use crate::version::{Version, VersionSpec};

/// The identity of a module, independent of its version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId {
    /// Group identifier, e.g. `"org.acme"`.
    pub group: String,
    /// Module name, e.g. `"acme-core"`.
    pub name: String,
}

impl ModuleId {
    pub fn new(group: &str, name: &str) -> Self {
        Self {
            group: group.to_owned(),
            name: name.to_owned(),
        }
    }

    /// Parse a `group:name` string.
    ///
    /// # Errors
    /// Returns an error if the string is not exactly two non-empty parts.
    pub fn parse(raw: &str) -> Result<Self, DepsError> {
        let coordinate = Coordinate::parse(raw)?;
        if coordinate.version.is_some() {
            return Err(DepsError::InvalidCoordinate {
                coordinate: raw.to_owned(),
                reason: "expected `group:name` without a version".to_owned(),
            });
        }
        Ok(coordinate.module)
    }

    /// Directory holding every version of this module in a Maven-layout repository.
    pub fn repository_dir(&self, root: &Path) -> PathBuf {
        root.join(self.group.replace('.', "/")).join(&self.name)
    }

    /// The artifact file name for `version`: `"{name}-{version}.{extension}"`.
    pub fn filename(&self, version: &Version, extension: &str) -> String {
        format!("{}-{}.{}", self.name, version, extension)
    }

    /// Path of the artifact file for `version` under a Maven-layout `root`.
    pub fn artifact_path(&self, root: &Path, version: &Version, extension: &str) -> PathBuf {
        self.repository_dir(root)
            .join(version.as_str())
            .join(self.filename(version, extension))
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.name)
    }
}

/// A parsed `group:name[:version]` coordinate.
///
/// The two-part form leaves the version to the dependency set's version provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coordinate {
    pub module: ModuleId,
    pub version: Option<VersionSpec>,
}

impl Coordinate {
    /// Parse a coordinate string.
    ///
    /// # Errors
    /// Returns `DepsError::InvalidCoordinate` when the string has fewer than 2
    /// or more than 3 colon-separated parts, or any part is empty, and
    /// `DepsError::InvalidVersion` when the version part is malformed.
    pub fn parse(raw: &str) -> Result<Self, DepsError> {
        let parts: Vec<&str> = raw.trim().split(':').collect();

        if parts.len() < 2 || parts.len() > 3 {
            return Err(DepsError::InvalidCoordinate {
                coordinate: raw.to_owned(),
                reason: format!(
                    "expected 2 or 3 colon-separated parts (group:name[:version]), got {}",
                    parts.len()
                ),
            });
        }

        for (i, part) in parts.iter().enumerate() {
            if part.trim().is_empty() {
                let label = match i {
                    0 => "group",
                    1 => "name",
                    _ => "version",
                };
                return Err(DepsError::InvalidCoordinate {
                    coordinate: raw.to_owned(),
                    reason: format!("{label} is empty"),
                });
            }
        }

        let (Some(group), Some(name)) = (parts.first(), parts.get(1)) else {
            return Err(DepsError::InvalidCoordinate {
                coordinate: raw.to_owned(),
                reason: "expected at least 2 parts".to_owned(),
            });
        };
        let version = parts.get(2).map(|v| VersionSpec::parse(v)).transpose()?;

        Ok(Self {
            module: ModuleId::new(group.trim(), name.trim()),
            version,
        })
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}:{}", self.module, version),
            None => write!(f, "{}", self.module),
        }
    }
}
