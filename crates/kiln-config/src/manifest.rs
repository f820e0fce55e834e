use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// File name of the project manifest.
pub const MANIFEST_FILE: &str = "kiln.toml";

/// The `kiln.toml` project manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub project: Project,
    /// Local Maven-layout repository directories, searched in order.
    #[serde(default)]
    pub repositories: Vec<String>,
    /// Version pins keyed by `group:name`.
    #[serde(default)]
    pub versions: BTreeMap<String, String>,
    /// Custom scopes and the scopes they extend.
    #[serde(default)]
    pub scopes: BTreeMap<String, Vec<String>>,
    #[serde(default, rename = "dependency")]
    pub dependencies: Vec<DependencySpec>,
    #[serde(default)]
    pub pack: Option<Pack>,
    #[serde(default)]
    pub resolution: Resolution,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Project {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Bean used when no `-kb=` flag is given.
    #[serde(default)]
    pub default_kbean: Option<String>,
}

/// One `[[dependency]]` table. Exactly one of `module`, `files` or `project` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencySpec {
    /// Module coordinate, `group:name[:version]`.
    #[serde(default)]
    pub module: Option<String>,
    /// File paths or glob patterns, relative to the project root.
    #[serde(default)]
    pub files: Vec<String>,
    /// Directory of another kiln project.
    #[serde(default)]
    pub project: Option<String>,
    /// Scopes the dependency belongs to. Empty means the default rule.
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub transitive: Option<bool>,
    /// Files the referenced project produces, relative to its directory.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Arguments for the sub-build producing `outputs`.
    #[serde(default)]
    pub build: Vec<String>,
    /// Globs whose modification makes `outputs` stale.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub computed: Option<bool>,
}

/// Kind of a `[[dependency]]` entry, derived from which key is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Module,
    Files,
    Project,
}

impl DependencySpec {
    /// Determine which dependency variant this entry describes.
    ///
    /// # Errors
    /// Returns an error if zero or several of `module`, `files` and `project` are set.
    pub fn kind(&self) -> Result<DependencyKind, ManifestError> {
        let present = [
            (self.module.is_some(), DependencyKind::Module),
            (!self.files.is_empty(), DependencyKind::Files),
            (self.project.is_some(), DependencyKind::Project),
        ];
        let mut kinds = present.iter().filter(|(set, _)| *set).map(|(_, k)| *k);
        match (kinds.next(), kinds.next()) {
            (Some(kind), None) => Ok(kind),
            (None, _) => Err(ManifestError::InvalidDependency {
                reason: "expected one of `module`, `files` or `project`".to_owned(),
            }),
            (Some(_), Some(_)) => Err(ManifestError::InvalidDependency {
                reason: "only one of `module`, `files` or `project` may be set".to_owned(),
            }),
        }
    }
}

/// External command producing the project's artifacts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pack {
    pub command: Vec<String>,
    /// Command run with the test classpath before `command`, unless tests are skipped.
    #[serde(default)]
    pub test: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resolution {
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default = "default_file_cache")]
    pub file_cache: bool,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            fail_fast: false,
            file_cache: true,
        }
    }
}

fn default_file_cache() -> bool {
    true
}

impl Manifest {
    /// Read and parse a `kiln.toml` from the given path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, contains invalid TOML, or
    /// declares a malformed dependency.
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|e| ManifestError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            ManifestError::Syntax { source } => ManifestError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    /// Parse manifest text.
    ///
    /// # Errors
    /// Returns an error if the text is not a valid manifest.
    pub fn from_toml(content: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest =
            toml::from_str(content).map_err(|source| ManifestError::Syntax { source })?;
        if manifest.project.name.trim().is_empty() {
            return Err(ManifestError::MissingName);
        }
        for dependency in &manifest.dependencies {
            dependency.kind()?;
        }
        Ok(manifest)
    }

    /// Load `kiln.toml` from `project_dir`, or `None` when the project has no manifest.
    ///
    /// # Errors
    /// Returns an error if the manifest exists but cannot be parsed.
    pub fn load_optional(project_dir: &Path) -> Result<Option<Self>, ManifestError> {
        let path = project_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Self::from_path(&path).map(Some)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid kiln.toml at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid kiln.toml: {source}")]
    Syntax { source: toml::de::Error },
    #[error("kiln.toml: [project] name must not be empty")]
    MissingName,
    #[error("invalid [[dependency]] entry: {reason}")]
    InvalidDependency { reason: String },
}
