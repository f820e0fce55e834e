//! Immutable dependency values and the ordered dependency set.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use kiln_util::fs::{expand_glob, newest_modification, oldest_modification};
use kiln_util::hash::digest_parts;

use crate::coordinate::{Coordinate, ModuleId};
use crate::error::DepsError;
use crate::scope::{COMPILE, RUNTIME};
use crate::version::Version;

/// A module published in a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDependency {
    pub coordinate: Coordinate,
    /// Whether the module's own dependencies are pulled in.
    pub transitive: bool,
}

/// Files used as they are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDependency {
    pub files: Vec<PathBuf>,
}

/// The output of another kiln project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDependency {
    /// Root directory of the referenced project.
    pub project_dir: PathBuf,
    /// Files the project produces, absolute.
    pub outputs: Vec<PathBuf>,
    /// When true, the project is built before its outputs are used.
    pub computed: bool,
    /// Arguments of the sub-build.
    pub build_args: Vec<String>,
    /// Globs, relative to `project_dir`, whose changes make the outputs stale.
    pub sources: Vec<String>,
}

pub const DEFAULT_BUILD_ARGS: &[&str] = &["project:", "pack"];
pub const DEFAULT_SOURCES: &[&str] = &["src/**/*", "kiln.toml"];

impl ProjectDependency {
    /// A computed dependency on `project_dir` producing `outputs`.
    pub fn computed(project_dir: PathBuf, outputs: Vec<PathBuf>) -> Self {
        Self {
            project_dir,
            outputs,
            computed: true,
            build_args: DEFAULT_BUILD_ARGS.iter().map(|s| (*s).to_owned()).collect(),
            sources: DEFAULT_SOURCES.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    /// Whether an output is missing or older than the newest source file.
    ///
    /// # Errors
    /// Returns an error if a source pattern is not a valid glob.
    pub fn is_stale(&self) -> Result<bool, DepsError> {
        let Some(oldest_output) = oldest_modification(&self.outputs) else {
            return Ok(true);
        };
        let mut sources = Vec::new();
        for pattern in &self.sources {
            sources.extend(expand_glob(&self.project_dir, pattern)?);
        }
        Ok(newest_modification(&sources).is_some_and(|newest| newest > oldest_output))
    }

    /// Whether every declared output exists.
    pub fn outputs_present(&self) -> bool {
        self.outputs.iter().all(|p| p.exists())
    }
}

/// One declared dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    Module(ModuleDependency),
    Files(FileDependency),
    Project(ProjectDependency),
}

impl Dependency {
    /// A transitive module dependency from a coordinate string.
    ///
    /// # Errors
    /// Returns an error if the coordinate is malformed.
    pub fn module(coordinate: &str) -> Result<Self, DepsError> {
        Ok(Self::Module(ModuleDependency {
            coordinate: Coordinate::parse(coordinate)?,
            transitive: true,
        }))
    }

    pub fn files(files: Vec<PathBuf>) -> Self {
        Self::Files(FileDependency { files })
    }

    /// Key under which duplicate declarations collapse.
    pub fn identity(&self) -> String {
        match self {
            Self::Module(m) => format!("module:{}", m.coordinate.module),
            Self::Files(f) => {
                let paths: Vec<String> = f.files.iter().map(|p| p.display().to_string()).collect();
                format!("files:{}", paths.join(","))
            }
            Self::Project(p) => format!("project:{}", p.project_dir.display()),
        }
    }

    fn fingerprint(&self) -> String {
        match self {
            Self::Module(m) => format!("{}|transitive={}", m.coordinate, m.transitive),
            Self::Files(_) => self.identity(),
            Self::Project(p) => {
                let outputs: Vec<String> = p.outputs.iter().map(|o| o.display().to_string()).collect();
                format!(
                    "{}|outputs={}|computed={}|build={}",
                    self.identity(),
                    outputs.join(","),
                    p.computed,
                    p.build_args.join(" ")
                )
            }
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module(m) => write!(f, "{}", m.coordinate),
            Self::Files(files) => {
                let paths: Vec<String> =
                    files.files.iter().map(|p| p.display().to_string()).collect();
                write!(f, "files [{}]", paths.join(", "))
            }
            Self::Project(p) => write!(f, "project {}", p.project_dir.display()),
        }
    }
}

/// Pinned module versions that override whatever version is declared or reached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionProvider {
    pins: BTreeMap<ModuleId, Version>,
}

impl VersionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pin(&mut self, module: ModuleId, version: Version) {
        self.pins.insert(module, version);
    }

    /// Builder form of [`VersionProvider::pin`].
    pub fn and(mut self, module: ModuleId, version: Version) -> Self {
        self.pin(module, version);
        self
    }

    pub fn version_of(&self, module: &ModuleId) -> Option<&Version> {
        self.pins.get(module)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ModuleId, &Version)> {
        self.pins.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

/// A dependency together with the scopes it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedDependency {
    pub dependency: Dependency,
    pub scopes: Vec<String>,
}

/// Ordered dependency declarations with version pins.
///
/// Declaring the same module (or the same files or project) twice keeps the
/// first position, takes the later declaration, and merges the scopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySet {
    entries: Vec<ScopedDependency>,
    versions: VersionProvider,
    default_scopes: Vec<String>,
}

impl Default for DependencySet {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            versions: VersionProvider::new(),
            default_scopes: vec![COMPILE.to_owned(), RUNTIME.to_owned()],
        }
    }
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scopes assigned to dependencies declared without any.
    pub fn with_default_scopes(mut self, scopes: &[&str]) -> Self {
        self.default_scopes = scopes.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    pub fn with_versions(mut self, versions: VersionProvider) -> Self {
        self.versions = versions;
        self
    }

    /// Builder form of [`DependencySet::add`].
    pub fn and(mut self, dependency: Dependency, scopes: &[&str]) -> Self {
        let scopes: Vec<String> = scopes.iter().map(|s| (*s).to_owned()).collect();
        self.add(dependency, &scopes);
        self
    }

    /// Declare `dependency` in `scopes` (the default scopes when empty).
    pub fn add(&mut self, dependency: Dependency, scopes: &[String]) {
        let scopes = if scopes.is_empty() {
            self.default_scopes.clone()
        } else {
            scopes.to_vec()
        };
        let identity = dependency.identity();
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.dependency.identity() == identity)
        {
            existing.dependency = dependency;
            for scope in scopes {
                if !existing.scopes.contains(&scope) {
                    existing.scopes.push(scope);
                }
            }
            return;
        }
        self.entries.push(ScopedDependency { dependency, scopes });
    }

    pub fn entries(&self) -> &[ScopedDependency] {
        &self.entries
    }

    pub fn versions(&self) -> &VersionProvider {
        &self.versions
    }

    pub fn versions_mut(&mut self) -> &mut VersionProvider {
        &mut self.versions
    }

    /// Declarations belonging to at least one scope of `closure`, in order.
    pub fn in_scopes<'a>(
        &'a self,
        closure: &'a [String],
    ) -> impl Iterator<Item = &'a ScopedDependency> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.scopes.iter().any(|s| closure.contains(s)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stable hash over declarations, scopes and pins.
    pub fn content_hash(&self) -> String {
        let mut parts: Vec<String> = self
            .entries
            .iter()
            .map(|e| format!("dep|{}|{}", e.dependency.fingerprint(), e.scopes.join(",")))
            .collect();
        parts.extend(
            self.versions
                .iter()
                .map(|(module, version)| format!("pin|{module}={version}")),
        );
        digest_parts(&parts)
    }
}
