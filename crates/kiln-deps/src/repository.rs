//! Repository clients supplying module metadata and artifact files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::coordinate::{Coordinate, ModuleId};
use crate::error::DepsError;
use crate::version::{Version, VersionSpec};

/// A dependency declared by a module's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitiveDependency {
    pub coordinate: Coordinate,
    /// Maven scope as written (`compile` when absent).
    pub scope: String,
    pub optional: bool,
}

/// Metadata and files of one module version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub module: ModuleId,
    pub version: Version,
    pub files: Vec<PathBuf>,
    pub dependencies: Vec<TransitiveDependency>,
}

/// Source of module versions and artifacts.
pub trait RepositoryClient {
    /// Human-readable name used in diagnostics.
    fn name(&self) -> String;

    /// Every version of `module` the repository holds.
    ///
    /// # Errors
    /// Returns an error if the repository cannot be queried.
    fn versions(&self, module: &ModuleId) -> Result<Vec<Version>, DepsError>;

    /// Metadata and files of `module` at `version`, or `None` when absent.
    ///
    /// # Errors
    /// Returns an error if the repository cannot be read or holds malformed metadata.
    fn fetch(&self, module: &ModuleId, version: &Version)
        -> Result<Option<ModuleDescriptor>, DepsError>;
}

/// A directory laid out like a Maven repository:
/// `group/path/name/version/name-version.{jar,pom}`.
#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl RepositoryClient for LocalRepository {
    fn name(&self) -> String {
        self.root.display().to_string()
    }

    fn versions(&self, module: &ModuleId) -> Result<Vec<Version>, DepsError> {
        let dir = module.repository_dir(&self.root);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(kiln_util::error::UtilError::Io {
                    path: dir.display().to_string(),
                    source,
                }
                .into())
            }
        };
        let mut versions: Vec<Version> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| Version::parse(&entry.file_name().to_string_lossy()).ok())
            .collect();
        versions.sort();
        Ok(versions)
    }

    fn fetch(
        &self,
        module: &ModuleId,
        version: &Version,
    ) -> Result<Option<ModuleDescriptor>, DepsError> {
        let jar = module.artifact_path(&self.root, version, "jar");
        let pom = module.artifact_path(&self.root, version, "pom");
        trace!(module = %module, version = %version, repository = %self.root.display(), "fetching");
        if !jar.exists() && !pom.exists() {
            return Ok(None);
        }
        let dependencies = if pom.exists() {
            let text = std::fs::read_to_string(&pom).map_err(|source| {
                kiln_util::error::UtilError::Io {
                    path: pom.display().to_string(),
                    source,
                }
            })?;
            parse_pom(&text, version).map_err(|message| DepsError::InvalidMetadata {
                path: pom.display().to_string(),
                message,
            })?
        } else {
            Vec::new()
        };
        let files = if jar.exists() { vec![jar] } else { Vec::new() };
        Ok(Some(ModuleDescriptor {
            module: module.clone(),
            version: version.clone(),
            files,
            dependencies,
        }))
    }
}

/// Read the `<dependencies>` of a POM document.
///
/// `${project.version}` and properties declared in `<properties>` are substituted.
fn parse_pom(text: &str, version: &Version) -> Result<Vec<TransitiveDependency>, String> {
    let doc = roxmltree::Document::parse(text).map_err(|e| e.to_string())?;
    let project = doc.root_element();

    let mut properties: HashMap<String, String> = HashMap::new();
    properties.insert("project.version".to_owned(), version.to_string());
    if let Some(group) = child_text(project, "groupId") {
        properties.insert("project.groupId".to_owned(), group);
    }
    if let Some(declared) = child(project, "properties") {
        for property in declared.children().filter(roxmltree::Node::is_element) {
            let value = property.text().unwrap_or("").trim().to_owned();
            properties.insert(property.tag_name().name().to_owned(), value);
        }
    }
    let substitute = |raw: String| -> String {
        raw.strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
            .and_then(|key| properties.get(key).cloned())
            .unwrap_or(raw)
    };

    let Some(dependencies) = child(project, "dependencies") else {
        return Ok(Vec::new());
    };
    let mut result = Vec::new();
    for dependency in dependencies
        .children()
        .filter(|n| n.tag_name().name() == "dependency")
    {
        let group = child_text(dependency, "groupId").map(&substitute);
        let name = child_text(dependency, "artifactId").map(&substitute);
        let (Some(group), Some(name)) = (group, name) else {
            return Err("a <dependency> lacks groupId or artifactId".to_owned());
        };
        let raw = match child_text(dependency, "version").map(&substitute) {
            Some(v) => format!("{group}:{name}:{v}"),
            None => format!("{group}:{name}"),
        };
        let coordinate = Coordinate::parse(&raw).map_err(|e| e.to_string())?;
        result.push(TransitiveDependency {
            coordinate,
            scope: child_text(dependency, "scope").unwrap_or_else(|| "compile".to_owned()),
            optional: child_text(dependency, "optional").is_some_and(|o| o == "true"),
        });
    }
    Ok(result)
}

fn child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children().find(|n| n.tag_name().name() == name)
}

fn child_text(node: roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    child(node, name)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
}

/// Several repositories searched in order.
#[derive(Default)]
pub struct RepositorySet {
    repositories: Vec<Box<dyn RepositoryClient>>,
}

impl RepositorySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, repository: impl RepositoryClient + 'static) -> Self {
        self.repositories.push(Box::new(repository));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    /// The concrete version `spec` selects among all repositories.
    ///
    /// # Errors
    /// Returns an error if a repository cannot be queried.
    pub fn select_version(
        &self,
        module: &ModuleId,
        spec: &VersionSpec,
    ) -> Result<Option<Version>, DepsError> {
        if let Some(exact) = spec.exact() {
            return Ok(Some(exact.clone()));
        }
        let available = self.versions(module)?;
        Ok(spec.select(&available).cloned())
    }
}

impl RepositoryClient for RepositorySet {
    fn name(&self) -> String {
        let names: Vec<String> = self.repositories.iter().map(|r| r.name()).collect();
        names.join(", ")
    }

    fn versions(&self, module: &ModuleId) -> Result<Vec<Version>, DepsError> {
        let mut all: Vec<Version> = Vec::new();
        for repository in &self.repositories {
            for version in repository.versions(module)? {
                if !all.contains(&version) {
                    all.push(version);
                }
            }
        }
        all.sort();
        Ok(all)
    }

    fn fetch(
        &self,
        module: &ModuleId,
        version: &Version,
    ) -> Result<Option<ModuleDescriptor>, DepsError> {
        for repository in &self.repositories {
            if let Some(descriptor) = repository.fetch(module, version)? {
                return Ok(Some(descriptor));
            }
        }
        Ok(None)
    }
}
