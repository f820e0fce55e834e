//! Build the dependency model from a `kiln.toml` manifest.

use std::path::Path;

use kiln_config::manifest::{DependencyKind, DependencySpec, Manifest};
use kiln_util::fs::{expand_glob, resolve_path};

use crate::coordinate::{Coordinate, ModuleId};
use crate::error::DepsError;
use crate::model::{
    Dependency, DependencySet, FileDependency, ModuleDependency, ProjectDependency,
    VersionProvider, DEFAULT_BUILD_ARGS, DEFAULT_SOURCES,
};
use crate::repository::{LocalRepository, RepositorySet};
use crate::scope::ScopeGraph;
use crate::version::Version;

/// The standard scopes plus the manifest's `[scopes]`, validated.
///
/// # Errors
/// Returns an error if a scope extends an unknown scope or inheritance loops.
pub fn scope_graph(manifest: &Manifest) -> Result<ScopeGraph, DepsError> {
    let mut graph = ScopeGraph::standard();
    for (name, parents) in &manifest.scopes {
        graph.define(name, parents);
    }
    graph.validate()?;
    Ok(graph)
}

/// The manifest's `repositories`, resolved against `root`.
///
/// # Errors
/// Returns an error if a `~/` path is used and no home directory is known.
pub fn repositories(manifest: &Manifest, root: &Path) -> Result<RepositorySet, DepsError> {
    let mut set = RepositorySet::new();
    for raw in &manifest.repositories {
        set = set.with(LocalRepository::new(resolve_path(root, raw)?));
    }
    Ok(set)
}

/// The manifest's `[[dependency]]` entries and `[versions]` pins.
///
/// File patterns and project paths are resolved against `root`.
///
/// # Errors
/// Returns an error if an entry is malformed, names an unknown scope, or a
/// pin is not a valid `group:name` / version pair.
pub fn dependency_set(
    manifest: &Manifest,
    root: &Path,
    scopes: &ScopeGraph,
) -> Result<DependencySet, DepsError> {
    let mut versions = VersionProvider::new();
    for (module, version) in &manifest.versions {
        versions.pin(ModuleId::parse(module)?, Version::parse(version)?);
    }
    let mut set = DependencySet::new().with_versions(versions);
    for spec in &manifest.dependencies {
        for scope in &spec.scope {
            if !scopes.contains(scope) {
                return Err(DepsError::UnknownScope {
                    scope: scope.clone(),
                    known: scopes.names().collect::<Vec<_>>().join(", "),
                });
            }
        }
        set.add(dependency(spec, root)?, &spec.scope);
    }
    Ok(set)
}

fn dependency(spec: &DependencySpec, root: &Path) -> Result<Dependency, DepsError> {
    let kind = spec.kind().map_err(|e| DepsError::InvalidDeclaration {
        reason: e.to_string(),
    })?;
    match kind {
        DependencyKind::Module => {
            let raw = spec.module.as_deref().unwrap_or_default();
            Ok(Dependency::Module(ModuleDependency {
                coordinate: Coordinate::parse(raw)?,
                transitive: spec.transitive.unwrap_or(true),
            }))
        }
        DependencyKind::Files => {
            let mut files = Vec::new();
            for pattern in &spec.files {
                files.extend(expand_glob(root, pattern)?);
            }
            Ok(Dependency::Files(FileDependency { files }))
        }
        DependencyKind::Project => {
            let raw = spec.project.as_deref().unwrap_or_default();
            let project_dir = resolve_path(root, raw)?;
            if spec.outputs.is_empty() {
                return Err(DepsError::InvalidDeclaration {
                    reason: format!("project dependency `{raw}` declares no outputs"),
                });
            }
            let mut outputs = Vec::new();
            for output in &spec.outputs {
                outputs.push(resolve_path(&project_dir, output)?);
            }
            let owned = |values: &[String], default: &[&str]| -> Vec<String> {
                if values.is_empty() {
                    default.iter().map(|s| (*s).to_owned()).collect()
                } else {
                    values.to_vec()
                }
            };
            Ok(Dependency::Project(ProjectDependency {
                outputs,
                computed: spec.computed.unwrap_or(true),
                build_args: owned(&spec.build, DEFAULT_BUILD_ARGS),
                sources: owned(&spec.sources, DEFAULT_SOURCES),
                project_dir,
            }))
        }
    }
}
