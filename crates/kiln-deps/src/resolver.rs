//! Dependency resolution: transitive expansion, conflict resolution and caching.
//!
//! A request moves through these states:
//!
//! ```text
//! REQUESTED -> (cache hit) -> DONE
//! REQUESTED -> EXPANDING -> CONFLICT_RESOLVING -> MATERIALIZING -> DONE | FAILED
//! ```
//!
//! Expansion is breadth-first so that the first node reached for a module is
//! also the nearest one; ties go to the earlier declaration. A pinned version
//! from the dependency set's version provider overrides whatever was requested.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use tracing::{debug, trace, warn};

use crate::cache::{FileCache, KeyInputs, ResolutionKey};
use crate::coordinate::ModuleId;
use crate::error::DepsError;
use crate::model::{Dependency, DependencySet, ModuleDependency, ProjectDependency};
use crate::report::{DependencyProblem, ResolutionReport};
use crate::repository::{RepositoryClient, RepositorySet, TransitiveDependency};
use crate::scope::{ScopeGraph, RUNTIME};
use crate::tree::{DependencyTree, FileNode, ModuleNode, ResolvedNode};
use crate::version::{Version, VersionSpec};

/// Runs the build of a computed project dependency.
pub trait ProjectBuilder {
    /// Build `dependency` so that its outputs exist and are current.
    ///
    /// # Errors
    /// Returns `DepsError::ProjectCycle` when the project is already being
    /// built, or any error describing why the build failed.
    fn build(&mut self, dependency: &ProjectDependency) -> Result<(), DepsError>;
}

/// A builder for contexts where sub-builds are unavailable.
#[derive(Debug, Default)]
pub struct NoBuilds;

impl ProjectBuilder for NoBuilds {
    fn build(&mut self, dependency: &ProjectDependency) -> Result<(), DepsError> {
        Err(DepsError::ProjectBuild {
            project: dependency.project_dir.display().to_string(),
            message: "sub-builds are not available here".to_owned(),
        })
    }
}

/// Options of one resolution request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveParameters {
    /// Abort on the first module that cannot be resolved instead of
    /// collecting problems into the report.
    pub fail_on_error: bool,
}

/// States of a resolution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    Requested,
    Expanding,
    ConflictResolving,
    Materializing,
    Done,
    Failed,
}

/// Result of resolving a dependency set for one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub scope: String,
    pub tree: DependencyTree,
    /// Classpath: files of surviving nodes, deduplicated.
    pub files: Vec<PathBuf>,
    pub report: ResolutionReport,
}

/// Resolves dependency sets against repositories, with a memory cache for the
/// run and an optional file cache across runs.
pub struct DependencyResolver {
    repositories: RepositorySet,
    scopes: ScopeGraph,
    memory: HashMap<ResolutionKey, Resolution>,
    file_cache: Option<FileCache>,
    fetches: usize,
}

impl DependencyResolver {
    pub fn new(repositories: RepositorySet) -> Self {
        Self {
            repositories,
            scopes: ScopeGraph::standard(),
            memory: HashMap::new(),
            file_cache: None,
            fetches: 0,
        }
    }

    pub fn with_scopes(mut self, scopes: ScopeGraph) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_file_cache(mut self, cache: FileCache) -> Self {
        self.file_cache = Some(cache);
        self
    }

    pub fn scopes(&self) -> &ScopeGraph {
        &self.scopes
    }

    /// Number of module fetches issued to repositories so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches
    }

    /// Drop the memory cache and delete the file cache.
    ///
    /// # Errors
    /// Returns an error if the file cache directory cannot be removed.
    pub fn clear_cache(&mut self) -> Result<(), DepsError> {
        self.memory.clear();
        if let Some(cache) = &self.file_cache {
            cache.clear()?;
        }
        Ok(())
    }

    fn key(&self, scope: &str, closure: &[String], set: &DependencySet) -> ResolutionKey {
        let repositories = self.repositories.name();
        ResolutionKey::compute(&KeyInputs {
            scope,
            closure,
            dependencies: set,
            repositories: &repositories,
        })
    }

    /// Resolve `set` for `scope` into a tree and a classpath.
    ///
    /// # Errors
    /// Returns an error if the scope is unknown or cyclic, a computed project
    /// dependency cannot be built, or (with `fail_on_error`) any module fails to
    /// resolve.
    pub fn resolve(
        &mut self,
        set: &DependencySet,
        scope: &str,
        params: ResolveParameters,
        builder: &mut dyn ProjectBuilder,
    ) -> Result<Resolution, DepsError> {
        let closure = self.scopes.ancestors(scope)?;
        let key = self.key(scope, &closure, set);
        debug!(state = ?ResolutionState::Requested, %key, "resolving {scope} dependencies");

        if let Some(hit) = self.memory.get(&key) {
            debug!(state = ?ResolutionState::Done, "memory cache hit");
            if params.fail_on_error && !hit.report.is_ok() {
                return Err(DepsError::Resolution(hit.report.clone()));
            }
            return Ok(hit.clone());
        }

        let mut expansion = Expansion {
            repositories: &self.repositories,
            set,
            closure: &closure,
            params,
            arena: Vec::new(),
            report: ResolutionReport::default(),
            fetches: 0,
        };
        let outcome = expansion.run(builder);
        self.fetches += expansion.fetches;
        let roots = match outcome {
            Ok(roots) => roots,
            Err(e) => {
                debug!(state = ?ResolutionState::Failed, error = %e, "resolution failed");
                return Err(e);
            }
        };

        debug!(state = ?ResolutionState::ConflictResolving, "resolving version conflicts");
        expansion.resolve_conflicts();

        debug!(state = ?ResolutionState::Materializing, "flattening tree");
        let Expansion { arena, report, .. } = expansion;
        let tree = DependencyTree {
            roots: roots.into_iter().map(|root| build_node(&arena, root)).collect(),
        };
        let files = tree.files();
        if !report.is_ok() {
            warn!("dependency resolution for {scope} has problems\n{report}");
        }
        let resolution = Resolution {
            scope: scope.to_owned(),
            tree,
            files,
            report,
        };
        debug!(state = ?ResolutionState::Done, files = resolution.files.len(), "resolved");
        self.memory.insert(key, resolution.clone());
        Ok(resolution)
    }

    /// Resolve `set` for `scope` into a classpath, consulting the file cache.
    ///
    /// # Errors
    /// Returns the errors of [`DependencyResolver::resolve`], and an error if
    /// the file cache cannot be read or written.
    pub fn resolve_files(
        &mut self,
        set: &DependencySet,
        scope: &str,
        params: ResolveParameters,
        builder: &mut dyn ProjectBuilder,
    ) -> Result<Vec<PathBuf>, DepsError> {
        let closure = self.scopes.ancestors(scope)?;
        let key = self.key(scope, &closure, set);
        if let Some(hit) = self.memory.get(&key) {
            if !(params.fail_on_error && !hit.report.is_ok()) {
                return Ok(hit.files.clone());
            }
        }
        if let Some(cache) = &self.file_cache {
            if !has_stale_project(set, &closure)? {
                if let Some(files) = cache.load(&key)? {
                    debug!(%key, "file cache hit");
                    return Ok(files);
                }
            }
        }
        let resolution = self.resolve(set, scope, params, builder)?;
        if let Some(cache) = &self.file_cache {
            if resolution.report.is_ok() {
                cache.store(&key, &resolution.files)?;
            }
        }
        Ok(resolution.files)
    }
}

fn has_stale_project(set: &DependencySet, closure: &[String]) -> Result<bool, DepsError> {
    for entry in set.in_scopes(closure) {
        if let Dependency::Project(project) = &entry.dependency {
            if project.computed && project.is_stale()? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// A module node while the tree is being expanded.
struct PendingModule {
    module: ModuleId,
    requested: Option<VersionSpec>,
    version: Option<Version>,
    transitive: bool,
    files: Vec<PathBuf>,
    scopes: Vec<String>,
    depth: usize,
    /// Labels of the ancestors, root first.
    path: Vec<String>,
    problem: Option<String>,
    evicted: bool,
    children: Vec<usize>,
}

enum Root {
    Module(usize),
    File(FileNode),
}

struct Expansion<'a> {
    repositories: &'a RepositorySet,
    set: &'a DependencySet,
    closure: &'a [String],
    params: ResolveParameters,
    arena: Vec<PendingModule>,
    report: ResolutionReport,
    fetches: usize,
}

impl Expansion<'_> {
    fn run(&mut self, builder: &mut dyn ProjectBuilder) -> Result<Vec<Root>, DepsError> {
        debug!(state = ?ResolutionState::Expanding, scopes = ?self.closure, "expanding");
        let mut roots = Vec::new();
        let mut queue = VecDeque::new();
        let set = self.set;
        for entry in set.in_scopes(self.closure) {
            match &entry.dependency {
                Dependency::Module(module) => {
                    let idx = self.push_declared(module, &entry.scopes);
                    queue.push_back(idx);
                    roots.push(Root::Module(idx));
                }
                Dependency::Files(files) => roots.push(Root::File(FileNode {
                    files: files.files.clone(),
                    project: None,
                    computed: false,
                    scopes: entry.scopes.clone(),
                })),
                Dependency::Project(project) => {
                    self.materialize_project(project, builder)?;
                    roots.push(Root::File(FileNode {
                        files: project.outputs.clone(),
                        project: Some(project.project_dir.clone()),
                        computed: project.computed,
                        scopes: entry.scopes.clone(),
                    }));
                }
            }
        }

        let mut winners: HashMap<ModuleId, usize> = HashMap::new();
        while let Some(idx) = queue.pop_front() {
            let Some(node) = self.arena.get(idx) else {
                continue;
            };
            if winners.contains_key(&node.module) {
                continue;
            }
            winners.insert(node.module.clone(), idx);
            for child in self.expand(idx)? {
                queue.push_back(child);
            }
        }
        Ok(roots)
    }

    fn push_declared(&mut self, module: &ModuleDependency, scopes: &[String]) -> usize {
        self.arena.push(PendingModule {
            module: module.coordinate.module.clone(),
            requested: module.coordinate.version.clone(),
            version: None,
            transitive: module.transitive,
            files: Vec::new(),
            scopes: scopes.to_vec(),
            depth: 1,
            path: Vec::new(),
            problem: None,
            evicted: false,
            children: Vec::new(),
        });
        self.arena.len() - 1
    }

    /// Build a computed project if needed and check that its outputs exist.
    fn materialize_project(
        &mut self,
        project: &ProjectDependency,
        builder: &mut dyn ProjectBuilder,
    ) -> Result<(), DepsError> {
        let label = project.project_dir.display().to_string();
        if project.computed && project.is_stale()? {
            debug!(project = %label, "building computed dependency");
            match builder.build(project) {
                Ok(()) => {}
                Err(e @ DepsError::ProjectCycle { .. }) => return Err(e),
                Err(e) => return Err(single_problem(&label, e.to_string())),
            }
        }
        let missing: Vec<String> = project
            .outputs
            .iter()
            .filter(|p| !p.exists())
            .map(|p| p.display().to_string())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let reason = format!("expected output missing: {}", missing.join(", "));
        if project.computed {
            return Err(single_problem(&label, reason));
        }
        self.record(DependencyProblem {
            dependency: format!("project {label}"),
            path: Vec::new(),
            reason,
        })
    }

    /// Fetch the winning node `idx` and enqueue its transitive dependencies.
    fn expand(&mut self, idx: usize) -> Result<Vec<usize>, DepsError> {
        let Some(node) = self.arena.get(idx) else {
            return Ok(Vec::new());
        };
        let module = node.module.clone();
        let requested = node.requested.clone();
        let label = node_label(&module, requested.as_ref());

        let pinned = self.set.versions().version_of(&module).cloned();
        let spec = match (pinned, requested) {
            (Some(pin), _) => VersionSpec::Exact(pin),
            (None, Some(spec)) => spec,
            (None, None) => {
                return self.fail(idx, &label, "no version specified and none pinned".to_owned());
            }
        };

        let version = match self.repositories.select_version(&module, &spec) {
            Ok(Some(version)) => version,
            Ok(None) => {
                return self.fail(idx, &label, format!("no version matching {spec} available"));
            }
            Err(e) => return self.fail(idx, &label, e.to_string()),
        };

        self.fetches += 1;
        trace!(module = %module, version = %version, "fetch");
        let descriptor = match self.repositories.fetch(&module, &version) {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                if let Some(node) = self.arena.get_mut(idx) {
                    node.version = Some(version);
                }
                return self.fail(idx, &label, "not found in any repository".to_owned());
            }
            Err(e) => return self.fail(idx, &label, e.to_string()),
        };

        let (transitive, depth, scopes, mut path) = match self.arena.get_mut(idx) {
            Some(node) => {
                node.version = Some(version.clone());
                node.files = descriptor.files.clone();
                (node.transitive, node.depth, node.scopes.clone(), node.path.clone())
            }
            None => return Ok(Vec::new()),
        };
        if !transitive {
            return Ok(Vec::new());
        }
        path.push(format!("{module}:{version}"));

        let mut children = Vec::new();
        for dependency in descriptor
            .dependencies
            .iter()
            .filter(|d| follows(d, self.closure))
        {
            self.arena.push(PendingModule {
                module: dependency.coordinate.module.clone(),
                requested: dependency.coordinate.version.clone(),
                version: None,
                transitive: true,
                files: Vec::new(),
                scopes: scopes.clone(),
                depth: depth + 1,
                path: path.clone(),
                problem: None,
                evicted: false,
                children: Vec::new(),
            });
            children.push(self.arena.len() - 1);
        }
        if let Some(node) = self.arena.get_mut(idx) {
            node.children.clone_from(&children);
        }
        Ok(children)
    }

    fn fail(&mut self, idx: usize, label: &str, reason: String) -> Result<Vec<usize>, DepsError> {
        let path = match self.arena.get_mut(idx) {
            Some(node) => {
                node.problem = Some(reason.clone());
                node.path.clone()
            }
            None => Vec::new(),
        };
        self.record(DependencyProblem {
            dependency: label.to_owned(),
            path,
            reason,
        })?;
        Ok(Vec::new())
    }

    fn record(&mut self, problem: DependencyProblem) -> Result<(), DepsError> {
        if self.params.fail_on_error {
            let mut report = ResolutionReport::default();
            report.push(problem);
            return Err(DepsError::Resolution(report));
        }
        self.report.push(problem);
        Ok(())
    }

    /// Mark every node that is not the first one reached for its module as evicted.
    fn resolve_conflicts(&mut self) {
        let mut winners: HashMap<ModuleId, usize> = HashMap::new();
        let mut order: Vec<usize> = (0..self.arena.len()).collect();
        // Stable sort keeps declaration order among nodes of equal depth.
        order.sort_by_key(|idx| self.arena.get(*idx).map_or(usize::MAX, |n| n.depth));
        for idx in order {
            let Some(node) = self.arena.get(idx) else {
                continue;
            };
            if let Some(winner) = winners.get(&node.module).copied() {
                let winner_version = self.arena.get(winner).and_then(|w| w.version.clone());
                if let Some(loser) = self.arena.get_mut(idx) {
                    loser.evicted = true;
                    loser.version = winner_version;
                    loser.files.clear();
                    loser.children.clear();
                }
            } else {
                winners.insert(node.module.clone(), idx);
            }
        }
    }
}

/// Whether a dependency from module metadata is followed for `closure`.
fn follows(dependency: &TransitiveDependency, closure: &[String]) -> bool {
    if dependency.optional {
        return false;
    }
    match dependency.scope.as_str() {
        "compile" => true,
        "runtime" => closure.iter().any(|s| s == RUNTIME),
        _ => false,
    }
}

fn node_label(module: &ModuleId, requested: Option<&VersionSpec>) -> String {
    match requested {
        Some(spec) => format!("{module}:{spec}"),
        None => module.to_string(),
    }
}

fn single_problem(project: &str, reason: String) -> DepsError {
    let mut report = ResolutionReport::default();
    report.push(DependencyProblem {
        dependency: format!("project {project}"),
        path: Vec::new(),
        reason,
    });
    DepsError::Resolution(report)
}

fn build_node(arena: &[PendingModule], root: Root) -> ResolvedNode {
    match root {
        Root::File(file) => ResolvedNode::File(file),
        Root::Module(idx) => build_module(arena, idx),
    }
}

fn build_module(arena: &[PendingModule], idx: usize) -> ResolvedNode {
    let Some(node) = arena.get(idx) else {
        return ResolvedNode::Module(ModuleNode {
            module: ModuleId::new("", ""),
            requested: None,
            version: None,
            files: Vec::new(),
            evicted: true,
            scopes: Vec::new(),
            depth: 0,
            problem: None,
            children: Vec::new(),
        });
    };
    ResolvedNode::Module(ModuleNode {
        module: node.module.clone(),
        requested: node.requested.as_ref().map(ToString::to_string),
        version: node.version.clone(),
        files: node.files.clone(),
        evicted: node.evicted,
        scopes: node.scopes.clone(),
        depth: node.depth,
        problem: node.problem.clone(),
        children: node
            .children
            .iter()
            .map(|child| build_module(arena, *child))
            .collect(),
    })
}
