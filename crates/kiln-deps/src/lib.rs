#![forbid(unsafe_code)]
//! Dependency model and resolution for Kiln.
//!
//! A [`DependencySet`] declares module, file and project dependencies per scope.
//! The [`DependencyResolver`] expands it for one scope into a [`DependencyTree`],
//! evicts conflicting module versions and flattens the survivors into a classpath.

pub mod cache;
pub mod coordinate;
pub mod error;
pub mod manifest;
pub mod model;
pub mod report;
pub mod repository;
pub mod resolver;
pub mod scope;
pub mod tree;
pub mod version;

pub use coordinate::{Coordinate, ModuleId};
pub use error::DepsError;
pub use model::{
    Dependency, DependencySet, FileDependency, ModuleDependency, ProjectDependency,
    VersionProvider,
};
pub use report::{DependencyProblem, ResolutionReport};
pub use repository::{LocalRepository, ModuleDescriptor, RepositoryClient, RepositorySet};
pub use resolver::{DependencyResolver, ProjectBuilder, Resolution, ResolveParameters};
pub use scope::ScopeGraph;
pub use tree::{DependencyTree, FileNode, ModuleNode, ResolvedNode};
pub use version::{Version, VersionSpec};
