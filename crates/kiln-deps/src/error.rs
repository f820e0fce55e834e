//! Error types for kiln-deps.

use kiln_util::error::UtilError;

use crate::report::ResolutionReport;

/// Errors produced while modelling or resolving dependencies.
#[derive(Debug, thiserror::Error)]
pub enum DepsError {
    /// A `group:name[:version]` string is malformed.
    #[error("invalid module coordinate \"{coordinate}\": {reason}")]
    InvalidCoordinate { coordinate: String, reason: String },

    /// A version or version range is malformed.
    #[error("invalid version \"{version}\": {reason}")]
    InvalidVersion { version: String, reason: String },

    /// A scope name is not defined.
    #[error("unknown scope `{scope}` (known scopes: {known})")]
    UnknownScope { scope: String, known: String },

    /// Scope inheritance loops back on itself.
    #[error("scope inheritance cycle: {cycle}")]
    ScopeCycle { cycle: String },

    /// Project dependencies loop back on a project already being built.
    #[error("project dependency cycle: {cycle}")]
    ProjectCycle { cycle: String },

    /// A manifest `[[dependency]]` entry cannot be turned into a dependency.
    #[error("invalid dependency declaration: {reason}")]
    InvalidDeclaration { reason: String },

    /// One or more dependencies could not be resolved.
    #[error("dependency resolution failed\n{0}")]
    Resolution(ResolutionReport),

    /// A sub-build for a computed project dependency failed.
    #[error("build of {project} failed: {message}")]
    ProjectBuild { project: String, message: String },

    /// Module metadata (a POM file) is malformed.
    #[error("invalid module metadata {path}: {message}")]
    InvalidMetadata { path: String, message: String },

    /// A cache entry could not be read or written.
    #[error("dependency cache entry {path} is unusable: {message}")]
    Cache { path: String, message: String },

    /// A utility operation (I/O, globbing) failed.
    #[error("{0}")]
    Util(#[from] UtilError),
}
