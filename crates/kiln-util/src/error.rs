/// Failures of the filesystem, glob and process helpers.
#[derive(Debug, thiserror::Error)]
pub enum UtilError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid glob pattern `{pattern}`: {message}")]
    GlobPattern { pattern: String, message: String },

    #[error("cannot start `{program}` in {dir}: {source}")]
    Spawn {
        program: String,
        dir: String,
        source: std::io::Error,
    },

    #[error("cannot run an empty command line")]
    EmptyCommand,

    /// `~/` paths and the global properties file need it.
    #[error("cannot determine home directory, set the HOME environment variable")]
    NoHomeDir,
}
