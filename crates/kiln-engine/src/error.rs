//! Error types for kiln-engine.

use kiln_config::manifest::ManifestError;
use kiln_config::properties::PropertiesError;
use kiln_deps::DepsError;
use kiln_util::error::UtilError;

/// Errors produced while parsing, binding or running beans.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A `-` behavior flag is not recognized.
    #[error("unknown flag `{flag}`")]
    UnknownFlag { flag: String },

    /// A command-line token cannot be turned into an action.
    #[error("malformed argument `{token}`: {reason}")]
    MalformedAction { token: String, reason: String },

    /// No registered bean answers to the given name.
    #[error("no bean named `{name}`{hint}")]
    UnresolvedBean { name: String, hint: String },

    /// A bean name matches more than one bean.
    #[error("bean name `{name}` is ambiguous, candidates: {candidates}")]
    AmbiguousBean { name: String, candidates: String },

    /// Actions were given before any `name:` switch and no default bean exists.
    #[error("`{token}` has no target bean, prefix it with `<bean>:`")]
    NoDefaultBean { token: String },

    /// A bean has no field or method with the given name.
    #[error("bean `{bean}` has no member `{member}`{hint}")]
    UnknownMember {
        bean: String,
        member: String,
        hint: String,
    },

    /// A value cannot be converted to the type of its field.
    #[error("invalid value `{value}` for `{bean}.{member}`: expected {expected}")]
    InvalidValue {
        bean: String,
        member: String,
        value: String,
        expected: String,
    },

    /// Beans load each other during construction.
    #[error("bean cycle: {cycle}")]
    BeanCycle { cycle: String },

    /// A bean was requested while one of its own methods or hooks was running.
    #[error("bean `{bean}` is in use and cannot be borrowed again")]
    BeanBusy { bean: String },

    /// A bean method returned an error.
    #[error("{bean}#{method} failed: {source}")]
    MethodFailed {
        bean: String,
        method: String,
        #[source]
        source: Box<EngineError>,
    },

    /// A bean reported a failure of its own.
    #[error("{bean}: {message}")]
    Bean { bean: String, message: String },

    /// The project manifest could not be loaded.
    #[error("{0}")]
    Manifest(#[from] ManifestError),

    /// A properties file could not be loaded.
    #[error("{0}")]
    Properties(#[from] PropertiesError),

    /// Dependency modelling or resolution failed.
    #[error("{0}")]
    Deps(#[from] DepsError),

    /// A utility operation (I/O, process) failed.
    #[error("{0}")]
    Util(#[from] UtilError),
}

impl EngineError {
    /// Shorthand for [`EngineError::Bean`].
    pub fn bean(bean: &str, message: impl Into<String>) -> Self {
        Self::Bean {
            bean: bean.to_owned(),
            message: message.into(),
        }
    }
}
