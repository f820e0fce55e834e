#![forbid(unsafe_code)]
//! Bean registry, command-line binding and run orchestration for Kiln.

pub mod behavior;
pub mod bean;
pub mod binder;
pub mod builtins;
pub mod commandline;
pub mod context;
pub mod engine;
pub mod error;
pub mod registry;
mod suggest;

pub use behavior::BehaviorSettings;
pub use bean::{BeanEnum, BeanSchema, FieldKind, KBean, MemberTable, Value};
pub use builtins::{LayoutStyle, ProjectKBean, QualityKBean};
pub use commandline::{ActionKind, ContextGroup, KBeanAction};
pub use context::RunContext;
pub use engine::{Engine, PreparedRun};
pub use error::EngineError;
pub use registry::{BeanCatalog, BeanDescriptor, BeanOrigin, KBeanResolution};
