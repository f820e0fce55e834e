#![forbid(unsafe_code)]
//! Parse `kiln.toml` and the layered `kiln.properties` configuration.

pub mod manifest;
pub mod properties;

pub use manifest::{DependencySpec, Manifest};
pub use properties::Properties;
