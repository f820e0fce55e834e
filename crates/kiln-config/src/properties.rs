//! Layered key/value configuration.
//!
//! Layers are stacked from lowest to highest precedence: the global
//! `~/.kiln/global.properties`, the project's `kiln.properties`, environment
//! variables, then `-Dkey=value` arguments. A lookup returns the value of the
//! highest layer defining the key, with `${other.key}` references expanded.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::debug;

/// File name of the per-project properties.
pub const PROJECT_PROPERTIES_FILE: &str = "kiln.properties";

/// File name of the global properties inside the Kiln home directory.
pub const GLOBAL_PROPERTIES_FILE: &str = "global.properties";

const MAX_INTERPOLATION_DEPTH: usize = 8;

const SENSITIVE_SUFFIXES: &[&str] = &["password", "secret", "token", "pwd"];

/// One named layer of properties.
#[derive(Debug, Clone, Default)]
pub struct PropertyLayer {
    name: String,
    values: BTreeMap<String, String>,
}

impl PropertyLayer {
    /// Create an empty layer.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            values: BTreeMap::new(),
        }
    }

    /// Create a layer holding `values`.
    pub fn from_map(name: &str, values: BTreeMap<String, String>) -> Self {
        Self {
            name: name.to_owned(),
            values,
        }
    }

    /// Parse the text of a properties file.
    ///
    /// Lines are `key=value` or `key: value`; `#` and `!` start comments; a
    /// trailing `\` continues the value on the next line.
    pub fn parse(name: &str, text: &str) -> Self {
        let mut layer = Self::new(name);
        let mut pending = String::new();
        for raw in text.lines() {
            let line = raw.trim_start();
            if pending.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
                continue;
            }
            if let Some(head) = continued(line) {
                pending.push_str(head);
                continue;
            }
            pending.push_str(line);
            layer.insert_line(&pending);
            pending.clear();
        }
        if !pending.is_empty() {
            layer.insert_line(&pending);
        }
        layer
    }

    /// Read a properties file. A missing file yields an empty layer.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read.
    pub fn from_file(name: &str, path: &Path) -> Result<Self, PropertiesError> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                debug!(path = %path.display(), "loading properties");
                Ok(Self::parse(name, &text))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new(name)),
            Err(source) => Err(PropertiesError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Build a layer from environment-style variables.
    ///
    /// Each variable is visible under its raw name and under its lower-case
    /// dotted form, so `KILN_KBEAN_DEFAULT` also answers `kiln.kbean.default`.
    pub fn from_vars(name: &str, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut layer = Self::new(name);
        for (key, value) in vars {
            let dotted = key.to_lowercase().replace('_', ".");
            if dotted != key {
                layer.values.insert(dotted, value.clone());
            }
            layer.values.insert(key, value);
        }
        layer
    }

    /// Snapshot the process environment as a layer.
    pub fn environment() -> Self {
        Self::from_vars("environment", std::env::vars())
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_owned(), value.to_owned());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn insert_line(&mut self, line: &str) {
        let split = line.find(['=', ':']);
        let (key, value) = match split {
            Some(idx) => (line.get(..idx).unwrap_or(line), line.get(idx + 1..).unwrap_or("")),
            None => (line, ""),
        };
        let key = key.trim();
        if !key.is_empty() {
            self.values.insert(key.to_owned(), value.trim().to_owned());
        }
    }
}

/// Return the line without its continuation backslash, if it has one.
fn continued(line: &str) -> Option<&str> {
    let trailing = line.chars().rev().take_while(|c| *c == '\\').count();
    if trailing % 2 == 1 {
        line.strip_suffix('\\')
    } else {
        None
    }
}

/// Layered properties, lowest precedence first.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    layers: Vec<PropertyLayer>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `layer` on top of the existing ones.
    pub fn with_layer(mut self, layer: PropertyLayer) -> Self {
        self.push_layer(layer);
        self
    }

    pub fn push_layer(&mut self, layer: PropertyLayer) {
        self.layers.push(layer);
    }

    /// Assemble the standard layers for a project.
    ///
    /// `kiln_home` is `None` when no home directory is available, in which case
    /// the global layer is empty.
    ///
    /// # Errors
    /// Returns an error if a properties file exists but cannot be read.
    pub fn load(
        kiln_home: Option<&Path>,
        project_dir: &Path,
        cli: BTreeMap<String, String>,
    ) -> Result<Self, PropertiesError> {
        let global = match kiln_home {
            Some(home) => PropertyLayer::from_file("global", &home.join(GLOBAL_PROPERTIES_FILE))?,
            None => PropertyLayer::new("global"),
        };
        let project =
            PropertyLayer::from_file("project", &project_dir.join(PROJECT_PROPERTIES_FILE))?;
        Ok(Self::new()
            .with_layer(global)
            .with_layer(project)
            .with_layer(PropertyLayer::environment())
            .with_layer(PropertyLayer::from_map("command line", cli)))
    }

    /// Value of `key` with `${...}` references expanded.
    pub fn get(&self, key: &str) -> Option<String> {
        self.get_raw(key)
            .map(|value| self.interpolate(value, MAX_INTERPOLATION_DEPTH))
    }

    /// Value of `key` as written, without interpolation.
    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.layers.iter().rev().find_map(|layer| layer.get(key))
    }

    /// Name of the layer that supplies `key`.
    pub fn source_of(&self, key: &str) -> Option<&str> {
        self.layers
            .iter()
            .rev()
            .find(|layer| layer.get(key).is_some())
            .map(PropertyLayer::name)
    }

    /// Interpret `key` as a boolean (`true`, case-insensitive).
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn keys(&self) -> BTreeSet<&str> {
        self.layers
            .iter()
            .flat_map(|layer| layer.values.keys().map(String::as_str))
            .collect()
    }

    /// All effective entries whose key starts with `prefix`.
    ///
    /// With `keep_prefix == false` the prefix is stripped from the returned
    /// keys, so `all_starting_with("@project.", false)` maps
    /// `@project.layout.style` to `layout.style`.
    pub fn all_starting_with(&self, prefix: &str, keep_prefix: bool) -> BTreeMap<String, String> {
        self.keys()
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .filter_map(|key| {
                let value = self.get(key)?;
                let name = if keep_prefix {
                    key
                } else {
                    key.strip_prefix(prefix).unwrap_or(key)
                };
                Some((name.to_owned(), value))
            })
            .collect()
    }

    /// Whether the value of `key` must not be displayed.
    pub fn is_sensitive(key: &str) -> bool {
        let lower = key.to_lowercase();
        SENSITIVE_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
    }

    /// Value suitable for logs: sensitive keys are masked.
    pub fn display_value(key: &str, value: &str) -> String {
        if Self::is_sensitive(key) {
            "***".to_owned()
        } else {
            value.to_owned()
        }
    }

    fn interpolate(&self, value: &str, depth: usize) -> String {
        if depth == 0 || !value.contains("${") {
            return value.to_owned();
        }
        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(start) = rest.find("${") {
            let (before, after) = rest.split_at(start);
            out.push_str(before);
            let body = after.get(2..).unwrap_or("");
            let Some(end) = body.find('}') else {
                out.push_str(after);
                return out;
            };
            let name = body.get(..end).unwrap_or("");
            match self.get_raw(name) {
                Some(found) => out.push_str(&self.interpolate(found, depth - 1)),
                None => {
                    out.push_str("${");
                    out.push_str(name);
                    out.push('}');
                }
            }
            rest = body.get(end + 1..).unwrap_or("");
        }
        out.push_str(rest);
        out
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PropertiesError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn layer(name: &str, entries: &[(&str, &str)]) -> PropertyLayer {
        let mut layer = PropertyLayer::new(name);
        for (k, v) in entries {
            layer.insert(k, v);
        }
        layer
    }

    #[test]
    fn parse_separators_comments_and_continuations() {
        let layer = PropertyLayer::parse(
            "project",
            "# comment\n! also comment\n\n@project.layout.style=SIMPLE\nrepo: http://host/x\nlist=a,\\\n    b,\\\n    c\nflag\n",
        );
        assert_eq!(layer.get("@project.layout.style"), Some("SIMPLE"));
        assert_eq!(layer.get("repo"), Some("http://host/x"));
        assert_eq!(layer.get("list"), Some("a,b,c"));
        assert_eq!(layer.get("flag"), Some(""));
        assert_eq!(layer.len(), 4);
    }

    #[test]
    fn escaped_backslash_does_not_continue() {
        let layer = PropertyLayer::parse("p", "path=c:\\\\\nnext=1\n");
        assert_eq!(layer.get("next"), Some("1"));
    }

    #[test]
    fn later_layers_shadow_earlier_ones() {
        let props = Properties::new()
            .with_layer(layer("global", &[("a", "global"), ("b", "global")]))
            .with_layer(layer("project", &[("a", "project")]))
            .with_layer(layer("command line", &[("a", "cli")]));
        assert_eq!(props.get("a").as_deref(), Some("cli"));
        assert_eq!(props.get("b").as_deref(), Some("global"));
        assert_eq!(props.source_of("a"), Some("command line"));
        assert_eq!(props.get("missing"), None);
    }

    #[test]
    fn interpolation_resolves_across_layers() {
        let props = Properties::new()
            .with_layer(layer("global", &[("repo.root", "/srv/repo")]))
            .with_layer(layer("project", &[("repo.libs", "${repo.root}/libs"), ("x", "${nope}")]));
        assert_eq!(props.get("repo.libs").as_deref(), Some("/srv/repo/libs"));
        assert_eq!(props.get("x").as_deref(), Some("${nope}"));
    }

    #[test]
    fn self_reference_terminates() {
        let props = Properties::new().with_layer(layer("p", &[("loop", "a${loop}")]));
        let value = props.get("loop").unwrap();
        assert!(value.starts_with("aaaa"));
    }

    #[test]
    fn all_starting_with_strips_prefix() {
        let props = Properties::new()
            .with_layer(layer("project", &[("@project.layout.style", "SIMPLE"), ("@quality.maxEvictions", "2")]))
            .with_layer(layer("command line", &[("@project.version", "2.0")]));
        let project = props.all_starting_with("@project.", false);
        assert_eq!(project.len(), 2);
        assert_eq!(project.get("layout.style").map(String::as_str), Some("SIMPLE"));
        assert_eq!(project.get("version").map(String::as_str), Some("2.0"));
        let kept = props.all_starting_with("@quality.", true);
        assert!(kept.contains_key("@quality.maxEvictions"));
    }

    #[test]
    fn environment_keys_visible_dotted() {
        let layer = PropertyLayer::from_vars(
            "environment",
            vec![("KILN_KBEAN_DEFAULT".to_owned(), "quality".to_owned())],
        );
        assert_eq!(layer.get("KILN_KBEAN_DEFAULT"), Some("quality"));
        assert_eq!(layer.get("kiln.kbean.default"), Some("quality"));
    }

    #[test]
    fn sensitive_keys_masked() {
        assert!(Properties::is_sensitive("repo.publish.password"));
        assert!(Properties::is_sensitive("GITHUB_TOKEN"));
        assert!(!Properties::is_sensitive("project.version"));
        assert_eq!(Properties::display_value("db.pwd", "hunter2"), "***");
        assert_eq!(Properties::display_value("db.user", "admin"), "admin");
    }

    #[test]
    fn load_layers_files_and_cli() {
        let home = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join(GLOBAL_PROPERTIES_FILE), "a=global\nb=global\n").unwrap();
        std::fs::write(project.path().join(PROJECT_PROPERTIES_FILE), "a=project\n").unwrap();
        let mut cli = BTreeMap::new();
        cli.insert("b".to_owned(), "cli".to_owned());

        let props = Properties::load(Some(home.path()), project.path(), cli).unwrap();
        assert_eq!(props.get("a").as_deref(), Some("project"));
        assert_eq!(props.get("b").as_deref(), Some("cli"));
    }

    #[test]
    fn load_without_files() {
        let project = tempfile::tempdir().unwrap();
        let props = Properties::load(None, project.path(), BTreeMap::new()).unwrap();
        assert_eq!(props.get("@project.version"), None);
    }

    proptest! {
        #[test]
        fn parse_never_panics(text in ".*") {
            let _ = PropertyLayer::parse("fuzz", &text);
        }

        #[test]
        fn interpolation_never_panics(value in ".*") {
            let props = Properties::new().with_layer(layer("p", &[("k", value.as_str())]));
            let _ = props.get("k");
        }
    }
}
