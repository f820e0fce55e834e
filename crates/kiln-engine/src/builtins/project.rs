//! The `project` bean: dependencies, classpath and packaging of the current project.

use std::path::{Path, PathBuf};

use kiln_config::Manifest;
use kiln_deps::scope::{COMPILE, TEST};
use kiln_deps::{DependencySet, ResolveParameters};
use kiln_util::fs::{remove_if_exists, resolve_path};
use tracing::debug;

use crate::bean::{BeanEnum, BeanSchema, KBean};
use crate::context::RunContext;
use crate::error::EngineError;

/// Environment variable carrying the classpath to pack and test commands.
pub const CLASSPATH_ENV: &str = "KILN_CLASSPATH";

const BEAN: &str = "project";

/// Source layout of the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutStyle {
    /// Sources directly under `src/`.
    Simple,
    /// `src/main/java`, `src/test/java`.
    Maven,
}

impl BeanEnum for LayoutStyle {
    const CONSTANTS: &'static [(&'static str, Self)] = &[("SIMPLE", Self::Simple), ("MAVEN", Self::Maven)];
}

impl LayoutStyle {
    pub fn source_dir(self) -> &'static str {
        match self {
            Self::Simple => "src",
            Self::Maven => "src/main/java",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub style: LayoutStyle,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            style: LayoutStyle::Maven,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tests {
    /// Do not run the `[pack] test` command before packing.
    pub skip: bool,
}

/// The project being built.
#[derive(Debug, Clone)]
pub struct ProjectKBean {
    pub name: String,
    pub version: Option<String>,
    pub layout: Layout,
    /// Scope used by `depTree` and `classpath`.
    pub scope: String,
    pub tests: Tests,
    /// Beans whose `check` method runs on `check`.
    pub checks: Vec<String>,
    pub fail_on_dependency_resolution_error: bool,
    dependencies: DependencySet,
}

impl KBean for ProjectKBean {
    fn schema(schema: &mut BeanSchema<Self>) {
        schema
            .optional_text("version", |p: &mut Self| &mut p.version)
            .nested("layout", |p: &mut Self| &mut p.layout, |layout| {
                layout.choice("style", |l: &mut Layout| &mut l.style);
            })
            .text("scope", |p: &mut Self| &mut p.scope)
            .nested("tests", |p: &mut Self| &mut p.tests, |tests| {
                tests.flag("skip", |t: &mut Tests| &mut t.skip);
            })
            .list("checks", |p: &mut Self| &mut p.checks)
            .flag("failOnDependencyResolutionError", |p: &mut Self| {
                &mut p.fail_on_dependency_resolution_error
            })
            .method("info", Self::info)
            .method("depTree", Self::dep_tree)
            .method("classpath", Self::classpath)
            .method("pack", Self::pack)
            .method("check", Self::check)
            .method("clean", Self::clean);
    }

    fn create(ctx: &RunContext) -> Result<Self, EngineError> {
        let manifest = ctx.manifest();
        let name = match manifest {
            Some(m) => m.project.name.clone(),
            None => ctx
                .root()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        Ok(Self {
            name,
            version: manifest.and_then(|m| m.project.version.clone()),
            layout: Layout::default(),
            scope: COMPILE.to_owned(),
            tests: Tests::default(),
            checks: Vec::new(),
            fail_on_dependency_resolution_error: manifest.is_some_and(|m| m.resolution.fail_fast),
            dependencies: DependencySet::new(),
        })
    }

    fn init(&mut self, ctx: &mut RunContext) -> Result<(), EngineError> {
        if let Some(manifest) = ctx.manifest() {
            self.dependencies = kiln_deps::manifest::dependency_set(manifest, ctx.root(), ctx.scopes())?;
        }
        debug!(project = %self.name, dependencies = self.dependencies.len(), "project initialized");
        Ok(())
    }
}

impl ProjectKBean {
    /// Dependencies declared in `kiln.toml`.
    pub fn dependencies(&self) -> &DependencySet {
        &self.dependencies
    }

    pub fn dependencies_mut(&mut self) -> &mut DependencySet {
        &mut self.dependencies
    }

    fn params(&self) -> ResolveParameters {
        ResolveParameters {
            fail_on_error: self.fail_on_dependency_resolution_error,
        }
    }

    /// Classpath of `scope`.
    ///
    /// # Errors
    /// Returns an error if resolution fails.
    pub fn resolve_files(&self, ctx: &mut RunContext, scope: &str) -> Result<Vec<PathBuf>, EngineError> {
        ctx.resolve_files(&self.dependencies, scope, self.params())
    }

    fn classpath_string(&self, ctx: &mut RunContext, scope: &str) -> Result<String, EngineError> {
        let files = self.resolve_files(ctx, scope)?;
        let joined = std::env::join_paths(&files)
            .map_err(|e| EngineError::bean(BEAN, format!("cannot build classpath: {e}")))?;
        Ok(joined.to_string_lossy().into_owned())
    }

    /// Print a summary of the project.
    ///
    /// # Errors
    /// Never fails; the signature is that of a bean method.
    pub fn info(&mut self, ctx: &mut RunContext) -> Result<(), EngineError> {
        println!("name         : {}", self.name);
        println!("version      : {}", self.version.as_deref().unwrap_or("(none)"));
        println!("root         : {}", ctx.root().display());
        println!("sources      : {}", self.layout.style.source_dir());
        println!("scope        : {}", self.scope);
        println!("dependencies : {}", self.dependencies.len());
        println!("checks       : {}", self.checks.join(", "));
        let beans: Vec<&str> = ctx
            .active_beans()
            .into_iter()
            .map(|b| b.rsplit("::").next().unwrap_or(b))
            .collect();
        println!("beans        : {}", beans.join(", "));
        Ok(())
    }

    /// Print the resolved dependency tree of `scope`, then any problems.
    ///
    /// # Errors
    /// Returns an error if resolution fails.
    pub fn dep_tree(&mut self, ctx: &mut RunContext) -> Result<(), EngineError> {
        let resolution = ctx.resolve(&self.dependencies, &self.scope, self.params())?;
        println!("{} dependencies of {}:", self.scope, self.name);
        for line in resolution.tree.to_lines() {
            println!("  {line}");
        }
        if !resolution.report.is_ok() {
            println!("problems:");
            println!("{}", resolution.report);
        }
        Ok(())
    }

    /// Print the classpath of `scope`.
    ///
    /// # Errors
    /// Returns an error if resolution fails.
    pub fn classpath(&mut self, ctx: &mut RunContext) -> Result<(), EngineError> {
        let scope = self.scope.clone();
        println!("{}", self.classpath_string(ctx, &scope)?);
        Ok(())
    }

    /// Run the `[pack]` commands and verify the declared outputs exist.
    ///
    /// # Errors
    /// Returns an error if no pack command is declared, a command fails, or
    /// an output is missing afterwards.
    pub fn pack(&mut self, ctx: &mut RunContext) -> Result<(), EngineError> {
        let Some(pack) = ctx.manifest().and_then(|m| m.pack.clone()) else {
            return Err(EngineError::bean(BEAN, "no [pack] command declared in kiln.toml"));
        };
        if !self.tests.skip && !pack.test.is_empty() {
            let classpath = self.classpath_string(ctx, TEST)?;
            eprintln!("     Testing {}", self.name);
            run_step(ctx.root(), &pack.test, classpath, "test")?;
        }
        let classpath = self.classpath_string(ctx, COMPILE)?;
        eprintln!("     Packing {}", self.name);
        run_step(ctx.root(), &pack.command, classpath, "pack")?;

        let outputs = pack_outputs(ctx.manifest(), ctx.root())?;
        if let Some(missing) = outputs.iter().find(|p| !p.exists()) {
            return Err(EngineError::bean(
                BEAN,
                format!("pack command did not produce {}", missing.display()),
            ));
        }
        eprintln!("      Packed {} ({} output(s))", self.name, outputs.len());
        Ok(())
    }

    /// Run `check` on every bean listed in `checks`.
    ///
    /// # Errors
    /// Returns the first failing check, or an error if a listed bean is not
    /// active in this run.
    pub fn check(&mut self, ctx: &mut RunContext) -> Result<(), EngineError> {
        if self.checks.is_empty() {
            eprintln!("    No checks registered");
            return Ok(());
        }
        for name in &self.checks {
            let class = ctx.catalog().find(name)?.class_name().to_owned();
            if !ctx.is_active(&class) {
                return Err(EngineError::bean(
                    BEAN,
                    format!("check bean `{name}` is not active in this run, activate it with `@{name}=true`"),
                ));
            }
            ctx.invoke(&class, "check")?;
        }
        Ok(())
    }

    /// Delete the pack outputs and the dependency cache.
    ///
    /// # Errors
    /// Returns an error if a file cannot be removed.
    pub fn clean(&mut self, ctx: &mut RunContext) -> Result<(), EngineError> {
        remove_outputs(&pack_outputs(ctx.manifest(), ctx.root())?)?;
        ctx.resolver_mut().clear_cache()?;
        eprintln!("    Cleaned build outputs");
        Ok(())
    }
}

fn run_step(root: &Path, argv: &[String], classpath: String, what: &str) -> Result<(), EngineError> {
    let output = kiln_util::process::run_in(root, argv, &[(CLASSPATH_ENV, classpath)])?;
    if !output.stdout.is_empty() {
        debug!(step = what, "{}", output.stdout.trim_end());
    }
    if output.success() {
        return Ok(());
    }
    let status = output
        .exit_code
        .map_or_else(|| "killed by a signal".to_owned(), |code| format!("exit code {code}"));
    Err(EngineError::bean(
        BEAN,
        format!("{what} command failed ({status}): {}", output.stderr.trim()),
    ))
}

/// The `[pack] outputs` of `manifest`, resolved against `root`.
///
/// # Errors
/// Returns an error if a `~/` path is used and no home directory is known.
pub fn pack_outputs(manifest: Option<&Manifest>, root: &Path) -> Result<Vec<PathBuf>, EngineError> {
    let Some(pack) = manifest.and_then(|m| m.pack.as_ref()) else {
        return Ok(Vec::new());
    };
    let mut outputs = Vec::new();
    for raw in &pack.outputs {
        outputs.push(resolve_path(root, raw)?);
    }
    Ok(outputs)
}

/// Delete `outputs`, files or directories, ignoring those already absent.
///
/// # Errors
/// Returns an error if an existing output cannot be removed.
pub fn remove_outputs(outputs: &[PathBuf]) -> Result<(), EngineError> {
    for output in outputs {
        remove_if_exists(output)?;
    }
    Ok(())
}
