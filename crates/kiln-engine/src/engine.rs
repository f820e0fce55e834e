//! One full invocation: from raw arguments to executed bean methods.
//!
//! Order of a run:
//! 1. behavior flags, then properties (global, project, environment, `-D`)
//! 2. bean resolution (default and init beans)
//! 3. command-line actions, validated against the bean member tables
//! 4. bean instantiation: init bean, default bean, `@name=true` beans, then
//!    beans named by actions, each created, injected from properties and
//!    initialized exactly once
//! 5. post-init hooks
//! 6. field actions, then method calls, in command-line order
//!
//! Any failure before step 6 aborts the run before a method executes.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use kiln_config::{Manifest, Properties};
use kiln_deps::cache::FileCache;
use kiln_deps::model::ProjectDependency;
use kiln_deps::{DependencyResolver, DepsError, ProjectBuilder, RepositorySet};
use kiln_util::fs::{canonical_or_self, kiln_home};
use tracing::debug;

use crate::behavior::BehaviorSettings;
use crate::binder;
use crate::builtins::project::{pack_outputs, remove_outputs};
use crate::commandline::{self, ActionKind, KBeanAction};
use crate::context::RunContext;
use crate::error::EngineError;
use crate::registry::{BeanCatalog, KBeanResolution};

/// Property naming the default bean when no `-kb=` flag is given.
pub const DEFAULT_KBEAN_PROPERTY: &str = "kiln.kbean.default";

/// Runs bean invocations against a catalog of bean types.
#[derive(Debug, Clone)]
pub struct Engine {
    catalog: Rc<BeanCatalog>,
    /// Project roots of the builds enclosing this engine's runs.
    ancestors: Vec<PathBuf>,
}

impl Engine {
    pub fn new(catalog: BeanCatalog) -> Self {
        Self {
            catalog: Rc::new(catalog),
            ancestors: Vec::new(),
        }
    }

    /// An engine over the standard beans.
    pub fn standard() -> Self {
        Self::new(BeanCatalog::standard())
    }

    pub fn catalog(&self) -> &BeanCatalog {
        &self.catalog
    }

    /// Prepare a run in `root`: everything up to, but excluding, method calls.
    ///
    /// # Errors
    /// Returns an error if a flag, bean name, member or value is invalid, the
    /// manifest or properties cannot be loaded, or a bean fails to initialize.
    pub fn prepare<S: AsRef<str>>(&self, root: &Path, args: &[S]) -> Result<PreparedRun, EngineError> {
        let (settings, tokens) = BehaviorSettings::parse(args)?;
        let root = canonical_or_self(root);
        let home = kiln_home().ok();
        let properties = Properties::load(home.as_deref(), &root, settings.properties.clone())?;
        let manifest = Manifest::load_optional(&root)?;

        let requested = settings
            .default_kbean
            .clone()
            .or_else(|| properties.get(DEFAULT_KBEAN_PROPERTY))
            .or_else(|| manifest.as_ref().and_then(|m| m.project.default_kbean.clone()));
        let resolution = KBeanResolution::compute(&self.catalog, requested.as_deref())?;
        let actions = commandline::parse(&tokens, &self.catalog, &resolution)?;
        self.validate(&actions)?;

        let resolver = resolver_for(manifest.as_ref(), &root)?;
        let mut ctx = RunContext::new(root, Rc::clone(&self.catalog), resolution)
            .with_properties(properties)
            .with_manifest(manifest)
            .with_settings(settings)
            .with_resolver(resolver)
            .with_ancestors(self.ancestors.clone());

        if ctx.settings().clean_work {
            FileCache::for_project(ctx.root()).clear()?;
            eprintln!("    Cleaned dependency cache");
        }
        if ctx.settings().clean_output {
            remove_outputs(&pack_outputs(ctx.manifest(), ctx.root())?)?;
            eprintln!("    Cleaned pack outputs");
        }

        for class in self.activation_order(&ctx, &actions)? {
            ctx.instantiate(&class)?;
        }
        ctx.run_post_init()?;

        let (fields, calls): (Vec<KBeanAction>, Vec<KBeanAction>) =
            actions.into_iter().partition(|a| !a.is_method_call());
        for action in &fields {
            ctx.apply(action)?;
        }
        Ok(PreparedRun { context: ctx, calls })
    }

    /// Prepare and execute a run in `root`.
    ///
    /// # Errors
    /// Returns the errors of [`Engine::prepare`] and the first failing method.
    pub fn run<S: AsRef<str>>(&self, root: &Path, args: &[S]) -> Result<RunContext, EngineError> {
        self.prepare(root, args)?.execute()
    }

    fn validate(&self, actions: &[KBeanAction]) -> Result<(), EngineError> {
        for action in actions {
            let descriptor = self.catalog.find(&action.bean)?;
            let (table, bean) = (descriptor.table(), descriptor.short_name());
            match &action.kind {
                ActionKind::FieldSet { value, append } => {
                    binder::field_value(table, bean, &action.member, value, *append)?;
                }
                ActionKind::MethodCall => binder::check_method(table, bean, &action.member)?,
            }
        }
        Ok(())
    }

    fn activation_order(&self, ctx: &RunContext, actions: &[KBeanAction]) -> Result<Vec<String>, EngineError> {
        let mut order = Vec::new();
        let resolution = ctx.resolution();
        for class in resolution.init.iter().chain(resolution.default.iter()) {
            push_unique(&mut order, class);
        }
        for key in ctx.properties().keys() {
            let Some(name) = key.strip_prefix('@') else {
                continue;
            };
            if !name.contains('.') && ctx.properties().get_bool(key) {
                push_unique(&mut order, self.catalog.find(name)?.class_name());
            }
        }
        for action in actions {
            push_unique(&mut order, &action.bean);
        }
        debug!(beans = ?order, "activation order");
        Ok(order)
    }
}

fn push_unique(order: &mut Vec<String>, class: &str) {
    if !order.iter().any(|c| c == class) {
        order.push(class.to_owned());
    }
}

fn resolver_for(manifest: Option<&Manifest>, root: &Path) -> Result<DependencyResolver, EngineError> {
    let Some(manifest) = manifest else {
        return Ok(DependencyResolver::new(RepositorySet::new()));
    };
    let resolver = DependencyResolver::new(kiln_deps::manifest::repositories(manifest, root)?)
        .with_scopes(kiln_deps::manifest::scope_graph(manifest)?);
    Ok(if manifest.resolution.file_cache {
        resolver.with_file_cache(FileCache::for_project(root))
    } else {
        resolver
    })
}

/// A run whose beans are ready and whose method calls are pending.
#[derive(Debug)]
pub struct PreparedRun {
    context: RunContext,
    calls: Vec<KBeanAction>,
}

impl PreparedRun {
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut RunContext {
        &mut self.context
    }

    /// Method calls in command-line order.
    pub fn calls(&self) -> &[KBeanAction] {
        &self.calls
    }

    /// Invoke the pending methods in order, stopping at the first failure.
    ///
    /// # Errors
    /// Returns the first failing method's error.
    pub fn execute(mut self) -> Result<RunContext, EngineError> {
        for call in &self.calls {
            debug!(call = %call, "executing");
            self.context.apply(call)?;
        }
        Ok(self.context)
    }
}

/// Builds computed project dependencies by running a nested engine on the
/// same thread.
pub(crate) struct SubBuilder {
    catalog: Rc<BeanCatalog>,
    /// Build stack, the requesting project last.
    ancestors: Vec<PathBuf>,
}

impl SubBuilder {
    pub(crate) fn new(catalog: Rc<BeanCatalog>, ancestors: Vec<PathBuf>) -> Self {
        Self { catalog, ancestors }
    }
}

impl ProjectBuilder for SubBuilder {
    fn build(&mut self, dependency: &ProjectDependency) -> Result<(), DepsError> {
        let dir = canonical_or_self(&dependency.project_dir);
        if let Some(start) = self.ancestors.iter().position(|a| *a == dir) {
            let mut cycle: Vec<String> = self
                .ancestors
                .iter()
                .skip(start)
                .map(|p| p.display().to_string())
                .collect();
            cycle.push(dir.display().to_string());
            return Err(DepsError::ProjectCycle {
                cycle: cycle.join(" -> "),
            });
        }
        eprintln!("    Building {} ({})", dir.display(), dependency.build_args.join(" "));
        let engine = Engine {
            catalog: Rc::clone(&self.catalog),
            ancestors: self.ancestors.clone(),
        };
        engine
            .run(&dir, &dependency.build_args)
            .map(drop)
            .map_err(|e| into_deps_error(e, &dir))
    }
}

fn into_deps_error(err: EngineError, dir: &Path) -> DepsError {
    match err {
        EngineError::Deps(e) => e,
        EngineError::MethodFailed { source, .. } => into_deps_error(*source, dir),
        other => DepsError::ProjectBuild {
            project: dir.display().to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use super::*;
    use crate::builtins::{LayoutStyle, ProjectKBean, QualityKBean};
    use crate::registry::tests::ProjectorKBean;
    use crate::registry::BeanOrigin;

    fn project(dir: &Path, manifest: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("kiln.toml"), manifest).unwrap();
    }

    fn publish(repo: &Path, name: &str, version: &str, deps: &[(&str, &str)]) {
        let dir = repo.join("org/acme").join(name).join(version);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{name}-{version}.jar")), name).unwrap();
        let mut pom = String::from("<project><dependencies>");
        for (dep, dep_version) in deps {
            pom.push_str(&format!(
                "<dependency><groupId>org.acme</groupId><artifactId>{dep}</artifactId><version>{dep_version}</version></dependency>"
            ));
        }
        pom.push_str("</dependencies></project>");
        fs::write(dir.join(format!("{name}-{version}.pom")), pom).unwrap();
    }

    fn style(run: &PreparedRun) -> LayoutStyle {
        run.context().bean::<ProjectKBean>().unwrap().layout.style
    }

    #[test]
    fn enum_field_bound_from_command_line() {
        let tmp = tempfile::tempdir().unwrap();
        let run = Engine::standard().prepare(tmp.path(), &["layout.style=SIMPLE"]).unwrap();
        assert_eq!(style(&run), LayoutStyle::Simple);
    }

    #[test]
    fn invalid_constant_fails_before_any_method() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("out")).unwrap();
        fs::write(tmp.path().join("kiln.toml"), "[project]\nname = \"app\"\n[pack]\ncommand = [\"true\"]\noutputs = [\"out\"]\n").unwrap();
        let err = Engine::standard()
            .run(tmp.path(), &["clean", "layout.style=GRADLE"])
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidValue { ref value, .. } if value == "GRADLE"), "error was: {err}");
        assert!(tmp.path().join("out").exists());
    }

    #[test]
    fn command_line_overrides_properties() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("kiln.properties"), "@project.layout.style=SIMPLE\n").unwrap();

        let from_properties = Engine::standard().prepare(tmp.path(), &[] as &[&str]).unwrap();
        assert_eq!(style(&from_properties), LayoutStyle::Simple);

        let overridden = Engine::standard().prepare(tmp.path(), &["layout.style=MAVEN"]).unwrap();
        assert_eq!(style(&overridden), LayoutStyle::Maven);
    }

    #[test]
    fn cli_property_flag_injects_field() {
        let tmp = tempfile::tempdir().unwrap();
        let run = Engine::standard()
            .prepare(tmp.path(), &["-D@project.version=2.1"])
            .unwrap();
        let project = run.context().bean::<ProjectKBean>().unwrap();
        assert_eq!(project.version.as_deref(), Some("2.1"));
    }

    #[test]
    fn quality_registers_into_project_checks() {
        let tmp = tempfile::tempdir().unwrap();
        let run = Engine::standard()
            .prepare(tmp.path(), &["quality:", "maxEvictions=0"])
            .unwrap();
        let ctx = run.context();
        assert_eq!(ctx.bean::<ProjectKBean>().unwrap().checks, vec!["quality"]);
        assert_eq!(ctx.bean::<QualityKBean>().unwrap().max_evictions, 0);
        let order: Vec<&str> = ctx
            .active_beans()
            .into_iter()
            .map(|c| c.rsplit("::").next().unwrap())
            .collect();
        assert_eq!(order, vec!["ProjectKBean", "QualityKBean"]);
    }

    #[test]
    fn command_line_applied_after_post_init() {
        let tmp = tempfile::tempdir().unwrap();
        let run = Engine::standard()
            .prepare(tmp.path(), &["checks=", "quality:", "scope=compile"])
            .unwrap();
        assert!(run.context().bean::<ProjectKBean>().unwrap().checks.is_empty());
    }

    #[test]
    fn property_activates_bean() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("kiln.properties"), "@quality=true\n").unwrap();
        let run = Engine::standard().prepare(tmp.path(), &["info"]).unwrap();
        assert!(run.context().bean::<QualityKBean>().is_some());
        assert_eq!(run.calls().len(), 1);
    }

    #[test]
    fn default_bean_from_flag_and_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let run = Engine::standard().prepare(tmp.path(), &["-kb=quality", "maxEvictions=2"]).unwrap();
        assert_eq!(run.context().bean::<QualityKBean>().unwrap().max_evictions, 2);

        project(tmp.path(), "[project]\nname = \"app\"\ndefault_kbean = \"quality\"\n");
        let run = Engine::standard().prepare(tmp.path(), &["failOnProblems=false"]).unwrap();
        assert!(!run.context().bean::<QualityKBean>().unwrap().fail_on_problems);
    }

    #[test]
    fn local_bean_is_default_and_init() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Engine::new(BeanCatalog::standard().with::<ProjectorKBean>(BeanOrigin::Local));
        let run = engine.prepare(tmp.path(), &["lens=wide", "project:", "scope=test"]).unwrap();
        let ctx = run.context();
        assert_eq!(ctx.bean::<ProjectorKBean>().unwrap().lens, "wide");
        assert_eq!(ctx.bean::<ProjectKBean>().unwrap().scope, "test");
        assert!(ctx.active_beans().first().unwrap().ends_with("::ProjectorKBean"));
    }

    #[test]
    fn methods_run_in_command_line_order() {
        let tmp = tempfile::tempdir().unwrap();
        let run = Engine::standard()
            .prepare(tmp.path(), &["info", "quality:", "check", "project:", "classpath"])
            .unwrap();
        let calls: Vec<String> = run.calls().iter().map(ToString::to_string).collect();
        assert_eq!(
            calls,
            vec!["ProjectKBean#info", "QualityKBean#check", "ProjectKBean#classpath"]
        );
        run.execute().unwrap();
    }

    #[test]
    fn unknown_member_reported_with_suggestion() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Engine::standard().prepare(tmp.path(), &["depTre"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "bean `project` has no member `depTre`; did you mean `depTree`?"
        );
    }

    #[test]
    fn quality_check_enforces_eviction_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        publish(&repo, "core", "1.0", &[("util", "2.0")]);
        publish(&repo, "util", "1.0", &[]);
        publish(&repo, "util", "2.0", &[]);
        let app = tmp.path().join("app");
        project(
            &app,
            "repositories = [\"../repo\"]\n[project]\nname = \"app\"\n\n[[dependency]]\nmodule = \"org.acme:core:1.0\"\n\n[[dependency]]\nmodule = \"org.acme:util:1.0\"\n",
        );

        Engine::standard().run(&app, &["quality:", "check"]).unwrap();
        let err = Engine::standard()
            .run(&app, &["quality:", "maxEvictions=0", "project:", "check"])
            .unwrap_err();
        assert!(err.to_string().contains("exceed maxEvictions=0"), "error was: {err}");
    }

    #[test]
    fn clean_output_flag_removes_pack_outputs() {
        let tmp = tempfile::tempdir().unwrap();
        project(
            tmp.path(),
            "[project]\nname = \"app\"\n[pack]\ncommand = [\"true\"]\noutputs = [\"out/app.jar\"]\n",
        );
        fs::create_dir_all(tmp.path().join("out")).unwrap();
        fs::write(tmp.path().join("out/app.jar"), "jar").unwrap();
        Engine::standard().prepare(tmp.path(), &["-co"]).unwrap();
        assert!(!tmp.path().join("out/app.jar").exists());
    }

    #[test]
    fn pack_runs_command_with_classpath() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("libs")).unwrap();
        fs::write(tmp.path().join("libs/a.jar"), "a").unwrap();
        project(
            tmp.path(),
            "[project]\nname = \"app\"\n[[dependency]]\nfiles = [\"libs/a.jar\"]\n[pack]\ncommand = [\"sh\", \"-c\", \"mkdir -p out && echo \\\"$KILN_CLASSPATH\\\" > out/cp.txt\"]\ntest = [\"sh\", \"-c\", \"exit 1\"]\noutputs = [\"out/cp.txt\"]\n",
        );
        let err = Engine::standard().run(tmp.path(), &["pack"]).unwrap_err();
        assert!(err.to_string().contains("test command failed"), "error was: {err}");

        Engine::standard().run(tmp.path(), &["tests.skip", "pack"]).unwrap();
        let written = fs::read_to_string(tmp.path().join("out/cp.txt")).unwrap();
        assert!(written.trim().ends_with("libs/a.jar"), "classpath was {written}");
    }

    #[test]
    fn pack_fails_when_output_missing() {
        let tmp = tempfile::tempdir().unwrap();
        project(
            tmp.path(),
            "[project]\nname = \"app\"\n[pack]\ncommand = [\"true\"]\noutputs = [\"out/app.jar\"]\n",
        );
        let err = Engine::standard().run(tmp.path(), &["pack"]).unwrap_err();
        assert!(err.to_string().contains("did not produce"), "error was: {err}");
    }

    const PRODUCER: &str = "[project]\nname = \"lib\"\n[pack]\ncommand = [\"sh\", \"-c\", \"mkdir -p out && echo lib > out/lib.jar\"]\noutputs = [\"out/lib.jar\"]\n";

    #[test]
    fn computed_project_built_by_nested_run() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = tmp.path().join("lib");
        let app = tmp.path().join("app");
        project(&lib, PRODUCER);
        project(
            &app,
            "[project]\nname = \"app\"\n[[dependency]]\nproject = \"../lib\"\noutputs = [\"out/lib.jar\"]\n",
        );

        let mut run = Engine::standard().prepare(&app, &[] as &[&str]).unwrap();
        let files = run
            .context_mut()
            .with_bean::<ProjectKBean, _>(|project, ctx| project.resolve_files(ctx, "compile"))
            .unwrap();
        let jar = lib.join("out/lib.jar");
        assert!(jar.exists());
        let canonical: Vec<PathBuf> = files.iter().map(|f| canonical_or_self(f)).collect();
        assert_eq!(canonical, vec![canonical_or_self(&jar)]);
    }

    #[test]
    fn failing_nested_build_is_a_resolution_error() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = tmp.path().join("lib");
        let app = tmp.path().join("app");
        project(&lib, "[project]\nname = \"lib\"\n[pack]\ncommand = [\"sh\", \"-c\", \"exit 3\"]\n");
        project(
            &app,
            "[project]\nname = \"app\"\n[[dependency]]\nproject = \"../lib\"\noutputs = [\"out/lib.jar\"]\n",
        );
        let err = Engine::standard().run(&app, &["classpath"]).unwrap_err();
        let EngineError::MethodFailed { source, .. } = &err else {
            unreachable!("expected a method failure, got {err}");
        };
        assert!(
            matches!(source.as_ref(), EngineError::Deps(DepsError::Resolution(_))),
            "error was: {err}"
        );
    }

    #[test]
    fn project_cycle_detected_before_recursing() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        project(
            &a,
            "[project]\nname = \"a\"\n[[dependency]]\nproject = \"../b\"\noutputs = [\"out/b.jar\"]\n[pack]\ncommand = [\"true\"]\n",
        );
        project(
            &b,
            "[project]\nname = \"b\"\n[[dependency]]\nproject = \"../a\"\noutputs = [\"out/a.jar\"]\n[pack]\ncommand = [\"true\"]\n",
        );
        let err = Engine::standard().run(&a, &["classpath"]).unwrap_err();
        let EngineError::MethodFailed { source, .. } = &err else {
            unreachable!("expected a method failure, got {err}");
        };
        let EngineError::Deps(DepsError::ProjectCycle { cycle }) = source.as_ref() else {
            unreachable!("expected a project cycle, got {err}");
        };
        assert_eq!(cycle.matches(" -> ").count(), 2, "cycle was {cycle}");
    }

    #[test]
    fn nested_errors_map_to_dependency_errors() {
        let dir = Path::new("/work/lib");
        let cycle = EngineError::MethodFailed {
            bean: "project".to_owned(),
            method: "pack".to_owned(),
            source: Box::new(EngineError::Deps(DepsError::ProjectCycle {
                cycle: "a -> b -> a".to_owned(),
            })),
        };
        assert!(matches!(into_deps_error(cycle, dir), DepsError::ProjectCycle { .. }));
        let other = into_deps_error(EngineError::bean("project", "boom"), dir);
        assert_eq!(other.to_string(), "build of /work/lib failed: project: boom");
    }
}
