//! The `quality` bean: checks on the shape of the resolved dependency graph.

use kiln_deps::scope::TEST;
use kiln_deps::{DependencySet, DepsError, ResolveParameters};

use crate::bean::{BeanSchema, KBean};
use crate::builtins::project::ProjectKBean;
use crate::context::RunContext;
use crate::error::EngineError;

const BEAN: &str = "quality";

/// Dependency checks, run by `project`'s `check` method.
#[derive(Debug, Clone)]
pub struct QualityKBean {
    /// Version conflicts tolerated; negative means unlimited.
    pub max_evictions: i64,
    /// Fail when a dependency cannot be resolved.
    pub fail_on_problems: bool,
    pub scope: String,
    dependencies: DependencySet,
}

impl KBean for QualityKBean {
    fn schema(schema: &mut BeanSchema<Self>) {
        schema
            .integer("maxEvictions", |q: &mut Self| &mut q.max_evictions)
            .flag("failOnProblems", |q: &mut Self| &mut q.fail_on_problems)
            .text("scope", |q: &mut Self| &mut q.scope)
            .method("check", Self::check);
    }

    fn create(_ctx: &RunContext) -> Result<Self, EngineError> {
        Ok(Self {
            max_evictions: -1,
            fail_on_problems: true,
            scope: TEST.to_owned(),
            dependencies: DependencySet::new(),
        })
    }

    fn init(&mut self, ctx: &mut RunContext) -> Result<(), EngineError> {
        self.dependencies = ctx.load::<ProjectKBean>()?.dependencies().clone();
        ctx.post_init::<ProjectKBean>(|project, _| {
            if !project.checks.iter().any(|c| c == BEAN) {
                project.checks.push(BEAN.to_owned());
            }
            Ok(())
        });
        Ok(())
    }
}

impl QualityKBean {
    /// Resolve `scope` and enforce the eviction and problem limits.
    ///
    /// # Errors
    /// Returns an error if resolution fails or a limit is exceeded.
    pub fn check(&mut self, ctx: &mut RunContext) -> Result<(), EngineError> {
        let resolution = ctx.resolve(&self.dependencies, &self.scope, ResolveParameters::default())?;
        let evictions = resolution.tree.conflict_count();
        let problems = resolution.report.problems.len();
        eprintln!(
            "     Checked {} dependencies: {evictions} conflict(s), {problems} problem(s)",
            self.scope
        );
        if let Ok(max) = usize::try_from(self.max_evictions) {
            if evictions > max {
                return Err(EngineError::bean(
                    BEAN,
                    format!("{evictions} version conflict(s) exceed maxEvictions={max}"),
                ));
            }
        }
        if self.fail_on_problems && !resolution.report.is_ok() {
            return Err(DepsError::Resolution(resolution.report).into());
        }
        Ok(())
    }
}
