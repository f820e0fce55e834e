use std::fmt;

/// A dependency that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyProblem {
    /// The dependency as declared or reached, e.g. `org.acme:core:1.0`.
    pub dependency: String,
    /// Chain of modules leading to the dependency, root first.
    pub path: Vec<String>,
    pub reason: String,
}

/// Problems collected during one resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    pub problems: Vec<DependencyProblem>,
}

impl ResolutionReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn push(&mut self, problem: DependencyProblem) {
        self.problems.push(problem);
    }
}

impl fmt::Display for ResolutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.problems.is_empty() {
            return f.write_str("no problems");
        }
        let mut first = true;
        for problem in &self.problems {
            if !first {
                writeln!(f)?;
            }
            first = false;
            write!(f, "  {}: {}", problem.dependency, problem.reason)?;
            if !problem.path.is_empty() {
                write!(f, " (via {})", problem.path.join(" -> "))?;
            }
        }
        Ok(())
    }
}
