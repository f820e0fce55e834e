//! Named classpath partitions and their inheritance graph.

use std::collections::{BTreeMap, HashMap};

use crate::error::DepsError;

pub const COMPILE: &str = "compile";
pub const RUNTIME: &str = "runtime";
pub const PROVIDED: &str = "provided";
pub const TEST: &str = "test";

/// Scopes and the scopes each one extends.
///
/// Resolving a scope pulls in the dependencies of every scope it extends,
/// transitively: `test` extends `runtime` and `provided`, `runtime` extends
/// `compile`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeGraph {
    extends: BTreeMap<String, Vec<String>>,
}

impl Default for ScopeGraph {
    fn default() -> Self {
        Self::standard()
    }
}

impl ScopeGraph {
    /// The built-in `compile`, `runtime`, `provided` and `test` scopes.
    pub fn standard() -> Self {
        let mut extends = BTreeMap::new();
        extends.insert(COMPILE.to_owned(), Vec::new());
        extends.insert(RUNTIME.to_owned(), vec![COMPILE.to_owned()]);
        extends.insert(PROVIDED.to_owned(), Vec::new());
        extends.insert(TEST.to_owned(), vec![RUNTIME.to_owned(), PROVIDED.to_owned()]);
        Self { extends }
    }

    /// Define (or redefine) `name` as extending `parents`.
    pub fn define(&mut self, name: &str, parents: &[String]) {
        self.extends.insert(name.to_owned(), parents.to_vec());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.extends.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.extends.keys().map(String::as_str)
    }

    /// Check that every parent exists and that inheritance is acyclic.
    ///
    /// # Errors
    /// Returns `DepsError::UnknownScope` for an undefined parent and
    /// `DepsError::ScopeCycle` when inheritance loops.
    pub fn validate(&self) -> Result<(), DepsError> {
        for name in self.extends.keys() {
            self.ancestors(name)?;
        }
        Ok(())
    }

    /// `scope` followed by every scope it extends, depth-first, without duplicates.
    ///
    /// # Errors
    /// Returns `DepsError::UnknownScope` if `scope` or one of its ancestors is
    /// undefined and `DepsError::ScopeCycle` when inheritance loops.
    pub fn ancestors(&self, scope: &str) -> Result<Vec<String>, DepsError> {
        // Three-color marking: 0=white, 1=gray(in-stack), 2=black(done).
        let mut color: HashMap<String, u8> = HashMap::new();
        let mut stack = Vec::new();
        let mut order = Vec::new();
        self.visit(scope, &mut color, &mut stack, &mut order)?;
        Ok(order)
    }

    fn visit(
        &self,
        scope: &str,
        color: &mut HashMap<String, u8>,
        stack: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> Result<(), DepsError> {
        match color.get(scope).copied().unwrap_or(0) {
            2 => return Ok(()),
            1 => {
                stack.push(scope.to_owned());
                let start = stack.iter().position(|s| s == scope).unwrap_or(0);
                let cycle = stack
                    .get(start..)
                    .unwrap_or(stack.as_slice())
                    .join(" -> ");
                return Err(DepsError::ScopeCycle { cycle });
            }
            _ => {}
        }
        let Some(parents) = self.extends.get(scope) else {
            return Err(DepsError::UnknownScope {
                scope: scope.to_owned(),
                known: self.names().collect::<Vec<_>>().join(", "),
            });
        };

        color.insert(scope.to_owned(), 1);
        stack.push(scope.to_owned());
        order.push(scope.to_owned());
        for parent in parents {
            self.visit(parent, color, stack, order)?;
        }
        stack.pop();
        color.insert(scope.to_owned(), 2);
        Ok(())
    }
}
