//! The resolved dependency tree and its classpath flattening.

use std::collections::HashSet;
use std::path::PathBuf;

use kiln_util::fs::canonical_or_self;

use crate::coordinate::ModuleId;
use crate::version::Version;

/// A module reached during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleNode {
    pub module: ModuleId,
    /// Version selector as declared or as written in the parent's metadata.
    pub requested: Option<String>,
    /// Version in effect: selected for survivors, of the winner for evicted nodes.
    pub version: Option<Version>,
    pub files: Vec<PathBuf>,
    pub evicted: bool,
    /// Scopes of the root declaration this node descends from.
    pub scopes: Vec<String>,
    /// Distance from the root; declared modules are at depth 1.
    pub depth: usize,
    /// Why the node could not be fetched.
    pub problem: Option<String>,
    pub children: Vec<ResolvedNode>,
}

impl ModuleNode {
    /// Whether this node lost to another version of the same module.
    pub fn is_conflict(&self) -> bool {
        self.evicted
            && match (&self.requested, &self.version) {
                (Some(requested), Some(winner)) => {
                    !Version::parse(requested).is_ok_and(|r| &r == winner)
                }
                _ => true,
            }
    }

    fn label(&self) -> String {
        let requested = self.requested.as_deref().unwrap_or("?");
        let mut label = format!("{}:{}", self.module, requested);
        if self.evicted {
            match &self.version {
                Some(_) if !self.is_conflict() => label.push_str(" (duplicate)"),
                Some(winner) => label.push_str(&format!(" (evicted by {winner})")),
                None => label.push_str(" (evicted)"),
            }
        } else if let Some(problem) = &self.problem {
            label.push_str(&format!(" (failed: {problem})"));
        } else if let Some(version) = &self.version {
            if self.requested.as_deref() != Some(version.as_str()) {
                label.push_str(&format!(" -> {version}"));
            }
        }
        label
    }
}

/// Files taken as they are, possibly produced by another project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub files: Vec<PathBuf>,
    /// Directory of the producing project for project dependencies.
    pub project: Option<PathBuf>,
    pub computed: bool,
    pub scopes: Vec<String>,
}

impl FileNode {
    fn label(&self) -> String {
        let files: Vec<String> = self.files.iter().map(|f| f.display().to_string()).collect();
        match &self.project {
            Some(dir) => format!("project {} [{}]", dir.display(), files.join(", ")),
            None => format!("files [{}]", files.join(", ")),
        }
    }
}

/// One node of the resolved tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedNode {
    Module(ModuleNode),
    File(FileNode),
}

/// Root nodes in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyTree {
    pub roots: Vec<ResolvedNode>,
}

impl DependencyTree {
    /// Files of every surviving node in depth-first declaration order,
    /// without duplicates by canonical path.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for node in self.nodes() {
            let node_files = match node {
                ResolvedNode::Module(m) if m.evicted => continue,
                ResolvedNode::Module(m) => &m.files,
                ResolvedNode::File(f) => &f.files,
            };
            for file in node_files {
                if seen.insert(canonical_or_self(file)) {
                    files.push(file.clone());
                }
            }
        }
        files
    }

    /// Every node, depth first.
    pub fn nodes(&self) -> Vec<&ResolvedNode> {
        fn walk<'a>(node: &'a ResolvedNode, out: &mut Vec<&'a ResolvedNode>) {
            out.push(node);
            if let ResolvedNode::Module(m) = node {
                for child in &m.children {
                    walk(child, out);
                }
            }
        }
        let mut out = Vec::new();
        for root in &self.roots {
            walk(root, &mut out);
        }
        out
    }

    /// Every module node, depth first.
    pub fn modules(&self) -> Vec<&ModuleNode> {
        self.nodes()
            .into_iter()
            .filter_map(|node| match node {
                ResolvedNode::Module(m) => Some(m),
                ResolvedNode::File(_) => None,
            })
            .collect()
    }

    /// Version of the surviving node of `module`.
    pub fn selected_version(&self, module: &ModuleId) -> Option<&Version> {
        self.modules()
            .into_iter()
            .find(|m| &m.module == module && !m.evicted)
            .and_then(|m| m.version.as_ref())
    }

    /// Number of nodes evicted by a different version.
    pub fn conflict_count(&self) -> usize {
        self.modules().into_iter().filter(|m| m.is_conflict()).count()
    }

    /// One line per node, children indented by two spaces per level.
    pub fn to_lines(&self) -> Vec<String> {
        fn walk(node: &ResolvedNode, indent: usize, out: &mut Vec<String>) {
            let pad = "  ".repeat(indent);
            match node {
                ResolvedNode::Module(m) => {
                    out.push(format!("{pad}{}", m.label()));
                    for child in &m.children {
                        walk(child, indent + 1, out);
                    }
                }
                ResolvedNode::File(f) => out.push(format!("{pad}{}", f.label())),
            }
        }
        let mut out = Vec::new();
        for root in &self.roots {
            walk(root, 0, &mut out);
        }
        out
    }
}
