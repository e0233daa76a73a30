//! Materialized directory trees ("codebases") and the operations over them.

mod differ;
mod engine;
mod expression;
mod merger;

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub use differ::CodebaseDiffer;
pub use engine::ExpressionEngine;
pub use expression::{Expression, Operation, Term};
pub use merger::{CodebaseMerger, MergeResult};

/// Directory names that belong to a VCS rather than to the codebase.
const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// A directory tree in a given project space.
///
/// `expression` records how the tree was produced and is used for display only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codebase {
    root: PathBuf,
    project_space: String,
    expression: String,
}

impl Codebase {
    pub fn new(
        root: impl Into<PathBuf>,
        project_space: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            project_space: project_space.into(),
            expression: expression.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_space(&self) -> &str {
        &self.project_space
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = expression.into();
        self
    }

    pub fn with_project_space(mut self, project_space: impl Into<String>) -> Self {
        self.project_space = project_space.into();
        self
    }

    /// Path of `relative` inside this codebase (it need not exist).
    pub fn file(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Every regular file, as a `/`-separated path relative to the root.
    ///
    /// VCS metadata directories are skipped. A missing root is an empty codebase.
    pub fn relative_files(&self) -> Result<BTreeSet<String>> {
        let mut out = BTreeSet::new();
        if !self.root.exists() {
            return Ok(out);
        }
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !(e.file_type().is_dir()
                        && e.file_name().to_str().is_some_and(|n| VCS_DIRS.contains(&n)))
            });
        for entry in walker {
            let entry = entry.with_context(|| format!("listing {}", self.root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(&self.root)?;
            let parts: Vec<_> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.insert(parts.join("/"));
        }
        Ok(out)
    }

    /// Copy every file of this codebase under `dest`, creating directories.
    pub fn copy_to(&self, dest: &Path) -> Result<()> {
        for rel in self.relative_files()? {
            copy_file(&self.file(&rel), &dest.join(&rel))?;
        }
        Ok(())
    }
}

impl fmt::Display for Codebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Create a fresh directory that outlives this process, named after `prefix`.
///
/// Materialized codebases are left in place so a user can inspect them (for
/// example to resolve merge conflicts).
pub fn scratch_dir(prefix: &str) -> Result<PathBuf> {
    let dir = tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .with_context(|| format!("creating scratch directory {prefix}"))?;
    Ok(dir.keep())
}

pub(crate) fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dst)
        .with_context(|| format!("copying {} to {}", src.display(), dst.display()))?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Codebase;
    use std::fs;
    use std::path::Path;

    /// Build a codebase under `dir` from `(path, content)` pairs.
    pub fn codebase_of(dir: &Path, name: &str, files: &[(&str, &str)]) -> Codebase {
        let root = dir.join(name);
        fs::create_dir_all(&root).unwrap();
        for (rel, content) in files {
            let p = root.join(rel);
            fs::create_dir_all(p.parent().unwrap()).unwrap();
            fs::write(p, content).unwrap();
        }
        Codebase::new(root, "public", name)
    }
}
