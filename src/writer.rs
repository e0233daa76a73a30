//! Destinations that turn a codebase plus metadata into a new revision.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::codebase::Codebase;
use crate::repositories::{Revision, RevisionMetadata};

/// A revision produced by a [`Writer`], not yet pushed anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftRevision {
    /// Where the draft can be inspected.
    pub location: PathBuf,
    pub revision: Revision,
}

pub trait Writer {
    /// Working tree holding the repository's current state, including every
    /// draft written so far.
    fn root(&self) -> &Path;

    /// Replace the working tree with `codebase` and record it as a new
    /// revision described by `metadata`.
    fn put_codebase(
        &mut self,
        codebase: &Codebase,
        metadata: &RevisionMetadata,
    ) -> Result<DraftRevision>;
}

/// Writer over a plain directory, used by dummy repositories.
///
/// Each put yields a `draft_<n>` revision, numbered from `drafts`. Writers
/// of one repository pass the same counter.
#[derive(Debug)]
pub struct DirectoryWriter {
    repository_name: String,
    root: PathBuf,
    drafts: Arc<AtomicUsize>,
}

impl DirectoryWriter {
    pub fn new(
        repository_name: impl Into<String>,
        root: impl Into<PathBuf>,
        drafts: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            repository_name: repository_name.into(),
            root: root.into(),
            drafts,
        }
    }
}

impl Writer for DirectoryWriter {
    fn root(&self) -> &Path {
        &self.root
    }

    fn put_codebase(
        &mut self,
        codebase: &Codebase,
        metadata: &RevisionMetadata,
    ) -> Result<DraftRevision> {
        clear_dir(&self.root, &[])?;
        codebase.copy_to(&self.root)?;
        let n = self.drafts.fetch_add(1, Ordering::SeqCst) + 1;
        let revision = Revision::new(format!("draft_{n}"), &self.repository_name);
        tracing::debug!(%revision, source = %metadata.id, "wrote draft");
        Ok(DraftRevision {
            location: self.root.clone(),
            revision,
        })
    }
}

/// Remove everything under `dir` except the entries named in `keep`.
pub(crate) fn clear_dir(dir: &Path, keep: &[&str]) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        return Ok(());
    }
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        if entry.file_name().to_str().is_some_and(|n| keep.contains(&n)) {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        }
        .with_context(|| format!("removing {}", path.display()))?;
    }
    Ok(())
}
