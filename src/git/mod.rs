//! Git repositories.
//!
//! This module wraps the actual backend implementation (`git2_backend`) and
//! exposes repository-level types only, so the rest of the crate never
//! touches `git2` directly.

mod git2_backend;

use anyhow::{Context, Result};
use git2::Repository;
use std::cell::OnceCell;
use std::path::{Path, PathBuf};

use crate::codebase::{Codebase, scratch_dir};
use crate::error::{Problem, UserError};
use crate::repositories::{Revision, RevisionHistory, RevisionMetadata};
use crate::writer::{DraftRevision, Writer, clear_dir};

/// A remote git repository and its local clone.
///
/// The clone is made by an explicit [`GitRepository::ensure_cloned`] call;
/// history queries before that fail.
pub struct GitRepository {
    name: String,
    url: String,
    branch: Option<String>,
    clone_dir: PathBuf,
    clone: OnceCell<Repository>,
}

impl GitRepository {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        branch: Option<String>,
        clone_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            branch,
            clone_dir: clone_dir.into(),
            clone: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clone_dir(&self) -> &Path {
        &self.clone_dir
    }

    /// Clone the repository, or fetch and reset an existing clone. Later calls
    /// are no-ops.
    pub fn ensure_cloned(&self) -> Result<()> {
        if self.clone.get().is_some() {
            return Ok(());
        }
        tracing::info!(repository = %self.name, url = %self.url, dir = %self.clone_dir.display(), "updating clone");
        let repo = git2_backend::ensure_repo(&self.url, &self.clone_dir, self.branch.as_deref())
            .with_context(|| format!("cloning repository '{}'", self.name))?;
        let _ = self.clone.set(repo);
        Ok(())
    }

    fn repo(&self) -> Result<&Repository> {
        self.clone.get().ok_or_else(|| {
            Problem::Inconsistent(format!("repository '{}' used before it was cloned", self.name))
                .into()
        })
    }

    /// Write the tree of `revision` into `dest`.
    pub fn export(&self, revision: &Revision, dest: &Path) -> Result<()> {
        let repo = self.repo()?;
        let commit = git2_backend::find_commit(repo, &revision.rev_id)?.ok_or_else(|| {
            UserError::UnknownRevision {
                repository: self.name.clone(),
                revision: revision.rev_id.clone(),
            }
        })?;
        git2_backend::export_tree(repo, &commit, dest)
    }

    /// A writer on a private clone, positioned at `revision` (or head).
    pub fn create_writer(&self, revision: Option<&Revision>) -> Result<GitWriter> {
        self.repo()?;
        let root = scratch_dir(&format!("git_writer_{}_", self.name))?;
        let repo = git2_backend::clone_local(
            &self.clone_dir,
            &root,
            revision.map(|r| r.rev_id.as_str()),
        )?;
        Ok(GitWriter {
            repository_name: self.name.clone(),
            root,
            repo,
        })
    }
}

impl RevisionHistory for GitRepository {
    fn find_highest_revision(&self, rev_id: Option<&str>) -> Result<Revision> {
        let repo = self.repo()?;
        let spec = rev_id.filter(|s| !s.is_empty());
        let commit = git2_backend::resolve_commit(repo, spec)?.ok_or_else(|| {
            UserError::UnknownRevision {
                repository: self.name.clone(),
                revision: spec.unwrap_or("HEAD").to_string(),
            }
        })?;
        Ok(Revision::new(commit.id().to_string(), &self.name))
    }

    fn get_metadata(&self, revision: &Revision) -> Result<Option<RevisionMetadata>> {
        if revision.repository_name != self.name {
            return Err(Problem::Inconsistent(format!(
                "revision {} asked of repository '{}'",
                revision, self.name
            ))
            .into());
        }
        let repo = self.repo()?;
        Ok(git2_backend::find_commit(repo, &revision.rev_id)?
            .map(|c| git2_backend::commit_metadata(&c, &self.name)))
    }
}

/// Commits codebases into a private clone of a git repository.
pub struct GitWriter {
    repository_name: String,
    root: PathBuf,
    repo: Repository,
}

impl Writer for GitWriter {
    fn root(&self) -> &Path {
        &self.root
    }

    fn put_codebase(
        &mut self,
        codebase: &Codebase,
        metadata: &RevisionMetadata,
    ) -> Result<DraftRevision> {
        clear_dir(&self.root, &[".git"])?;
        codebase.copy_to(&self.root)?;
        let oid = git2_backend::commit_worktree(&self.repo, metadata)
            .with_context(|| format!("committing in {}", self.root.display()))?;
        Ok(DraftRevision {
            location: self.root.clone(),
            revision: Revision::new(oid.to_string(), &self.repository_name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codebase::testing::codebase_of;
    use git2::{Signature, Time};
    use std::fs;

    /// A repository with two commits; returns (path, branch, [first, second]).
    fn upstream(dir: &Path) -> (PathBuf, String, Vec<String>) {
        let path = dir.join("upstream");
        let repo = Repository::init(&path).unwrap();
        let sig = Signature::new("Ada", "ada@example.com", &Time::new(1_700_000_000, 0)).unwrap();
        let mut ids = Vec::new();
        for (i, content) in ["one", "two"].iter().enumerate() {
            fs::create_dir_all(path.join("src")).unwrap();
            fs::write(path.join("src/lib.txt"), content).unwrap();
            let mut index = repo.index().unwrap();
            index.add_path(Path::new("src/lib.txt")).unwrap();
            index.write().unwrap();
            let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
            let parents: Vec<git2::Commit> = repo
                .head()
                .ok()
                .map(|h| h.peel_to_commit().unwrap())
                .into_iter()
                .collect();
            let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
            let msg = format!("change {i}\n\nBUG=4{i}");
            let oid = repo
                .commit(Some("HEAD"), &sig, &sig, &msg, &tree, &parent_refs)
                .unwrap();
            ids.push(oid.to_string());
        }
        let branch = repo.head().unwrap().shorthand().unwrap().to_string();
        (path, branch, ids)
    }

    fn cloned(dir: &Path) -> (GitRepository, Vec<String>) {
        let (path, branch, ids) = upstream(dir);
        let repo = GitRepository::new(
            "internal",
            path.to_str().unwrap(),
            Some(branch),
            dir.join("clone"),
        );
        repo.ensure_cloned().unwrap();
        (repo, ids)
    }

    #[test]
    fn history_before_clone_is_an_error() {
        let td = tempfile::tempdir().unwrap();
        let repo = GitRepository::new("r", "file:///nowhere", None, td.path().join("c"));
        assert!(repo.find_highest_revision(None).is_err());
    }

    #[test]
    fn reads_head_and_metadata() {
        let td = tempfile::tempdir().unwrap();
        let (repo, ids) = cloned(td.path());

        let head = repo.find_highest_revision(None).unwrap();
        assert_eq!(head, Revision::new(&ids[1], "internal"));

        let md = repo.get_metadata(&head).unwrap().unwrap();
        assert_eq!(md.author.as_deref(), Some("Ada <ada@example.com>"));
        assert_eq!(md.date.timestamp(), 1_700_000_000);
        assert_eq!(md.parents, vec![Revision::new(&ids[0], "internal")]);
        assert_eq!(md.field("BUG"), Some("41"));

        assert!(
            repo.get_metadata(&Revision::new("not-a-sha", "internal"))
                .unwrap()
                .is_none()
        );
        assert!(repo.find_highest_revision(Some("no-such-ref")).is_err());
    }

    #[test]
    fn exports_a_past_revision() {
        let td = tempfile::tempdir().unwrap();
        let (repo, ids) = cloned(td.path());
        let out = td.path().join("export");
        repo.export(&Revision::new(&ids[0], "internal"), &out).unwrap();
        assert_eq!(fs::read_to_string(out.join("src/lib.txt")).unwrap(), "one");
    }

    #[test]
    fn writer_commits_codebase_on_top_of_revision() {
        let td = tempfile::tempdir().unwrap();
        let (repo, ids) = cloned(td.path());
        let mut writer = repo
            .create_writer(Some(&Revision::new(&ids[0], "internal")))
            .unwrap();
        assert_eq!(
            fs::read_to_string(writer.root().join("src/lib.txt")).unwrap(),
            "one"
        );

        let cb = codebase_of(td.path(), "new", &[("README", "hello")]);
        let mut md = RevisionMetadata::new("x", vec![]);
        md.author = Some("Grace <grace@example.com>".into());
        md.description = "Import\n\nMIGRATED_REVID=x".into();
        let draft = writer.put_codebase(&cb, &md).unwrap();

        let written = Repository::open(writer.root()).unwrap();
        let commit = written
            .find_commit(git2::Oid::from_str(&draft.revision.rev_id).unwrap())
            .unwrap();
        assert_eq!(commit.parent_id(0).unwrap().to_string(), ids[0]);
        assert_eq!(commit.author().email(), Some("grace@example.com"));
        let tree = commit.tree().unwrap();
        assert!(tree.get_path(Path::new("README")).is_ok());
        assert!(tree.get_path(Path::new("src/lib.txt")).is_err());
    }

    #[test]
    fn writer_commits_batched_changes_of_two_authors() {
        let td = tempfile::tempdir().unwrap();
        let (repo, ids) = cloned(td.path());
        let mut first = RevisionMetadata::new("a1", vec![]);
        first.author = Some("Ada <ada@example.com>".into());
        first.description = "First".into();
        let mut second = RevisionMetadata::new("b2", vec![]);
        second.author = Some("Bob <bob@example.com>".into());
        second.description = "Second".into();
        let md = RevisionMetadata::concatenate(&[first, second], None).unwrap();

        let mut writer = repo.create_writer(None).unwrap();
        let cb = codebase_of(td.path(), "batch", &[("src/lib.txt", "three")]);
        let draft = writer.put_codebase(&cb, &md).unwrap();

        let written = Repository::open(writer.root()).unwrap();
        let commit = written
            .find_commit(git2::Oid::from_str(&draft.revision.rev_id).unwrap())
            .unwrap();
        assert_eq!(commit.parent_id(0).unwrap().to_string(), ids[1]);
        assert_eq!(commit.author().name(), Some("Ada"));
        assert_eq!(commit.author().email(), Some("ada@example.com"));
        assert!(
            commit
                .message()
                .unwrap()
                .contains("Authors: Ada <ada@example.com>, Bob <bob@example.com>")
        );
    }
}
