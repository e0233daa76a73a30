use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use super::{DummyRevisionHistory, Revision, RevisionHistory, SearchType};
use crate::codebase::{Codebase, scratch_dir};
use crate::config::{RepositoryConfig, RepositoryKind};
use crate::error::UserError;
use crate::git::GitRepository;
use crate::writer::{DirectoryWriter, Writer};

/// A configured repository, resolved once from its configuration.
pub struct RepositoryType {
    name: String,
    project_space: String,
    search_type: SearchType,
    backend: Backend,
}

enum Backend {
    Git(GitRepository),
    /// Writers of one dummy repository share `drafts`, so draft ids stay
    /// unique across writers.
    Dummy {
        history: DummyRevisionHistory,
        drafts: Arc<AtomicUsize>,
    },
}

impl Backend {
    fn dummy(history: DummyRevisionHistory) -> Self {
        Backend::Dummy {
            history,
            drafts: Arc::default(),
        }
    }
}

impl RepositoryType {
    /// Build the repository `name`; remote clones live under `clones_dir`.
    pub fn from_config(name: &str, config: &RepositoryConfig, clones_dir: &Path) -> Result<Self> {
        let backend = match config.kind {
            RepositoryKind::Git => {
                let url = config.url.clone().ok_or_else(|| {
                    UserError::InvalidProject(format!("git repository '{name}' has no url"))
                })?;
                Backend::Git(GitRepository::new(
                    name,
                    url,
                    config.branch.clone(),
                    clones_dir.join(name),
                ))
            }
            RepositoryKind::Dummy => Backend::dummy(DummyRevisionHistory::from_commits(
                name,
                config.commits.clone(),
            )?),
        };
        Ok(Self {
            name: name.to_string(),
            project_space: config.project_space.clone(),
            search_type: config.history,
            backend,
        })
    }

    /// Wrap an in-memory history.
    pub fn dummy(history: DummyRevisionHistory, project_space: &str, search_type: SearchType) -> Self {
        Self {
            name: history.name().to_string(),
            project_space: project_space.to_string(),
            search_type,
            backend: Backend::dummy(history),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn project_space(&self) -> &str {
        &self.project_space
    }

    pub fn search_type(&self) -> SearchType {
        self.search_type
    }

    /// Make the history available. Remote repositories are cloned or updated.
    pub fn ensure_cloned(&self) -> Result<()> {
        match &self.backend {
            Backend::Git(g) => g.ensure_cloned(),
            Backend::Dummy { .. } => Ok(()),
        }
    }

    pub fn revision_history(&self) -> &dyn RevisionHistory {
        match &self.backend {
            Backend::Git(g) => g,
            Backend::Dummy { history, .. } => history,
        }
    }

    /// Export `revision` into a fresh directory.
    pub fn create_codebase(&self, revision: &Revision) -> Result<Codebase> {
        let dir = scratch_dir(&format!("{}_{}_", self.name, short(&revision.rev_id)))?;
        match &self.backend {
            Backend::Git(g) => g.export(revision, &dir)?,
            Backend::Dummy { history, .. } => history.export(revision, &dir)?,
        }
        Ok(Codebase::new(
            dir,
            &self.project_space,
            format!("{}(revision={})", self.name, revision.rev_id),
        ))
    }

    /// A writer whose working tree starts at `revision`, or at head.
    pub fn create_writer(&self, revision: Option<&Revision>) -> Result<Box<dyn Writer>> {
        match &self.backend {
            Backend::Git(g) => Ok(Box::new(g.create_writer(revision)?)),
            Backend::Dummy { history, drafts } => {
                let root = scratch_dir(&format!("{}_writer_", self.name))?;
                let start = match revision {
                    Some(r) => r.clone(),
                    None => history.find_highest_revision(None)?,
                };
                history.export(&start, &root)?;
                Ok(Box::new(DirectoryWriter::new(&self.name, root, Arc::clone(drafts))))
            }
        }
    }
}

fn short(rev_id: &str) -> &str {
    rev_id.get(..12).unwrap_or(rev_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codebase::testing::codebase_of;
    use crate::repositories::{DummyCommit, RevisionMetadata};
    use std::fs;

    fn repo() -> RepositoryType {
        let h = DummyRevisionHistory::from_commits(
            "public",
            vec![
                DummyCommit::new("1", &[]).with_file("a", "1"),
                DummyCommit::new("2", &["1"]).with_file("a", "2"),
            ],
        )
        .unwrap();
        RepositoryType::dummy(h, "public", SearchType::Linear)
    }

    #[test]
    fn dummy_creates_codebase_for_revision() {
        let r = repo();
        r.ensure_cloned().unwrap();
        let cb = r.create_codebase(&Revision::new("1", "public")).unwrap();
        assert_eq!(fs::read_to_string(cb.file("a")).unwrap(), "1");
        assert_eq!(cb.project_space(), "public");
        assert_eq!(cb.expression(), "public(revision=1)");
    }

    #[test]
    fn dummy_writer_starts_at_requested_revision() {
        let r = repo();
        let mut w = r.create_writer(Some(&Revision::new("1", "public"))).unwrap();
        assert_eq!(fs::read_to_string(w.root().join("a")).unwrap(), "1");

        let td = tempfile::tempdir().unwrap();
        let cb = codebase_of(td.path(), "cb", &[("b", "x")]);
        let draft = w
            .put_codebase(&cb, &RevisionMetadata::new("9", vec![]))
            .unwrap();
        assert_eq!(draft.revision, Revision::new("draft_1", "public"));
        assert!(!w.root().join("a").exists());
    }

    #[test]
    fn head_writer_defaults_to_last_commit() {
        let w = repo().create_writer(None).unwrap();
        assert_eq!(fs::read_to_string(w.root().join("a")).unwrap(), "2");
    }

    #[test]
    fn writers_of_one_repository_never_reuse_draft_ids() {
        let r = repo();
        let td = tempfile::tempdir().unwrap();
        let cb = codebase_of(td.path(), "cb", &[("b", "x")]);
        let md = RevisionMetadata::new("9", vec![]);

        let mut first = r.create_writer(None).unwrap();
        let mut second = r.create_writer(None).unwrap();
        let a = first.put_codebase(&cb, &md).unwrap();
        let b = second.put_codebase(&cb, &md).unwrap();
        assert_eq!(a.revision.rev_id, "draft_1");
        assert_eq!(b.revision.rev_id, "draft_2");
    }
}
