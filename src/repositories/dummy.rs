use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use super::{Revision, RevisionHistory, RevisionMetadata};
use crate::error::{Problem, UserError};

/// A commit of an in-memory repository.
///
/// Declared inline in the project configuration:
/// ```toml
/// [[repositories.internal.commits]]
/// id = "2"
/// parents = ["1"]
/// description = "Add README"
/// files = { "README" = "hello\n" }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DummyCommit {
    pub id: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    /// Full tree of the commit: relative path to file content.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl DummyCommit {
    pub fn new(id: &str, parents: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            parents: parents.iter().map(|p| p.to_string()).collect(),
            description: format!("commit {id}"),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// History of an in-memory repository; the last added commit is head.
#[derive(Debug, Clone)]
pub struct DummyRevisionHistory {
    name: String,
    commits: Vec<DummyCommit>,
    index: HashMap<String, usize>,
}

impl DummyRevisionHistory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commits: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn from_commits(name: impl Into<String>, commits: Vec<DummyCommit>) -> Result<Self> {
        let mut h = Self::new(name);
        for c in commits {
            h.add(c)?;
        }
        Ok(h)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a commit. Parents must already be registered.
    pub fn add(&mut self, commit: DummyCommit) -> Result<()> {
        if self.index.contains_key(&commit.id) {
            return Err(UserError::InvalidProject(format!(
                "commit '{}' is declared twice in repository '{}'",
                commit.id, self.name
            ))
            .into());
        }
        if let Some(missing) = commit.parents.iter().find(|p| !self.index.contains_key(*p)) {
            return Err(UserError::InvalidProject(format!(
                "commit '{}' in repository '{}' names unknown parent '{}'",
                commit.id, self.name, missing
            ))
            .into());
        }
        self.index.insert(commit.id.clone(), self.commits.len());
        self.commits.push(commit);
        Ok(())
    }

    pub fn commit(&self, rev_id: &str) -> Option<&DummyCommit> {
        self.index.get(rev_id).map(|&i| &self.commits[i])
    }

    /// Write the tree of `revision` under `dest`.
    pub fn export(&self, revision: &Revision, dest: &Path) -> Result<()> {
        let commit = self.commit(&revision.rev_id).ok_or_else(|| UserError::UnknownRevision {
            repository: self.name.clone(),
            revision: revision.rev_id.clone(),
        })?;
        for (rel, content) in &commit.files {
            let path = dest.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, content)?;
        }
        Ok(())
    }
}

impl RevisionHistory for DummyRevisionHistory {
    fn find_highest_revision(&self, rev_id: Option<&str>) -> Result<Revision> {
        match rev_id.filter(|id| !id.is_empty()) {
            None => {
                let head = self.commits.last().ok_or_else(|| {
                    Problem::Inconsistent(format!("repository '{}' has no commits", self.name))
                })?;
                Ok(Revision::new(&head.id, &self.name))
            }
            Some(id) if self.index.contains_key(id) => Ok(Revision::new(id, &self.name)),
            Some(id) => Err(UserError::UnknownRevision {
                repository: self.name.clone(),
                revision: id.to_string(),
            }
            .into()),
        }
    }

    fn get_metadata(&self, revision: &Revision) -> Result<Option<RevisionMetadata>> {
        if revision.repository_name != self.name {
            return Err(Problem::Inconsistent(format!(
                "revision {} asked of repository '{}'",
                revision, self.name
            ))
            .into());
        }
        let Some(commit) = self.commit(&revision.rev_id) else {
            return Ok(None);
        };
        let md = RevisionMetadata {
            id: commit.id.clone(),
            author: commit.author.clone(),
            date: commit.date.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            description: commit.description.clone(),
            parents: commit
                .parents
                .iter()
                .map(|p| Revision::new(p, &self.name))
                .collect(),
            fields: Vec::new(),
        };
        Ok(Some(md.with_parsed_fields()))
    }
}
