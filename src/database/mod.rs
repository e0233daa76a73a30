//! The equivalence database: equivalences found between repositories and
//! migrations already submitted, persisted as one JSON document.

mod bookkeeper;
mod matcher;
mod storage;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::DbLocation;
use crate::error::Problem;
use crate::repositories::Revision;

pub use bookkeeper::Bookkeeper;
pub use matcher::{EquivalenceMatcher, MatchResult};
pub use storage::{DbStorage, Equivalence, SubmittedMigration};

/// Append-only store of equivalences and submitted migrations.
pub trait Db {
    /// Record `equivalence`; recording a known one again changes nothing.
    fn note_equivalence(&mut self, equivalence: Equivalence);

    /// Revisions of `other_repository` equivalent to `revision`, in the order
    /// they were recorded.
    fn find_equivalences(&self, revision: &Revision, other_repository: &str) -> Vec<Revision>;

    /// Record `migration`. Returns false if it was already recorded.
    fn note_migration(&mut self, migration: SubmittedMigration) -> bool;

    fn has_migration(&self, migration: &SubmittedMigration) -> bool;

    fn equivalences(&self) -> &[Equivalence];

    fn migrations(&self) -> &[SubmittedMigration];

    /// Persist the current contents.
    fn write(&self) -> Result<()>;
}

/// A [`Db`] kept in memory and written as a whole to a JSON file.
#[derive(Debug, Default)]
pub struct FileDb {
    /// `None` for a throwaway database that is never written.
    location: Option<PathBuf>,
    storage: DbStorage,
}

impl FileDb {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the database at `location`. A missing file is an empty database.
    pub fn open(location: &DbLocation) -> Result<Self> {
        match location {
            DbLocation::Dummy => Ok(Self::in_memory()),
            DbLocation::File(path) => {
                let storage = if path.exists() {
                    load(path)?
                } else {
                    tracing::info!(path = %path.display(), "database not found, starting empty");
                    DbStorage::default()
                };
                Ok(Self {
                    location: Some(path.clone()),
                    storage,
                })
            }
        }
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }
}

fn load(path: &Path) -> Result<DbStorage> {
    let txt = fs::read_to_string(path)
        .with_context(|| format!("reading database {}", path.display()))?;
    serde_json::from_str(&txt).map_err(|e| {
        Problem::MalformedDatabase {
            location: path.display().to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

impl Db for FileDb {
    fn note_equivalence(&mut self, equivalence: Equivalence) {
        if !self.storage.equivalences.contains(&equivalence) {
            tracing::debug!(%equivalence, "noting equivalence");
            self.storage.equivalences.push(equivalence);
        }
    }

    fn find_equivalences(&self, revision: &Revision, other_repository: &str) -> Vec<Revision> {
        self.storage
            .equivalences
            .iter()
            .filter_map(|e| e.other_revision(revision))
            .filter(|r| r.repository_name == other_repository)
            .cloned()
            .collect()
    }

    fn note_migration(&mut self, migration: SubmittedMigration) -> bool {
        if self.has_migration(&migration) {
            return false;
        }
        tracing::debug!(%migration, "noting migration");
        self.storage.migrations.push(migration);
        true
    }

    fn has_migration(&self, migration: &SubmittedMigration) -> bool {
        self.storage.migrations.contains(migration)
    }

    fn equivalences(&self) -> &[Equivalence] {
        &self.storage.equivalences
    }

    fn migrations(&self) -> &[SubmittedMigration] {
        &self.storage.migrations
    }

    fn write(&self) -> Result<()> {
        let Some(path) = &self.location else {
            tracing::debug!("in-memory database, nothing written");
            return Ok(());
        };
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;

        let mut json = serde_json::to_string_pretty(&self.storage)?;
        json.push('\n');
        // Replace the file in one step so a crash never leaves half a database.
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        fs::write(tmp.path(), json)?;
        tmp.persist(path)
            .with_context(|| format!("writing database {}", path.display()))?;
        tracing::debug!(path = %path.display(), "database written");
        Ok(())
    }
}
