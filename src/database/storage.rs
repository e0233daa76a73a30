use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::UserError;
use crate::repositories::Revision;

/// Two revisions in different repositories with the same logical content.
///
/// Unordered: `(a, b)` and `(b, a)` compare and hash equal.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredEquivalence")]
pub struct Equivalence {
    pub rev1: Revision,
    pub rev2: Revision,
}

impl Equivalence {
    pub fn new(rev1: Revision, rev2: Revision) -> Result<Self, UserError> {
        if rev1.repository_name == rev2.repository_name {
            return Err(UserError::InvalidEquivalence(format!(
                "{rev1} and {rev2} are in the same repository"
            )));
        }
        Ok(Self { rev1, rev2 })
    }

    pub fn has_revision(&self, revision: &Revision) -> bool {
        self.rev1 == *revision || self.rev2 == *revision
    }

    /// The side that is not `revision`, if `revision` is one of the two.
    pub fn other_revision(&self, revision: &Revision) -> Option<&Revision> {
        if self.rev1 == *revision {
            Some(&self.rev2)
        } else if self.rev2 == *revision {
            Some(&self.rev1)
        } else {
            None
        }
    }

    pub fn revision_for_repository(&self, repository: &str) -> Option<&Revision> {
        [&self.rev1, &self.rev2]
            .into_iter()
            .find(|r| r.repository_name == repository)
    }

    fn ordered(&self) -> (&Revision, &Revision) {
        if self.rev1 <= self.rev2 {
            (&self.rev1, &self.rev2)
        } else {
            (&self.rev2, &self.rev1)
        }
    }
}

#[derive(Deserialize)]
struct StoredEquivalence {
    rev1: Revision,
    rev2: Revision,
}

impl TryFrom<StoredEquivalence> for Equivalence {
    type Error = String;

    fn try_from(stored: StoredEquivalence) -> Result<Self, Self::Error> {
        Equivalence::new(stored.rev1, stored.rev2).map_err(|e| e.to_string())
    }
}

impl PartialEq for Equivalence {
    fn eq(&self, other: &Self) -> bool {
        self.ordered() == other.ordered()
    }
}

impl Hash for Equivalence {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ordered().hash(state);
    }
}

impl fmt::Display for Equivalence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} == {}", self.rev1, self.rev2)
    }
}

/// A migration whose result was written to the target repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "StoredMigration")]
pub struct SubmittedMigration {
    pub from_revisions: Vec<Revision>,
    pub to_revision: Revision,
}

impl SubmittedMigration {
    pub fn new(from_revisions: Vec<Revision>, to_revision: Revision) -> Self {
        Self {
            from_revisions,
            to_revision,
        }
    }

    /// Records the same target and includes `from`.
    pub fn covers(&self, from: &Revision, to: &Revision) -> bool {
        self.to_revision == *to && self.from_revisions.contains(from)
    }
}

impl fmt::Display for SubmittedMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let from: Vec<String> = self.from_revisions.iter().map(Revision::to_string).collect();
        write!(f, "[{}] -> {}", from.join(", "), self.to_revision)
    }
}

/// Every spelling of a migration found in databases written so far.
#[derive(Deserialize)]
struct StoredMigration {
    #[serde(default, alias = "fromRevisions")]
    from_revisions: Vec<Revision>,
    #[serde(default, alias = "fromRevision")]
    from_revision: Option<Revision>,
    #[serde(alias = "toRevision")]
    to_revision: Revision,
}

impl TryFrom<StoredMigration> for SubmittedMigration {
    type Error = String;

    fn try_from(stored: StoredMigration) -> Result<Self, Self::Error> {
        let mut from_revisions = stored.from_revisions;
        if let Some(single) = stored.from_revision
            && !from_revisions.contains(&single)
        {
            from_revisions.push(single);
        }
        if from_revisions.is_empty() {
            return Err(format!(
                "migration to {} has no source revisions",
                stored.to_revision
            ));
        }
        Ok(Self {
            from_revisions,
            to_revision: stored.to_revision,
        })
    }
}

/// The whole persisted document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbStorage {
    #[serde(default)]
    pub equivalences: Vec<Equivalence>,
    #[serde(default)]
    pub migrations: Vec<SubmittedMigration>,
}
