use anyhow::Result;

use super::{Db, Equivalence};
use crate::repositories::{Revision, RevisionGraph, RevisionMatcher};

/// Stops a history walk at revisions that have an equivalence in
/// `target_repository`.
pub struct EquivalenceMatcher<'a> {
    target_repository: String,
    db: &'a dyn Db,
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    /// One per stopping revision, in the order the walk reached them.
    pub equivalences: Vec<Equivalence>,
    /// Everything visited before reaching an equivalence.
    pub revisions_since_equivalence: RevisionGraph,
}

impl<'a> EquivalenceMatcher<'a> {
    pub fn new(target_repository: impl Into<String>, db: &'a dyn Db) -> Self {
        Self {
            target_repository: target_repository.into(),
            db,
        }
    }
}

impl RevisionMatcher for EquivalenceMatcher<'_> {
    type Output = MatchResult;

    fn matches(&self, revision: &Revision) -> Result<bool> {
        Ok(!self
            .db
            .find_equivalences(revision, &self.target_repository)
            .is_empty())
    }

    fn make_result(&self, non_matching: RevisionGraph, matching: Vec<Revision>) -> Result<MatchResult> {
        let mut equivalences = Vec::with_capacity(matching.len());
        for revision in matching {
            let counterparts = self.db.find_equivalences(&revision, &self.target_repository);
            // The most recently recorded counterpart is the freshest fact.
            let Some(counterpart) = counterparts.last().cloned() else {
                continue;
            };
            if counterparts.len() > 1 {
                tracing::info!(
                    %revision,
                    chosen = %counterpart,
                    count = counterparts.len(),
                    "several equivalent revisions recorded"
                );
            }
            equivalences.push(Equivalence::new(revision, counterpart)?);
        }
        Ok(MatchResult {
            equivalences,
            revisions_since_equivalence: non_matching,
        })
    }
}
