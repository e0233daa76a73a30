//! Revisions, their metadata, and the history walk shared by every
//! repository kind.

mod dummy;
mod graph;
mod kind;

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Problem, UserError};

pub use dummy::{DummyCommit, DummyRevisionHistory};
pub use graph::{RevisionGraph, RevisionGraphBuilder};
pub use kind::RepositoryType;

/// Description field written into migrated changes, naming the source revision.
pub const MIGRATED_REV_KEY: &str = "MIGRATED_REVID";

/// One commit in one named repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Revision {
    #[serde(rename = "rev_id", alias = "revId")]
    pub rev_id: String,
    #[serde(rename = "repository_name", alias = "repositoryName")]
    pub repository_name: String,
}

impl Revision {
    pub fn new(rev_id: impl Into<String>, repository_name: impl Into<String>) -> Self {
        Self {
            rev_id: rev_id.into(),
            repository_name: repository_name.into(),
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{{}}}", self.repository_name, self.rev_id)
    }
}

/// Parses the `repository{id}` form produced by `Display`.
impl FromStr for Revision {
    type Err = UserError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || UserError::RevisionSyntax(s.to_string());
        let body = s.trim().strip_suffix('}').ok_or_else(bad)?;
        let (repo, id) = body.split_once('{').ok_or_else(bad)?;
        if repo.is_empty() || id.is_empty() || id.contains(['{', '}']) {
            return Err(bad());
        }
        Ok(Revision::new(id, repo))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionMetadata {
    pub id: String,
    /// `None` when the author has been scrubbed.
    pub author: Option<String>,
    pub date: DateTime<Utc>,
    pub description: String,
    pub parents: Vec<Revision>,
    /// `KEY=value` lines found in the description, in order.
    pub fields: Vec<(String, String)>,
}

static FIELD_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_-]+$").expect("field key regex"));

impl RevisionMetadata {
    pub fn new(id: impl Into<String>, parents: Vec<Revision>) -> Self {
        Self {
            id: id.into(),
            author: None,
            date: DateTime::<Utc>::UNIX_EPOCH,
            description: String::new(),
            parents,
            fields: Vec::new(),
        }
    }

    /// Fills `fields` from the description. The description itself is kept.
    pub fn with_parsed_fields(mut self) -> Self {
        for line in self.description.lines() {
            if let Some((key, value)) = line.split_once('=')
                && FIELD_KEY.is_match(key)
            {
                self.fields.push((key.to_string(), value.to_string()));
            }
        }
        self
    }

    /// First value recorded for `key`, if any.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Combine several revisions' metadata into one, for a batched migration.
    ///
    /// Ids and authors are joined with `", "`, the latest date wins,
    /// descriptions are separated by a rule line, and a
    /// `MIGRATED_REVID=<id>` trailer is appended when `migrated_from` is set.
    /// Returns `None` for an empty slice.
    pub fn concatenate(list: &[RevisionMetadata], migrated_from: Option<&Revision>) -> Option<Self> {
        let first = list.first()?;
        let mut date = first.date;
        let mut parents = Vec::new();
        let mut fields = Vec::new();
        let mut descriptions: Vec<String> = Vec::with_capacity(list.len() + 1);

        for rm in list {
            if rm.date > date {
                date = rm.date;
            }
            descriptions.push(rm.description.clone());
            parents.extend(rm.parents.iter().cloned());
            fields.extend(rm.fields.iter().cloned());
        }

        if let Some(from) = migrated_from {
            descriptions.push(format!("{}={}", MIGRATED_REV_KEY, from.rev_id));
        }

        let authors: Vec<&str> = list.iter().filter_map(|rm| rm.author.as_deref()).collect();

        Some(Self {
            id: list.iter().map(|rm| rm.id.as_str()).collect::<Vec<_>>().join(", "),
            author: (!authors.is_empty()).then(|| authors.join(", ")),
            date,
            description: descriptions.join("\n\n-------------\n"),
            parents,
            fields,
        })
    }
}

/// How far back a history walk follows parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    /// Follow only the first parent of each revision.
    #[default]
    Linear,
    /// Follow every parent, breadth-first.
    Branched,
}

/// Read access to one repository's history.
pub trait RevisionHistory {
    /// The highest revision at or below `rev_id`; `None` means head.
    fn find_highest_revision(&self, rev_id: Option<&str>) -> Result<Revision>;

    /// Metadata for `revision`, or `Ok(None)` if the repository does not know it.
    fn get_metadata(&self, revision: &Revision) -> Result<Option<RevisionMetadata>>;

    /// All heads (one per branch). Single-head repositories return head only.
    fn find_head_revisions(&self) -> Result<Vec<Revision>> {
        Ok(vec![self.find_highest_revision(None)?])
    }
}

/// Decides where a history walk stops and what it produces.
pub trait RevisionMatcher {
    type Output;

    /// A matching revision is a stopping node: its parents are not expanded.
    fn matches(&self, revision: &Revision) -> Result<bool>;

    /// Called once with the non-matching graph and the matching revisions in
    /// the order they were encountered.
    fn make_result(&self, non_matching: RevisionGraph, matching: Vec<Revision>)
    -> Result<Self::Output>;
}

/// Walk history backwards from `start` (or the heads), stopping at revisions
/// accepted by `matcher`.
///
/// Revisions are visited breadth-first, child before parent; each revision is
/// queued at most once even if reached through several paths or if the
/// history reports a parent twice. A revision whose metadata cannot be read
/// aborts the walk.
pub fn find_revisions<H, M>(
    history: &H,
    start: Option<Revision>,
    matcher: &M,
    search_type: SearchType,
) -> Result<M::Output>
where
    H: RevisionHistory + ?Sized,
    M: RevisionMatcher,
{
    let starting = match start {
        Some(rev) => vec![rev],
        None => history.find_head_revisions()?,
    };
    let (graph, matching) = walk(history, starting, search_type, |rev| matcher.matches(rev))?;
    matcher.make_result(graph, matching)
}

/// Walk the complete reachable history from `roots`.
pub fn build_graph<H>(history: &H, roots: Vec<Revision>, search_type: SearchType) -> Result<RevisionGraph>
where
    H: RevisionHistory + ?Sized,
{
    let (graph, _) = walk(history, roots, search_type, |_| Ok(false))?;
    Ok(graph)
}

fn walk<H, F>(
    history: &H,
    starting: Vec<Revision>,
    search_type: SearchType,
    mut is_stop: F,
) -> Result<(RevisionGraph, Vec<Revision>)>
where
    H: RevisionHistory + ?Sized,
    F: FnMut(&Revision) -> Result<bool>,
{
    if starting.len() > 1 && search_type == SearchType::Linear {
        return Err(Problem::Inconsistent(format!(
            "repository {} has multiple heads; linear history cannot be searched",
            starting[0].repository_name
        ))
        .into());
    }

    let mut builder = RevisionGraph::builder(starting.clone());
    let mut matching = Vec::new();
    let mut visited: HashSet<Revision> = starting.iter().cloned().collect();
    let mut work: VecDeque<Revision> = starting.into_iter().collect();

    while let Some(current) = work.pop_front() {
        if is_stop(&current)? {
            tracing::debug!(revision = %current, "stopping node");
            matching.push(current);
            continue;
        }

        let metadata = history
            .get_metadata(&current)
            .with_context(|| format!("reading metadata for {current}"))?
            .ok_or_else(|| Problem::MissingMetadata(current.to_string()))?;

        let parents: &[Revision] = match search_type {
            SearchType::Linear => &metadata.parents[..metadata.parents.len().min(1)],
            SearchType::Branched => &metadata.parents,
        };
        for parent in parents {
            if visited.insert(parent.clone()) {
                work.push_back(parent.clone());
            }
        }
        builder.add_revision(current, metadata);
    }

    Ok((builder.build(), matching))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> DummyRevisionHistory {
        // 1 <- 2 <- {3a, 3b} <- 4 (merge of 3a and 3b)
        let mut h = DummyRevisionHistory::new("repo");
        h.add(DummyCommit::new("1", &[])).unwrap();
        h.add(DummyCommit::new("2", &["1"])).unwrap();
        h.add(DummyCommit::new("3a", &["2"])).unwrap();
        h.add(DummyCommit::new("3b", &["2"])).unwrap();
        h.add(DummyCommit::new("4", &["3a", "3b"])).unwrap();
        h
    }

    struct StopAt(Vec<&'static str>);

    impl RevisionMatcher for StopAt {
        type Output = (Vec<String>, Vec<String>);

        fn matches(&self, revision: &Revision) -> Result<bool> {
            Ok(self.0.contains(&revision.rev_id.as_str()))
        }

        fn make_result(&self, g: RevisionGraph, m: Vec<Revision>) -> Result<Self::Output> {
            Ok((
                g.breadth_first_history().into_iter().map(|r| r.rev_id).collect(),
                m.into_iter().map(|r| r.rev_id).collect(),
            ))
        }
    }

    #[test]
    fn revision_display_and_parse_round_trip() {
        let r: Revision = "internal{1234}".parse().unwrap();
        assert_eq!(r, Revision::new("1234", "internal"));
        assert_eq!(r.to_string(), "internal{1234}");
    }

    #[test]
    fn revision_parse_rejects_garbage() {
        for bad in ["internal", "{1}", "internal{}", "a{b}c", "a{b{c}"] {
            assert!(bad.parse::<Revision>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn revision_reads_camel_case_fields() {
        let r: Revision =
            serde_json::from_str(r#"{"revId":"7","repositoryName":"public"}"#).unwrap();
        assert_eq!(r, Revision::new("7", "public"));
    }

    #[test]
    fn parses_description_fields() {
        let mut md = RevisionMetadata::new("5", vec![]);
        md.description = "Fix things\n\nMIGRATED_REVID=abc\nnot a field: x=y\nBUG=12=3".into();
        let md = md.with_parsed_fields();
        assert_eq!(md.field(MIGRATED_REV_KEY), Some("abc"));
        assert_eq!(md.field("BUG"), Some("12=3"));
        assert_eq!(md.fields.len(), 2);
    }

    #[test]
    fn concatenate_joins_and_appends_trailer() {
        let mut a = RevisionMetadata::new("1", vec![Revision::new("0", "r")]);
        a.author = Some("alice".into());
        a.description = "first".into();
        a.date = DateTime::from_timestamp(100, 0).unwrap();
        let mut b = RevisionMetadata::new("2", vec![Revision::new("1", "r")]);
        b.author = Some("bob".into());
        b.description = "second".into();
        b.date = DateTime::from_timestamp(200, 0).unwrap();

        let c = RevisionMetadata::concatenate(&[a, b], Some(&Revision::new("2", "r"))).unwrap();
        assert_eq!(c.id, "1, 2");
        assert_eq!(c.author.as_deref(), Some("alice, bob"));
        assert_eq!(c.date.timestamp(), 200);
        assert_eq!(
            c.description,
            "first\n\n-------------\nsecond\n\n-------------\nMIGRATED_REVID=2"
        );
        assert_eq!(c.parents.len(), 2);
        assert!(RevisionMetadata::concatenate(&[], None).is_none());
    }

    #[test]
    fn branched_walk_stops_on_each_path() {
        let (pending, stops) = find_revisions(
            &history(),
            None,
            &StopAt(vec!["3b", "2"]),
            SearchType::Branched,
        )
        .unwrap();
        assert_eq!(pending, vec!["4", "3a"]);
        assert_eq!(stops, vec!["3b", "2"]);
    }

    #[test]
    fn linear_walk_follows_first_parent_only() {
        let (pending, stops) =
            find_revisions(&history(), None, &StopAt(vec!["1"]), SearchType::Linear).unwrap();
        assert_eq!(pending, vec!["4", "3a", "2"]);
        assert_eq!(stops, vec!["1"]);
    }

    #[test]
    fn branched_walk_visits_diamond_nodes_once() {
        let g = build_graph(&history(), vec![Revision::new("4", "repo")], SearchType::Branched)
            .unwrap();
        assert_eq!(g.len(), 5);
        assert_eq!(g.revisions().len(), 5);
    }

    #[test]
    fn missing_metadata_is_fatal() {
        let mut h = DummyRevisionHistory::new("repo");
        h.add(DummyCommit::new("1", &[])).unwrap();
        let err = find_revisions(
            &h,
            Some(Revision::new("nope", "repo")),
            &StopAt(vec![]),
            SearchType::Branched,
        )
        .unwrap_err();
        assert!(err.chain().any(|e| e.downcast_ref::<Problem>().is_some()));
    }

    struct Misreporting;

    impl RevisionHistory for Misreporting {
        fn find_highest_revision(&self, _: Option<&str>) -> Result<Revision> {
            Ok(Revision::new("a", "loop"))
        }

        fn get_metadata(&self, revision: &Revision) -> Result<Option<RevisionMetadata>> {
            // a -> b -> a, and every node lists itself as a parent too.
            let other = if revision.rev_id == "a" { "b" } else { "a" };
            Ok(Some(RevisionMetadata::new(
                revision.rev_id.clone(),
                vec![revision.clone(), Revision::new(other, "loop")],
            )))
        }
    }

    #[test]
    fn walk_terminates_on_cyclic_parents() {
        let g = build_graph(
            &Misreporting,
            vec![Revision::new("a", "loop")],
            SearchType::Branched,
        )
        .unwrap();
        assert_eq!(g.len(), 2);
    }
}
