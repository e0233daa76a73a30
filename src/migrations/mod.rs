//! Planning and executing migrations: the revisions of one repository not
//! yet reflected in another, replayed oldest first.

mod scrubber;

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fmt;

use crate::codebase::Codebase;
use crate::config::MigrationConfig;
use crate::context::ProjectContext;
use crate::database::{Db, Equivalence, EquivalenceMatcher, SubmittedMigration};
use crate::error::{Problem, UserError};
use crate::repositories::{
    Revision, RevisionHistory, RevisionMetadata, SearchType, find_revisions,
};
use crate::translation::TranslateOptions;
use crate::writer::{DraftRevision, Writer};

pub use scrubber::MetadataScrubber;

/// One unit of work: source revisions to replay onto the target repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub name: String,
    pub from_repository: String,
    pub to_repository: String,
    /// Oldest first; never empty.
    pub from_revisions: Vec<Revision>,
    /// `None` until the two repositories have ever been found equivalent.
    pub since_equivalence: Option<Equivalence>,
}

impl Migration {
    /// The newest source revision; its content is what gets written.
    pub fn most_recent_revision(&self) -> Option<&Revision> {
        self.from_revisions.last()
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let revs: Vec<String> = self.from_revisions.iter().map(Revision::to_string).collect();
        write!(
            f,
            "{}: {} -> {} [{}]",
            self.name,
            self.from_repository,
            self.to_repository,
            revs.join(", ")
        )?;
        if let Some(eq) = &self.since_equivalence {
            write!(f, " since {eq}")?;
        }
        Ok(())
    }
}

/// Pending migrations of `config`, oldest first.
///
/// Walks `history` from head until it meets revisions with an equivalence in
/// the target repository. The first equivalence reached anchors every
/// migration; others are only logged. Without any equivalence the whole
/// reachable history is pending.
pub fn determine_migrations(
    history: &dyn RevisionHistory,
    config: &MigrationConfig,
    search_type: SearchType,
    db: &dyn Db,
) -> Result<Vec<Migration>> {
    let matcher = EquivalenceMatcher::new(&config.to_repository, db);
    let found = find_revisions(history, None, &matcher, search_type)?;

    let mut pending = found.revisions_since_equivalence.breadth_first_history();
    pending.reverse();
    if pending.is_empty() {
        tracing::info!(migration = %config.name, "no revisions since last equivalence");
        return Ok(Vec::new());
    }

    let since = found.equivalences.first().cloned();
    for other in found.equivalences.iter().skip(1) {
        tracing::info!(migration = %config.name, equivalence = %other, "ignoring later-discovered equivalence");
    }
    match &since {
        Some(eq) => tracing::info!(migration = %config.name, count = pending.len(), equivalence = %eq, "revisions since equivalence"),
        None => tracing::warn!(migration = %config.name, count = pending.len(), "no equivalence with target; migrating entire history"),
    }

    let make = |from_revisions: Vec<Revision>| Migration {
        name: config.name.clone(),
        from_repository: config.from_repository.clone(),
        to_repository: config.to_repository.clone(),
        from_revisions,
        since_equivalence: since.clone(),
    };
    Ok(if config.separate_revisions {
        pending.into_iter().map(|r| make(vec![r])).collect()
    } else {
        vec![make(pending)]
    })
}

/// Whether `migration` is to be skipped. A migration is skipped only if every
/// one of its revisions is in `skip`; partial overlap is an error.
pub fn check_skip(migration: &Migration, skip: &HashSet<Revision>) -> Result<bool, UserError> {
    let skipped = migration
        .from_revisions
        .iter()
        .filter(|r| skip.contains(*r))
        .count();
    if skipped == 0 {
        Ok(false)
    } else if skipped == migration.from_revisions.len() {
        Ok(true)
    } else {
        Err(UserError::PartialSkip(migration.to_string()))
    }
}

/// Metadata for a migration: each revision's metadata run through the
/// migration's scrubbers, concatenated with a trailer naming `most_recent`.
///
/// Authors are dropped when `scrub_authors` is set, before the log template
/// is rendered.
pub fn process_metadata(
    history: &dyn RevisionHistory,
    revisions: &[Revision],
    config: &MigrationConfig,
    most_recent: &Revision,
) -> Result<RevisionMetadata> {
    let scrubber = config
        .metadata_scrubber
        .as_ref()
        .map(MetadataScrubber::new)
        .transpose()?;

    let mut list = Vec::with_capacity(revisions.len());
    for rev in revisions {
        let mut md = history
            .get_metadata(rev)?
            .ok_or_else(|| Problem::MissingMetadata(rev.to_string()))?;
        if let Some(s) = &scrubber {
            md = s.scrub(md);
        }
        if config.scrub_authors {
            md.author = None;
        }
        if let Some(s) = &scrubber {
            md = s.format_description(md);
        }
        list.push(md);
    }
    RevisionMetadata::concatenate(&list, Some(most_recent))
        .ok_or_else(|| Problem::Inconsistent("migration without revisions".into()).into())
}

/// Executes migrations within one project.
pub struct Migrator<'a> {
    ctx: &'a ProjectContext,
}

impl<'a> Migrator<'a> {
    pub fn new(ctx: &'a ProjectContext) -> Self {
        Self { ctx }
    }

    /// [`determine_migrations`] for a configured migration, walking the source
    /// repository the way its configuration says.
    pub fn determine_migrations(&self, config: &MigrationConfig, db: &dyn Db) -> Result<Vec<Migration>> {
        let from = self.ctx.cloned_repository(&config.from_repository)?;
        self.ctx.cloned_repository(&config.to_repository)?;
        determine_migrations(from.revision_history(), config, from.search_type(), db)
    }

    /// Translate the newest source revision into the target space, write it
    /// through `writer`, and record the submitted migration.
    ///
    /// `writer` must hold the target as left by all earlier migrations.
    /// `reference_from`, when set, is the source revision whose translation
    /// `writer` currently holds; inverse translators merge against it.
    pub fn migrate(
        &self,
        migration: &Migration,
        config: &MigrationConfig,
        writer: &mut dyn Writer,
        db: &mut dyn Db,
        reference_from: Option<&Revision>,
    ) -> Result<DraftRevision> {
        let from_repo = self.ctx.repository(&migration.from_repository)?;
        let to_repo = self.ctx.repository(&migration.to_repository)?;
        let most_recent = migration
            .most_recent_revision()
            .ok_or_else(|| Problem::Inconsistent(format!("empty migration {}", migration.name)))?;

        let source = from_repo.create_codebase(most_recent)?;
        let translated = if from_repo.project_space() == to_repo.project_space() {
            source
        } else {
            let translator = self
                .ctx
                .translator(from_repo.project_space(), to_repo.project_space())?;
            let mut options = TranslateOptions {
                reference_to: Some(Codebase::new(
                    writer.root(),
                    to_repo.project_space(),
                    format!("{}(localroot={})", to_repo.name(), writer.root().display()),
                )),
                reference_from: None,
            };
            if translator.is_inverse()
                && let Some(rev) = reference_from
            {
                options.reference_from = Some(from_repo.create_codebase(rev)?);
            }
            translator
                .translate(&source, &options, self.ctx)
                .with_context(|| format!("translating {most_recent}"))?
        };

        let metadata = process_metadata(
            from_repo.revision_history(),
            &migration.from_revisions,
            config,
            most_recent,
        )?;
        let draft = writer.put_codebase(&translated, &metadata)?;
        db.note_migration(SubmittedMigration::new(
            migration.from_revisions.clone(),
            draft.revision.clone(),
        ));
        tracing::info!(migration = %migration, draft = %draft.revision, "migrated");
        Ok(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::context_of;
    use crate::database::FileDb;
    use crate::repositories::{DummyCommit, DummyRevisionHistory};
    use std::fs;

    fn rev(s: &str) -> Revision {
        s.parse().unwrap()
    }

    fn config(separate: bool) -> MigrationConfig {
        MigrationConfig {
            name: "publish".into(),
            from_repository: "internal".into(),
            to_repository: "public".into(),
            separate_revisions: separate,
            scrub_authors: false,
            metadata_scrubber: None,
        }
    }

    fn history() -> DummyRevisionHistory {
        DummyRevisionHistory::from_commits(
            "internal",
            (1..=4)
                .map(|i| {
                    let id = i.to_string();
                    let parent = (i - 1).to_string();
                    let parents: Vec<&str> = if i == 1 { vec![] } else { vec![parent.as_str()] };
                    DummyCommit::new(&id, &parents)
                })
                .collect(),
        )
        .unwrap()
    }

    fn ids(m: &Migration) -> Vec<&str> {
        m.from_revisions.iter().map(|r| r.rev_id.as_str()).collect()
    }

    #[test]
    fn without_equivalence_everything_is_pending() {
        let db = FileDb::in_memory();
        let ms = determine_migrations(&history(), &config(false), SearchType::Linear, &db).unwrap();
        assert_eq!(ms.len(), 1);
        assert_eq!(ids(&ms[0]), vec!["1", "2", "3", "4"]);
        assert!(ms[0].since_equivalence.is_none());
    }

    #[test]
    fn batched_and_separate_cover_the_same_revisions() {
        let mut db = FileDb::in_memory();
        db.note_equivalence(Equivalence::new(rev("internal{2}"), rev("public{a}")).unwrap());

        let batched = determine_migrations(&history(), &config(false), SearchType::Linear, &db).unwrap();
        let separate = determine_migrations(&history(), &config(true), SearchType::Linear, &db).unwrap();

        assert_eq!(batched.len(), 1);
        assert_eq!(separate.len(), 2);
        let flat: Vec<Revision> = separate.iter().flat_map(|m| m.from_revisions.clone()).collect();
        assert_eq!(flat, batched[0].from_revisions);
        assert_eq!(ids(&separate[0]), vec!["3"]);
        for m in separate.iter().chain(&batched) {
            assert_eq!(
                m.since_equivalence.as_ref().unwrap().revision_for_repository("public"),
                Some(&rev("public{a}"))
            );
        }
    }

    #[test]
    fn equivalence_at_head_means_nothing_to_do() {
        let mut db = FileDb::in_memory();
        db.note_equivalence(Equivalence::new(rev("internal{4}"), rev("public{a}")).unwrap());
        assert!(
            determine_migrations(&history(), &config(true), SearchType::Linear, &db)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn skips_are_all_or_nothing() {
        let db = FileDb::in_memory();
        let ms = determine_migrations(&history(), &config(false), SearchType::Linear, &db).unwrap();
        let m = &ms[0];

        assert!(!check_skip(m, &HashSet::new()).unwrap());
        let all: HashSet<Revision> = m.from_revisions.iter().cloned().collect();
        assert!(check_skip(m, &all).unwrap());
        let some: HashSet<Revision> = [rev("internal{2}")].into();
        assert!(matches!(check_skip(m, &some), Err(UserError::PartialSkip(_))));
    }

    #[test]
    fn metadata_is_concatenated_and_scrubbed() {
        let h = DummyRevisionHistory::from_commits(
            "internal",
            vec![
                DummyCommit {
                    author: Some("ada".into()),
                    ..DummyCommit::new("1", &[])
                },
                DummyCommit {
                    author: Some("bob".into()),
                    ..DummyCommit::new("2", &["1"])
                },
            ],
        )
        .unwrap();
        let revs = vec![rev("internal{1}"), rev("internal{2}")];

        let mut plain = config(false);
        let md = process_metadata(&h, &revs, &plain, &revs[1]).unwrap();
        assert_eq!(md.author.as_deref(), Some("ada, bob"));
        assert!(md.description.ends_with("MIGRATED_REVID=2"));

        plain.scrub_authors = true;
        let scrubbed = process_metadata(&h, &revs, &plain, &revs[1]).unwrap();
        assert!(scrubbed.author.is_none());

        assert!(process_metadata(&h, &[rev("internal{9}")], &plain, &revs[1]).is_err());
    }

    #[test]
    fn scrubbers_run_on_each_revision_before_concatenation() {
        let h = DummyRevisionHistory::from_commits(
            "internal",
            vec![
                DummyCommit {
                    author: Some("robot".into()),
                    description: "Secret\n\nPublic:\nbob fixed it\n\nORIGINAL_AUTHOR=bob".into(),
                    ..DummyCommit::new("1", &[])
                },
                DummyCommit {
                    author: Some("ada <ada@example.com>".into()),
                    description: "Tidy".into(),
                    ..DummyCommit::new("2", &["1"])
                },
            ],
        )
        .unwrap();
        let revs = vec![rev("internal{1}"), rev("internal{2}")];
        let mut config = config(false);
        config.metadata_scrubber = Some(crate::config::MetadataScrubberConfig {
            usernames_to_scrub: vec!["bob".into()],
            restore_original_author: true,
            log_format: "{description} [{author}]".into(),
            ..Default::default()
        });

        let md = process_metadata(&h, &revs, &config, &revs[1]).unwrap();
        assert_eq!(md.author.as_deref(), Some("user <user>, ada <ada@example.com>"));
        assert_eq!(
            md.description,
            "user fixed it [user <user>]\n\n-------------\nTidy [ada <ada@example.com>]\n\n-------------\nMIGRATED_REVID=2"
        );

        config.scrub_authors = true;
        let md = process_metadata(&h, &revs, &config, &revs[1]).unwrap();
        assert!(md.author.is_none());
        assert!(md.description.starts_with("user fixed it []"));
    }

    const PROJECT: &str = r#"
        name = "migrate-test"

        [repositories.internal]
        kind = "dummy"
        project_space = "internal"
        [[repositories.internal.commits]]
        id = "1"
        files = { "java/a.txt" = "one" }
        [[repositories.internal.commits]]
        id = "2"
        parents = ["1"]
        files = { "java/a.txt" = "two" }
        [[repositories.internal.commits]]
        id = "3"
        parents = ["2"]
        files = { "java/a.txt" = "three", "java/b.txt" = "b" }

        [repositories.public]
        kind = "dummy"
        [[repositories.public.commits]]
        id = "p1"
        files = { "src/a.txt" = "one" }

        [editors.mv]
        type = "renamer"
        mappings = { "java" = "src" }

        [[translators]]
        from_project_space = "internal"
        to_project_space = "public"
        steps = ["mv"]

        [[migrations]]
        name = "publish"
        from_repository = "internal"
        to_repository = "public"
        separate_revisions = true
    "#;

    #[test]
    fn migrates_each_revision_through_the_writer() {
        let ctx = context_of(PROJECT);
        let mut db = FileDb::in_memory();
        db.note_equivalence(Equivalence::new(rev("internal{1}"), rev("public{p1}")).unwrap());

        let config = ctx.config().migration("publish").unwrap().clone();
        let migrator = Migrator::new(&ctx);
        let ms = migrator.determine_migrations(&config, &db).unwrap();
        assert_eq!(ms.len(), 2);

        let public = ctx.repository("public").unwrap();
        let mut writer = public.create_writer(Some(&rev("public{p1}"))).unwrap();
        let mut drafts = Vec::new();
        for m in &ms {
            drafts.push(migrator.migrate(m, &config, writer.as_mut(), &mut db, None).unwrap());
        }

        assert_eq!(drafts[1].revision, rev("public{draft_2}"));
        let root = writer.root();
        assert_eq!(fs::read_to_string(root.join("src/a.txt")).unwrap(), "three");
        assert_eq!(fs::read_to_string(root.join("src/b.txt")).unwrap(), "b");
        assert!(db.has_migration(&SubmittedMigration::new(
            vec![rev("internal{2}")],
            rev("public{draft_1}")
        )));
        assert_eq!(db.migrations().len(), 2);
    }
}
