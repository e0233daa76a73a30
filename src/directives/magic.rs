use anyhow::{Context, Result};
use std::collections::HashSet;
use std::io::Write;

use crate::config::MigrationConfig;
use crate::context::ProjectContext;
use crate::database::{Bookkeeper, Db};
use crate::migrations::{Migration, Migrator, check_skip};
use crate::repositories::Revision;
use crate::writer::DraftRevision;

/// Arguments of `magic`.
#[derive(Debug, Clone, Default)]
pub struct MagicOptions {
    /// Configured migrations to run; all of them when empty.
    pub migrations: Vec<String>,
    /// Source revisions not to migrate.
    pub skip_revisions: Vec<Revision>,
    pub skip_bookkeeping: bool,
}

/// `magic`: bookkeep, then replay every pending change of each selected
/// migration onto a fresh writer of its target repository.
///
/// Returns the drafts created, in the order they were written.
pub fn cmd_magic(
    ctx: &ProjectContext,
    db: &mut dyn Db,
    options: &MagicOptions,
    out: &mut dyn Write,
) -> Result<Vec<DraftRevision>> {
    if options.skip_bookkeeping {
        tracing::info!("skipping bookkeeping");
    } else {
        Bookkeeper::new(ctx).bookkeep(db).context("bookkeeping")?;
    }

    let configs: Vec<&MigrationConfig> = if options.migrations.is_empty() {
        ctx.config().migrations.iter().collect()
    } else {
        options
            .migrations
            .iter()
            .map(|name| ctx.config().migration(name))
            .collect::<Result<_, _>>()?
    };
    let skip: HashSet<Revision> = options.skip_revisions.iter().cloned().collect();

    let migrator = Migrator::new(ctx);
    let mut drafts = Vec::new();
    for config in configs {
        let migrations = migrator.determine_migrations(config, db)?;
        if migrations.is_empty() {
            ctx.ui()
                .message(format!("No pending revisions to migrate for {}", config.name));
            continue;
        }
        let created = run_migrations(ctx, &migrator, config, &migrations, &skip, db)
            .with_context(|| format!("performing migration '{}'", config.name))?;
        drafts.extend(created);
    }

    if drafts.is_empty() {
        writeln!(out, "No migrations made.")?;
    } else {
        writeln!(out, "Created Draft Revisions:")?;
        for d in &drafts {
            writeln!(out, "{} in {}", d.revision, d.location.display())?;
        }
    }
    db.write()?;
    Ok(drafts)
}

/// Write `migrations` in order through one writer, so each builds on the
/// draft before it.
fn run_migrations(
    ctx: &ProjectContext,
    migrator: &Migrator<'_>,
    config: &MigrationConfig,
    migrations: &[Migration],
    skip: &HashSet<Revision>,
    db: &mut dyn Db,
) -> Result<Vec<DraftRevision>> {
    let anchor = migrations.first().and_then(|m| m.since_equivalence.as_ref());
    let to_repo = ctx.repository(&config.to_repository)?;
    let start = anchor.and_then(|eq| eq.revision_for_repository(&config.to_repository));
    let mut writer = to_repo.create_writer(start)?;
    tracing::debug!(migration = %config.name, root = %writer.root().display(), "writer ready");

    // The source revision whose translation the writer currently holds.
    let mut reference_from: Option<Revision> = anchor
        .and_then(|eq| eq.revision_for_repository(&config.from_repository))
        .cloned();

    let mut drafts = Vec::new();
    for migration in migrations {
        if check_skip(migration, skip)? {
            ctx.ui().message(format!("Skipping {migration}"));
            continue;
        }
        let task = ctx.ui().task(format!("Performing {migration}"));
        match migrator.migrate(migration, config, writer.as_mut(), db, reference_from.as_ref()) {
            Ok(draft) => {
                task.finish_ok(format!("Migrated to {}", draft.revision));
                drafts.push(draft);
                reference_from = migration.most_recent_revision().cloned();
            }
            Err(e) => {
                task.finish_err(format!("Failed {migration}"));
                return Err(e);
            }
        }
    }
    Ok(drafts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::context_of;
    use crate::database::{Equivalence, FileDb, SubmittedMigration};
    use crate::directives::testing::PROJECT;
    use crate::error::UserError;
    use std::fs;

    fn rev(s: &str) -> Revision {
        s.parse().unwrap()
    }

    fn anchored_db() -> FileDb {
        let mut db = FileDb::in_memory();
        db.note_equivalence(Equivalence::new(rev("internal{1}"), rev("public{p1}")).unwrap());
        db
    }

    #[test]
    fn migrates_each_pending_revision() {
        let ctx = context_of(PROJECT);
        let mut db = anchored_db();
        let mut out = Vec::new();
        let drafts = cmd_magic(&ctx, &mut db, &MagicOptions::default(), &mut out).unwrap();

        let ids: Vec<&str> = drafts.iter().map(|d| d.revision.rev_id.as_str()).collect();
        assert_eq!(ids, vec!["draft_1", "draft_2"]);
        let last = &drafts[1].location;
        assert_eq!(fs::read_to_string(last.join("src/a.txt")).unwrap(), "three");
        assert_eq!(fs::read_to_string(last.join("src/b.txt")).unwrap(), "b");

        assert!(db.has_migration(&SubmittedMigration::new(
            vec![rev("internal{2}")],
            rev("public{draft_1}")
        )));
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.starts_with("Created Draft Revisions:\n"));
        assert!(printed.contains("public{draft_2} in "));
    }

    #[test]
    fn two_migrations_into_one_repository_get_distinct_drafts() {
        let toml = format!(
            "{PROJECT}\n[[migrations]]\nname = \"mirror\"\nfrom_repository = \"internal\"\nto_repository = \"public\"\n"
        );
        let ctx = context_of(&toml);
        let mut db = anchored_db();
        let options = MagicOptions {
            skip_bookkeeping: true,
            ..Default::default()
        };
        let drafts = cmd_magic(&ctx, &mut db, &options, &mut Vec::new()).unwrap();

        let ids: Vec<&str> = drafts.iter().map(|d| d.revision.rev_id.as_str()).collect();
        assert_eq!(ids, vec!["draft_1", "draft_2", "draft_3"]);
        assert_eq!(db.migrations().len(), 3);
    }

    #[test]
    fn skipping_a_whole_migration() {
        let ctx = context_of(PROJECT);
        let mut db = anchored_db();
        let options = MagicOptions {
            migrations: vec!["publish".into()],
            skip_revisions: vec![rev("internal{2}")],
            skip_bookkeeping: true,
        };
        let drafts = cmd_magic(&ctx, &mut db, &options, &mut Vec::new()).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(fs::read_to_string(drafts[0].location.join("src/a.txt")).unwrap(), "three");
        assert_eq!(db.migrations().len(), 1);
    }

    #[test]
    fn partial_skip_of_batched_migration_is_refused() {
        let toml = PROJECT.replace("separate_revisions = true", "separate_revisions = false");
        let ctx = context_of(&toml);
        let mut db = anchored_db();
        let options = MagicOptions {
            skip_revisions: vec![rev("internal{2}")],
            skip_bookkeeping: true,
            ..Default::default()
        };
        let err = cmd_magic(&ctx, &mut db, &options, &mut Vec::new()).unwrap_err();
        assert!(matches!(
            err.chain().find_map(|e| e.downcast_ref::<UserError>()),
            Some(UserError::PartialSkip(_))
        ));
        assert!(db.migrations().is_empty());
    }

    #[test]
    fn nothing_pending_makes_no_migrations() {
        let toml = PROJECT.replace(
            r#"files = { "src/a.txt" = "one" }"#,
            r#"files = { "src/a.txt" = "three", "src/b.txt" = "b" }"#,
        );
        let ctx = context_of(&toml);
        let mut db = FileDb::in_memory();
        let mut out = Vec::new();
        // Bookkeeping finds the heads equivalent, so nothing is pending.
        let drafts = cmd_magic(&ctx, &mut db, &MagicOptions::default(), &mut out).unwrap();
        assert!(drafts.is_empty());
        assert_eq!(String::from_utf8(out).unwrap(), "No migrations made.\n");
        assert_eq!(db.find_equivalences(&rev("internal{3}"), "public"), vec![rev("public{p1}")]);
    }

    #[test]
    fn unknown_migration_name() {
        let ctx = context_of(PROJECT);
        let options = MagicOptions {
            migrations: vec!["mirror".into()],
            skip_bookkeeping: true,
            ..Default::default()
        };
        let err = cmd_magic(&ctx, &mut FileDb::in_memory(), &options, &mut Vec::new()).unwrap_err();
        assert!(crate::error::is_user_error(&err));
    }
}
