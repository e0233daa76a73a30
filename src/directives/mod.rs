//! Command bodies behind the `revsync` subcommands.
//!
//! Every `cmd_*` takes the project context, the database where it needs one,
//! and the stream to print results on. Progress goes through the context's
//! [`Ui`](crate::progress::Ui); results go to `out`.

mod magic;

use anyhow::Result;
use std::io::Write;

use crate::codebase::{CodebaseMerger, ExpressionEngine, MergeResult};
use crate::context::ProjectContext;
use crate::database::{Bookkeeper, Db, Equivalence, EquivalenceMatcher};
use crate::migrations::Migrator;
use crate::repositories::{Revision, SearchType, find_revisions};

pub use magic::{MagicOptions, cmd_magic};

/// `highest-revision`: print the newest revision of a repository, or
/// validate `revision` when given.
pub fn cmd_highest_revision(
    ctx: &ProjectContext,
    repository: &str,
    revision: Option<&str>,
    out: &mut dyn Write,
) -> Result<Revision> {
    let repo = ctx.cloned_repository(repository)?;
    let rev = repo.revision_history().find_highest_revision(revision)?;
    writeln!(out, "Highest revision in repository \"{}\": {}", repo.name(), rev.rev_id)?;
    Ok(rev)
}

/// `find-equivalence`: walk every branch back from a revision of
/// `from_repository` and print the equivalences with `in_repository` that
/// bound the walk.
pub fn cmd_find_equivalence(
    ctx: &ProjectContext,
    db: &dyn Db,
    from_repository: &str,
    in_repository: &str,
    revision: Option<&str>,
    out: &mut dyn Write,
) -> Result<Vec<Equivalence>> {
    ctx.repository(in_repository)?;
    let repo = ctx.cloned_repository(from_repository)?;
    let history = repo.revision_history();
    let start = history.find_highest_revision(revision)?;

    let matcher = EquivalenceMatcher::new(in_repository, db);
    let found = find_revisions(history, Some(start.clone()), &matcher, SearchType::Branched)?;
    if found.equivalences.is_empty() {
        writeln!(out, "No Equivalences were found for {start} in {in_repository}.")?;
    }
    for eq in &found.equivalences {
        writeln!(out, "{eq}")?;
    }
    Ok(found.equivalences)
}

/// `last-equivalence`: the equivalence a migration from `from_repository`
/// to `with_repository` would start from.
pub fn cmd_last_equivalence(
    ctx: &ProjectContext,
    db: &dyn Db,
    from_repository: &str,
    with_repository: &str,
    out: &mut dyn Write,
) -> Result<Option<Equivalence>> {
    ctx.repository(with_repository)?;
    let repo = ctx.cloned_repository(from_repository)?;
    let matcher = EquivalenceMatcher::new(with_repository, db);
    let found = find_revisions(repo.revision_history(), None, &matcher, repo.search_type())?;
    let last = found.equivalences.into_iter().next();
    match &last {
        Some(eq) => writeln!(out, "Last equivalence: {eq}")?,
        None => writeln!(
            out,
            "No equivalence was found between {from_repository} and {with_repository}."
        )?,
    }
    Ok(last)
}

/// `note-equivalence`: record that two revisions hold the same content.
/// Both must exist in their repositories.
pub fn cmd_note_equivalence(
    ctx: &ProjectContext,
    db: &mut dyn Db,
    rev1: &Revision,
    rev2: &Revision,
    out: &mut dyn Write,
) -> Result<Equivalence> {
    let existing = |rev: &Revision| -> Result<Revision> {
        let repo = ctx.cloned_repository(&rev.repository_name)?;
        repo.revision_history().find_highest_revision(Some(&rev.rev_id))
    };
    let (rev1, rev2) = (existing(rev1)?, existing(rev2)?);

    let eq = Equivalence::new(rev1, rev2)?;
    db.note_equivalence(eq.clone());
    db.write()?;
    writeln!(out, "Noted equivalence: {eq}")?;
    Ok(eq)
}

/// `revisions-since-equivalence`: the revisions of `from_repository` that
/// `to_repository` has not seen, oldest first.
pub fn cmd_revisions_since_equivalence(
    ctx: &ProjectContext,
    db: &dyn Db,
    from_repository: &str,
    to_repository: &str,
    out: &mut dyn Write,
) -> Result<Vec<Revision>> {
    ctx.repository(to_repository)?;
    let repo = ctx.cloned_repository(from_repository)?;
    let matcher = EquivalenceMatcher::new(to_repository, db);
    let found = find_revisions(repo.revision_history(), None, &matcher, repo.search_type())?;

    let mut revisions = found.revisions_since_equivalence.breadth_first_history();
    revisions.reverse();
    match found.equivalences.first() {
        Some(eq) => writeln!(out, "Revisions since {eq}:")?,
        None => writeln!(out, "No equivalence with {to_repository}; every revision is pending:")?,
    }
    for rev in &revisions {
        writeln!(out, "  {rev}")?;
    }
    Ok(revisions)
}

/// `determine-migrations`: print the migrations `magic` would perform for
/// one configured migration.
pub fn cmd_determine_migrations(
    ctx: &ProjectContext,
    db: &dyn Db,
    migration: &str,
    out: &mut dyn Write,
) -> Result<usize> {
    let config = ctx.config().migration(migration)?;
    let migrations = Migrator::new(ctx).determine_migrations(config, db)?;
    if migrations.is_empty() {
        writeln!(out, "No pending revisions to migrate for {migration}")?;
    }
    for m in &migrations {
        writeln!(out, "Pending migration: {m}")?;
    }
    Ok(migrations.len())
}

/// `merge-codebases`: three-way merge of three codebase expressions. The
/// caller decides what a conflicted result means for the exit status.
pub fn cmd_merge_codebases(
    ctx: &ProjectContext,
    original: &str,
    modified: &str,
    destination: &str,
) -> Result<MergeResult> {
    let engine = ExpressionEngine;
    let original = engine.parse_and_create(original, ctx)?;
    let modified = engine.parse_and_create(modified, ctx)?;
    let destination = engine.parse_and_create(destination, ctx)?;

    let result = CodebaseMerger::new(ctx.cmd()).merge(&original, &modified, &destination)?;
    result.report(ctx.ui());
    Ok(result)
}

/// `create-codebase`: materialize an expression and print where it landed.
pub fn cmd_create_codebase(ctx: &ProjectContext, expression: &str, out: &mut dyn Write) -> Result<()> {
    let task = ctx.ui().task(format!("Creating codebase {expression}"));
    match ExpressionEngine.parse_and_create(expression, ctx) {
        Ok(cb) => {
            task.finish_ok(format!("Codebase \"{}\" created", cb.expression()));
            writeln!(out, "{}", cb.root().display())?;
            Ok(())
        }
        Err(e) => {
            task.finish_err(format!("Error creating codebase {expression}"));
            Err(e)
        }
    }
}

/// `bookkeeping`: update and write the database.
pub fn cmd_bookkeeping(ctx: &ProjectContext, db: &mut dyn Db) -> Result<()> {
    Bookkeeper::new(ctx).bookkeep(db)
}
