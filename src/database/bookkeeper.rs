use anyhow::Result;
use std::collections::HashSet;

use super::{Db, Equivalence, EquivalenceMatcher, SubmittedMigration};
use crate::codebase::CodebaseDiffer;
use crate::config::MigrationConfig;
use crate::context::ProjectContext;
use crate::repositories::{MIGRATED_REV_KEY, Revision, SearchType, find_revisions};
use crate::translation::TranslateOptions;

/// Brings the database up to date with what happened in the repositories:
/// equivalent heads, and migrated changes that were submitted since the last
/// known equivalence.
pub struct Bookkeeper<'a> {
    ctx: &'a ProjectContext,
    differ: CodebaseDiffer,
}

impl<'a> Bookkeeper<'a> {
    pub fn new(ctx: &'a ProjectContext) -> Self {
        Self {
            ctx,
            differ: CodebaseDiffer,
        }
    }

    /// Run over every configured migration, then write the database.
    pub fn bookkeep(&self, db: &mut dyn Db) -> Result<()> {
        let mut tested_heads: HashSet<(Revision, Revision)> = HashSet::new();
        for config in &self.ctx.config().migrations {
            let task = self.ctx.ui().task(format!(
                "Bookkeeping {} -> {} for migration '{}'",
                config.from_repository, config.to_repository, config.name
            ));
            self.bookkeep_migration(config, db, &mut tested_heads)?;
            task.finish_ok(format!("Bookkept migration '{}'", config.name));
        }
        db.write()
    }

    fn bookkeep_migration(
        &self,
        config: &MigrationConfig,
        db: &mut dyn Db,
        tested_heads: &mut HashSet<(Revision, Revision)>,
    ) -> Result<()> {
        let from_repo = self.ctx.cloned_repository(&config.from_repository)?;
        let to_repo = self.ctx.cloned_repository(&config.to_repository)?;
        let inverse = self.is_inverse(from_repo.project_space(), to_repo.project_space())?;

        let from_head = from_repo.revision_history().find_highest_revision(None)?;
        let to_head = to_repo.revision_history().find_highest_revision(None)?;

        // A pair checked for one direction need not be checked for the other.
        let key = if from_head <= to_head {
            (from_head.clone(), to_head.clone())
        } else {
            (to_head.clone(), from_head.clone())
        };
        if tested_heads.insert(key) {
            if let Some(eq) = self.determine_equivalence(&from_head, &to_head, inverse) {
                self.ctx
                    .ui()
                    .message(format!("Found equivalence between {from_head} and {to_head}"));
                db.note_equivalence(eq);
                return Ok(());
            }
            self.ctx
                .ui()
                .message(format!("No equivalence between {from_head} and {to_head}"));
        }

        self.note_completed_migrations(config, db, inverse)
    }

    /// Look through the target's history since its last equivalence with the
    /// source for migrated changes, newest first.
    fn note_completed_migrations(
        &self,
        config: &MigrationConfig,
        db: &mut dyn Db,
        inverse: bool,
    ) -> Result<()> {
        let to_repo = self.ctx.repository(&config.to_repository)?;
        let to_history = to_repo.revision_history();
        let matcher = EquivalenceMatcher::new(&config.from_repository, &*db);
        let found = find_revisions(to_history, None, &matcher, SearchType::Branched)?;
        let to_revs = found.revisions_since_equivalence.breadth_first_history();
        tracing::debug!(count = to_revs.len(), repository = %config.to_repository, "revisions since equivalence");

        let mut unmigrated = 0usize;
        for to_rev in to_revs {
            let migrated_from = found
                .revisions_since_equivalence
                .metadata(&to_rev)
                .and_then(|md| md.field(MIGRATED_REV_KEY))
                .map(|id| Revision::new(id, &config.from_repository));
            let Some(from_rev) = migrated_from else {
                unmigrated += 1;
                continue;
            };

            if db.migrations().iter().any(|m| m.covers(&from_rev, &to_rev)) {
                tracing::debug!(from = %from_rev, to = %to_rev, "migration already recorded");
                continue;
            }
            db.note_migration(SubmittedMigration::new(vec![from_rev.clone()], to_rev.clone()));

            if let Some(eq) = self.determine_equivalence(&from_rev, &to_rev, inverse) {
                self.ctx
                    .ui()
                    .message(format!("Equivalence found and recorded: {eq}"));
                db.note_equivalence(eq);
                break;
            }
        }
        if unmigrated > 0 {
            tracing::info!(count = unmigrated, "ignored revisions that were not migrated");
        }
        Ok(())
    }

    fn is_inverse(&self, from_space: &str, to_space: &str) -> Result<bool> {
        if from_space == to_space {
            return Ok(false);
        }
        Ok(self.ctx.translator(from_space, to_space)?.is_inverse())
    }

    /// `Some` if `from` translated into `to`'s project space has the same
    /// content as `to`. Inverse migrations compare through the forward
    /// translator instead. Failure to build either side counts as "not
    /// equivalent".
    fn determine_equivalence(&self, from: &Revision, to: &Revision, inverse: bool) -> Option<Equivalence> {
        let (source, target) = if inverse { (to, from) } else { (from, to) };
        match self.equivalent(source, target) {
            Ok(true) => Equivalence::new(from.clone(), to.clone()).ok(),
            Ok(false) => None,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), %source, %target, "could not compare codebases");
                None
            }
        }
    }

    fn equivalent(&self, source: &Revision, target: &Revision) -> Result<bool> {
        let source_repo = self.ctx.repository(&source.repository_name)?;
        let target_repo = self.ctx.repository(&target.repository_name)?;

        let mut source_cb = source_repo.create_codebase(source)?;
        let target_cb = target_repo.create_codebase(target)?;
        if source_repo.project_space() != target_repo.project_space() {
            let translator = self
                .ctx
                .translator(source_repo.project_space(), target_repo.project_space())?;
            source_cb = translator.translate(&source_cb, &TranslateOptions::default(), self.ctx)?;
        }
        let different = self.differ.are_different(&source_cb, &target_cb)?;
        tracing::debug!(%source, %target, different, "compared codebases");
        Ok(!different)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::context_of;
    use crate::database::FileDb;

    fn rev(s: &str) -> Revision {
        s.parse().unwrap()
    }

    const PROJECT: &str = r#"
        name = "bookkeeping-test"

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
        files = { "java/a.txt" = "three" }

        [repositories.public]
        kind = "dummy"
        [[repositories.public.commits]]
        id = "p1"
        files = { "src/a.txt" = "one" }
        [[repositories.public.commits]]
        id = "p2"
        parents = ["p1"]
        description = "Sync\n\nMIGRATED_REVID=2"
        files = { "src/a.txt" = "two" }
        [[repositories.public.commits]]
        id = "p3"
        parents = ["p2"]
        description = "Local fix"
        files = { "src/a.txt" = "two", "NOTICE" = "n" }

        [editors.mv]
        type = "renamer"
        mappings = { "java" = "src", "NOTICE" = "NOTICE" }

        [[translators]]
        from_project_space = "internal"
        to_project_space = "public"
        steps = ["mv"]

        [[migrations]]
        name = "publish"
        from_repository = "internal"
        to_repository = "public"
    "#;

    #[test]
    fn records_migrated_change_and_its_equivalence() {
        let ctx = context_of(PROJECT);
        let mut db = FileDb::in_memory();
        db.note_equivalence(Equivalence::new(rev("internal{1}"), rev("public{p1}")).unwrap());

        Bookkeeper::new(&ctx).bookkeep(&mut db).unwrap();

        assert!(db.has_migration(&SubmittedMigration::new(
            vec![rev("internal{2}")],
            rev("public{p2}")
        )));
        assert_eq!(db.find_equivalences(&rev("internal{2}"), "public"), vec![rev("public{p2}")]);
        // Heads differ, so no head equivalence.
        assert!(db.find_equivalences(&rev("internal{3}"), "public").is_empty());
    }

    #[test]
    fn second_pass_changes_nothing() {
        let ctx = context_of(PROJECT);
        let mut db = FileDb::in_memory();
        db.note_equivalence(Equivalence::new(rev("internal{1}"), rev("public{p1}")).unwrap());
        let bk = Bookkeeper::new(&ctx);
        bk.bookkeep(&mut db).unwrap();
        let before = (db.equivalences().to_vec(), db.migrations().to_vec());
        bk.bookkeep(&mut db).unwrap();
        assert_eq!(before, (db.equivalences().to_vec(), db.migrations().to_vec()));
    }

    #[test]
    fn equivalent_heads_are_noted() {
        let toml = PROJECT.replace(
            r#"files = { "java/a.txt" = "three" }"#,
            r#"files = { "java/a.txt" = "two", "NOTICE" = "n" }"#,
        );
        let ctx = context_of(&toml);
        let mut db = FileDb::in_memory();
        Bookkeeper::new(&ctx).bookkeep(&mut db).unwrap();
        assert_eq!(db.find_equivalences(&rev("internal{3}"), "public"), vec![rev("public{p3}")]);
        assert!(db.migrations().is_empty());
    }
}
