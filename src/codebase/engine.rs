use anyhow::{Context, Result};
use std::path::PathBuf;

use super::{Codebase, Expression, Operation, Term};
use crate::context::ProjectContext;
use crate::error::UserError;
use crate::translation::{Editor, TranslateOptions};

/// Option naming the revision to export; head when absent.
pub const REVISION_OPTION: &str = "revision";
/// Option naming an existing directory to use instead of exporting.
pub const LOCALROOT_OPTION: &str = "localroot";
const REFERENCE_TO_OPTION: &str = "referenceToCodebase";
const REFERENCE_FROM_OPTION: &str = "referenceFromCodebase";

/// Materializes codebase expressions.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpressionEngine;

impl ExpressionEngine {
    pub fn parse_and_create(&self, expression: &str, ctx: &ProjectContext) -> Result<Codebase> {
        let expr: Expression = expression.parse()?;
        self.create_codebase(&expr, ctx)
    }

    pub fn create_codebase(&self, expr: &Expression, ctx: &ProjectContext) -> Result<Codebase> {
        tracing::debug!(expression = %expr, "evaluating");
        let mut current = self.create(&expr.creator, ctx)?;

        for op in &expr.operations {
            current = match op {
                Operation::Edit(term) => {
                    let editor = Editor::from_config(&term.identifier, ctx.config().editor(&term.identifier)?)?;
                    editor.edit(&current, ctx)?
                }
                Operation::Translate(term) => {
                    let translator = ctx.translator(current.project_space(), &term.identifier)?;
                    let options = self.translate_options(term, ctx)?;
                    translator.translate(&current, &options, ctx)?
                }
            };
        }
        Ok(current.with_expression(expr.to_string()))
    }

    fn create(&self, creator: &Term, ctx: &ProjectContext) -> Result<Codebase> {
        if let Some(root) = creator.option(LOCALROOT_OPTION) {
            let root = PathBuf::from(root);
            if !root.is_dir() {
                return Err(UserError::Expression {
                    expression: creator.to_string(),
                    reason: format!("{} is not a directory", root.display()),
                }
                .into());
            }
            let project_space = match ctx.repository(&creator.identifier) {
                Ok(repo) => repo.project_space().to_string(),
                Err(_) => creator
                    .option("project_space")
                    .unwrap_or("public")
                    .to_string(),
            };
            return Ok(Codebase::new(root, project_space, creator.to_string()));
        }

        let repo = ctx.cloned_repository(&creator.identifier)?;
        let revision = repo
            .revision_history()
            .find_highest_revision(creator.option(REVISION_OPTION))?;
        let task = ctx.ui().task(format!("Exporting {revision}"));
        let codebase = repo
            .create_codebase(&revision)
            .with_context(|| format!("exporting {revision}"))?;
        task.finish_ok(format!("Exported {revision} to {}", codebase.root().display()));
        Ok(codebase)
    }

    fn translate_options(&self, term: &Term, ctx: &ProjectContext) -> Result<TranslateOptions> {
        let eval = |key: &str| -> Result<Option<Codebase>> {
            term.option(key)
                .map(|src| {
                    self.parse_and_create(src, ctx)
                        .with_context(|| format!("evaluating {key} '{src}'"))
                })
                .transpose()
        };
        Ok(TranslateOptions {
            reference_to: eval(REFERENCE_TO_OPTION)?,
            reference_from: eval(REFERENCE_FROM_OPTION)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codebase::testing::codebase_of;
    use crate::context::testing::context_of;
    use std::fs;

    const TOML: &str = r#"
        name = "engine-test"
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

        [editors.mv]
        type = "renamer"
        mappings = { "java" = "src" }

        [[translators]]
        from_project_space = "internal"
        to_project_space = "public"
        steps = ["mv"]
    "#;

    #[test]
    fn exports_head_and_requested_revision() {
        let ctx = context_of(TOML);
        let head = ExpressionEngine.parse_and_create("internal", &ctx).unwrap();
        assert_eq!(fs::read_to_string(head.file("java/a.txt")).unwrap(), "two");

        let old = ExpressionEngine
            .parse_and_create("internal(revision=1)", &ctx)
            .unwrap();
        assert_eq!(fs::read_to_string(old.file("java/a.txt")).unwrap(), "one");
        assert_eq!(old.expression(), "internal(revision=1)");
    }

    #[test]
    fn translates_into_project_space() {
        let ctx = context_of(TOML);
        let cb = ExpressionEngine
            .parse_and_create("internal(revision=1)>public", &ctx)
            .unwrap();
        assert_eq!(cb.project_space(), "public");
        assert_eq!(fs::read_to_string(cb.file("src/a.txt")).unwrap(), "one");
    }

    #[test]
    fn edits_a_local_root() {
        let td = tempfile::tempdir().unwrap();
        let local = codebase_of(td.path(), "local", &[("java/x", "x")]);
        let ctx = context_of(TOML);
        let expr = format!("internal(localroot=\"{}\")|mv", local.root().display());
        let cb = ExpressionEngine.parse_and_create(&expr, &ctx).unwrap();
        assert_eq!(cb.project_space(), "internal");
        assert!(cb.file("src/x").exists());
    }

    #[test]
    fn unknown_names_are_user_errors() {
        let ctx = context_of(TOML);
        for expr in ["nowhere", "internal|nope", "internal>martian", "internal("] {
            let err = ExpressionEngine.parse_and_create(expr, &ctx).unwrap_err();
            assert!(crate::error::is_user_error(&err), "{expr}: {err:#}");
        }
    }
}
