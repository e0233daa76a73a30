use anyhow::Result;
use std::collections::HashMap;

use super::editors::{Editor, Renamer};
use crate::codebase::{Codebase, CodebaseMerger, copy_file, scratch_dir};
use crate::context::ProjectContext;

/// Undoes one forward editor, given reference codebases on both sides of it.
#[derive(Debug, Clone)]
pub enum InverseEditor {
    /// Renames files back using the paths of the reference codebase.
    Rename(Renamer),
    /// Three-way merge for lossy edits: the changes between the
    /// edited reference and the input are applied onto the unedited reference.
    Merge { name: String },
}

impl InverseEditor {
    pub fn for_editor(editor: &Editor) -> Self {
        match editor {
            Editor::Renamer(r) => InverseEditor::Rename(r.clone()),
            Editor::Shell(_) => InverseEditor::Merge {
                name: editor.name().to_string(),
            },
        }
    }

    pub fn name(&self) -> String {
        match self {
            InverseEditor::Rename(r) => format!("inverse_{}", r.name()),
            InverseEditor::Merge { name } => format!("inverse_{name}"),
        }
    }

    /// `reference_from` is `reference_to` with the forward editor applied.
    pub fn inverse_edit(
        &self,
        input: &Codebase,
        reference_from: &Codebase,
        reference_to: &Codebase,
        ctx: &ProjectContext,
    ) -> Result<Codebase> {
        match self {
            InverseEditor::Rename(renamer) => inverse_rename(renamer, input, reference_to),
            InverseEditor::Merge { .. } => {
                let result =
                    CodebaseMerger::new(ctx.cmd()).merge(reference_from, input, reference_to)?;
                if !result.failed_files.is_empty() {
                    tracing::warn!(
                        failed = result.failed_files.len(),
                        dir = %result.merged_codebase.root().display(),
                        "inverse translation left merge conflicts"
                    );
                }
                result.report(ctx.ui());
                Ok(result
                    .merged_codebase
                    .with_project_space(reference_to.project_space())
                    .with_expression(reference_to.expression()))
            }
        }
    }
}

fn inverse_rename(renamer: &Renamer, input: &Codebase, reference: &Codebase) -> Result<Codebase> {
    let map = renamed_to_reference(renamer, reference)?;
    let out = scratch_dir("inverse_rename_run_")?;
    for rel in input.relative_files()? {
        let restored = restore_path(&rel, &map);
        copy_file(&input.file(&rel), &out.join(restored))?;
    }
    Ok(Codebase::new(
        out,
        reference.project_space(),
        reference.expression(),
    ))
}

/// Maps every renamed path, and each of its directory prefixes, back to the
/// reference path it came from. `a/b/c/f -> x/y/f` yields `x/y/f -> a/b/c/f`,
/// `x/y -> a/b/c` and `x -> a/b`.
fn renamed_to_reference(renamer: &Renamer, reference: &Codebase) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for original in reference.relative_files()? {
        let renamed = renamer.rename(&original)?;
        let renamed_parts: Vec<&str> = renamed.split('/').collect();
        let original_parts: Vec<&str> = original.split('/').collect();
        for i in 0..renamed_parts.len().min(original_parts.len()) {
            map.insert(
                renamed_parts[..renamed_parts.len() - i].join("/"),
                original_parts[..original_parts.len() - i].join("/"),
            );
        }
    }
    Ok(map)
}

/// Longest known prefix of `path` swapped for its reference; unknown paths
/// are kept as they are.
fn restore_path(path: &str, map: &HashMap<String, String>) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    for i in (1..=parts.len()).rev() {
        let prefix = parts[..i].join("/");
        if let Some(original) = map.get(&prefix) {
            return format!("{original}{}", &path[prefix.len()..]);
        }
    }
    path.to_string()
}
