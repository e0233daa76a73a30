use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::{Codebase, CodebaseDiffer, copy_file, scratch_dir};
use crate::command::{CommandError, CommandRunner};
use crate::error::Problem;
use crate::progress::Ui;

/// Exit status of `merge(1)` when the result contains conflict markers.
const MERGE_CONFLICT_STATUS: i32 = 1;

/// Outcome of [`CodebaseMerger::merge`].
///
/// Every file of the modified or destination codebase that was not dropped
/// by a deletion appears in exactly one of the two sets.
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub merged_codebase: Codebase,
    pub merged_files: BTreeSet<String>,
    /// Files left with conflict markers for a person to resolve.
    pub failed_files: BTreeSet<String>,
}

impl MergeResult {
    pub fn report(&self, ui: &Ui) {
        ui.message(format!(
            "Merged codebase generated at: {}",
            self.merged_codebase.root().display()
        ));
        if self.failed_files.is_empty() {
            ui.message(format!(
                "{} files merged successfully. No merge conflicts.",
                self.merged_files.len()
            ));
        } else {
            let list: Vec<&str> = self.failed_files.iter().map(String::as_str).collect();
            ui.message(format!(
                "{} files merged successfully.\n{} files have merge conflicts. \
                 Edit the following files to resolve conflicts:\n{}",
                self.merged_files.len(),
                self.failed_files.len(),
                list.join("\n")
            ));
        }
    }
}

/// Three-way merge of whole codebases, one `merge(1)` run per file.
///
/// The changes leading from `original` to `modified` are applied onto a copy
/// of `destination`:
///
/// | original | modified | destination | result                          |
/// |----------|----------|-------------|---------------------------------|
/// | -        | -        | yes         | destination's file              |
/// | -        | yes      | -           | modified's file                 |
/// | -        | yes      | yes         | merge against an empty original |
/// | yes      | yes      | -           | conflict if edited, else dropped|
/// | yes      | -        | yes         | dropped                         |
/// | yes      | yes      | yes         | merge                           |
pub struct CodebaseMerger<'a> {
    cmd: &'a dyn CommandRunner,
    differ: CodebaseDiffer,
}

enum Plan {
    Drop,
    Copy(PathBuf),
    Merge { original: PathBuf, destination: PathBuf },
}

impl<'a> CodebaseMerger<'a> {
    pub fn new(cmd: &'a dyn CommandRunner) -> Self {
        Self {
            cmd,
            differ: CodebaseDiffer,
        }
    }

    /// Merge into a fresh scratch directory.
    pub fn merge(
        &self,
        original: &Codebase,
        modified: &Codebase,
        destination: &Codebase,
    ) -> Result<MergeResult> {
        let out = scratch_dir("merged_codebase_")?;
        self.merge_into(original, modified, destination, &out)
    }

    /// Merge into `out`, which should be empty.
    pub fn merge_into(
        &self,
        original: &Codebase,
        modified: &Codebase,
        destination: &Codebase,
        out: &Path,
    ) -> Result<MergeResult> {
        let merged = Codebase::new(out, destination.project_space(), "merged");
        let mut merged_files = BTreeSet::new();
        let mut failed_files = BTreeSet::new();

        // Stand-in for a side that has no such file.
        let empty = tempfile::NamedTempFile::new().context("creating empty merge input")?;

        let mut names = destination.relative_files()?;
        names.extend(modified.relative_files()?);

        for name in &names {
            let plan = self.plan(original, modified, destination, name, empty.path())?;
            let (orig_file, dest_file) = match plan {
                Plan::Drop => {
                    tracing::debug!(file = %name, "dropping file deleted on one side");
                    continue;
                }
                Plan::Copy(src) => {
                    copy_file(&src, &merged.file(name))?;
                    merged_files.insert(name.clone());
                    continue;
                }
                Plan::Merge {
                    original,
                    destination,
                } => (original, destination),
            };

            let merged_file = merged.file(name);
            copy_file(&dest_file, &merged_file)?;
            if self.merge_file(&merged_file, &orig_file, &modified.file(name), out)? {
                merged_files.insert(name.clone());
            } else {
                failed_files.insert(name.clone());
            }
        }

        Ok(MergeResult {
            merged_codebase: merged,
            merged_files,
            failed_files,
        })
    }

    fn plan(
        &self,
        original: &Codebase,
        modified: &Codebase,
        destination: &Codebase,
        name: &str,
        empty: &Path,
    ) -> Result<Plan> {
        let orig_file = original.file(name);
        let mod_file = modified.file(name);
        let dest_file = destination.file(name);
        let (in_orig, in_mod, in_dest) = (orig_file.is_file(), mod_file.is_file(), dest_file.is_file());

        Ok(match (in_orig, in_mod, in_dest) {
            (_, false, false) => {
                return Err(Problem::Inconsistent(format!(
                    "{name} exists in neither {destination} nor {modified}"
                ))
                .into());
            }
            (true, true, false) => {
                if self.differ.files_differ(&orig_file, &mod_file)? {
                    // Edit on delete: surfaces as a conflict.
                    Plan::Merge {
                        original: orig_file,
                        destination: empty.to_path_buf(),
                    }
                } else {
                    Plan::Drop
                }
            }
            (true, false, true) => Plan::Drop,
            (false, true, false) => Plan::Copy(mod_file),
            (false, false, true) => Plan::Copy(dest_file),
            (false, true, true) => Plan::Merge {
                original: empty.to_path_buf(),
                destination: dest_file,
            },
            (true, true, true) => Plan::Merge {
                original: orig_file,
                destination: dest_file,
            },
        })
    }

    /// Run `merge merged original modified`. Returns false on conflict.
    fn merge_file(&self, merged: &Path, original: &Path, modified: &Path, cwd: &Path) -> Result<bool> {
        let merged_s = merged.to_string_lossy();
        let original_s = original.to_string_lossy();
        let modified_s = modified.to_string_lossy();
        match self
            .cmd
            .run(
                "merge",
                &[merged_s.as_ref(), original_s.as_ref(), modified_s.as_ref()],
                cwd,
            )
        {
            Ok(_) => Ok(true),
            Err(CommandError::Exit { status, .. }) if status == MERGE_CONFLICT_STATUS => {
                tracing::info!(file = %merged.display(), "merge conflict");
                Ok(false)
            }
            Err(CommandError::Exit { status, stderr, .. }) => Err(Problem::UnexpectedExit {
                command: format!("merge {merged_s} {original_s} {modified_s}"),
                status,
                stderr,
            }
            .into()),
            Err(e) => Err(anyhow::Error::new(e).context("running merge")),
        }
    }
}
