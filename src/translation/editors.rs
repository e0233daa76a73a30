use anyhow::{Context, Result};
use regex::{Captures, Regex};

use crate::codebase::{Codebase, copy_file, scratch_dir};
use crate::command::CommandError;
use crate::config::EditorConfig;
use crate::context::ProjectContext;
use crate::error::{Problem, UserError};

/// One named transformation of a single codebase.
#[derive(Debug, Clone)]
pub enum Editor {
    Renamer(Renamer),
    Shell(ShellEditor),
}

impl Editor {
    pub fn from_config(name: &str, config: &EditorConfig) -> Result<Self> {
        Ok(match config {
            EditorConfig::Renamer {
                mappings,
                use_regex,
            } => Editor::Renamer(Renamer::new(
                name,
                mappings.iter().map(|(k, v)| (k.as_str(), v.as_str())),
                *use_regex,
            )?),
            EditorConfig::Shell { command } => Editor::Shell(ShellEditor {
                name: name.to_string(),
                command: command.clone(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Editor::Renamer(r) => &r.name,
            Editor::Shell(s) => &s.name,
        }
    }

    /// Produce an edited copy of `input`; `input` itself is left untouched.
    pub fn edit(&self, input: &Codebase, ctx: &ProjectContext) -> Result<Codebase> {
        let edited = match self {
            Editor::Renamer(r) => r.edit(input)?,
            Editor::Shell(s) => s.edit(input, ctx)?,
        };
        Ok(edited.with_expression(format!("{}|{}", input.expression(), self.name())))
    }
}

/// Moves files by rewriting their relative paths.
///
/// Plain mappings replace a leading path prefix, longest prefix first.
/// Regex mappings are tried in key order and may use `$1`-style groups.
/// Every file must be covered by some mapping.
#[derive(Debug, Clone)]
pub struct Renamer {
    name: String,
    rules: Vec<(Regex, String)>,
    use_regex: bool,
}

impl Renamer {
    pub fn new<'a>(
        name: &str,
        mappings: impl IntoIterator<Item = (&'a str, &'a str)>,
        use_regex: bool,
    ) -> Result<Self> {
        let mut pairs: Vec<(&str, &str)> = mappings.into_iter().collect();
        if !use_regex {
            pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
        }
        let mut rules = Vec::with_capacity(pairs.len());
        for (from, to) in pairs {
            // Plain mappings only match whole leading path components.
            let pattern = if use_regex {
                from.to_string()
            } else if from.is_empty() || from.ends_with('/') {
                format!("^{}", regex::escape(from))
            } else {
                format!("^{}(/|$)", regex::escape(from))
            };
            let re = Regex::new(&pattern).map_err(|e| {
                UserError::InvalidProject(format!("bad mapping '{from}' in editor '{name}': {e}"))
            })?;
            rules.push((re, to.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            rules,
            use_regex,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// New relative path for `path`.
    pub fn rename(&self, path: &str) -> Result<String, Problem> {
        for (re, to) in &self.rules {
            if !re.is_match(path) {
                continue;
            }
            let renamed = if self.use_regex {
                re.replace(path, to.as_str())
            } else {
                re.replace(path, |caps: &Captures| {
                    format!("{to}{}", caps.get(1).map_or("", |m| m.as_str()))
                })
            };
            // A mapping to "" leaves a leading separator behind.
            return Ok(renamed.trim_start_matches('/').to_string());
        }
        Err(Problem::UnmappedFile {
            editor: self.name.clone(),
            path: path.to_string(),
        })
    }

    fn edit(&self, input: &Codebase) -> Result<Codebase> {
        let out = scratch_dir("rename_run_")?;
        for rel in input.relative_files()? {
            let renamed = self.rename(&rel)?;
            copy_file(&input.file(&rel), &out.join(renamed))?;
        }
        Ok(Codebase::new(out, input.project_space(), input.expression()))
    }
}

/// Runs `bash -c <command>` inside a copy of the codebase.
#[derive(Debug, Clone)]
pub struct ShellEditor {
    name: String,
    command: String,
}

impl ShellEditor {
    fn edit(&self, input: &Codebase, ctx: &ProjectContext) -> Result<Codebase> {
        let out = scratch_dir("shell_run_")?;
        input.copy_to(&out)?;
        match ctx.cmd().run("bash", &["-c", &self.command], &out) {
            Ok(_) => {}
            Err(CommandError::Exit { status, stderr, .. }) => {
                return Err(Problem::UnexpectedExit {
                    command: self.command.clone(),
                    status,
                    stderr,
                }
                .into());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("running editor '{}'", self.name));
            }
        }
        Ok(Codebase::new(out, input.project_space(), input.expression()))
    }
}
