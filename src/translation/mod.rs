//! Moving codebases between project spaces.
//!
//! A forward translator applies its editors in order. An inverse translator
//! undoes the forward translator of the opposite direction; because editors
//! can be lossy it needs a reference codebase in the target space, which it
//! pushes through the forward steps so every inverse step has a before and
//! after image to work from.

mod editors;
mod inverse;

use anyhow::{Context, Result, bail};

use crate::codebase::Codebase;
use crate::config::{ProjectConfig, TranslatorConfig};
use crate::context::ProjectContext;
use crate::error::UserError;

pub use editors::{Editor, Renamer, ShellEditor};
pub use inverse::InverseEditor;

/// Extra inputs for a translation.
#[derive(Debug, Clone, Default)]
pub struct TranslateOptions {
    /// Current state of the target, in the target space. Required by inverse
    /// translators.
    pub reference_to: Option<Codebase>,
    /// The source-space image of `reference_to`, when one is known (for
    /// example the source revision of the last equivalence). Defaults to
    /// `reference_to` translated forward.
    pub reference_from: Option<Codebase>,
}

#[derive(Debug, Clone)]
pub struct Translator {
    from_space: String,
    to_space: String,
    kind: Kind,
}

#[derive(Debug, Clone)]
enum Kind {
    Forward(Vec<Editor>),
    Inverse {
        forward: Vec<Editor>,
        /// Last forward step first.
        inverse: Vec<InverseEditor>,
    },
}

impl Translator {
    pub fn from_config(config: &TranslatorConfig, project: &ProjectConfig) -> Result<Self> {
        let steps = |names: &[String]| -> Result<Vec<Editor>> {
            names
                .iter()
                .map(|n| Editor::from_config(n, project.editor(n)?))
                .collect()
        };

        let kind = if config.inverse {
            let other = project
                .find_translator(&config.to_project_space, &config.from_project_space)
                .ok_or_else(|| UserError::UnknownTranslator {
                    from: config.to_project_space.clone(),
                    to: config.from_project_space.clone(),
                })?;
            if other.inverse {
                return Err(UserError::InvalidProject(format!(
                    "translators {} <-> {} are both inverse",
                    config.from_project_space, config.to_project_space
                ))
                .into());
            }
            let forward = steps(&other.steps)?;
            let inverse = forward.iter().rev().map(InverseEditor::for_editor).collect();
            Kind::Inverse { forward, inverse }
        } else {
            Kind::Forward(steps(&config.steps)?)
        };

        Ok(Self {
            from_space: config.from_project_space.clone(),
            to_space: config.to_project_space.clone(),
            kind,
        })
    }

    pub fn from_space(&self) -> &str {
        &self.from_space
    }

    pub fn to_space(&self) -> &str {
        &self.to_space
    }

    pub fn is_inverse(&self) -> bool {
        matches!(self.kind, Kind::Inverse { .. })
    }

    /// Translate `input` into this translator's target space.
    pub fn translate(
        &self,
        input: &Codebase,
        options: &TranslateOptions,
        ctx: &ProjectContext,
    ) -> Result<Codebase> {
        let translated = match &self.kind {
            Kind::Forward(steps) => {
                let mut current = input.clone();
                for step in steps {
                    let task = ctx.ui().task(format!("Editing {} with {}", current, step.name()));
                    current = step
                        .edit(&current, ctx)
                        .with_context(|| format!("editor '{}'", step.name()))?;
                    task.finish_ok(format!("Edited with {}", step.name()));
                }
                current
            }
            Kind::Inverse { forward, inverse } => {
                self.translate_inverse(input, forward, inverse, options, ctx)?
            }
        };
        Ok(translated.with_project_space(&self.to_space))
    }

    fn translate_inverse(
        &self,
        input: &Codebase,
        forward: &[Editor],
        inverse: &[InverseEditor],
        options: &TranslateOptions,
        ctx: &ProjectContext,
    ) -> Result<Codebase> {
        let Some(reference_to) = &options.reference_to else {
            bail!(
                "inverse translation {} -> {} requires a reference codebase",
                self.from_space,
                self.to_space
            );
        };

        // stack[i] is the reference after the first i forward steps.
        let mut stack = Vec::with_capacity(forward.len() + 1);
        stack.push(reference_to.clone());
        for step in forward {
            let Some(top) = stack.last() else { break };
            let task = ctx.ui().task(format!("Building reference {}|{}", top, step.name()));
            let next = step.edit(top, ctx)?;
            task.finish_ok(format!("Built reference {next}"));
            stack.push(next);
        }

        let top = stack.pop().context("empty forward-translation stack")?;
        let mut reference_from = options.reference_from.clone().unwrap_or(top);
        let mut current = input.clone();
        for step in inverse {
            let reference_to = stack.pop().context("forward-translation stack exhausted")?;
            let task = ctx.ui().task(format!(
                "Inverse-translating with {} onto {}",
                step.name(),
                reference_to
            ));
            current = step.inverse_edit(&current, &reference_from, &reference_to, ctx)?;
            task.finish_ok(format!("Applied {}", step.name()));
            reference_from = reference_to;
        }
        Ok(current)
    }
}
