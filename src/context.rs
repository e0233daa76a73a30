//! Everything one invocation works with, built once from the configuration
//! and passed explicitly to the components that need it.

use anyhow::{Context, Result};
use std::collections::BTreeMap;

use crate::command::CommandRunner;
use crate::config::ProjectConfig;
use crate::error::UserError;
use crate::paths;
use crate::progress::Ui;
use crate::repositories::RepositoryType;
use crate::translation::Translator;

pub struct ProjectContext {
    config: ProjectConfig,
    repositories: BTreeMap<String, RepositoryType>,
    cmd: Box<dyn CommandRunner>,
    ui: Ui,
}

impl ProjectContext {
    /// Resolve every configured repository. Nothing is cloned yet.
    pub fn new(config: ProjectConfig, cmd: Box<dyn CommandRunner>, ui: Ui) -> Result<Self> {
        let clones = paths::paths(&config.name)?.clones;
        let mut repositories = BTreeMap::new();
        for (name, rc) in &config.repositories {
            let repo = RepositoryType::from_config(name, rc, &clones)
                .with_context(|| format!("configuring repository '{name}'"))?;
            repositories.insert(name.clone(), repo);
        }
        Ok(Self {
            config,
            repositories,
            cmd,
            ui,
        })
    }

    /// Replace (or add) a repository.
    pub fn with_repository(mut self, repository: RepositoryType) -> Self {
        self.repositories
            .insert(repository.name().to_string(), repository);
        self
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn cmd(&self) -> &dyn CommandRunner {
        self.cmd.as_ref()
    }

    pub fn ui(&self) -> &Ui {
        &self.ui
    }

    pub fn repository(&self, name: &str) -> Result<&RepositoryType, UserError> {
        self.repositories
            .get(name)
            .ok_or_else(|| UserError::UnknownRepository(name.to_string()))
    }

    /// The repository `name`, cloned or updated first.
    pub fn cloned_repository(&self, name: &str) -> Result<&RepositoryType> {
        let repo = self.repository(name)?;
        let task = self.ui.task(format!("Updating repository {name}"));
        match repo.ensure_cloned() {
            Ok(()) => {
                task.finish_ok(format!("Repository {name} is up to date"));
                Ok(repo)
            }
            Err(e) => {
                task.finish_err(format!("Could not update repository {name}"));
                Err(e)
            }
        }
    }

    /// The translator between two project spaces.
    pub fn translator(&self, from_space: &str, to_space: &str) -> Result<Translator> {
        let tc = self
            .config
            .find_translator(from_space, to_space)
            .ok_or_else(|| UserError::UnknownTranslator {
                from: from_space.to_string(),
                to: to_space.to_string(),
            })?;
        Translator::from_config(tc, &self.config)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::ProjectContext;
    use crate::command::testing::FakeCommandRunner;
    use crate::config::ProjectConfig;
    use crate::progress::Ui;

    /// A quiet context over `toml`, with a command runner that always succeeds.
    pub fn context_of(toml: &str) -> ProjectContext {
        context_with(toml, FakeCommandRunner::succeeding())
    }

    pub fn context_with(toml: &str, cmd: FakeCommandRunner) -> ProjectContext {
        let config = ProjectConfig::parse(toml).unwrap();
        ProjectContext::new(config, Box::new(cmd), Ui::quiet()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::context_of;
    use super::*;

    const TOML: &str = r#"
        name = "ctx-test"
        [repositories.internal]
        kind = "dummy"
        project_space = "internal"
        [[repositories.internal.commits]]
        id = "1"
    "#;

    #[test]
    fn resolves_configured_repositories() {
        let ctx = context_of(TOML);
        let repo = ctx.cloned_repository("internal").unwrap();
        assert_eq!(repo.project_space(), "internal");
        assert!(matches!(
            ctx.repository("public"),
            Err(UserError::UnknownRepository(n)) if n == "public"
        ));
    }

    #[test]
    fn missing_translator_is_a_user_error() {
        let ctx = context_of(TOML);
        let err = ctx.translator("internal", "public").err().unwrap();
        assert!(crate::error::is_user_error(&err));
    }
}
