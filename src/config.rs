use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::UserError;
use crate::repositories::{DummyCommit, SearchType};

/// Top-level project configuration loaded from `revsync.toml`.
///
/// Example TOML:
/// ```toml
/// name = "widget"
/// database_uri = "file:/var/lib/revsync/widget.json"
///
/// [repositories.internal]
/// kind = "git"
/// url = "https://git.example.com/widget-internal.git"
/// project_space = "internal"
///
/// [repositories.public]
/// kind = "git"
/// url = "https://github.com/example/widget.git"
///
/// [editors.publish_paths]
/// type = "renamer"
/// mappings = { "java/com/example/internal" = "src" }
///
/// [[translators]]
/// from_project_space = "internal"
/// to_project_space = "public"
/// steps = ["publish_paths"]
///
/// [[migrations]]
/// name = "publish"
/// from_repository = "internal"
/// to_repository = "public"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub database_uri: Option<String>,
    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryConfig>,
    #[serde(default)]
    pub editors: BTreeMap<String, EditorConfig>,
    #[serde(default)]
    pub translators: Vec<TranslatorConfig>,
    #[serde(default)]
    pub migrations: Vec<MigrationConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    Git,
    Dummy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    pub kind: RepositoryKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default = "default_project_space")]
    pub project_space: String,
    /// How migrations walk this repository's history.
    #[serde(default)]
    pub history: SearchType,
    /// Only for `kind = "dummy"`.
    #[serde(default)]
    pub commits: Vec<DummyCommit>,
}

fn default_project_space() -> String {
    "public".to_string()
}

/// A single-codebase transformation, referenced by name from translators.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EditorConfig {
    /// Moves files by rewriting path prefixes (or regexes).
    Renamer {
        mappings: BTreeMap<String, String>,
        #[serde(default)]
        use_regex: bool,
    },
    /// Runs a shell command inside a copy of the codebase.
    Shell { command: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslatorConfig {
    pub from_project_space: String,
    pub to_project_space: String,
    #[serde(default)]
    pub steps: Vec<String>,
    /// Undo the forward translator of the opposite direction instead of
    /// listing steps.
    #[serde(default)]
    pub inverse: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    pub name: String,
    pub from_repository: String,
    pub to_repository: String,
    /// One migration per pending revision instead of a single batch.
    #[serde(default)]
    pub separate_revisions: bool,
    /// Drop authors from migrated metadata.
    #[serde(default)]
    pub scrub_authors: bool,
    /// Rewrites applied to each migrated revision's metadata.
    #[serde(default)]
    pub metadata_scrubber: Option<MetadataScrubberConfig>,
}

/// The `[migrations.metadata_scrubber]` table.
///
/// ```toml
/// [[migrations]]
/// name = "publish"
/// from_repository = "internal"
/// to_repository = "public"
///
/// [migrations.metadata_scrubber]
/// usernames_to_scrub = ["saget"]
/// sensitive_res = ["(?i)codename \\w+"]
/// restore_original_author = true
/// log_format = "{description}\n\tChange on {date} by {author}"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataScrubberConfig {
    /// Replaced by `user` wherever they appear as a word.
    #[serde(default)]
    pub usernames_to_scrub: Vec<String>,
    /// Regexes whose matches are cut from descriptions.
    #[serde(default)]
    pub sensitive_res: Vec<String>,
    /// Take the author from an `ORIGINAL_AUTHOR=` field when present.
    #[serde(default)]
    pub restore_original_author: bool,
    /// Template for the migrated description. Placeholders: `{id}`,
    /// `{author}`, `{date}`, `{description}`, `{parents}`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for MetadataScrubberConfig {
    fn default() -> Self {
        Self {
            usernames_to_scrub: Vec::new(),
            sensitive_res: Vec::new(),
            restore_original_author: false,
            log_format: default_log_format(),
        }
    }
}

fn default_log_format() -> String {
    "{description}\n\tChange on {date} by {author}".to_string()
}

/// Where the equivalence database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    File(PathBuf),
    /// In memory only; never written.
    Dummy,
}

/// Load, parse, and validate the project configuration at `path`.
///
/// # Errors
/// - Returns an error if the file cannot be read.
/// - Returns a [`UserError::InvalidProject`] if it does not parse or validate.
pub fn load_config(path: &Path) -> Result<ProjectConfig> {
    let txt = fs::read_to_string(path)
        .with_context(|| format!("config not found: {}", path.display()))?;
    ProjectConfig::parse(&txt)
}

impl ProjectConfig {
    pub fn parse(txt: &str) -> Result<Self> {
        let cfg: ProjectConfig = toml::from_str(txt)
            .map_err(|e| UserError::InvalidProject(format!("failed to parse config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), UserError> {
        let invalid = |msg: String| Err(UserError::InvalidProject(msg));

        if self.name.trim().is_empty() {
            return invalid("missing project name".into());
        }
        if self.repositories.is_empty() {
            return invalid("no repositories configured".into());
        }
        for (name, repo) in &self.repositories {
            if repo.kind == RepositoryKind::Git
                && repo.url.as_deref().is_none_or(|u| u.trim().is_empty())
            {
                return invalid(format!("git repository '{name}' has no url"));
            }
        }
        for t in &self.translators {
            for step in &t.steps {
                if !self.editors.contains_key(step) {
                    return Err(UserError::UnknownEditor(step.clone()));
                }
            }
            if t.inverse
                && self
                    .forward_translator(&t.to_project_space, &t.from_project_space)
                    .is_none()
            {
                return invalid(format!(
                    "inverse translator {} -> {} has no forward translator {} -> {}",
                    t.from_project_space,
                    t.to_project_space,
                    t.to_project_space,
                    t.from_project_space
                ));
            }
        }
        for m in &self.migrations {
            if m.name.trim().is_empty() {
                return invalid("missing name in migration".into());
            }
            for repo in [&m.from_repository, &m.to_repository] {
                if !self.repositories.contains_key(repo) {
                    return Err(UserError::UnknownRepository(repo.clone()));
                }
            }
            if let Some(scrubber) = &m.metadata_scrubber {
                for re in &scrubber.sensitive_res {
                    if let Err(e) = regex::Regex::new(re) {
                        return invalid(format!("bad sensitive_res '{re}' in migration '{}': {e}", m.name));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn repository(&self, name: &str) -> Result<&RepositoryConfig, UserError> {
        self.repositories
            .get(name)
            .ok_or_else(|| UserError::UnknownRepository(name.to_string()))
    }

    pub fn migration(&self, name: &str) -> Result<&MigrationConfig, UserError> {
        self.migrations
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| UserError::UnknownMigration(name.to_string()))
    }

    pub fn editor(&self, name: &str) -> Result<&EditorConfig, UserError> {
        self.editors
            .get(name)
            .ok_or_else(|| UserError::UnknownEditor(name.to_string()))
    }

    pub fn find_translator(&self, from_space: &str, to_space: &str) -> Option<&TranslatorConfig> {
        self.translators
            .iter()
            .find(|t| t.from_project_space == from_space && t.to_project_space == to_space)
    }

    fn forward_translator(&self, from_space: &str, to_space: &str) -> Option<&TranslatorConfig> {
        self.translators.iter().find(|t| {
            !t.inverse && t.from_project_space == from_space && t.to_project_space == to_space
        })
    }

    /// Resolve the database location; `override_uri` (from `--db`) wins.
    pub fn database_location(&self, override_uri: Option<&str>) -> Result<DbLocation, UserError> {
        let uri = override_uri
            .filter(|s| !s.is_empty())
            .or(self.database_uri.as_deref().filter(|s| !s.is_empty()))
            .ok_or_else(|| {
                UserError::InvalidProject(
                    "database location was not set in the project configuration nor on the command line"
                        .into(),
                )
            })?;
        parse_db_uri(uri)
    }
}

fn parse_db_uri(uri: &str) -> Result<DbLocation, UserError> {
    if uri == "dummy" || uri.starts_with("dummy:") {
        return Ok(DbLocation::Dummy);
    }
    if let Some(rest) = uri.strip_prefix("file:") {
        let path = rest.strip_prefix("//").unwrap_or(rest);
        if path.is_empty() {
            return Err(UserError::InvalidProject(format!(
                "invalid URI for database location: {uri}"
            )));
        }
        return Ok(DbLocation::File(PathBuf::from(path)));
    }
    Ok(DbLocation::File(PathBuf::from(uri)))
}
