//! Metadata rewriting for migrated revisions.

use regex::Regex;
use std::sync::LazyLock;

use crate::config::MetadataScrubberConfig;
use crate::error::UserError;
use crate::repositories::RevisionMetadata;

const ORIGINAL_AUTHOR_KEY: &str = "ORIGINAL_AUTHOR";

static ORIGINAL_AUTHOR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ORIGINAL_AUTHOR=.*\n?").expect("original author regex"));
static GIT_AUTHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<.*>").expect("git author regex"));
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b").expect("email regex")
});
static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._%+-]*$").expect("username regex"));

/// The configured metadata rewrites of one migration, compiled.
///
/// Applied per revision, in order: restore the original author, replace
/// scrubbed usernames, cut sensitive text, keep only the `Public:` section,
/// then format the description with the log template.
#[derive(Debug)]
pub struct MetadataScrubber {
    usernames: Vec<Regex>,
    sensitive: Vec<Regex>,
    restore_original_author: bool,
    log_format: String,
}

impl MetadataScrubber {
    pub fn new(config: &MetadataScrubberConfig) -> Result<Self, UserError> {
        let compile = |re: &str| {
            Regex::new(re)
                .map_err(|e| UserError::InvalidProject(format!("bad metadata scrubber regex '{re}': {e}")))
        };
        Ok(Self {
            usernames: config
                .usernames_to_scrub
                .iter()
                .map(|u| compile(&format!(r"(?i)\b{}\b", regex::escape(u))))
                .collect::<Result<_, _>>()?,
            sensitive: config
                .sensitive_res
                .iter()
                .map(|re| compile(re))
                .collect::<Result<_, _>>()?,
            restore_original_author: config.restore_original_author,
            log_format: config.log_format.clone(),
        })
    }

    /// Every step but the log template. Run before authors are scrubbed so the
    /// template sees the final author.
    pub fn scrub(&self, mut md: RevisionMetadata) -> RevisionMetadata {
        if self.restore_original_author {
            md = restore_original_author(md);
        }
        for re in &self.usernames {
            md.author = md.author.map(|a| re.replace_all(&a, "user").into_owned());
            md.description = re.replace_all(&md.description, "user").into_owned();
        }
        for re in &self.sensitive {
            md.description = re.replace_all(&md.description, "").into_owned();
        }
        md.description = public_section(&md.description);
        md
    }

    /// Render the log template over `md`'s fields.
    pub fn format_description(&self, mut md: RevisionMetadata) -> RevisionMetadata {
        let parents: Vec<&str> = md.parents.iter().map(|p| p.rev_id.as_str()).collect();
        md.description = self
            .log_format
            .replace("{id}", &md.id)
            .replace("{author}", md.author.as_deref().unwrap_or_default())
            .replace("{date}", &md.date.format("%Y/%m/%d").to_string())
            .replace("{description}", &md.description)
            .replace("{parents}", &parents.join(", "));
        md
    }
}

/// Author taken from the first `ORIGINAL_AUTHOR` field, with that field's
/// line removed from the description.
fn restore_original_author(mut md: RevisionMetadata) -> RevisionMetadata {
    let Some(original) = md.field(ORIGINAL_AUTHOR_KEY).map(str::to_string) else {
        return md;
    };
    md.author = Some(sanitize_author(&original));
    md.description = ORIGINAL_AUTHOR_LINE.replace(&md.description, "").into_owned();
    md
}

/// Coerce a free-form author into `Name <email>` form.
fn sanitize_author(author: &str) -> String {
    let author = author.trim();
    if GIT_AUTHOR.is_match(author) {
        author.to_string()
    } else if EMAIL.is_match(author) {
        let user = author.split('@').next().unwrap_or_default();
        format!("{user} <{author}>")
    } else if USERNAME.is_match(author) {
        format!("{author} <{author}>")
    } else {
        tracing::warn!(author, "unknown author format in commit metadata");
        format!("\"{author}\" <undetermined_user>")
    }
}

/// The lines after the last `Public:` line, up to the next blank line. A
/// description without such a line is returned whole.
fn public_section(description: &str) -> String {
    let lines: Vec<&str> = description.split('\n').collect();
    let Some(start) = lines.iter().rposition(|l| l.trim() == "Public:") else {
        return description.to_string();
    };
    let section = &lines[start + 1..];
    let end = section
        .iter()
        .position(|l| l.trim().is_empty())
        .unwrap_or(section.len());
    section[..end].join("\n")
}
