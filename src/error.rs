use thiserror::Error;

/// Conditions a user can fix by changing their input or configuration.
///
/// These are reported as a one-line message without a cause chain; see
/// [`is_user_error`].
#[derive(Debug, Error)]
pub enum UserError {
    #[error("invalid project: {0}")]
    InvalidProject(String),
    #[error("no repository named '{0}' in the project configuration")]
    UnknownRepository(String),
    #[error("no migration named '{0}' in the project configuration")]
    UnknownMigration(String),
    #[error("no editor named '{0}' in the project configuration")]
    UnknownEditor(String),
    #[error("no translator from project space '{from}' to '{to}'")]
    UnknownTranslator { from: String, to: String },
    #[error("revision '{revision}' not found in repository '{repository}'")]
    UnknownRevision { repository: String, revision: String },
    #[error("cannot parse revision '{0}': expected the form repository{{id}}")]
    RevisionSyntax(String),
    #[error("cannot parse expression '{expression}': {reason}")]
    Expression { expression: String, reason: String },
    #[error("invalid equivalence: {0}")]
    InvalidEquivalence(String),
    #[error("cannot skip a subset of the revisions in a single migration: {0}")]
    PartialSkip(String),
}

/// Fatal conditions with no caller-side recovery.
///
/// They abort the current invocation and are logged with the full chain.
#[derive(Debug, Error)]
pub enum Problem {
    #[error("'{command}' exited with unexpected status {status}: {stderr}")]
    UnexpectedExit {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("metadata for revision {0} is unavailable")]
    MissingMetadata(String),
    #[error("malformed database at {location}: {reason}")]
    MalformedDatabase { location: String, reason: String },
    #[error("inconsistent repository state: {0}")]
    Inconsistent(String),
    #[error("no rename mapping in editor '{editor}' covers file {path}")]
    UnmappedFile { editor: String, path: String },
}

/// Returns true if any error in the chain is a [`UserError`].
pub fn is_user_error(err: &anyhow::Error) -> bool {
    err.chain().any(|e| e.downcast_ref::<UserError>().is_some())
}
