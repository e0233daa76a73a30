//! Crate entry point for **revsync**.
//!
//! revsync keeps two repositories of one project in step when they hold the
//! same code in different layouts ("project spaces"). It remembers which
//! revisions are equivalent, finds the changes one side has not seen yet,
//! translates them, and writes them as draft revisions on the other side.
//!
//! Each submodule encapsulates one responsibility; the `cmd_*` functions in
//! [`directives`] are what the `revsync` binary calls.

pub mod codebase;
pub mod command;
pub mod config;
pub mod context;
pub mod database;
pub mod directives;
pub mod error;
pub mod git;
pub mod migrations;
pub mod paths;
pub mod progress;
pub mod repositories;
pub mod translation;
pub mod writer;

pub use config::{ProjectConfig, load_config};
pub use context::ProjectContext;
pub use error::{Problem, UserError, is_user_error};
pub use paths::revsync_home;
