//! # revsync
//!
//! Keeps two repositories of one project in step.
//!
//! Commands:
//! - `revsync magic` bookkeeps, then writes every pending change as drafts
//! - `revsync bookkeeping` records equivalences and submitted migrations
//! - `revsync determine-migrations` shows what `magic` would do
//! - inspection helpers: `highest-revision`, `find-equivalence`,
//!   `last-equivalence`, `revisions-since-equivalence`, `create-codebase`,
//!   `merge-codebases`, `note-equivalence`
//!
//! This CLI is built with [clap](https://docs.rs/clap).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use revsync::command::SystemCommandRunner;
use revsync::config::load_config;
use revsync::context::ProjectContext;
use revsync::database::FileDb;
use revsync::directives::{self, MagicOptions};
use revsync::paths::DEFAULT_CONFIG;
use revsync::progress::Ui;
use revsync::repositories::Revision;
use revsync::{is_user_error, revsync_home};

#[derive(Parser, Debug)]
#[command(
    name = "revsync",
    version,
    about = "revsync - keep equivalent repositories in step",
    arg_required_else_help = true
)]
struct Cli {
    /// Project configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
    /// Database location (`file:<path>`, a bare path, or `dummy`); overrides the configuration
    #[arg(long, global = true)]
    db: Option<String>,
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print the revsync cache directory
    Home,
    #[command(flatten)]
    Project(ProjectCmd),
}

/// Commands working on the project named by `--config`.
#[derive(Subcommand, Debug)]
enum ProjectCmd {
    /// Print the newest revision of a repository
    HighestRevision {
        #[arg(long)]
        repository: String,
        #[arg(long)]
        revision: Option<String>,
    },
    /// Print the equivalences bounding the history of a revision
    FindEquivalence {
        #[arg(long)]
        from_repository: String,
        #[arg(long)]
        in_repository: String,
        #[arg(long)]
        revision: Option<String>,
    },
    /// Print the equivalence a migration would start from
    LastEquivalence {
        #[arg(long)]
        from_repository: String,
        #[arg(long)]
        with_repository: String,
    },
    /// Record two revisions as equivalent, e.g. `--repo1 'internal{1}' --repo2 'public{a}'`
    NoteEquivalence {
        #[arg(long)]
        repo1: Revision,
        #[arg(long)]
        repo2: Revision,
    },
    /// List revisions not yet reflected in the other repository
    RevisionsSinceEquivalence {
        #[arg(long)]
        from_repository: String,
        #[arg(long)]
        to_repository: String,
    },
    /// Show the pending migrations of a configured migration
    DetermineMigrations {
        #[arg(long)]
        migration: String,
    },
    /// Three-way merge of codebase expressions
    MergeCodebases {
        #[arg(long)]
        original: String,
        #[arg(long)]
        modified: String,
        #[arg(long)]
        destination: String,
    },
    /// Materialize a codebase expression and print its directory
    CreateCodebase { expression: String },
    /// Record equivalences and submitted migrations
    Bookkeeping,
    /// Bookkeep, then migrate every pending change
    Magic {
        #[arg(long = "migration")]
        migrations: Vec<String>,
        #[arg(long = "skip-revision")]
        skip_revisions: Vec<Revision>,
        #[arg(long)]
        skip_bookkeeping: bool,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) if is_user_error(&e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("{e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.cmd {
        Cmd::Home => {
            println!("{}", revsync_home()?.display());
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Project(cmd) => run_project(&cli.config, cli.db.as_deref(), cmd),
    }
}

fn run_project(config_path: &Path, db_uri: Option<&str>, cmd: ProjectCmd) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let ctx = ProjectContext::new(config, Box::new(SystemCommandRunner), Ui::new())?;
    let mut out = io::stdout().lock();

    // Only commands that consult equivalences need a database.
    let open_db = || -> Result<FileDb> {
        let location = ctx.config().database_location(db_uri)?;
        FileDb::open(&location)
    };

    match cmd {
        ProjectCmd::HighestRevision { repository, revision } => {
            directives::cmd_highest_revision(&ctx, &repository, revision.as_deref(), &mut out)?;
        }
        ProjectCmd::FindEquivalence {
            from_repository,
            in_repository,
            revision,
        } => {
            let db = open_db()?;
            directives::cmd_find_equivalence(
                &ctx,
                &db,
                &from_repository,
                &in_repository,
                revision.as_deref(),
                &mut out,
            )?;
        }
        ProjectCmd::LastEquivalence {
            from_repository,
            with_repository,
        } => {
            let db = open_db()?;
            directives::cmd_last_equivalence(&ctx, &db, &from_repository, &with_repository, &mut out)?;
        }
        ProjectCmd::NoteEquivalence { repo1, repo2 } => {
            let mut db = open_db()?;
            directives::cmd_note_equivalence(&ctx, &mut db, &repo1, &repo2, &mut out)?;
        }
        ProjectCmd::RevisionsSinceEquivalence {
            from_repository,
            to_repository,
        } => {
            let db = open_db()?;
            directives::cmd_revisions_since_equivalence(&ctx, &db, &from_repository, &to_repository, &mut out)?;
        }
        ProjectCmd::DetermineMigrations { migration } => {
            let db = open_db()?;
            directives::cmd_determine_migrations(&ctx, &db, &migration, &mut out)?;
        }
        ProjectCmd::MergeCodebases {
            original,
            modified,
            destination,
        } => {
            let result = directives::cmd_merge_codebases(&ctx, &original, &modified, &destination)?;
            if !result.failed_files.is_empty() {
                return Ok(ExitCode::FAILURE);
            }
        }
        ProjectCmd::CreateCodebase { expression } => {
            directives::cmd_create_codebase(&ctx, &expression, &mut out)?;
        }
        ProjectCmd::Bookkeeping => {
            let mut db = open_db()?;
            directives::cmd_bookkeeping(&ctx, &mut db)?;
        }
        ProjectCmd::Magic {
            migrations,
            skip_revisions,
            skip_bookkeeping,
        } => {
            let mut db = open_db()?;
            let options = MagicOptions {
                migrations,
                skip_revisions,
                skip_bookkeeping,
            };
            directives::cmd_magic(&ctx, &mut db, &options, &mut out)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
