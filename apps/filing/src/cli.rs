//! # CLI Commands
//!
//! One `cmd_*` function per subcommand. Each opens the database, performs
//! one operation through the manager, prints the result as JSON on stdout,
//! and returns it so tests can inspect it.

use crate::api;
use crate::config::{Cli, Commands, EXPLICIT_ABANDON, ServerConfig};
use crate::notify::LogSink;
use crate::runtime::{mint_session_id, open_manager};
use filing_core::{
    FilingError, FilingSessionManager, ManagerConfig, NewSession, ReportView, Session,
    SessionId, SessionTransfer, Tier, TransferReason, TransitionOutcome, TransitionRecord,
    TransitionRequest, Trigger, UserId, WorkflowType,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Filing(#[from] FilingError),

    #[error("database already exists at {0} (use --force to overwrite)")]
    AlreadyExists(PathBuf),

    #[error("invalid trigger JSON: {0}")]
    Trigger(#[source] serde_json::Error),

    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),

    #[error(transparent)]
    Serve(#[from] api::ServeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CliResult<T> = Result<T, CliError>;

/// Dispatch a parsed command line.
pub fn run(cli: Cli) -> CliResult<()> {
    let config = cli.manager.to_config();
    let db = cli.db.as_path();
    match &cli.command {
        Commands::Init { force } => cmd_init(db, *force),
        Commands::Serve(args) => cmd_serve(db, config, ServerConfig::from(args)),
        Commands::Create { owner, workflow } => {
            cmd_create(db, config, owner.as_deref(), (*workflow).into()).map(drop)
        }
        Commands::Show { id } => cmd_show(db, id).map(drop),
        Commands::Transition {
            id,
            expected_step,
            trigger,
        } => cmd_transition(db, config, id, *expected_step, trigger).map(drop),
        Commands::Abandon { id, expected_step } => {
            cmd_abandon(db, config, id, *expected_step).map(drop)
        }
        Commands::Transfer { id, to, reason } => {
            cmd_transfer(db, id, to, (*reason).into()).map(drop)
        }
        Commands::View { id, tier } => cmd_view(db, id, *tier).map(drop),
        Commands::History { id } => cmd_history(db, id).map(drop),
        Commands::Sweep => cmd_sweep(db, config).map(drop),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn open(db: &Path, config: ManagerConfig) -> CliResult<FilingSessionManager> {
    Ok(open_manager(db, config, Arc::new(LogSink))?)
}

fn open_default(db: &Path) -> CliResult<FilingSessionManager> {
    open(db, ManagerConfig::default())
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// COMMANDS
// =============================================================================

/// Create an empty database at `db`.
pub fn cmd_init(db: &Path, force: bool) -> CliResult<()> {
    if db.exists() {
        if !force {
            return Err(CliError::AlreadyExists(db.to_path_buf()));
        }
        std::fs::remove_file(db)?;
    }
    open_default(db)?;
    tracing::info!(path = %db.display(), "database initialised");
    println!("Initialised {}", db.display());
    Ok(())
}

/// Serve the HTTP API until interrupted.
pub fn cmd_serve(db: &Path, config: ManagerConfig, server: ServerConfig) -> CliResult<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(api::serve(db, config, server))?;
    Ok(())
}

pub fn cmd_create(
    db: &Path,
    config: ManagerConfig,
    owner: Option<&str>,
    workflow: WorkflowType,
) -> CliResult<Session> {
    let manager = open(db, config)?;
    let owner = owner.map(UserId::new).transpose()?;
    let session = manager.create_session(NewSession {
        id: Some(mint_session_id()?),
        owner,
        workflow,
    })?;
    print_json(&session)?;
    Ok(session)
}

pub fn cmd_show(db: &Path, id: &str) -> CliResult<Session> {
    let session = open_default(db)?.session(&SessionId::new(id)?)?;
    print_json(&session)?;
    Ok(session)
}

/// Apply a trigger given as JSON (`{"type": "...", ...}`).
pub fn cmd_transition(
    db: &Path,
    config: ManagerConfig,
    id: &str,
    expected_step: u64,
    trigger_json: &str,
) -> CliResult<TransitionOutcome> {
    let trigger: Trigger = serde_json::from_str(trigger_json).map_err(CliError::Trigger)?;
    let request = TransitionRequest::new(SessionId::new(id)?, expected_step, trigger);
    let outcome = open(db, config)?.transition(&request)?;
    print_json(&outcome)?;
    Ok(outcome)
}

pub fn cmd_abandon(
    db: &Path,
    config: ManagerConfig,
    id: &str,
    expected_step: u64,
) -> CliResult<TransitionOutcome> {
    let outcome =
        open(db, config)?.abandon(&SessionId::new(id)?, expected_step, EXPLICIT_ABANDON)?;
    print_json(&outcome)?;
    Ok(outcome)
}

pub fn cmd_transfer(
    db: &Path,
    id: &str,
    to: &str,
    reason: TransferReason,
) -> CliResult<SessionTransfer> {
    let (_, transfer) = open_default(db)?.transfer(&SessionId::new(id)?, to, reason)?;
    print_json(&transfer)?;
    Ok(transfer)
}

pub fn cmd_view(db: &Path, id: &str, tier: u8) -> CliResult<ReportView> {
    let tier = Tier::try_from(tier)?;
    let view = open_default(db)?.render_view(&SessionId::new(id)?, tier)?;
    print_json(&view)?;
    Ok(view)
}

pub fn cmd_history(db: &Path, id: &str) -> CliResult<Vec<TransitionRecord>> {
    let history = open_default(db)?.history(&SessionId::new(id)?)?;
    print_json(&history)?;
    Ok(history)
}

/// Run one inactivity sweep.
pub fn cmd_sweep(db: &Path, config: ManagerConfig) -> CliResult<Vec<SessionId>> {
    let abandoned = open(db, config)?.sweep_inactive()?;
    print_json(&abandoned)?;
    Ok(abandoned)
}
