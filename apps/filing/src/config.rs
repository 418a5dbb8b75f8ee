//! Command-line and environment configuration.
//!
//! Every flag has an environment fallback so the server can be configured
//! entirely from the environment in a container.

use clap::{Args, Parser, Subcommand, ValueEnum};
use filing_core::{AbandonReason, ManagerConfig, TransferReason, WorkflowType};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "filing", version, about = "Filing session manager")]
pub struct Cli {
    /// Path to the session database.
    #[arg(long, global = true, env = "FILING_DB", default_value = "filing.redb")]
    pub db: PathBuf,

    #[command(flatten)]
    pub manager: ManagerArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Policy knobs shared by every command that writes.
#[derive(Debug, Clone, Args)]
pub struct ManagerArgs {
    /// Recoverable extraction failures allowed per session.
    #[arg(long, global = true, env = "FILING_RETRY_BUDGET", default_value_t = 3)]
    pub retry_budget: u32,

    /// Idle seconds before the sweep abandons a session.
    #[arg(long, global = true, env = "FILING_INACTIVITY_SECS", default_value_t = 86_400)]
    pub inactivity_secs: u64,
}

impl ManagerArgs {
    pub fn to_config(&self) -> ManagerConfig {
        ManagerConfig {
            retry_budget: self.retry_budget,
            inactivity_timeout_ms: self.inactivity_secs.saturating_mul(1000),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create an empty database.
    Init {
        /// Overwrite an existing database.
        #[arg(long)]
        force: bool,
    },
    /// Run the HTTP server.
    Serve(ServeArgs),
    /// Create a session.
    Create {
        /// Owning user; omit for an anonymous session.
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, value_enum, default_value_t = WorkflowArg::Unified)]
        workflow: WorkflowArg,
    },
    /// Print a session.
    Show { id: String },
    /// Apply a trigger given as JSON, e.g. '{"type":"extraction_failed","reason":"ocr"}'.
    Transition {
        id: String,
        #[arg(long)]
        expected_step: u64,
        #[arg(long)]
        trigger: String,
    },
    /// Abandon a session.
    Abandon {
        id: String,
        #[arg(long)]
        expected_step: u64,
    },
    /// Move a session to another user.
    Transfer {
        id: String,
        #[arg(long)]
        to: String,
        #[arg(long, value_enum, default_value_t = ReasonArg::AnonymousClaim)]
        reason: ReasonArg,
    },
    /// Render a report view at tier 1, 2 or 3.
    View {
        id: String,
        #[arg(long, default_value_t = 1)]
        tier: u8,
    },
    /// Print the transition history of a session.
    History { id: String },
    /// Abandon sessions idle longer than the inactivity timeout.
    Sweep,
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Listen address.
    #[arg(long, env = "FILING_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Bearer token required on session routes. Unset disables auth.
    #[arg(long, env = "FILING_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Requests per second across all clients. 0 disables limiting.
    #[arg(long, env = "FILING_RATE_LIMIT", default_value_t = 100)]
    pub rate_limit: u32,

    /// Seconds between inactivity sweeps. 0 disables the sweeper.
    #[arg(long, env = "FILING_SWEEP_SECS", default_value_t = 300)]
    pub sweep_secs: u64,

    /// Capacity of the notification event channel.
    #[arg(long, default_value_t = 1024)]
    pub event_buffer: usize,
}

/// Resolved server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub api_key: Option<String>,
    pub rate_limit_per_sec: u32,
    pub sweep_interval: Option<Duration>,
    pub event_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            api_key: None,
            rate_limit_per_sec: 100,
            sweep_interval: Some(Duration::from_secs(300)),
            event_buffer: 1024,
        }
    }
}

impl From<&ServeArgs> for ServerConfig {
    fn from(args: &ServeArgs) -> Self {
        Self {
            bind: args.bind,
            api_key: args.api_key.clone().filter(|k| !k.is_empty()),
            rate_limit_per_sec: args.rate_limit,
            sweep_interval: (args.sweep_secs > 0).then(|| Duration::from_secs(args.sweep_secs)),
            event_buffer: args.event_buffer.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WorkflowArg {
    Unified,
    Express,
}

impl From<WorkflowArg> for WorkflowType {
    fn from(arg: WorkflowArg) -> Self {
        match arg {
            WorkflowArg::Unified => Self::Unified,
            WorkflowArg::Express => Self::Express,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReasonArg {
    AnonymousClaim,
    AccountMerge,
    SupportReassignment,
}

impl From<ReasonArg> for TransferReason {
    fn from(arg: ReasonArg) -> Self {
        match arg {
            ReasonArg::AnonymousClaim => Self::AnonymousClaim,
            ReasonArg::AccountMerge => Self::AccountMerge,
            ReasonArg::SupportReassignment => Self::SupportReassignment,
        }
    }
}

/// Reason recorded when the CLI or API abandons a session on request.
pub const EXPLICIT_ABANDON: AbandonReason = AbandonReason::Cancelled;
