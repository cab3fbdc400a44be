//! Paykit Auto-Pay CLI
//!
//! Operator tool for inspecting and configuring auto-pay policy, spending
//! limits and endpoint rotation stored on this machine.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use paykit_autopay::{AutoPayConfig, AutoPayEngine};

mod commands;
mod ui;

#[derive(Parser)]
#[command(name = "paykit-autopay")]
#[command(about = "Paykit Auto-Pay - manage autonomous payment policy and limits", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Storage directory
    #[arg(long, global = true, env = "PAYKIT_AUTOPAY_DIR")]
    storage_dir: Option<PathBuf>,

    /// Wallet identity (overrides config.json)
    #[arg(long, global = true)]
    identity: Option<String>,

    /// Do not ask for confirmation
    #[arg(short, long, global = true)]
    yes: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change global auto-pay settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Manage auto-pay rules (evaluated in order, first match wins)
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },

    /// Manage per-peer spending limits
    Limits {
        #[command(subcommand)]
        action: LimitsAction,
    },

    /// Show what the policy would decide for a payment, without reserving
    Evaluate {
        /// Peer to be paid
        #[arg(long)]
        peer: String,

        /// Amount in satoshis
        #[arg(long)]
        amount: u64,

        /// Payment method
        #[arg(long, default_value = "lightning")]
        method: String,

        /// Print the decision as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configure endpoint rotation
    Rotation {
        #[command(subcommand)]
        action: RotationAction,
    },

    /// Show or clear auto-pay history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Inspect and reconcile reservations that were never settled
    Reservations {
        #[command(subcommand)]
        action: Option<ReservationAction>,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Show current settings
    Show,

    /// Turn auto-pay on
    Enable,

    /// Turn auto-pay off
    Disable,

    /// Change global thresholds
    Set {
        /// Largest amount paid without a matching rule
        #[arg(long)]
        max_amount: Option<u64>,

        /// Wallet-wide daily limit
        #[arg(long)]
        daily_limit: Option<u64>,

        /// Ask the user above this amount when no rule matches
        #[arg(long)]
        confirm_above: Option<u64>,
    },
}

#[derive(Subcommand)]
enum RulesAction {
    /// List rules in evaluation order
    List,

    /// Add a rule at the end of the list
    Add {
        /// Rule name
        name: String,

        /// Largest amount the rule covers
        #[arg(long)]
        max_amount: Option<u64>,

        /// Restrict to these methods (repeatable)
        #[arg(long = "method")]
        methods: Vec<String>,

        /// Restrict to these peers (repeatable)
        #[arg(long = "peer")]
        peers: Vec<String>,

        /// Deny matching payments instead of allowing them
        #[arg(long)]
        deny: bool,

        /// Ask the user even when the rule matches
        #[arg(long)]
        confirm: bool,
    },

    /// Remove a rule
    Remove {
        /// Rule id
        id: String,
    },

    /// Move a rule to a new position (0 = evaluated first)
    Move {
        /// Rule id
        id: String,

        /// New position
        position: usize,
    },
}

#[derive(Subcommand)]
enum LimitsAction {
    /// List all peer limits
    List,

    /// Show one peer's limit
    Show {
        /// Peer id
        peer: String,
    },

    /// Set a peer's limit
    Set {
        /// Peer id
        peer: String,

        /// Limit in satoshis
        limit: u64,

        /// Period (daily, weekly, monthly)
        #[arg(long, default_value = "daily")]
        period: String,
    },

    /// Check whether an amount would fit, without reserving
    Check {
        /// Peer id
        peer: String,

        /// Amount in satoshis
        amount: u64,
    },
}

#[derive(Subcommand)]
enum RotationAction {
    /// Show rotation status for all methods
    Status,

    /// Set the rotation policy for a method
    SetPolicy {
        /// Payment method
        method: String,

        /// Policy (on-use, after-uses, manual)
        policy: String,

        /// Uses before rotation for after-uses
        #[arg(long, default_value = "5")]
        threshold: u32,
    },

    /// Enable or disable rotation triggered by payments
    Auto {
        /// true or false
        #[arg(action = clap::ArgAction::Set)]
        enable: bool,
    },

    /// Show rotation history
    History {
        /// Only show this method
        #[arg(short, long)]
        method: Option<String>,
    },

    /// Clear rotation history
    ClearHistory,
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Show recent auto-pay decisions
    Show {
        /// Maximum entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Clear auto-pay history
    Clear,
}

#[derive(Subcommand)]
enum ReservationAction {
    /// List pending reservations
    List,

    /// Release a pending reservation
    Rollback {
        /// Reservation id
        id: String,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        "paykit_autopay_cli=debug,paykit_autopay=debug"
    } else {
        "paykit_autopay_cli=info,paykit_autopay=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_storage_dir(dir: Option<PathBuf>) -> PathBuf {
    dir.unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("paykit-autopay")
    })
}

fn open_engine(storage_dir: &std::path::Path, identity: Option<String>) -> Result<AutoPayEngine> {
    let mut config = AutoPayConfig::from_json_file(storage_dir.join("config.json"))
        .context("Failed to load config.json")?;
    if let Some(identity) = identity {
        config.identity = identity;
    }
    tracing::debug!(dir = %storage_dir.display(), identity = %config.identity, "Opening store");
    AutoPayEngine::open(storage_dir.join("store"), config).context("Failed to open store")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let storage_dir = resolve_storage_dir(cli.storage_dir);
    let engine = open_engine(&storage_dir, cli.identity)?;
    let yes = cli.yes;

    match cli.command {
        Commands::Settings { action } => match action {
            SettingsAction::Show => commands::settings::show(&engine).await?,
            SettingsAction::Enable => commands::settings::set_enabled(&engine, true).await?,
            SettingsAction::Disable => commands::settings::set_enabled(&engine, false).await?,
            SettingsAction::Set {
                max_amount,
                daily_limit,
                confirm_above,
            } => {
                commands::settings::set(&engine, max_amount, daily_limit, confirm_above).await?
            }
        },
        Commands::Rules { action } => match action {
            RulesAction::List => commands::rules::list(&engine, cli.verbose).await?,
            RulesAction::Add {
                name,
                max_amount,
                methods,
                peers,
                deny,
                confirm,
            } => {
                let new_rule = commands::rules::NewRule {
                    name,
                    max_amount,
                    methods,
                    peers,
                    deny,
                    confirm,
                };
                commands::rules::add(&engine, new_rule).await?
            }
            RulesAction::Remove { id } => commands::rules::remove(&engine, &id, yes).await?,
            RulesAction::Move { id, position } => {
                commands::rules::move_rule(&engine, &id, position).await?
            }
        },
        Commands::Limits { action } => match action {
            LimitsAction::List => commands::limits::list(&engine).await?,
            LimitsAction::Show { peer } => commands::limits::show(&engine, &peer).await?,
            LimitsAction::Set {
                peer,
                limit,
                period,
            } => commands::limits::set(&engine, &peer, limit, &period).await?,
            LimitsAction::Check { peer, amount } => {
                commands::limits::check(&engine, &peer, amount).await?
            }
        },
        Commands::Evaluate {
            peer,
            amount,
            method,
            json,
        } => commands::evaluate::run(&engine, &peer, amount, &method, json).await?,
        Commands::Rotation { action } => match action {
            RotationAction::Status => commands::rotation::status(&engine, cli.verbose).await?,
            RotationAction::SetPolicy {
                method,
                policy,
                threshold,
            } => commands::rotation::set_policy(&engine, &method, &policy, threshold).await?,
            RotationAction::Auto { enable } => {
                commands::rotation::auto_rotate(&engine, enable).await?
            }
            RotationAction::History { method } => {
                commands::rotation::history(&engine, method.as_deref()).await?
            }
            RotationAction::ClearHistory => {
                commands::rotation::clear_history(&engine, yes).await?
            }
        },
        Commands::History { action } => match action {
            HistoryAction::Show { limit } => commands::history::show(&engine, limit).await?,
            HistoryAction::Clear => commands::history::clear(&engine, yes).await?,
        },
        Commands::Reservations { action } => match action.unwrap_or(ReservationAction::List) {
            ReservationAction::List => commands::reservations::list(&engine).await?,
            ReservationAction::Rollback { id } => {
                commands::reservations::rollback(&engine, &id, yes).await?
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_rule_with_repeated_filters() {
        let cli = Cli::try_parse_from([
            "paykit-autopay",
            "rules",
            "add",
            "coffee",
            "--max-amount",
            "5000",
            "--peer",
            "pk:cafe",
            "--peer",
            "pk:bakery",
            "--method",
            "lightning",
        ])
        .unwrap();

        match cli.command {
            Commands::Rules {
                action: RulesAction::Add { peers, methods, max_amount, deny, .. },
            } => {
                assert_eq!(peers, ["pk:cafe", "pk:bakery"]);
                assert_eq!(methods, ["lightning"]);
                assert_eq!(max_amount, Some(5_000));
                assert!(!deny);
            }
            _ => panic!("expected rules add"),
        }
    }

    #[test]
    fn test_storage_dir_flag_wins() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_storage_dir(Some(dir.path().to_path_buf()));
        assert_eq!(resolved, dir.path());
    }

    #[test]
    fn test_open_engine_applies_identity_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"identity":"alice"}"#).unwrap();

        let engine = open_engine(dir.path(), None).unwrap();
        assert_eq!(engine.config().identity, "alice");

        let engine = open_engine(dir.path(), Some("bob".to_string())).unwrap();
        assert_eq!(engine.config().identity, "bob");
    }
}
