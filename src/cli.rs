use clap::builder::PossibleValuesParser;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use redeploy::{ActionKind, SubsetFilter};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bsa")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Bulk service actions: dry-run, approve and redeploy services", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Comma-separated keypaths or <service-type>::<service-id>
    #[arg(short = 's', long, global = true)]
    pub service_ids: Option<String>,

    /// File with one keypath or <service-type>::<service-id> per line
    #[arg(short = 'f', long, global = true)]
    pub input_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build or trim the service list
    #[command(subcommand)]
    ServiceList(ServiceListCommand),

    /// Dry-run or commit a redeploy of top-level services
    Redeploy(RunArgs),

    /// Dry-run or commit a reconcile of each service's sublayers
    Reconcile(RunArgs),

    /// Set or clear the redeploy-ready flag
    #[command(subcommand)]
    Ready(ReadyCommand),

    /// Approve the current dry-run diff of exactly one service
    ApproveDiff,

    /// Mark services whose whole diff is approved as redeploy-ready
    CheckApprovals,

    /// Apply or undo the wildcard table on stored diffs
    #[command(subcommand)]
    Wildcards(WildcardsCommand),

    /// Schedule a staggered redeploy or reconcile
    Schedule(ScheduleArgs),

    /// Display the service list
    Show(ShowArgs),

    /// List scheduled tasks
    Tasks {
        /// Drop tasks whose fire time has passed
        #[arg(long)]
        prune: bool,
    },

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Targets
// ============================================================================

/// Target selection shared by bulk commands.
///
/// Without service ids every service is targeted.
#[derive(Args, Clone, Default)]
pub struct TargetArgs {
    /// Target every service; given service ids are excluded
    #[arg(long)]
    pub all: bool,

    /// Target services matching any of these conditions
    #[arg(
        short = 'S',
        long,
        value_delimiter = ',',
        value_parser = PossibleValuesParser::new(SubsetFilter::FLAG_NAMES)
    )]
    pub subset_of_all: Vec<String>,
}

// ============================================================================
// Service List
// ============================================================================

#[derive(Subcommand)]
pub enum ServiceListCommand {
    /// Discover top-level services and their sublayers
    Populate,

    /// Remove services from the list
    Clear(TargetArgs),
}

// ============================================================================
// Redeploy / Reconcile
// ============================================================================

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub targets: TargetArgs,

    /// Commit instead of fetching a dry-run
    #[arg(long, visible_alias = "commit")]
    pub dry_run_false: bool,

    /// Skip device communication
    #[arg(long)]
    pub no_networking: bool,
}

// ============================================================================
// Tools
// ============================================================================

#[derive(Subcommand)]
pub enum ReadyCommand {
    /// Flag services as redeploy-ready
    Add(TargetArgs),

    /// Clear the redeploy-ready flag
    Remove(TargetArgs),
}

#[derive(Subcommand)]
pub enum WildcardsCommand {
    /// Re-normalize stored diffs and approved diffs with the configured wildcards
    Update,

    /// Restore stored diffs to the executor's original output
    Rollback,
}

// ============================================================================
// Schedule
// ============================================================================

#[derive(Clone, Copy, ValueEnum)]
pub enum ActionArg {
    RedeployTopLevel,
    ReconcileSublayers,
}

impl From<ActionArg> for ActionKind {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::RedeployTopLevel => ActionKind::RedeployTopLevel,
            ActionArg::ReconcileSublayers => ActionKind::ReconcileSublayers,
        }
    }
}

#[derive(Args)]
pub struct ScheduleArgs {
    /// ISO date-time (2024-05-06T22:00:00, UTC unless offset given) or offset like 6h15m
    #[arg(short, long)]
    pub time: Option<String>,

    /// Seconds between consecutive services [default: from config, 30]
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// Action to schedule
    #[arg(short, long, value_enum, default_value = "redeploy-top-level")]
    pub action: ActionArg,

    /// Schedule commits instead of dry-runs
    #[arg(long)]
    pub dry_run_false: bool,

    /// Schedule no-networking actions
    #[arg(long)]
    pub no_networking: bool,

    #[command(flatten)]
    pub targets: TargetArgs,

    /// Skip confirmation
    #[arg(short, long)]
    pub yes: bool,
}

// ============================================================================
// Show
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShowItem {
    DryRun,
    ModifiedServices,
    Errors,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShowFilter {
    RedeployReady,
    NoRedeployReady,
    LastRedeployError,
}

#[derive(Args)]
pub struct ShowArgs {
    /// What to display for each service
    #[arg(value_enum)]
    pub item: Option<ShowItem>,

    /// Display only services matching a condition
    #[arg(short = 'F', long, value_enum)]
    pub filter: Option<ShowFilter>,
}

// ============================================================================
// Config
// ============================================================================

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show resolved paths and settings
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_service_ids_after_subcommand() {
        let cli = Cli::parse_from(["bsa", "redeploy", "-s", "/svc{a},/svc{b}", "--commit"]);
        assert_eq!(cli.service_ids.as_deref(), Some("/svc{a},/svc{b}"));
        match cli.command {
            Command::Redeploy(args) => {
                assert!(args.dry_run_false);
                assert!(!args.targets.all);
            }
            _ => panic!("expected redeploy"),
        }
    }

    #[test]
    fn test_schedule_defaults_and_subset() {
        let cli = Cli::parse_from([
            "bsa",
            "schedule",
            "-S",
            "redeploy-ready,last-redeploy-error",
        ]);
        match cli.command {
            Command::Schedule(args) => {
                assert!(args.time.is_none());
                assert!(args.interval.is_none());
                assert!(matches!(args.action, ActionArg::RedeployTopLevel));
                assert_eq!(
                    args.targets.subset_of_all,
                    ["redeploy-ready", "last-redeploy-error"]
                );
            }
            _ => panic!("expected schedule"),
        }
    }

    #[test]
    fn test_unknown_subset_flag_rejected() {
        assert!(Cli::try_parse_from(["bsa", "redeploy", "--subset-of-all", "bogus"]).is_err());
    }
}
