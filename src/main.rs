mod backend;
mod cli;
mod commands;
mod config;
mod keypath;
mod paths;
mod progress;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use redeploy::ActionKind;
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Raw `-s` value, expanded per command
    pub service_ids: Option<String>,
    pub input_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        service_ids: cli.service_ids,
        input_file: cli.input_file,
    };

    let result = dispatch(&ctx, cli.command);
    if let Err(err) = &result
        && let Some(engine_err) = err.downcast_ref::<redeploy::Error>()
    {
        ui::error(engine_err.category().advice());
    }
    result
}

fn dispatch(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::ServiceList(cmd) => commands::service_list::run(ctx, cmd),
        Command::Redeploy(args) => {
            commands::actions::run(ctx, ActionKind::RedeployTopLevel, args)
        }
        Command::Reconcile(args) => {
            commands::actions::run(ctx, ActionKind::ReconcileSublayers, args)
        }
        Command::Ready(cmd) => commands::tools::ready(ctx, cmd),
        Command::ApproveDiff => commands::tools::approve_diff(ctx),
        Command::CheckApprovals => commands::tools::check_approvals(ctx),
        Command::Wildcards(cmd) => commands::tools::wildcards(ctx, cmd),
        Command::Schedule(args) => commands::schedule::run(ctx, args),
        Command::Show(args) => commands::show::run(ctx, &args),
        Command::Tasks { prune } => commands::schedule::tasks(ctx, prune),
        Command::Config(cmd) => commands::config::run(ctx, cmd),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "bsa", &mut io::stdout());
            Ok(())
        }
    }
}
