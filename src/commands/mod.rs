//! Command implementations, one module per command family

pub mod actions;
pub mod config;
pub mod schedule;
pub mod service_list;
pub mod show;
pub mod tools;

use anyhow::Result;
use colored::Colorize;
use redeploy::{BatchReport, BulkOrchestrator, SubsetFilter, SystemClock, Targets};
use std::collections::BTreeMap;

use crate::Context;
use crate::backend::CommandBackend;
use crate::cli::TargetArgs;
use crate::config::BsaConfig;
use crate::keypath;
use crate::paths;
use crate::state::FileRepository;
use crate::ui;

pub type Orchestrator<'a> = BulkOrchestrator<'a, FileRepository, CommandBackend, SystemClock>;

/// Config, service list and executor for one command run
pub struct Session {
    pub config: BsaConfig,
    pub repo: FileRepository,
    pub backend: CommandBackend,
}

impl Session {
    pub fn open() -> Result<Self> {
        let config = BsaConfig::load()?;
        let repo = FileRepository::open(paths::state_file()?, &config)?;
        let backend = CommandBackend::from_config(&config.executor);
        Ok(Self {
            config,
            repo,
            backend,
        })
    }

    pub fn orchestrator(&mut self) -> Orchestrator<'_> {
        BulkOrchestrator::new(&mut self.repo, &self.backend, &SystemClock)
            .with_budget(self.config.batch_budget())
    }
}

/// Services named with `-s` / `-f`
pub fn service_ids(ctx: &Context, aliases: &BTreeMap<String, String>) -> Result<Vec<String>> {
    keypath::collect_service_ids(ctx.service_ids.as_deref(), ctx.input_file.as_deref(), aliases)
}

/// Combine `-s` / `-f` with target flags.
///
/// Service ids alone include; with `--all` they exclude.
pub fn targets(
    ctx: &Context,
    aliases: &BTreeMap<String, String>,
    args: &TargetArgs,
) -> Result<Targets> {
    let keypaths = service_ids(ctx, aliases)?;
    build_targets(keypaths, args)
}

fn build_targets(keypaths: Vec<String>, args: &TargetArgs) -> Result<Targets> {
    let subset = if args.subset_of_all.is_empty() {
        None
    } else {
        let filter = args
            .subset_of_all
            .iter()
            .try_fold(SubsetFilter::default(), |filter, name| filter.with_flag(name))?;
        Some(filter)
    };
    Ok(Targets {
        all: args.all || subset.is_some(),
        subset,
        keypaths,
    })
}

/// Print the notes and counters of a batch
pub fn print_report(ctx: &Context, report: &BatchReport) {
    if ctx.quiet {
        return;
    }

    println!();
    for message in &report.messages {
        ui::info(message);
    }

    let summary = &report.summary;
    println!();
    if summary.is_success() {
        println!("  {} Batch finished", "✓".green().bold());
    } else {
        println!("  {} Batch finished with errors", "⚠".yellow().bold());
    }
    if summary.dry_runs > 0 {
        println!("    • {} dry-run(s) fetched", summary.dry_runs);
    }
    if summary.commits > 0 {
        println!("    • {} redeploy(s) committed", summary.commits);
    }
    if summary.skipped > 0 {
        println!("    • {} skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {}", summary.failed, "failed".red());
    }
}
