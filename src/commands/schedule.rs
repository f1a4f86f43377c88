//! `bsa schedule` and `bsa tasks`

use anyhow::{Context as _, Result};
use chrono::{Local, Utc};
use colored::Colorize;
use dialoguer::Confirm;
use redeploy::{ActionKind, CommitFlags, ScheduleRequest, ScheduleTime, TargetExpression};

use super::{Session, targets};
use crate::Context;
use crate::cli::ScheduleArgs;
use crate::paths;
use crate::state::TaskLedger;
use crate::ui;

pub fn run(ctx: &Context, args: ScheduleArgs) -> Result<()> {
    let mut session = Session::open()?;
    let targets = targets(ctx, &session.config.aliases, &args.targets)?;
    let expression = targets.expression()?;

    let action = ActionKind::from(args.action);
    let mut request = ScheduleRequest::new(action, targets);
    request.commit_flags = CommitFlags {
        dry_run: !args.dry_run_false,
        no_networking: args.no_networking,
        reconcile: false,
    };
    request.interval_secs = args
        .interval
        .unwrap_or(session.config.schedule.default_interval_secs);
    if let Some(time) = &args.time {
        request.schedule = ScheduleTime::parse(time)?;
    }

    if !args.yes {
        let prompt = format!(
            "Scheduling a {action} action with dry-run {} and no-networking {} for {}. Confirm?",
            request.commit_flags.dry_run,
            request.commit_flags.no_networking,
            describe_targets(expression.as_ref())
        );
        let confirmed = Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            ui::info("Canceling");
            return Ok(());
        }
    }

    let mut ledger = TaskLedger::load(paths::tasks_file()?)?;
    let tasks = session.orchestrator().schedule(&request, &mut ledger)?;
    ledger.save()?;

    if !ctx.quiet {
        ui::success(&format!(
            "Scheduled {} {action} task(s), {}s apart",
            tasks.len(),
            request.interval_secs
        ));
        if let (Some(first), Some(last)) = (tasks.first(), tasks.last()) {
            ui::kv("first", &first.fire_at.with_timezone(&Local).to_rfc2822());
            ui::kv("last", &last.fire_at.with_timezone(&Local).to_rfc2822());
        }
    }
    Ok(())
}

/// List scheduled tasks, optionally dropping those already fired
pub fn tasks(ctx: &Context, prune: bool) -> Result<()> {
    let mut ledger = TaskLedger::load(paths::tasks_file()?)?;
    let now = Utc::now();

    if prune {
        let dropped = ledger.prune_fired(now);
        ledger.save()?;
        if !ctx.quiet {
            ui::info(&format!("Dropped {dropped} fired task(s)"));
        }
    }

    if ledger.tasks().is_empty() {
        ui::info("No scheduled tasks");
        return Ok(());
    }

    ui::header(&format!("Scheduled tasks ({})", ledger.tasks().len()));
    for task in ledger.tasks() {
        let when = task.fire_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
        let mode = if task.commit_flags.dry_run {
            "dry-run".dimmed()
        } else {
            "commit".yellow()
        };
        let fired = if task.fire_at < now {
            format!(" {}", "(fired)".dimmed())
        } else {
            String::new()
        };
        println!(
            "  {when}  {:<20} {mode}  {}{fired}",
            task.action.to_string(),
            ui::truncate_keypath(&task.target, 60)
        );
    }
    Ok(())
}

fn describe_targets(expression: Option<&TargetExpression>) -> String {
    match expression {
        None => "all services".to_string(),
        Some(TargetExpression::AllServices { exclude }) if exclude.is_empty() => {
            "all services".to_string()
        }
        Some(TargetExpression::AllServices { exclude }) => {
            format!("all services except {} given", exclude.len())
        }
        Some(TargetExpression::AllServicesSubset(_)) => "a subset of all services".to_string(),
        Some(TargetExpression::KeypathSet(keypaths)) => {
            format!("{} given service(s)", keypaths.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redeploy::{SubsetFilter, Targets};

    fn describe(targets: &Targets) -> String {
        describe_targets(targets.expression().unwrap().as_ref())
    }

    #[test]
    fn test_describe_targets() {
        assert_eq!(describe(&Targets::default()), "all services");
        assert_eq!(describe(&Targets::all()), "all services");
        assert_eq!(
            describe(&Targets::all_except(["/svc{a}", "/svc{b}"])),
            "all services except 2 given"
        );
        assert_eq!(
            describe(&Targets::subset(SubsetFilter::default().with_flag("redeploy-ready").unwrap())),
            "a subset of all services"
        );
        assert_eq!(describe(&Targets::keypaths(["/svc{a}"])), "1 given service(s)");
    }
}
