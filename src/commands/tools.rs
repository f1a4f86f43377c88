//! Service-list tools: readiness flags, diff approval, wildcards

use anyhow::{Result, bail};
use redeploy::ReadyOperation;

use super::{Session, service_ids, targets};
use crate::Context;
use crate::cli::{ReadyCommand, WildcardsCommand};
use crate::ui;

pub fn ready(ctx: &Context, cmd: ReadyCommand) -> Result<()> {
    let (args, operation) = match cmd {
        ReadyCommand::Add(args) => (args, ReadyOperation::Add),
        ReadyCommand::Remove(args) => (args, ReadyOperation::Remove),
    };

    let mut session = Session::open()?;
    let targets = targets(ctx, &session.config.aliases, &args)?;
    let changed = session
        .orchestrator()
        .set_redeploy_ready(&targets, operation)?;

    if !ctx.quiet {
        let verb = match operation {
            ReadyOperation::Add => "marked as redeploy-ready",
            ReadyOperation::Remove => "no longer redeploy-ready",
        };
        ui::success(&format!("{} service(s) {verb}", changed.len()));
        for keypath in &changed {
            ui::dim(keypath);
        }
    }
    Ok(())
}

pub fn approve_diff(ctx: &Context) -> Result<()> {
    let mut session = Session::open()?;
    let ids = service_ids(ctx, &session.config.aliases)?;
    let [keypath] = ids.as_slice() else {
        bail!("approve-diff needs exactly one service, got {}", ids.len());
    };

    let added = session.orchestrator().approve_diff(keypath)?;
    if added == 0 {
        ui::warn(&format!("Nothing new to approve for {keypath}"));
    } else if !ctx.quiet {
        ui::success(&format!(
            "Dry-run from {keypath} added to approved diffs ({added} new)"
        ));
    }
    Ok(())
}

pub fn check_approvals(ctx: &Context) -> Result<()> {
    let mut session = Session::open()?;
    let marked = session.orchestrator().check_approvals()?;

    if !ctx.quiet {
        if marked.is_empty() {
            ui::info("No further services are fully covered by approved diffs");
        } else {
            ui::success(&format!("{} service(s) now redeploy-ready", marked.len()));
            for keypath in &marked {
                ui::dim(keypath);
            }
        }
    }
    Ok(())
}

pub fn wildcards(ctx: &Context, cmd: WildcardsCommand) -> Result<()> {
    let mut session = Session::open()?;
    match cmd {
        WildcardsCommand::Update => {
            let update = session.orchestrator().update_wildcards()?;
            if !ctx.quiet {
                ui::success(&format!(
                    "Wildcards applied: {} approved diff(s) replaced, {} device output(s) changed",
                    update.approved_replaced, update.outputs_changed
                ));
            }
        }
        WildcardsCommand::Rollback => {
            let restored = session.orchestrator().rollback_wildcards()?;
            if !ctx.quiet {
                ui::success(&format!(
                    "Restored {restored} device output(s) to their original values"
                ));
            }
        }
    }
    Ok(())
}
