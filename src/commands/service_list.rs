use anyhow::Result;
use redeploy::{BulkOrchestrator, SystemClock};

use super::{Session, targets};
use crate::Context;
use crate::cli::{ServiceListCommand, TargetArgs};
use crate::ui;

pub fn run(ctx: &Context, cmd: ServiceListCommand) -> Result<()> {
    match cmd {
        ServiceListCommand::Populate => populate(ctx),
        ServiceListCommand::Clear(args) => clear(ctx, &args),
    }
}

fn populate(ctx: &Context) -> Result<()> {
    let Session {
        config,
        mut repo,
        backend,
    } = Session::open()?;
    let settings = config.service_list_settings();

    let report = BulkOrchestrator::new(&mut repo, &backend, &SystemClock)
        .populate(&backend, &settings)?;

    for keypath in &report.unreadable {
        ui::warn(&format!(
            "Could not read modified services of {keypath}, redeploy it first"
        ));
    }
    if !ctx.quiet {
        ui::success(&format!(
            "Service list populated: {} service(s), {} new, {} new sublayer(s)",
            report.total, report.added, report.sublayers_added
        ));
    }
    Ok(())
}

fn clear(ctx: &Context, args: &TargetArgs) -> Result<()> {
    let mut session = Session::open()?;
    let targets = targets(ctx, &session.config.aliases, args)?;
    let cleared = session.orchestrator().clear(&targets)?;

    if !ctx.quiet {
        ui::success(&format!("Cleared {} service(s) from the service list", cleared.len()));
        if ctx.verbose > 0 {
            for keypath in &cleared {
                ui::dim(keypath);
            }
        }
    }
    Ok(())
}
