//! `bsa redeploy` and `bsa reconcile`

use anyhow::Result;
use redeploy::{ActionKind, BulkRequest, CommitFlags};

use super::{Session, print_report, targets};
use crate::Context;
use crate::cli::RunArgs;
use crate::progress::BatchProgress;
use crate::ui;

pub fn run(ctx: &Context, action: ActionKind, args: RunArgs) -> Result<()> {
    let mut session = Session::open()?;
    let targets = targets(ctx, &session.config.aliases, &args.targets)?;
    let request = BulkRequest::new(
        targets,
        CommitFlags {
            dry_run: !args.dry_run_false,
            no_networking: args.no_networking,
            reconcile: action.is_reconcile(),
        },
    );

    if !ctx.quiet {
        let mode = if request.commit_flags.dry_run {
            "dry-run"
        } else {
            "commit"
        };
        ui::header(&format!("{action} ({mode})"));
    }

    let mut progress = BatchProgress::new(ctx.quiet);
    let mut orchestrator = session.orchestrator();
    let report = match action {
        ActionKind::RedeployTopLevel => orchestrator.redeploy_top_level(&request, &mut progress)?,
        ActionKind::ReconcileSublayers => {
            orchestrator.reconcile_sublayers(&request, &mut progress)?
        }
    };

    print_report(ctx, &report);
    Ok(())
}
