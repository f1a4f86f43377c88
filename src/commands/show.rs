//! `bsa show`: tree view of the service list

use anyhow::Result;
use colored::Colorize;
use redeploy::{RedeployState, ServiceRecord, ServiceRepository};

use super::service_ids;
use crate::Context;
use crate::cli::{ShowArgs, ShowFilter, ShowItem};
use crate::config::BsaConfig;
use crate::paths;
use crate::state::FileRepository;
use crate::ui;

pub fn run(ctx: &Context, args: &ShowArgs) -> Result<()> {
    let config = BsaConfig::load()?;
    let repo = FileRepository::open(paths::state_file()?, &config)?;
    let requested = service_ids(ctx, &config.aliases)?;
    let explicit = !requested.is_empty();

    let services = repo.list_services()?;
    if services.is_empty() {
        ui::warn("Service list is empty, run 'bsa service-list populate' first");
        return Ok(());
    }

    let mut shown = 0;
    for service in &services {
        if explicit && !requested.contains(&service.keypath) {
            continue;
        }
        if !matches_filter(&service.state, args.filter) {
            continue;
        }
        shown += 1;
        match args.item {
            None => show_summary(service, args.filter.is_none()),
            Some(ShowItem::DryRun) => show_dry_run(&service.keypath, &service.state, 0, explicit),
            Some(ShowItem::ModifiedServices) => show_modified_services(service),
            Some(ShowItem::Errors) => show_errors(service),
        }
    }

    if !ctx.quiet && args.item.is_none() {
        ui::dim(&format!("{shown} of {} service(s)", services.len()));
    }
    Ok(())
}

/// Check if a service passes the display filter
pub fn matches_filter(state: &RedeployState, filter: Option<ShowFilter>) -> bool {
    match filter {
        None => true,
        Some(ShowFilter::RedeployReady) => state.redeploy_ready,
        Some(ShowFilter::NoRedeployReady) => !state.redeploy_ready,
        Some(ShowFilter::LastRedeployError) => state.last_redeploy_error.is_some(),
    }
}

fn show_summary(service: &ServiceRecord, spaced: bool) {
    ui::keypath(&service.keypath);
    let state = &service.state;
    if state.redeploy_ready {
        ui::branch(1, &"service is ready for redeploy!".bright_cyan().to_string());
    }
    if let Some(at) = state.redeployed_at {
        ui::branch(1, &format!("redeployed at: {}", at.to_rfc3339()).cyan().to_string());
    }
    if spaced {
        println!();
    }
}

/// Print the stored dry-run; `depth` 0 prints the keypath line first
fn show_dry_run(keypath: &str, state: &RedeployState, depth: usize, explicit: bool) {
    let print_keypath = depth == 0;
    let Some(dry_run) = &state.dry_run else {
        if explicit {
            if print_keypath {
                ui::keypath(keypath);
            }
            ui::branch(
                depth + 1,
                &"no dry-run output, has a dry-run been performed?"
                    .red()
                    .to_string(),
            );
            println!();
        }
        return;
    };

    if print_keypath {
        ui::keypath(keypath);
    }
    ui::branch(depth + 1, &"dry-run".cyan().to_string());
    ui::branch(
        depth + 2,
        &format!("{} {}", "fetched at".cyan(), dry_run.fetched_at.to_rfc3339().yellow()),
    );

    if dry_run.is_empty() {
        match &state.last_redeploy_error {
            Some(error) => ui::branch(depth + 2, &format!("no diff: \"{error}\"").red().to_string()),
            None => ui::branch(depth + 2, &"no diff".green().bold().to_string()),
        }
        println!();
        return;
    }

    ui::branch(depth + 2, &"output".cyan().to_string());
    let prefix = "  ".repeat(depth + 4);
    for device in &dry_run.output {
        ui::branch(depth + 3, &format!("{}:", device.device).red().bold().to_string());
        println!("{}", ui::indent_block(&device.raw_output, &prefix).bright_blue());
    }
    println!();
}

fn show_modified_services(service: &ServiceRecord) {
    if service.modified_services.is_empty() {
        return;
    }
    ui::keypath(&service.keypath);
    ui::branch(1, &"modified services:".magenta().to_string());
    for sub in &service.modified_services {
        ui::branch(2, &sublayer_label(&sub.keypath).bright_magenta().to_string());
        if sub.state.dry_run.is_some() {
            show_dry_run(&sub.keypath, &sub.state, 2, false);
        }
        if let Some(at) = sub.state.redeployed_at {
            ui::branch(3, &format!("redeployed at: {}", at.to_rfc3339()).cyan().to_string());
        }
    }
    println!();
}

fn show_errors(service: &ServiceRecord) {
    let mut lines = Vec::new();
    if let Some(error) = &service.state.last_redeploy_error {
        lines.push((1, format!("last redeploy error: \"{error}\"")));
    }
    for sub in &service.modified_services {
        if let Some(error) = &sub.state.last_redeploy_error {
            lines.push((2, format!("{}: \"{error}\"", sublayer_label(&sub.keypath))));
        }
    }
    if lines.is_empty() {
        return;
    }

    ui::keypath(&service.keypath);
    for (depth, line) in lines {
        ui::branch(depth, &line.red().to_string());
    }
    println!();
}

/// Last keypath segment, ignoring `/` inside `{...}` keys
fn sublayer_label(keypath: &str) -> &str {
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in keypath.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => start = i + 1,
            _ => {}
        }
    }
    &keypath[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_filter() {
        let mut state = RedeployState::default();
        assert!(matches_filter(&state, None));
        assert!(matches_filter(&state, Some(ShowFilter::NoRedeployReady)));
        assert!(!matches_filter(&state, Some(ShowFilter::RedeployReady)));
        assert!(!matches_filter(&state, Some(ShowFilter::LastRedeployError)));

        state.redeploy_ready = true;
        state.last_redeploy_error = Some("boom".into());
        assert!(matches_filter(&state, Some(ShowFilter::RedeployReady)));
        assert!(!matches_filter(&state, Some(ShowFilter::NoRedeployReady)));
        assert!(matches_filter(&state, Some(ShowFilter::LastRedeployError)));
    }

    #[test]
    fn test_sublayer_label() {
        assert_eq!(
            sublayer_label("/services/vpn:vpn{acme}/endpoint{ep1}"),
            "endpoint{ep1}"
        );
        assert_eq!(
            sublayer_label("/services/link{r1 ge-0/0/1}"),
            "link{r1 ge-0/0/1}"
        );
        assert_eq!(sublayer_label("plain"), "plain");
    }
}
