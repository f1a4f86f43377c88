//! Diff approval and service-list maintenance tools
//!
//! These operate on a repository inside a caller-owned transaction; the
//! orchestrator wraps each one with target resolution and commit/rollback.

use crate::context::ServiceRepository;
use crate::error::Result;
use crate::normalize::{
    DiffNormalizer, renormalize_approved, renormalize_dry_run, rollback_dry_run,
};
use crate::types::{Keypath, ReadyOperation, RedeployState, ServiceRecord};
use std::collections::BTreeSet;

/// Add every device diff of a service's current dry-run to the approved set.
///
/// Returns the number of newly approved diffs. Unknown services and
/// services without a diff are logged no-ops.
pub fn approve_diff<R: ServiceRepository>(
    repo: &mut R,
    keypath: &str,
    normalizer: &DiffNormalizer,
) -> Result<usize> {
    let Some(service) = repo.get_service(keypath)? else {
        log::warn!("{keypath} is not in the service list, nothing to approve");
        return Ok(0);
    };

    let outputs = match &service.state.dry_run {
        Some(dry_run) if !dry_run.is_empty() => &dry_run.output,
        _ => {
            log::info!("{keypath} has no diff, skipping");
            return Ok(0);
        }
    };

    let approved = repo.list_approved_diffs()?;
    let mut added = 0;
    for device in outputs {
        let diff = normalizer.normalize(&device.normalized_output);
        if approved.contains(&diff) {
            continue;
        }
        log::info!("Adding diff of {} on {} to approved diffs", keypath, device.device);
        repo.add_approved_diff(&diff)?;
        added += 1;
    }
    Ok(added)
}

/// Mark every service whose whole dry-run diff is approved as redeploy-ready.
///
/// Services without a diff are left alone, as are partial matches.
/// Returns the keypaths that were newly marked.
pub fn check_approvals<R: ServiceRepository>(repo: &mut R) -> Result<Vec<Keypath>> {
    let approved = repo.list_approved_diffs()?;
    let mut marked = Vec::new();

    for mut service in repo.list_services()? {
        let covered = match &service.state.dry_run {
            Some(dry_run) if !dry_run.is_empty() => approved.covers(dry_run),
            _ => false,
        };
        if !covered || service.state.redeploy_ready {
            continue;
        }
        log::info!("Marking {} as redeploy-ready", service.keypath);
        service.state.redeploy_ready = true;
        marked.push(service.keypath.clone());
        repo.put_service(service)?;
    }
    Ok(marked)
}

/// Set or clear `redeploy_ready` on each keypath.
///
/// Unknown keypaths and clearing an absent flag are no-ops. Returns the
/// keypaths whose flag actually changed.
pub fn set_redeploy_ready<R: ServiceRepository>(
    repo: &mut R,
    keypaths: &BTreeSet<Keypath>,
    operation: ReadyOperation,
) -> Result<Vec<Keypath>> {
    let wanted = operation == ReadyOperation::Add;
    let mut changed = Vec::new();

    for keypath in keypaths {
        let Some(mut service) = repo.get_service(keypath)? else {
            log::debug!("{keypath} is not in the service list, skipping");
            continue;
        };
        if service.state.redeploy_ready == wanted {
            continue;
        }
        service.state.redeploy_ready = wanted;
        changed.push(keypath.clone());
        repo.put_service(service)?;
    }

    log::info!(
        "{} redeploy-ready on {changed:?}",
        if wanted { "Set" } else { "Cleared" }
    );
    Ok(changed)
}

/// What a wildcard update rewrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WildcardUpdate {
    /// Approved diffs replaced by their re-normalized form
    pub approved_replaced: usize,
    /// Device outputs whose normalized form changed
    pub outputs_changed: usize,
}

/// Re-normalize approved diffs and stored dry-run outputs with the current table.
pub fn update_wildcards<R: ServiceRepository>(
    repo: &mut R,
    normalizer: &DiffNormalizer,
) -> Result<WildcardUpdate> {
    log::info!("Updating wildcards in dry-runs and approved diffs");
    let mut update = WildcardUpdate::default();

    let approved = repo.list_approved_diffs()?;
    for (old, new) in renormalize_approved(&approved, normalizer) {
        repo.remove_approved_diff(&old)?;
        repo.add_approved_diff(&new)?;
        update.approved_replaced += 1;
    }

    for mut service in repo.list_services()? {
        let changed = for_each_dry_run(&mut service, |state| {
            state
                .dry_run
                .as_mut()
                .map_or(0, |d| renormalize_dry_run(d, normalizer))
        });
        if changed > 0 {
            update.outputs_changed += changed;
            repo.put_service(service)?;
        }
    }
    Ok(update)
}

/// Restore every stored dry-run output to the executor's unaltered text.
///
/// Returns the number of device outputs restored. Approved diffs are kept.
pub fn rollback_wildcards<R: ServiceRepository>(repo: &mut R) -> Result<usize> {
    log::info!("Rolling back dry-runs to original values");
    let mut restored = 0;

    for mut service in repo.list_services()? {
        let changed = for_each_dry_run(&mut service, |state| {
            state.dry_run.as_mut().map_or(0, rollback_dry_run)
        });
        if changed > 0 {
            restored += changed;
            repo.put_service(service)?;
        }
    }
    Ok(restored)
}

fn for_each_dry_run<F>(service: &mut ServiceRecord, mut f: F) -> usize
where
    F: FnMut(&mut RedeployState) -> usize,
{
    let mut total = f(&mut service.state);
    for sub in &mut service.modified_services {
        total += f(&mut sub.state);
    }
    total
}
