//! Bulk orchestrator - top-level coordinator for service-list actions
//!
//! Every mutating call runs as one transaction against the repository:
//! read, process each service sequentially, commit at the end. Fatal
//! errors roll back; per-service failures are recorded and committed.

use crate::approvals::{self, WildcardUpdate};
use crate::context::{
    Clock, ProgressCallback, RedeployExecutor, ServiceInventory, ServiceRepository, TaskQueue,
};
use crate::engine::{RedeployEngine, able_to_redeploy};
use crate::error::{Error, Result};
use crate::normalize::DiffNormalizer;
use crate::scheduler::{self, ScheduleRequest};
use crate::target::{Targets, resolve_targets};
use crate::types::{
    ActionKind, BatchReport, CommitFlags, Keypath, ReadyOperation, RedeployOutcome,
    ScheduledTask, ServiceRecord,
};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::BTreeSet;

/// Default time budget for one bulk redeploy call
pub const DEFAULT_BATCH_BUDGET: TimeDelta = TimeDelta::minutes(20);

/// Batch note added when the time budget runs out
pub const NOTE_BUDGET_EXHAUSTED: &str =
    "Batch time budget exhausted, remaining services were not redeployed";

/// Bulk redeploy or reconcile request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkRequest {
    pub targets: Targets,
    /// `reconcile` is set by the action and ignored here
    pub commit_flags: CommitFlags,
}

impl BulkRequest {
    pub fn new(targets: Targets, commit_flags: CommitFlags) -> Self {
        Self {
            targets,
            commit_flags,
        }
    }
}

/// Which services populate discovers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceListSettings {
    /// Type paths whose instances become top-level services
    pub top_level_types: Vec<String>,
    /// Substrings selecting which modified services are tracked as sublayers
    pub target_sublayers: Vec<String>,
}

impl ServiceListSettings {
    fn is_target_sublayer(&self, keypath: &str) -> bool {
        self.target_sublayers.iter().any(|t| keypath.contains(t.as_str()))
    }
}

/// Result of a populate call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopulateReport {
    /// Top-level services that were not listed before
    pub added: usize,
    /// Top-level services after populate
    pub total: usize,
    /// Sublayers newly attached
    pub sublayers_added: usize,
    /// Services whose modified list could not be read
    pub unreadable: Vec<Keypath>,
}

/// Coordinates resolver, eligibility, engine and aggregation
pub struct BulkOrchestrator<'a, R, E, C> {
    repo: &'a mut R,
    executor: &'a E,
    clock: &'a C,
    budget: TimeDelta,
}

impl<'a, R, E, C> BulkOrchestrator<'a, R, E, C>
where
    R: ServiceRepository,
    E: RedeployExecutor,
    C: Clock,
{
    pub fn new(repo: &'a mut R, executor: &'a E, clock: &'a C) -> Self {
        Self {
            repo,
            executor,
            clock,
            budget: DEFAULT_BATCH_BUDGET,
        }
    }

    /// Override the batch time budget
    pub fn with_budget(mut self, budget: TimeDelta) -> Self {
        self.budget = budget;
        self
    }

    /// Run `f` and commit, or roll back if it fails
    fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        match f(self) {
            Ok(value) => {
                self.repo.commit()?;
                Ok(value)
            }
            Err(e) => {
                log::debug!("Rolling back: {e}");
                self.repo.rollback();
                Err(e)
            }
        }
    }

    fn resolve(&self, targets: &Targets) -> Result<BTreeSet<Keypath>> {
        let services = self.repo.list_services()?;
        resolve_targets(targets, &services)
    }

    fn normalizer(&self) -> Result<DiffNormalizer> {
        DiffNormalizer::new(&self.repo.list_wildcards()?)
    }

    // ── Redeploy actions ───────────────────────────────────────────

    /// Dry-run or commit each resolved top-level service.
    pub fn redeploy_top_level<P: ProgressCallback>(
        &mut self,
        request: &BulkRequest,
        progress: &mut P,
    ) -> Result<BatchReport> {
        self.run_batch(ActionKind::RedeployTopLevel, request, progress)
    }

    /// Dry-run or commit every sublayer of each resolved top-level service.
    ///
    /// Eligibility is judged on the top-level record.
    pub fn reconcile_sublayers<P: ProgressCallback>(
        &mut self,
        request: &BulkRequest,
        progress: &mut P,
    ) -> Result<BatchReport> {
        self.run_batch(ActionKind::ReconcileSublayers, request, progress)
    }

    fn run_batch<P: ProgressCallback>(
        &mut self,
        action: ActionKind,
        request: &BulkRequest,
        progress: &mut P,
    ) -> Result<BatchReport> {
        log::info!("Action {action}");
        let flags = CommitFlags {
            reconcile: action.is_reconcile(),
            ..request.commit_flags
        };

        self.transaction(|this| {
            let keypaths = this.resolve(&request.targets)?;
            let normalizer = this.normalizer()?;
            let approved = this.repo.list_approved_diffs()?;

            let mut report = BatchReport::default();
            report.note(format!(
                "{action} action called with dry-run {} and no-networking {} for service(s) {keypaths:?}",
                flags.dry_run, flags.no_networking
            ));
            report.note("See the service list for output");

            let engine =
                RedeployEngine::new(action, this.executor, this.clock, &normalizer, &approved);
            let deadline = this.clock
                .now()
                .checked_add_signed(this.budget)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);

            progress.on_batch_start(keypaths.len(), action.as_str());
            for keypath in &keypaths {
                let Some(mut service) = this.repo.get_service(keypath)? else {
                    log::warn!("{keypath} is not in the service list, skipping");
                    let outcome = RedeployOutcome::Skipped {
                        reason: format!("{keypath} is not in the service list"),
                    };
                    progress.on_service_complete(keypath, &outcome);
                    report.record(keypath, outcome);
                    continue;
                };

                match action {
                    ActionKind::RedeployTopLevel => {
                        if past_deadline(this.clock, deadline, keypath, &mut report, progress) {
                            continue;
                        }
                        progress.on_service_start(keypath);
                        let outcome = if able_to_redeploy(flags.dry_run, &service.state, action) {
                            engine.redeploy(keypath, &mut service.state, &flags, &mut report)
                        } else {
                            engine.skip_ineligible(keypath, &mut service.state, &mut report)
                        };
                        progress.on_service_complete(keypath, &outcome);
                        report.record(keypath, outcome);
                    }
                    ActionKind::ReconcileSublayers => {
                        reconcile_service(
                            &engine,
                            &mut service,
                            &flags,
                            deadline,
                            this.clock,
                            &mut report,
                            progress,
                        );
                    }
                }
                this.repo.put_service(service)?;
            }
            progress.on_batch_complete();

            log::info!("Action {action} - output: {:?}", report.messages);
            Ok(report)
        })
    }

    // ── Service list ───────────────────────────────────────────────

    /// Discover top-level services and their sublayers.
    ///
    /// Existing records keep their state; new sublayers are appended.
    pub fn populate<I: ServiceInventory>(
        &mut self,
        inventory: &I,
        settings: &ServiceListSettings,
    ) -> Result<PopulateReport> {
        if settings.top_level_types.is_empty() {
            return Err(Error::NoServiceTypes);
        }

        let mut keypaths = Vec::new();
        for type_path in &settings.top_level_types {
            let found = inventory.list_services(type_path)?;
            log::debug!("{type_path}: {} service(s)", found.len());
            keypaths.extend(found);
        }

        self.transaction(|this| {
            let mut report = PopulateReport::default();
            for keypath in &keypaths {
                let mut service = match this.repo.get_service(keypath)? {
                    Some(existing) => existing,
                    None => {
                        report.added += 1;
                        ServiceRecord::new(keypath.clone())
                    }
                };

                match inventory.modified_services(keypath) {
                    Ok(modified) => {
                        if service
                            .state
                            .last_redeploy_error
                            .as_deref()
                            .is_some_and(|e| e.starts_with(UNREADABLE_PREFIX))
                        {
                            service.state.last_redeploy_error = None;
                        }
                        for sub in modified.iter().filter(|k| settings.is_target_sublayer(k)) {
                            if service.add_modified_service(sub) {
                                report.sublayers_added += 1;
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!("Could not read modified services of {keypath}: {e}");
                        service.state.last_redeploy_error = Some(format!(
                            "{UNREADABLE_PREFIX} ({e}), redeploy the top-level service first"
                        ));
                        report.unreadable.push(keypath.clone());
                    }
                }
                this.repo.put_service(service)?;
            }
            report.total = this.repo.service_count()?;
            log::info!("Populated service list with {} service(s)", report.total);
            Ok(report)
        })
    }

    /// Remove resolved services from the list; unknown keypaths are no-ops.
    pub fn clear(&mut self, targets: &Targets) -> Result<BTreeSet<Keypath>> {
        self.transaction(|this| {
            let keypaths = this.resolve(targets)?;
            for keypath in &keypaths {
                if !this.repo.delete_service(keypath)? {
                    log::debug!("{keypath} was not in the service list");
                }
            }
            log::info!("Cleared {keypaths:?} from service list");
            Ok(keypaths)
        })
    }

    // ── Service-list tools ─────────────────────────────────────────

    pub fn set_redeploy_ready(
        &mut self,
        targets: &Targets,
        operation: ReadyOperation,
    ) -> Result<Vec<Keypath>> {
        log::info!("Action redeploy-ready {operation:?}");
        self.transaction(|this| {
            let keypaths = this.resolve(targets)?;
            approvals::set_redeploy_ready(this.repo, &keypaths, operation)
        })
    }

    pub fn approve_diff(&mut self, keypath: &str) -> Result<usize> {
        log::info!("Action approve-diff for {keypath}");
        self.transaction(|this| {
            let normalizer = this.normalizer()?;
            approvals::approve_diff(this.repo, keypath, &normalizer)
        })
    }

    pub fn check_approvals(&mut self) -> Result<Vec<Keypath>> {
        log::info!("Action check-approvals");
        self.transaction(|this| approvals::check_approvals(this.repo))
    }

    pub fn update_wildcards(&mut self) -> Result<WildcardUpdate> {
        log::info!("Action wildcards update");
        self.transaction(|this| {
            let normalizer = this.normalizer()?;
            approvals::update_wildcards(this.repo, &normalizer)
        })
    }

    pub fn rollback_wildcards(&mut self) -> Result<usize> {
        log::info!("Action wildcards rollback");
        self.transaction(|this| approvals::rollback_wildcards(this.repo))
    }

    // ── Scheduling ─────────────────────────────────────────────────

    /// Expand a schedule request and hand each task to the queue.
    ///
    /// Validation happens before anything is enqueued.
    pub fn schedule<Q: TaskQueue>(
        &mut self,
        request: &ScheduleRequest,
        queue: &mut Q,
    ) -> Result<Vec<ScheduledTask>> {
        let expression = request.targets.expression()?;
        let now = self.clock.now();
        scheduler::check_not_past(&request.schedule, now)?;

        let services = self.repo.list_services()?;
        let keypaths = crate::target::resolve(expression.as_ref(), &services)?;
        let tasks = scheduler::plan_tasks(request, &keypaths, now)?;

        for task in &tasks {
            log::debug!("Scheduling {} at {}", task.name, task.fire_at);
            queue.enqueue(task.clone())?;
        }
        log::info!("Scheduled {} {} task(s)", tasks.len(), request.action);
        Ok(tasks)
    }
}

const UNREADABLE_PREFIX: &str = "Service operational data unreadable";

/// Record a skip and return true once the deadline has passed
fn past_deadline<C: Clock, P: ProgressCallback>(
    clock: &C,
    deadline: DateTime<Utc>,
    keypath: &str,
    report: &mut BatchReport,
    progress: &mut P,
) -> bool {
    if clock.now() <= deadline {
        return false;
    }
    log::warn!("Time budget exhausted before {keypath}");
    let outcome = RedeployOutcome::Skipped {
        reason: "batch time budget exhausted".into(),
    };
    progress.on_service_complete(keypath, &outcome);
    report.note(NOTE_BUDGET_EXHAUSTED);
    report.record(keypath, outcome);
    true
}

fn reconcile_service<E: RedeployExecutor, C: Clock, P: ProgressCallback>(
    engine: &RedeployEngine<'_, E, C>,
    service: &mut ServiceRecord,
    flags: &CommitFlags,
    deadline: DateTime<Utc>,
    clock: &C,
    report: &mut BatchReport,
    progress: &mut P,
) {
    if service.modified_services.is_empty() {
        log::debug!("{} has no sublayers to reconcile", service.keypath);
        return;
    }

    let gate = &service.state;
    let eligible = able_to_redeploy(flags.dry_run, gate, engine.caller());
    for sub in &mut service.modified_services {
        if past_deadline(clock, deadline, &sub.keypath, report, progress) {
            continue;
        }
        progress.on_service_start(&sub.keypath);
        let outcome = if eligible {
            engine.redeploy(&sub.keypath, &mut sub.state, flags, report)
        } else {
            engine.skip_ineligible(&service.keypath, &mut sub.state, report)
        };
        progress.on_service_complete(&sub.keypath, &outcome);
        report.record(&sub.keypath, outcome);
    }
}
