//! Redeploy engine - drives one (sub)service through a single redeploy attempt
//!
//! The engine is shared by top-level redeploys and sublayer reconciles; the
//! caller kind only changes eligibility and messages. Failures never escape
//! as errors: they are written to the record and the batch report.

use crate::context::{Clock, ExecutionResult, RedeployExecutor};
use crate::normalize::DiffNormalizer;
use crate::types::{
    ActionKind, ApprovedDiffSet, BatchReport, CommitFlags, DeviceOutput, DryRunRecord,
    RedeployOutcome, RedeployState,
};

/// Batch note added when any executor call fails
pub const NOTE_ERRORS: &str = "There were errors during one or more redeploys";
/// Batch note added when any service is skipped as ineligible
pub const NOTE_NOT_READY: &str = "Redeploy-ready not set for one or more services";
/// Batch note added when at least one dry-run succeeds
pub const NOTE_DRY_RUN_OK: &str = "Dry-run fetched for one or more services";
/// Batch note added when at least one commit succeeds
pub const NOTE_COMMIT_OK: &str = "Redeploy committed for one or more services";

/// Check whether a service may be redeployed.
///
/// Dry-runs are always allowed. Commits need `redeploy_ready`, or, when
/// reconciling sublayers, a previous top-level commit.
pub fn able_to_redeploy(dry_run: bool, state: &RedeployState, caller: ActionKind) -> bool {
    if dry_run {
        return true;
    }
    if state.redeploy_ready {
        return true;
    }
    caller == ActionKind::ReconcileSublayers && state.redeployed_at.is_some()
}

/// Explanation written to `last_redeploy_error` for an ineligible service
pub fn not_eligible_message(keypath: &str, caller: ActionKind) -> String {
    match caller {
        ActionKind::RedeployTopLevel => {
            format!("Service {keypath} not flagged as redeploy-ready, skipping")
        }
        ActionKind::ReconcileSublayers => format!(
            "Service {keypath} not flagged as redeploy-ready or not yet redeployed, skipping"
        ),
    }
}

/// Single-attempt redeploy state machine
pub struct RedeployEngine<'a, E, C> {
    caller: ActionKind,
    executor: &'a E,
    clock: &'a C,
    normalizer: &'a DiffNormalizer,
    approved: &'a ApprovedDiffSet,
}

impl<'a, E, C> RedeployEngine<'a, E, C>
where
    E: RedeployExecutor,
    C: Clock,
{
    pub fn new(
        caller: ActionKind,
        executor: &'a E,
        clock: &'a C,
        normalizer: &'a DiffNormalizer,
        approved: &'a ApprovedDiffSet,
    ) -> Self {
        Self {
            caller,
            executor,
            clock,
            normalizer,
            approved,
        }
    }

    pub fn caller(&self) -> ActionKind {
        self.caller
    }

    /// Record a service as skipped because it failed the eligibility check.
    ///
    /// `gate_keypath` names the record whose flags were checked; for
    /// reconciles that is the top-level service.
    pub fn skip_ineligible(
        &self,
        gate_keypath: &str,
        state: &mut RedeployState,
        report: &mut BatchReport,
    ) -> RedeployOutcome {
        let reason = not_eligible_message(gate_keypath, self.caller);
        log::warn!("{reason}");
        state.last_redeploy_error = Some(reason.clone());
        report.note(NOTE_NOT_READY);
        RedeployOutcome::Skipped { reason }
    }

    /// Dispatch one eligible service to the executor and apply the result.
    pub fn redeploy(
        &self,
        keypath: &str,
        state: &mut RedeployState,
        flags: &CommitFlags,
        report: &mut BatchReport,
    ) -> RedeployOutcome {
        log::info!(
            "{}: redeploying {keypath} (dry-run {}, reconcile {}, no-networking {})",
            self.caller,
            flags.dry_run,
            flags.reconcile,
            flags.no_networking
        );

        let result = match self.executor.execute(keypath, flags) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Redeploy of {keypath} failed: {e}");
                state.last_redeploy_error = Some(e.message.clone());
                report.note(NOTE_ERRORS);
                return RedeployOutcome::Failed { error: e.message };
            }
        };

        match (flags.dry_run, result) {
            (true, ExecutionResult::DryRun(devices)) => {
                let outcome = self.apply_dry_run(state, devices);
                report.note(NOTE_DRY_RUN_OK);
                outcome
            }
            (false, ExecutionResult::Committed) => {
                self.apply_commit(state, flags.reconcile);
                report.note(NOTE_COMMIT_OK);
                RedeployOutcome::CommitSucceeded
            }
            (dry_run, _) => {
                let error = format!(
                    "Executor returned an unexpected response for dry-run {dry_run}"
                );
                log::warn!("{keypath}: {error}");
                state.last_redeploy_error = Some(error.clone());
                report.note(NOTE_ERRORS);
                RedeployOutcome::Failed { error }
            }
        }
    }

    fn apply_dry_run(
        &self,
        state: &mut RedeployState,
        devices: Vec<crate::context::DeviceDiff>,
    ) -> RedeployOutcome {
        let output: Vec<DeviceOutput> = devices
            .into_iter()
            .map(|d| DeviceOutput {
                normalized_output: self.normalizer.normalize(&d.output),
                raw_output: d.output,
                device: d.device,
            })
            .collect();

        let dry_run = DryRunRecord {
            fetched_at: self.clock.now(),
            output,
        };

        // Readiness is re-evaluated from scratch on every dry-run
        state.last_redeploy_error = None;
        state.redeploy_ready = self.approved.covers(&dry_run);
        state.redeployed_at = None;

        let devices = dry_run.output.len();
        let ready = state.redeploy_ready;
        state.dry_run = Some(dry_run);

        RedeployOutcome::DryRunSucceeded { devices, ready }
    }

    fn apply_commit(&self, state: &mut RedeployState, reconcile: bool) {
        state.redeployed_at = Some(self.clock.now());
        state.last_redeploy_error = None;
        state.dry_run = None;
        if !reconcile {
            state.redeploy_ready = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DeviceDiff, FixedClock};
    use crate::error::ExecutionError;
    use crate::normalize::WildcardTable;
    use chrono::Utc;

    enum Reply {
        DryRun(Vec<(&'static str, &'static str)>),
        Committed,
        Fail(&'static str),
    }

    struct ScriptedExecutor(Reply);

    impl RedeployExecutor for ScriptedExecutor {
        fn execute(
            &self,
            _keypath: &str,
            _flags: &CommitFlags,
        ) -> Result<ExecutionResult, ExecutionError> {
            match &self.0 {
                Reply::DryRun(devices) => Ok(ExecutionResult::DryRun(
                    devices
                        .iter()
                        .map(|(device, output)| DeviceDiff {
                            device: (*device).into(),
                            output: (*output).into(),
                        })
                        .collect(),
                )),
                Reply::Committed => Ok(ExecutionResult::Committed),
                Reply::Fail(msg) => Err(ExecutionError::new(*msg)),
            }
        }
    }

    fn run(
        reply: Reply,
        approved: &ApprovedDiffSet,
        state: &mut RedeployState,
        flags: CommitFlags,
    ) -> (RedeployOutcome, BatchReport) {
        let executor = ScriptedExecutor(reply);
        let clock = FixedClock::new(Utc::now());
        let normalizer =
            DiffNormalizer::new(&WildcardTable::new([r"\d{2}:\d{2}:\d{2}"])).unwrap();
        let engine = RedeployEngine::new(
            ActionKind::RedeployTopLevel,
            &executor,
            &clock,
            &normalizer,
            approved,
        );
        let mut report = BatchReport::default();
        let outcome = engine.redeploy("/svc{a}", state, &flags, &mut report);
        (outcome, report)
    }

    #[test]
    fn test_dry_run_always_eligible() {
        let state = RedeployState::default();
        assert!(able_to_redeploy(true, &state, ActionKind::RedeployTopLevel));
        assert!(!able_to_redeploy(false, &state, ActionKind::RedeployTopLevel));
    }

    #[test]
    fn test_reconcile_accepts_previous_commit() {
        let state = RedeployState {
            redeployed_at: Some(Utc::now()),
            ..RedeployState::default()
        };
        assert!(able_to_redeploy(false, &state, ActionKind::ReconcileSublayers));
        assert!(!able_to_redeploy(false, &state, ActionKind::RedeployTopLevel));
    }

    #[test]
    fn test_zero_device_dry_run_sets_ready_and_clears_commit() {
        let mut state = RedeployState {
            redeployed_at: Some(Utc::now()),
            last_redeploy_error: Some("old".into()),
            ..RedeployState::default()
        };
        let (outcome, report) = run(
            Reply::DryRun(vec![]),
            &ApprovedDiffSet::new(),
            &mut state,
            CommitFlags::dry_run(),
        );
        assert_eq!(
            outcome,
            RedeployOutcome::DryRunSucceeded {
                devices: 0,
                ready: true
            }
        );
        assert!(state.redeploy_ready);
        assert!(state.redeployed_at.is_none());
        assert!(state.last_redeploy_error.is_none());
        assert!(state.dry_run.as_ref().unwrap().is_empty());
        assert!(report.messages.contains(NOTE_DRY_RUN_OK));
    }

    #[test]
    fn test_dry_run_stores_raw_and_normalized() {
        let mut state = RedeployState::default();
        let (_, _) = run(
            Reply::DryRun(vec![("pe1", "changed at 10:11:12")]),
            &ApprovedDiffSet::new(),
            &mut state,
            CommitFlags::dry_run(),
        );
        let device = &state.dry_run.as_ref().unwrap().output[0];
        assert_eq!(device.raw_output, "changed at 10:11:12");
        assert_eq!(device.normalized_output, "changed at *WILDCARD1*");
        assert!(!state.redeploy_ready);
    }

    #[test]
    fn test_dry_run_clears_stale_ready() {
        let mut state = RedeployState {
            redeploy_ready: true,
            ..RedeployState::default()
        };
        run(
            Reply::DryRun(vec![("pe1", "+ mtu 9000")]),
            &ApprovedDiffSet::new(),
            &mut state,
            CommitFlags::dry_run(),
        );
        assert!(!state.redeploy_ready);
    }

    #[test]
    fn test_dry_run_with_all_approved_sets_ready() {
        let approved: ApprovedDiffSet = ["+ ts *WILDCARD1*".to_string(), "+ mtu 9000".to_string()]
            .into_iter()
            .collect();
        let mut state = RedeployState::default();
        run(
            Reply::DryRun(vec![("pe1", "+ ts 01:02:03"), ("pe2", "+ mtu 9000")]),
            &approved,
            &mut state,
            CommitFlags::dry_run().reconciling(),
        );
        assert!(state.redeploy_ready);
    }

    #[test]
    fn test_commit_clears_ready_unless_reconcile() {
        let mut state = RedeployState {
            redeploy_ready: true,
            dry_run: Some(DryRunRecord {
                fetched_at: Utc::now(),
                output: Vec::new(),
            }),
            ..RedeployState::default()
        };
        let (outcome, report) = run(
            Reply::Committed,
            &ApprovedDiffSet::new(),
            &mut state,
            CommitFlags::commit(),
        );
        assert_eq!(outcome, RedeployOutcome::CommitSucceeded);
        assert!(state.redeployed_at.is_some());
        assert!(state.dry_run.is_none());
        assert!(!state.redeploy_ready);
        assert!(report.messages.contains(NOTE_COMMIT_OK));

        let mut state = RedeployState {
            redeploy_ready: true,
            ..RedeployState::default()
        };
        run(
            Reply::Committed,
            &ApprovedDiffSet::new(),
            &mut state,
            CommitFlags::commit().reconciling(),
        );
        assert!(state.redeploy_ready);
        assert!(state.redeployed_at.is_some());
    }

    #[test]
    fn test_failure_only_writes_error() {
        let deployed_at = Utc::now();
        let mut state = RedeployState {
            redeploy_ready: true,
            redeployed_at: Some(deployed_at),
            ..RedeployState::default()
        };
        let (outcome, report) = run(
            Reply::Fail("device pe1 is locked"),
            &ApprovedDiffSet::new(),
            &mut state,
            CommitFlags::commit(),
        );
        assert_eq!(
            outcome,
            RedeployOutcome::Failed {
                error: "device pe1 is locked".into()
            }
        );
        assert!(state.redeploy_ready);
        assert_eq!(state.redeployed_at, Some(deployed_at));
        assert_eq!(
            state.last_redeploy_error.as_deref(),
            Some("device pe1 is locked")
        );
        assert!(report.messages.contains(NOTE_ERRORS));
    }

    #[test]
    fn test_mismatched_response_is_failure() {
        let mut state = RedeployState::default();
        let (outcome, _) = run(
            Reply::Committed,
            &ApprovedDiffSet::new(),
            &mut state,
            CommitFlags::dry_run(),
        );
        assert!(matches!(outcome, RedeployOutcome::Failed { .. }));
        assert!(state.dry_run.is_none());
    }

    #[test]
    fn test_skip_ineligible_records_reason() {
        let executor = ScriptedExecutor(Reply::Committed);
        let clock = FixedClock::new(Utc::now());
        let normalizer = DiffNormalizer::identity();
        let approved = ApprovedDiffSet::new();
        let engine = RedeployEngine::new(
            ActionKind::ReconcileSublayers,
            &executor,
            &clock,
            &normalizer,
            &approved,
        );
        let mut state = RedeployState::default();
        let mut report = BatchReport::default();
        let outcome = engine.skip_ineligible("/svc{top}", &mut state, &mut report);

        assert!(matches!(outcome, RedeployOutcome::Skipped { .. }));
        assert_eq!(
            state.last_redeploy_error.as_deref(),
            Some(
                "Service /svc{top} not flagged as redeploy-ready or not yet redeployed, skipping"
            )
        );
        assert!(report.messages.contains(NOTE_NOT_READY));
    }
}
