//! Core types for bulk redeploy management

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Structural identifier of a service instance in the managed configuration tree
pub type Keypath = String;

/// Diff output captured for one device during a dry-run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOutput {
    /// Device identifier as reported by the executor
    pub device: String,
    /// Output exactly as the executor returned it, never rewritten
    pub raw_output: String,
    /// Output after wildcard substitution
    pub normalized_output: String,
}

/// Result of the most recent dry-run of a (sub)service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunRecord {
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub output: Vec<DeviceOutput>,
}

impl DryRunRecord {
    /// Check if the dry-run reported no changed devices
    pub fn is_empty(&self) -> bool {
        self.output.is_empty()
    }

    /// Look up a device entry by name
    pub fn device(&self, name: &str) -> Option<&DeviceOutput> {
        self.output.iter().find(|d| d.device == name)
    }
}

/// Redeploy bookkeeping shared by top-level services and their sublayers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeployState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<DryRunRecord>,

    /// Pending diff has been reviewed and may be committed
    #[serde(default)]
    pub redeploy_ready: bool,

    /// Set by a successful commit, cleared by the next dry-run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeployed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_redeploy_error: Option<String>,
}

impl RedeployState {
    /// Check if a dry-run has been fetched and reported at least one device
    pub fn has_diff(&self) -> bool {
        self.dry_run.as_ref().is_some_and(|d| !d.is_empty())
    }

    /// Number of devices in the stored dry-run output (0 when never fetched)
    pub fn diff_count(&self) -> usize {
        self.dry_run.as_ref().map_or(0, |d| d.output.len())
    }
}

/// Sublayer service discovered under a top-level service at populate time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubServiceRecord {
    pub keypath: Keypath,
    #[serde(default)]
    pub state: RedeployState,
}

impl SubServiceRecord {
    pub fn new(keypath: impl Into<Keypath>) -> Self {
        Self {
            keypath: keypath.into(),
            state: RedeployState::default(),
        }
    }
}

/// One entry per managed top-level service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub keypath: Keypath,
    #[serde(default)]
    pub state: RedeployState,
    #[serde(default)]
    pub modified_services: Vec<SubServiceRecord>,
}

impl ServiceRecord {
    pub fn new(keypath: impl Into<Keypath>) -> Self {
        Self {
            keypath: keypath.into(),
            state: RedeployState::default(),
            modified_services: Vec::new(),
        }
    }

    /// Append a sublayer unless one with the same keypath already exists
    pub fn add_modified_service(&mut self, keypath: &str) -> bool {
        if self.modified_services.iter().any(|s| s.keypath == keypath) {
            return false;
        }
        self.modified_services.push(SubServiceRecord::new(keypath));
        true
    }
}

/// Set of normalized diffs previously accepted as safe to commit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovedDiffSet(BTreeSet<String>);

impl ApprovedDiffSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a diff, returning false if it was already approved
    pub fn insert(&mut self, diff: impl Into<String>) -> bool {
        self.0.insert(diff.into())
    }

    pub fn remove(&mut self, diff: &str) -> bool {
        self.0.remove(diff)
    }

    pub fn contains(&self, diff: &str) -> bool {
        self.0.contains(diff)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    /// Check that every device output of a dry-run is approved.
    ///
    /// Vacuously true for a dry-run without devices.
    pub fn covers(&self, dry_run: &DryRunRecord) -> bool {
        dry_run
            .output
            .iter()
            .all(|d| self.contains(&d.normalized_output))
    }
}

impl FromIterator<String> for ApprovedDiffSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Which bulk action is driving a redeploy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    RedeployTopLevel,
    ReconcileSublayers,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RedeployTopLevel => "redeploy-top-level",
            Self::ReconcileSublayers => "reconcile-sublayers",
        }
    }

    /// Reconcile actions always pass the reconcile flag to the executor
    pub fn is_reconcile(&self) -> bool {
        matches!(self, Self::ReconcileSublayers)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "redeploy-top-level" => Ok(Self::RedeployTopLevel),
            "reconcile-sublayers" => Ok(Self::ReconcileSublayers),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

/// Flags passed through to the redeploy executor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitFlags {
    pub dry_run: bool,
    pub no_networking: bool,
    #[serde(default)]
    pub reconcile: bool,
}

impl CommitFlags {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }

    pub fn commit() -> Self {
        Self::default()
    }

    /// Same flags with reconcile set
    pub fn reconciling(self) -> Self {
        Self {
            reconcile: true,
            ..self
        }
    }
}

/// Deferred task targeting exactly one resolved service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub name: String,
    pub action: ActionKind,
    pub target: Keypath,
    pub commit_flags: CommitFlags,
    pub fire_at: DateTime<Utc>,
}

/// Operation for the redeploy-ready tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOperation {
    Add,
    Remove,
}

/// Outcome of a single (sub)service redeploy attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedeployOutcome {
    /// Not attempted (ineligible, unknown, or out of time budget)
    Skipped { reason: String },
    /// Dry-run fetched; `ready` reports whether readiness was granted
    DryRunSucceeded { devices: usize, ready: bool },
    /// Changes committed
    CommitSucceeded,
    /// Executor raised an error
    Failed { error: String },
}

impl RedeployOutcome {
    /// Check if the outcome represents success (no failure, not skipped)
    pub fn is_success(&self) -> bool {
        matches!(self, Self::DryRunSucceeded { .. } | Self::CommitSucceeded)
    }
}

/// Summary of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub skipped: usize,
    pub dry_runs: usize,
    pub commits: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.skipped + self.dry_runs + self.commits + self.failed
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn add_outcome(&mut self, outcome: &RedeployOutcome) {
        match outcome {
            RedeployOutcome::Skipped { .. } => self.skipped += 1,
            RedeployOutcome::DryRunSucceeded { .. } => self.dry_runs += 1,
            RedeployOutcome::CommitSucceeded => self.commits += 1,
            RedeployOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Aggregated result of one bulk redeploy or reconcile call
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Human-readable status notes, the channel for partial success
    pub messages: BTreeSet<String>,
    /// Per-(sub)service outcomes in processing order
    pub outcomes: Vec<(Keypath, RedeployOutcome)>,
    pub summary: BatchSummary,
}

impl BatchReport {
    pub fn record(&mut self, keypath: &str, outcome: RedeployOutcome) {
        self.summary.add_outcome(&outcome);
        self.outcomes.push((keypath.to_string(), outcome));
    }

    pub fn note(&mut self, message: impl Into<String>) {
        self.messages.insert(message.into());
    }

    /// Outcome recorded for a keypath, if any
    pub fn outcome(&self, keypath: &str) -> Option<&RedeployOutcome> {
        self.outcomes
            .iter()
            .find(|(k, _)| k == keypath)
            .map(|(_, o)| o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, normalized: &str) -> DeviceOutput {
        DeviceOutput {
            device: name.into(),
            raw_output: normalized.into(),
            normalized_output: normalized.into(),
        }
    }

    #[test]
    fn test_approved_set_covers_all_or_nothing() {
        let approved: ApprovedDiffSet = ["+ mtu 9000".to_string()].into_iter().collect();
        let mut dry_run = DryRunRecord {
            fetched_at: Utc::now(),
            output: vec![device("pe1", "+ mtu 9000")],
        };
        assert!(approved.covers(&dry_run));

        dry_run.output.push(device("pe2", "- vlan 10"));
        assert!(!approved.covers(&dry_run));
    }

    #[test]
    fn test_empty_dry_run_is_covered() {
        let dry_run = DryRunRecord {
            fetched_at: Utc::now(),
            output: Vec::new(),
        };
        assert!(ApprovedDiffSet::new().covers(&dry_run));
    }

    #[test]
    fn test_add_modified_service_dedupes() {
        let mut record = ServiceRecord::new("/services/l3vpn{a}");
        assert!(record.add_modified_service("/services/l3vpn-pe{a pe1}"));
        assert!(!record.add_modified_service("/services/l3vpn-pe{a pe1}"));
        assert_eq!(record.modified_services.len(), 1);
    }

    #[test]
    fn test_action_kind_round_trip_names() {
        for kind in [ActionKind::RedeployTopLevel, ActionKind::ReconcileSublayers] {
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), kind);
        }
        assert!("redeploy".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_batch_summary_counts() {
        let mut report = BatchReport::default();
        report.record("a", RedeployOutcome::CommitSucceeded);
        report.record(
            "b",
            RedeployOutcome::Failed {
                error: "boom".into(),
            },
        );
        report.record(
            "c",
            RedeployOutcome::Skipped {
                reason: "not ready".into(),
            },
        );
        assert_eq!(report.summary.total(), 3);
        assert!(!report.summary.is_success());
        assert_eq!(report.outcome("a"), Some(&RedeployOutcome::CommitSucceeded));
    }
}
