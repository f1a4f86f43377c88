//! Collaborator traits and in-memory implementations
//!
//! The core never talks to a configuration tree, a device or a task
//! scheduler directly. These traits are the seams; the `bsa` binary provides
//! file- and command-backed implementations, tests use the in-memory ones.

use crate::error::{ExecutionError, Result};
use crate::normalize::WildcardTable;
use crate::types::{ApprovedDiffSet, Keypath, RedeployOutcome, ScheduledTask, ServiceRecord};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::BTreeMap;

/// Store of service records, approved diffs and wildcards.
///
/// Writes are staged until [`commit`](ServiceRepository::commit); reads see
/// staged writes. [`rollback`](ServiceRepository::rollback) discards them.
pub trait ServiceRepository {
    /// All services, ordered by keypath
    fn list_services(&self) -> Result<Vec<ServiceRecord>>;

    fn get_service(&self, keypath: &str) -> Result<Option<ServiceRecord>>;

    /// Insert or replace the record with the same keypath
    fn put_service(&mut self, record: ServiceRecord) -> Result<()>;

    /// Delete a record, returning whether it existed
    fn delete_service(&mut self, keypath: &str) -> Result<bool>;

    fn list_wildcards(&self) -> Result<WildcardTable>;

    fn list_approved_diffs(&self) -> Result<ApprovedDiffSet>;

    fn add_approved_diff(&mut self, diff: &str) -> Result<()>;

    fn remove_approved_diff(&mut self, diff: &str) -> Result<()>;

    /// Make staged writes durable
    fn commit(&mut self) -> Result<()>;

    /// Discard staged writes
    fn rollback(&mut self);

    fn service_count(&self) -> Result<usize> {
        Ok(self.list_services()?.len())
    }
}

/// Per-device diff reported by a dry-run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDiff {
    pub device: String,
    pub output: String,
}

/// Successful executor response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Dry-run diffs, one entry per changed device
    DryRun(Vec<DeviceDiff>),
    /// Commit acknowledged
    Committed,
}

/// Runs one redeploy of one service node.
///
/// Calls are synchronous and may take minutes.
pub trait RedeployExecutor {
    fn execute(
        &self,
        keypath: &str,
        flags: &crate::types::CommitFlags,
    ) -> std::result::Result<ExecutionResult, ExecutionError>;
}

/// Source of top-level services and their modified sublayers
pub trait ServiceInventory {
    /// Keypaths of all instances under a top-level service type path
    fn list_services(&self, type_path: &str) -> Result<Vec<Keypath>>;

    /// Keypaths of services modified by a top-level service
    fn modified_services(&self, keypath: &str)
    -> std::result::Result<Vec<Keypath>, ExecutionError>;
}

/// Consumer of scheduled tasks
pub trait TaskQueue {
    fn enqueue(&mut self, task: ScheduledTask) -> Result<()>;
}

impl TaskQueue for Vec<ScheduledTask> {
    fn enqueue(&mut self, task: ScheduledTask) -> Result<()> {
        self.push(task);
        Ok(())
    }
}

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a given instant, optionally advancing on every read
#[derive(Debug)]
pub struct FixedClock {
    now: Cell<DateTime<Utc>>,
    step: TimeDelta,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::stepping(now, TimeDelta::zero())
    }

    /// Each call to `now` returns the previous value plus `step`
    pub fn stepping(start: DateTime<Utc>, step: TimeDelta) -> Self {
        Self {
            now: Cell::new(start),
            step,
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let now = self.now.get();
        self.now.set(now + self.step);
        now
    }
}

/// Progress callback for batch operations
pub trait ProgressCallback {
    /// Called once before the first service of a batch
    fn on_batch_start(&mut self, count: usize, action: &str);

    /// Called before a (sub)service is dispatched
    fn on_service_start(&mut self, keypath: &str);

    /// Called after a (sub)service outcome is known
    fn on_service_complete(&mut self, keypath: &str, outcome: &RedeployOutcome);

    fn on_batch_complete(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_batch_start(&mut self, _count: usize, _action: &str) {}
    fn on_service_start(&mut self, _keypath: &str) {}
    fn on_service_complete(&mut self, _keypath: &str, _outcome: &RedeployOutcome) {}
    fn on_batch_complete(&mut self) {}
}

/// Durable contents of a service repository
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetData {
    pub services: BTreeMap<Keypath, ServiceRecord>,
    pub approved_diffs: ApprovedDiffSet,
}

impl FleetData {
    pub fn from_parts(services: Vec<ServiceRecord>, approved_diffs: ApprovedDiffSet) -> Self {
        Self {
            services: services
                .into_iter()
                .map(|s| (s.keypath.clone(), s))
                .collect(),
            approved_diffs,
        }
    }

    pub fn into_parts(self) -> (Vec<ServiceRecord>, ApprovedDiffSet) {
        (self.services.into_values().collect(), self.approved_diffs)
    }
}

/// In-memory repository with staged writes
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    committed: FleetData,
    staged: Option<FleetData>,
    wildcards: WildcardTable,
}

impl MemoryRepository {
    pub fn new(data: FleetData, wildcards: WildcardTable) -> Self {
        Self {
            committed: data,
            staged: None,
            wildcards,
        }
    }

    /// Repository holding the given services, no approvals, no wildcards
    pub fn with_services(services: Vec<ServiceRecord>) -> Self {
        Self::new(
            FleetData::from_parts(services, ApprovedDiffSet::new()),
            WildcardTable::default(),
        )
    }

    /// Committed contents, ignoring staged writes
    pub fn committed(&self) -> &FleetData {
        &self.committed
    }

    pub fn has_staged_changes(&self) -> bool {
        self.staged.is_some()
    }

    pub fn set_wildcards(&mut self, wildcards: WildcardTable) {
        self.wildcards = wildcards;
    }

    fn current(&self) -> &FleetData {
        self.staged.as_ref().unwrap_or(&self.committed)
    }

    fn staged_mut(&mut self) -> &mut FleetData {
        let committed = &self.committed;
        self.staged.get_or_insert_with(|| committed.clone())
    }
}

impl ServiceRepository for MemoryRepository {
    fn list_services(&self) -> Result<Vec<ServiceRecord>> {
        Ok(self.current().services.values().cloned().collect())
    }

    fn get_service(&self, keypath: &str) -> Result<Option<ServiceRecord>> {
        Ok(self.current().services.get(keypath).cloned())
    }

    fn put_service(&mut self, record: ServiceRecord) -> Result<()> {
        self.staged_mut()
            .services
            .insert(record.keypath.clone(), record);
        Ok(())
    }

    fn delete_service(&mut self, keypath: &str) -> Result<bool> {
        Ok(self.staged_mut().services.remove(keypath).is_some())
    }

    fn list_wildcards(&self) -> Result<WildcardTable> {
        Ok(self.wildcards.clone())
    }

    fn list_approved_diffs(&self) -> Result<ApprovedDiffSet> {
        Ok(self.current().approved_diffs.clone())
    }

    fn add_approved_diff(&mut self, diff: &str) -> Result<()> {
        self.staged_mut().approved_diffs.insert(diff);
        Ok(())
    }

    fn remove_approved_diff(&mut self, diff: &str) -> Result<()> {
        self.staged_mut().approved_diffs.remove(diff);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if let Some(staged) = self.staged.take() {
            self.committed = staged;
        }
        Ok(())
    }

    fn rollback(&mut self) {
        self.staged = None;
    }

    fn service_count(&self) -> Result<usize> {
        Ok(self.current().services.len())
    }
}
