use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use redeploy::{
    ApprovedDiffSet, FleetData, MemoryRepository, ScheduledTask, ServiceRecord,
    ServiceRepository, TaskQueue, WildcardTable,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::BsaConfig;

// ============================================================================
// State File
// ============================================================================

/// Contents of `state.toml`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StateFile {
    /// Fingerprint of the service-list settings the list was built with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_fingerprint: Option<String>,

    /// Last time the state was written
    pub last_updated: DateTime<Utc>,

    #[serde(default)]
    pub approved_diffs: ApprovedDiffSet,

    #[serde(default)]
    pub services: Vec<ServiceRecord>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            settings_fingerprint: None,
            last_updated: Utc::now(),
            approved_diffs: ApprovedDiffSet::new(),
            services: Vec::new(),
        }
    }
}

impl StateFile {
    /// Load from disk, or return default if the file doesn't exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("State file does not exist, using default state");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let state: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

        log::debug!("Loaded state from {}", path.display());
        Ok(state)
    }

    /// Save to disk, replacing the previous file in one rename
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize state to TOML")?;
        write_atomic(path, &content)?;
        log::debug!("Saved state to {}", path.display());
        Ok(())
    }
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
    }
    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, content)
        .with_context(|| format!("Failed to write state file: {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace state file: {}", path.display()))
}

// ============================================================================
// File Repository
// ============================================================================

/// Service repository persisted to `state.toml`.
///
/// Writes are staged in memory and the file is rewritten on commit.
/// Wildcards come from the config file, not the state file.
#[derive(Debug)]
pub struct FileRepository {
    path: PathBuf,
    fingerprint: String,
    inner: MemoryRepository,
}

impl FileRepository {
    /// Open the state file for the given config.
    ///
    /// A service list built under different service-list settings is dropped.
    pub fn open(path: impl Into<PathBuf>, config: &BsaConfig) -> Result<Self> {
        let path = path.into();
        let state = StateFile::load(&path)?;
        let fingerprint = config.settings_fingerprint();

        let mut services = state.services;
        let stale = state
            .settings_fingerprint
            .as_deref()
            .is_some_and(|stored| stored != fingerprint);
        if stale && !services.is_empty() {
            log::info!(
                "Service list settings changed, dropping {} stored service(s)",
                services.len()
            );
            services.clear();
        }

        let data = FleetData::from_parts(services, state.approved_diffs);
        Ok(Self {
            path,
            fingerprint,
            inner: MemoryRepository::new(data, config.wildcard_table()),
        })
    }

    fn save(&self) -> Result<()> {
        let (services, approved_diffs) = self.inner.committed().clone().into_parts();
        StateFile {
            settings_fingerprint: Some(self.fingerprint.clone()),
            last_updated: Utc::now(),
            approved_diffs,
            services,
        }
        .save(&self.path)
    }
}

impl ServiceRepository for FileRepository {
    fn list_services(&self) -> redeploy::Result<Vec<ServiceRecord>> {
        self.inner.list_services()
    }

    fn get_service(&self, keypath: &str) -> redeploy::Result<Option<ServiceRecord>> {
        self.inner.get_service(keypath)
    }

    fn put_service(&mut self, record: ServiceRecord) -> redeploy::Result<()> {
        self.inner.put_service(record)
    }

    fn delete_service(&mut self, keypath: &str) -> redeploy::Result<bool> {
        self.inner.delete_service(keypath)
    }

    fn list_wildcards(&self) -> redeploy::Result<WildcardTable> {
        self.inner.list_wildcards()
    }

    fn list_approved_diffs(&self) -> redeploy::Result<ApprovedDiffSet> {
        self.inner.list_approved_diffs()
    }

    fn add_approved_diff(&mut self, diff: &str) -> redeploy::Result<()> {
        self.inner.add_approved_diff(diff)
    }

    fn remove_approved_diff(&mut self, diff: &str) -> redeploy::Result<()> {
        self.inner.remove_approved_diff(diff)
    }

    fn commit(&mut self) -> redeploy::Result<()> {
        if !self.inner.has_staged_changes() {
            return Ok(());
        }
        self.inner.commit()?;
        self.save()
            .map_err(|e| redeploy::Error::Repository(format!("{e:#}")))
    }

    fn rollback(&mut self) {
        self.inner.rollback();
    }

    fn service_count(&self) -> redeploy::Result<usize> {
        self.inner.service_count()
    }
}

// ============================================================================
// Task Ledger
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct TaskFile {
    #[serde(default)]
    tasks: Vec<ScheduledTask>,
}

/// Scheduled tasks persisted to `tasks.toml`
#[derive(Debug)]
pub struct TaskLedger {
    path: PathBuf,
    tasks: Vec<ScheduledTask>,
}

impl TaskLedger {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tasks = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read task ledger: {}", path.display()))?;
            toml::from_str::<TaskFile>(&content)
                .with_context(|| format!("Failed to parse task ledger: {}", path.display()))?
                .tasks
        } else {
            Vec::new()
        };
        Ok(Self { path, tasks })
    }

    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    /// Drop tasks whose fire time is before `now`, returning how many
    pub fn prune_fired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.fire_at >= now);
        before - self.tasks.len()
    }

    pub fn save(&self) -> Result<()> {
        let file = TaskFile {
            tasks: self.tasks.clone(),
        };
        let content = toml::to_string_pretty(&file).context("Failed to serialize tasks")?;
        write_atomic(&self.path, &content)?;
        log::debug!("Saved {} task(s) to {}", self.tasks.len(), self.path.display());
        Ok(())
    }
}

impl TaskQueue for TaskLedger {
    fn enqueue(&mut self, task: ScheduledTask) -> redeploy::Result<()> {
        // Rescheduling the same action for a service replaces the old task
        self.tasks.retain(|t| t.name != task.name);
        self.tasks.push(task);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
