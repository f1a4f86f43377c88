//! # Redeploy
//!
//! Bulk redeploy orchestration for a fleet of configured services.
//!
//! A service list tracks each top-level service and the sublayers it
//! modifies. Bulk actions resolve a target expression against that list,
//! dry-run or commit each service through an external executor, and record
//! the outcome on the service. Dry-run diffs are normalized with a wildcard
//! table so they can be matched against operator-approved diffs; a service
//! whose whole diff is approved becomes redeploy-ready.
//!
//! ## Core Concepts
//!
//! - **ServiceRecord**: Per-service redeploy state plus tracked sublayers
//! - **Targets**: Include, exclude-from-all, or subset-of-all selection
//! - **DiffNormalizer**: Ordered regex substitutions producing `*WILDCARDn*` tokens
//! - **RedeployEngine**: One dry-run or commit attempt with its state transitions
//! - **BulkOrchestrator**: Transactional batch over the resolved services
//!
//! ## Example
//!
//! ```ignore
//! use redeploy::{
//!     BulkOrchestrator, BulkRequest, CommitFlags, MemoryRepository, NoProgress,
//!     ServiceRecord, SystemClock, Targets,
//! };
//!
//! let mut repo = MemoryRepository::with_services(vec![ServiceRecord::new("/vpn{acme}")]);
//! let report = BulkOrchestrator::new(&mut repo, &executor, &SystemClock).redeploy_top_level(
//!     &BulkRequest::new(Targets::all(), CommitFlags::dry_run()),
//!     &mut NoProgress,
//! )?;
//! for note in &report.messages {
//!     println!("{note}");
//! }
//! ```
//!
//! ## Provider Traits
//!
//! - [`ServiceRepository`]: Transactional store of records, approvals and wildcards
//! - [`RedeployExecutor`]: Runs one dry-run or commit
//! - [`ServiceInventory`]: Lists services and their modified sublayers
//! - [`TaskQueue`]: Accepts scheduled tasks
//! - [`Clock`]: Current time
//! - [`ProgressCallback`]: Receives progress updates

pub mod approvals;
pub mod context;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod orchestrator;
pub mod scheduler;
pub mod target;
pub mod types;

// Re-export main types at crate root
pub use approvals::WildcardUpdate;
pub use context::{
    Clock, DeviceDiff, ExecutionResult, FixedClock, FleetData, MemoryRepository, NoProgress,
    ProgressCallback, RedeployExecutor, ServiceInventory, ServiceRepository, SystemClock,
    TaskQueue,
};
pub use error::{Error, ErrorCategory, ExecutionError, Result};
pub use normalize::{DiffNormalizer, WildcardTable};
pub use orchestrator::{
    BulkOrchestrator, BulkRequest, DEFAULT_BATCH_BUDGET, PopulateReport, ServiceListSettings,
};
pub use scheduler::{DEFAULT_INTERVAL_SECS, ScheduleRequest, ScheduleTime};
pub use target::{SubsetFilter, TargetExpression, Targets};
pub use types::{
    ActionKind, ApprovedDiffSet, BatchReport, BatchSummary, CommitFlags, DeviceOutput,
    DryRunRecord, Keypath, ReadyOperation, RedeployOutcome, RedeployState, ScheduledTask,
    ServiceRecord, SubServiceRecord,
};
