//! Service set resolution
//!
//! Turns a target expression plus the current service list into the set of
//! keypaths a bulk operation acts on. A keypath list means "include" on its
//! own and "exclude" when combined with "all".

use crate::error::{Error, Result};
use crate::types::{Keypath, ServiceRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Predicates for selecting a subset of all services.
///
/// Set flags are OR-combined; a filter with no flags matches nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsetFilter {
    pub last_redeploy_error: bool,
    pub no_dry_run_diff: bool,
    pub no_dry_run_fetched_at: bool,
    pub no_redeployed_at: bool,
    pub redeployed_at: bool,
    pub redeploy_ready: bool,
}

impl SubsetFilter {
    /// Names accepted by [`SubsetFilter::with_flag`]
    pub const FLAG_NAMES: [&'static str; 6] = [
        "last-redeploy-error",
        "no-dry-run-diff",
        "no-dry-run-fetched-at",
        "no-redeployed-at",
        "redeployed-at",
        "redeploy-ready",
    ];

    /// Set a flag by its kebab-case name
    pub fn with_flag(mut self, name: &str) -> Result<Self> {
        match name {
            "last-redeploy-error" => self.last_redeploy_error = true,
            "no-dry-run-diff" => self.no_dry_run_diff = true,
            "no-dry-run-fetched-at" => self.no_dry_run_fetched_at = true,
            "no-redeployed-at" => self.no_redeployed_at = true,
            "redeployed-at" => self.redeployed_at = true,
            "redeploy-ready" => self.redeploy_ready = true,
            other => {
                return Err(Error::InvalidTargetCombination(format!(
                    "unknown subset filter '{other}'"
                )));
            }
        }
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, service: &ServiceRecord) -> bool {
        let state = &service.state;
        (self.last_redeploy_error && state.last_redeploy_error.is_some())
            || (self.no_dry_run_diff && !state.has_diff())
            || (self.no_dry_run_fetched_at && state.dry_run.is_none())
            || (self.no_redeployed_at && state.redeployed_at.is_none())
            || (self.redeployed_at && state.redeployed_at.is_some())
            || (self.redeploy_ready && state.redeploy_ready)
    }
}

/// Validated target selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetExpression {
    /// Every known service minus `exclude`
    AllServices { exclude: BTreeSet<Keypath> },
    /// Every known service matching the filter
    AllServicesSubset(SubsetFilter),
    /// Exactly these keypaths, known or not
    KeypathSet(BTreeSet<Keypath>),
}

/// Target options as carried by a request, before validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Targets {
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub subset: Option<SubsetFilter>,
    #[serde(default)]
    pub keypaths: Vec<Keypath>,
}

impl Targets {
    pub fn all() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }

    pub fn keypaths<I, S>(keypaths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Keypath>,
    {
        Self {
            keypaths: keypaths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn all_except<I, S>(keypaths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Keypath>,
    {
        Self {
            all: true,
            ..Self::keypaths(keypaths)
        }
    }

    pub fn subset(filter: SubsetFilter) -> Self {
        Self {
            all: true,
            subset: Some(filter),
            keypaths: Vec::new(),
        }
    }

    /// Validate into an expression; `None` means no targets were given
    pub fn expression(&self) -> Result<Option<TargetExpression>> {
        if let Some(filter) = self.subset {
            if !self.keypaths.is_empty() {
                return Err(Error::InvalidTargetCombination(
                    "subset-of-all cannot be given with an explicit service list".into(),
                ));
            }
            return Ok(Some(TargetExpression::AllServicesSubset(filter)));
        }

        let keypaths: BTreeSet<Keypath> = self.keypaths.iter().cloned().collect();
        if self.all {
            return Ok(Some(TargetExpression::AllServices { exclude: keypaths }));
        }
        if keypaths.is_empty() {
            return Ok(None);
        }
        Ok(Some(TargetExpression::KeypathSet(keypaths)))
    }
}

/// Resolve a target expression against the current service list.
///
/// Fails with [`Error::RepositoryUninitialized`] when there are no services.
/// Keypaths from a [`TargetExpression::KeypathSet`] are returned unvalidated.
pub fn resolve(
    target: Option<&TargetExpression>,
    services: &[ServiceRecord],
) -> Result<BTreeSet<Keypath>> {
    if services.is_empty() {
        return Err(Error::RepositoryUninitialized);
    }

    let all = || services.iter().map(|s| s.keypath.clone());

    let resolved = match target {
        None => all().collect(),
        Some(TargetExpression::AllServicesSubset(filter)) => services
            .iter()
            .filter(|s| filter.matches(s))
            .map(|s| s.keypath.clone())
            .collect(),
        Some(TargetExpression::AllServices { exclude }) => {
            all().filter(|k| !exclude.contains(k)).collect()
        }
        Some(TargetExpression::KeypathSet(keypaths)) => keypaths.clone(),
    };

    log::debug!("Resolved {} target service(s)", resolved.len());
    Ok(resolved)
}

/// Validate `targets` and resolve them in one step
pub fn resolve_targets(targets: &Targets, services: &[ServiceRecord]) -> Result<BTreeSet<Keypath>> {
    let expression = targets.expression()?;
    resolve(expression.as_ref(), services)
}
