use anyhow::{Context, Result};
use chrono::TimeDelta;
use redeploy::{DEFAULT_INTERVAL_SECS, ServiceListSettings, WildcardTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::paths;

/// Default executor program
pub const DEFAULT_EXECUTOR: &str = "bsa-executor";

/// Default batch budget, 20 minutes
pub const DEFAULT_BATCH_BUDGET_SECS: u64 = 1200;

const MAX_BUDGET_SECS: u64 = 366 * 24 * 3600;

// ============================================================================
// Config File
// ============================================================================

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BsaConfig {
    pub service_list: ServiceListConfig,
    pub diff_checking: DiffCheckingConfig,
    pub executor: ExecutorConfig,
    pub schedule: ScheduleConfig,
    /// `<service-type>` to keypath prefix, for `type::id` service ids
    pub aliases: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceListConfig {
    /// Type paths whose instances are top-level services
    pub top_level_types: Vec<String>,
    /// Substrings selecting the sublayers to track
    pub target_sublayers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffCheckingConfig {
    /// Ordered regex patterns; index is position + 1
    pub wildcards: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub command: String,
    pub args: Vec<String>,
    pub batch_budget_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_EXECUTOR.to_string(),
            args: Vec::new(),
            batch_budget_secs: DEFAULT_BATCH_BUDGET_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub default_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

impl BsaConfig {
    /// Load `config.toml` from the config directory, or defaults if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Config file {} does not exist, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn service_list_settings(&self) -> ServiceListSettings {
        ServiceListSettings {
            top_level_types: self.service_list.top_level_types.clone(),
            target_sublayers: self.service_list.target_sublayers.clone(),
        }
    }

    pub fn wildcard_table(&self) -> WildcardTable {
        WildcardTable::new(self.diff_checking.wildcards.iter().cloned())
    }

    /// Batch time budget, capped at one year
    pub fn batch_budget(&self) -> TimeDelta {
        TimeDelta::seconds(self.executor.batch_budget_secs.min(MAX_BUDGET_SECS) as i64)
    }

    /// BLAKE3 hash of the service-list settings.
    ///
    /// A stored service list built under a different fingerprint is stale.
    pub fn settings_fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (label, values) in [
            ("types", &self.service_list.top_level_types),
            ("sublayers", &self.service_list.target_sublayers),
        ] {
            hasher.update(label.as_bytes());
            for value in values {
                hasher.update(&(value.len() as u64).to_le_bytes());
                hasher.update(value.as_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BsaConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, BsaConfig::default());
        assert_eq!(config.executor.command, DEFAULT_EXECUTOR);
        assert_eq!(config.batch_budget(), TimeDelta::minutes(20));
        assert_eq!(config.schedule.default_interval_secs, 30);
    }

    #[test]
    fn test_load_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[service_list]
top_level_types = ["/services/vpn:vpn/service"]
target_sublayers = ["vpn-pe"]

[diff_checking]
wildcards = ['\d{{2}}:\d{{2}}:\d{{2}}', "seq \\d+"]

[executor]
command = "/opt/bsa/run"
args = ["--profile", "lab"]

[aliases]
vpn = "/services/vpn:vpn/service"
"#
        )
        .unwrap();

        let config = BsaConfig::load_from(file.path()).unwrap();
        assert_eq!(config.service_list_settings().target_sublayers, ["vpn-pe"]);
        assert_eq!(config.wildcard_table().len(), 2);
        assert_eq!(config.executor.args, ["--profile", "lab"]);
        assert_eq!(config.executor.batch_budget_secs, DEFAULT_BATCH_BUDGET_SECS);
        assert_eq!(config.aliases["vpn"], "/services/vpn:vpn/service");
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[executor\ncommand = 1").unwrap();
        assert!(BsaConfig::load_from(file.path()).is_err());
    }

    #[test]
    fn test_fingerprint_tracks_service_list_settings_only() {
        let base = BsaConfig::default();
        let mut wildcards_changed = base.clone();
        wildcards_changed.diff_checking.wildcards.push("x".into());
        assert_eq!(
            base.settings_fingerprint(),
            wildcards_changed.settings_fingerprint()
        );

        let mut types_changed = base.clone();
        types_changed
            .service_list
            .top_level_types
            .push("/services/vpn".into());
        assert_ne!(base.settings_fingerprint(), types_changed.settings_fingerprint());

        // Moving a value between lists changes the hash
        let mut a = base.clone();
        a.service_list.top_level_types.push("vpn".into());
        let mut b = base;
        b.service_list.target_sublayers.push("vpn".into());
        assert_ne!(a.settings_fingerprint(), b.settings_fingerprint());
    }
}
