//! Service id parsing
//!
//! Services are named either by keypath (`/services/...{id}`) or as
//! `<service-type>::<service-id>`, expanded with the `[aliases]` prefixes.

use anyhow::{Context, Result, bail};
use redeploy::Keypath;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Turn one service id into a keypath; keypaths pass through unchanged
pub fn expand_service_id(id: &str, aliases: &BTreeMap<String, String>) -> Result<Keypath> {
    let id = id.trim();
    if id.starts_with('/') {
        return Ok(id.to_string());
    }

    let Some((service_type, service_id)) = id.split_once("::") else {
        bail!("'{id}' is neither a keypath nor <service-type>::<service-id>");
    };
    let Some(prefix) = aliases.get(service_type) else {
        let known: Vec<&str> = aliases.keys().map(String::as_str).collect();
        bail!("Unknown service type '{service_type}', expected one of {known:?}");
    };
    if service_id.is_empty() {
        bail!("'{id}' has an empty service id");
    }
    Ok(format!("{prefix}{{{service_id}}}"))
}

/// Parse a comma-separated list of service ids
pub fn parse_service_ids(ids: &str, aliases: &BTreeMap<String, String>) -> Result<Vec<Keypath>> {
    ids.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| expand_service_id(s, aliases))
        .collect()
}

/// Read service ids from a file, one per line.
///
/// Blank lines and lines starting with `#` are ignored.
pub fn read_input_file(path: &Path, aliases: &BTreeMap<String, String>) -> Result<Vec<Keypath>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            expand_service_id(line, aliases)
                .with_context(|| format!("In input file {}", path.display()))
        })
        .collect()
}

/// Services named on the command line; `-s` wins over `-f`
pub fn collect_service_ids(
    service_ids: Option<&str>,
    input_file: Option<&Path>,
    aliases: &BTreeMap<String, String>,
) -> Result<Vec<Keypath>> {
    match (service_ids, input_file) {
        (Some(ids), _) => parse_service_ids(ids, aliases),
        (None, Some(path)) => read_input_file(path, aliases),
        (None, None) => Ok(Vec::new()),
    }
}
