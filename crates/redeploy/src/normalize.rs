//! Wildcard normalization of dry-run diff text
//!
//! A wildcard table is an ordered list of regular expressions. Normalizing
//! replaces every match of entry `i` (1-based) with `*WILDCARD{i}*`, entries
//! applied in table order. Later patterns see the tokens written by earlier
//! ones, so reordering a table changes results.

use crate::error::{Error, Result};
use crate::types::{ApprovedDiffSet, DryRunRecord};
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Ordered wildcard patterns, as configured
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WildcardTable(Vec<String>);

impl WildcardTable {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(patterns.into_iter().map(Into::into).collect())
    }

    /// `(pattern, index)` pairs in application order, index starting at 1
    pub fn entries(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().enumerate().map(|(i, p)| (p.as_str(), i + 1))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Replacement token for the wildcard at `index`
pub fn wildcard_token(index: usize) -> String {
    format!("*WILDCARD{index}*")
}

/// Compiled wildcard table
#[derive(Debug, Clone)]
pub struct DiffNormalizer {
    rules: Vec<(Regex, String)>,
}

impl DiffNormalizer {
    /// Compile a table. Fails on the first invalid pattern.
    pub fn new(table: &WildcardTable) -> Result<Self> {
        let rules = table
            .entries()
            .map(|(pattern, index)| {
                Regex::new(pattern)
                    .map(|re| (re, wildcard_token(index)))
                    .map_err(|source| Error::InvalidWildcard {
                        index,
                        pattern: pattern.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Normalizer with an empty table (identity)
    pub fn identity() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn normalize(&self, text: &str) -> String {
        let mut current = Cow::Borrowed(text);
        for (re, token) in &self.rules {
            let replaced = match re.replace_all(&current, NoExpand(token)) {
                Cow::Borrowed(_) => continue,
                Cow::Owned(replaced) => replaced,
            };
            current = Cow::Owned(replaced);
        }
        current.into_owned()
    }

    /// Check if normalizing `text` again would leave it unchanged
    pub fn is_fixed_point(&self, text: &str) -> bool {
        self.normalize(text) == text
    }
}

/// Re-normalize every device output of a dry-run in place.
///
/// Returns the number of device entries whose normalized form changed.
pub fn renormalize_dry_run(dry_run: &mut DryRunRecord, normalizer: &DiffNormalizer) -> usize {
    let mut changed = 0;
    for device in &mut dry_run.output {
        let updated = normalizer.normalize(&device.normalized_output);
        if updated != device.normalized_output {
            device.normalized_output = updated;
            changed += 1;
        }
    }
    changed
}

/// Restore every device output from its retained raw copy.
///
/// Returns the number of device entries that were restored.
pub fn rollback_dry_run(dry_run: &mut DryRunRecord) -> usize {
    let mut restored = 0;
    for device in &mut dry_run.output {
        if device.normalized_output != device.raw_output {
            device.normalized_output = device.raw_output.clone();
            restored += 1;
        }
    }
    restored
}

/// Approved diffs whose re-normalization differs, as `(old, new)` pairs
pub fn renormalize_approved(
    approved: &ApprovedDiffSet,
    normalizer: &DiffNormalizer,
) -> Vec<(String, String)> {
    approved
        .iter()
        .filter_map(|diff| {
            let updated = normalizer.normalize(diff);
            (updated != *diff).then(|| (diff.clone(), updated))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceOutput;
    use chrono::Utc;

    fn normalizer(patterns: &[&str]) -> DiffNormalizer {
        DiffNormalizer::new(&WildcardTable::new(patterns.iter().copied())).unwrap()
    }

    #[test]
    fn test_replaces_every_match_with_indexed_token() {
        let n = normalizer(&[r"\d{4}-\d{2}-\d{2}", r"seq \d+"]);
        let out = n.normalize("changed 2024-01-02 and 2024-03-04, seq 17");
        assert_eq!(out, "changed *WILDCARD1* and *WILDCARD1*, seq *WILDCARD2*");
    }

    #[test]
    fn test_empty_table_is_identity() {
        let n = DiffNormalizer::new(&WildcardTable::default()).unwrap();
        assert_eq!(n.normalize("+ mtu 9000"), "+ mtu 9000");
        assert_eq!(DiffNormalizer::identity().normalize("x"), "x");
    }

    #[test]
    fn test_idempotent_once_patterns_exhausted() {
        let n = normalizer(&[r"\d{4}-\d{2}-\d{2}T[\d:.]+", r"cookie [0-9a-f]+"]);
        let once = n.normalize("ts 2024-05-06T10:11:12.5 cookie deadbeef");
        assert_eq!(once, "ts *WILDCARD1* cookie *WILDCARD2*");
        assert_eq!(n.normalize(&once), once);
        assert!(n.is_fixed_point(&once));
    }

    #[test]
    fn test_pattern_matching_token_is_not_idempotent() {
        // \d+ matches the index digit of its own token
        let n = normalizer(&[r"\d+"]);
        let once = n.normalize("mtu 9000");
        assert_eq!(once, "mtu *WILDCARD1*");
        assert!(!n.is_fixed_point(&once));
        assert_eq!(n.normalize(&once), "mtu *WILDCARD*WILDCARD1**");
    }

    #[test]
    fn test_table_order_changes_result() {
        let short_first = normalizer(&["foo", "foobar"]);
        let long_first = normalizer(&["foobar", "foo"]);
        assert_eq!(short_first.normalize("foobar"), "*WILDCARD1*bar");
        assert_eq!(long_first.normalize("foobar"), "*WILDCARD1*");
    }

    #[test]
    fn test_later_pattern_rewrites_earlier_token() {
        let n = normalizer(&[r"mtu \d+", "WILDCARD"]);
        assert_eq!(n.normalize("mtu 9000"), "**WILDCARD2*1*");
    }

    #[test]
    fn test_invalid_pattern_reports_index() {
        let err = DiffNormalizer::new(&WildcardTable::new(["ok", "(unclosed"])).unwrap_err();
        match err {
            Error::InvalidWildcard { index, pattern, .. } => {
                assert_eq!(index, 2);
                assert_eq!(pattern, "(unclosed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_token_is_inserted_literally() {
        let n = normalizer(&[r"(\d+)"]);
        assert_eq!(n.normalize("vlan 10"), "vlan *WILDCARD1*");
    }

    #[test]
    fn test_renormalize_and_rollback_dry_run() {
        let mut dry_run = DryRunRecord {
            fetched_at: Utc::now(),
            output: vec![
                DeviceOutput {
                    device: "pe1".into(),
                    raw_output: "ts 12:00:01".into(),
                    normalized_output: "ts 12:00:01".into(),
                },
                DeviceOutput {
                    device: "pe2".into(),
                    raw_output: "+ mtu 9000".into(),
                    normalized_output: "+ mtu 9000".into(),
                },
            ],
        };
        let n = normalizer(&[r"\d{2}:\d{2}:\d{2}"]);

        assert_eq!(renormalize_dry_run(&mut dry_run, &n), 1);
        assert_eq!(dry_run.output[0].normalized_output, "ts *WILDCARD1*");
        assert_eq!(renormalize_dry_run(&mut dry_run, &n), 0);

        assert_eq!(rollback_dry_run(&mut dry_run), 1);
        assert_eq!(dry_run.output[0].normalized_output, "ts 12:00:01");
        assert_eq!(dry_run.output[0].raw_output, "ts 12:00:01");
    }

    #[test]
    fn test_renormalize_approved_only_changed_entries() {
        let approved: ApprovedDiffSet = ["+ mtu 9000".to_string(), "ts 10:00:00".to_string()]
            .into_iter()
            .collect();
        let n = normalizer(&[r"\d{2}:\d{2}:\d{2}"]);
        let changes = renormalize_approved(&approved, &n);
        assert_eq!(
            changes,
            vec![("ts 10:00:00".to_string(), "ts *WILDCARD1*".to_string())]
        );
    }
}
