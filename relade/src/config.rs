//! This module controls configuration discovery from the end user's
//! environment, providing a convenience mechanism for the rest of the
//! program. The pipeline itself never reads the environment; everything it
//! needs arrives as plain values built here.

use std::env;
use std::path::PathBuf;

use rustc_hash::FxHashMap;
use tracing::warn;

/// Environment prefix shared by every copy-source variable.
const SOURCE_PREFIX: &str = "RELADE_SOURCE_";

/// Environment variable naming a directory for window dump diagnostics.
const DEBUG_DIR_VAR: &str = "RELADE_DEBUG_DIR";

/// Known copy-source keys, longest first so suffix matching never splits a
/// source name on a shorter key that happens to be a tail of a longer one.
const SOURCE_KEYS: &[&str] = &[
    "TIMESTAMP_FIELD",
    "TARGET_INDEX",
    "FILTER_FIELD",
    "FILTER_VALUE",
    "USERNAME",
    "PASSWORD",
    "INDEX",
    "URL",
];

/// One external cluster to replicate from. Read-only once built; one
/// descriptor drives one copy pass independently of the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySource {
    /// Name of the group, taken from the environment variable naming.
    pub name: String,
    /// Source cluster base URL.
    pub server_url: String,
    /// Source cluster username.
    pub username: String,
    /// Source cluster password.
    pub password: String,
    /// Index pattern to search.
    pub index_pattern: String,
    /// Name of the timestamp field driving the window range filter.
    pub timestamp_field: String,
    /// Optional single-field equality filter, ANDed with the range.
    pub filter: Option<(String, String)>,
    /// Target index, possibly date-patterned. Absent means every copied
    /// document keeps its source index.
    pub target_index: Option<String>,
}

#[derive(Debug, Default)]
struct PartialSource {
    server_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    index_pattern: Option<String>,
    timestamp_field: Option<String>,
    filter_field: Option<String>,
    filter_value: Option<String>,
    target_index: Option<String>,
}

impl PartialSource {
    fn missing_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.server_url.is_none() {
            missing.push("URL");
        }
        if self.username.is_none() {
            missing.push("USERNAME");
        }
        if self.password.is_none() {
            missing.push("PASSWORD");
        }
        if self.index_pattern.is_none() {
            missing.push("INDEX");
        }
        if self.timestamp_field.is_none() {
            missing.push("TIMESTAMP_FIELD");
        }
        missing
    }

    fn build(self, name: &str) -> Option<CopySource> {
        let missing = self.missing_keys();
        if !missing.is_empty() {
            warn!(
                "Skipping copy source {name}: missing {vars}",
                vars = missing
                    .iter()
                    .map(|key| format!("{SOURCE_PREFIX}{name}_{key}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            return None;
        }

        let filter = match (self.filter_field, self.filter_value) {
            (Some(field), Some(value)) => Some((field, value)),
            (None, None) => None,
            _ => {
                warn!(
                    "Copy source {name} has only one of FILTER_FIELD and FILTER_VALUE, ignoring the filter"
                );
                None
            }
        };

        Some(CopySource {
            name: name.to_string(),
            server_url: self.server_url.expect("missing_keys checked URL"),
            username: self.username.expect("missing_keys checked USERNAME"),
            password: self.password.expect("missing_keys checked PASSWORD"),
            index_pattern: self.index_pattern.expect("missing_keys checked INDEX"),
            timestamp_field: self
                .timestamp_field
                .expect("missing_keys checked TIMESTAMP_FIELD"),
            filter,
            target_index: self.target_index,
        })
    }
}

/// Discover copy sources from the process environment.
///
/// Sources are groups of variables named `RELADE_SOURCE_<NAME>_<KEY>`.
/// `URL`, `USERNAME`, `PASSWORD`, `INDEX` and `TIMESTAMP_FIELD` are
/// required per group; `FILTER_FIELD` with `FILTER_VALUE` and
/// `TARGET_INDEX` are optional. A group with missing required keys is
/// skipped with a log; the remaining groups are returned in name order.
#[must_use]
pub fn copy_sources_from_env() -> Vec<CopySource> {
    copy_sources_from_vars(env::vars())
}

/// [`copy_sources_from_env`] over an explicit variable set.
pub fn copy_sources_from_vars(vars: impl Iterator<Item = (String, String)>) -> Vec<CopySource> {
    let mut groups: FxHashMap<String, PartialSource> = FxHashMap::default();

    for (var, value) in vars {
        let Some(remainder) = var.strip_prefix(SOURCE_PREFIX) else {
            continue;
        };
        let Some((name, key)) = split_source_key(remainder) else {
            warn!("Ignoring unrecognized copy source variable {var}");
            continue;
        };

        let partial = groups.entry(name.to_string()).or_default();
        match key {
            "URL" => partial.server_url = Some(value),
            "USERNAME" => partial.username = Some(value),
            "PASSWORD" => partial.password = Some(value),
            "INDEX" => partial.index_pattern = Some(value),
            "TIMESTAMP_FIELD" => partial.timestamp_field = Some(value),
            "FILTER_FIELD" => partial.filter_field = Some(value),
            "FILTER_VALUE" => partial.filter_value = Some(value),
            "TARGET_INDEX" => partial.target_index = Some(value),
            _ => unreachable!("split_source_key only returns known keys"),
        }
    }

    let mut groups: Vec<(String, PartialSource)> = groups.into_iter().collect();
    groups.sort_by(|a, b| a.0.cmp(&b.0));

    groups
        .into_iter()
        .filter_map(|(name, partial)| partial.build(&name))
        .collect()
}

/// Split `<NAME>_<KEY>` on the longest known key suffix. Source names may
/// themselves contain underscores, so the key is matched from the tail.
fn split_source_key(remainder: &str) -> Option<(&str, &'static str)> {
    for &key in SOURCE_KEYS {
        if let Some(name) = remainder
            .strip_suffix(key)
            .and_then(|prefix| prefix.strip_suffix('_'))
        {
            if !name.is_empty() {
                return Some((name, key));
            }
        }
    }
    None
}

/// Directory for the copier's per-window dump diagnostic, when enabled in
/// the environment.
#[must_use]
pub fn debug_dump_dir() -> Option<PathBuf> {
    env::var(DEBUG_DIR_VAR)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Iterator<Item = (String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn discovers_a_complete_group() {
        let sources = copy_sources_from_vars(vars(&[
            ("RELADE_SOURCE_APP_URL", "http://elastic:9200"),
            ("RELADE_SOURCE_APP_USERNAME", "reader"),
            ("RELADE_SOURCE_APP_PASSWORD", "secret"),
            ("RELADE_SOURCE_APP_INDEX", "app-logs-*"),
            ("RELADE_SOURCE_APP_TIMESTAMP_FIELD", "servertime"),
            ("HOME", "/root"),
        ]));

        assert_eq!(sources.len(), 1);
        let source = &sources[0];
        assert_eq!(source.name, "APP");
        assert_eq!(source.server_url, "http://elastic:9200");
        assert_eq!(source.index_pattern, "app-logs-*");
        assert_eq!(source.timestamp_field, "servertime");
        assert!(source.filter.is_none());
        assert!(source.target_index.is_none());
    }

    #[test]
    fn group_names_may_contain_underscores() {
        let sources = copy_sources_from_vars(vars(&[
            ("RELADE_SOURCE_APP_WEST_URL", "http://elastic:9200"),
            ("RELADE_SOURCE_APP_WEST_USERNAME", "reader"),
            ("RELADE_SOURCE_APP_WEST_PASSWORD", "secret"),
            ("RELADE_SOURCE_APP_WEST_INDEX", "app-logs-*"),
            ("RELADE_SOURCE_APP_WEST_TIMESTAMP_FIELD", "servertime"),
        ]));

        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name, "APP_WEST");
    }

    #[test]
    fn incomplete_group_is_skipped_but_others_proceed() {
        let sources = copy_sources_from_vars(vars(&[
            ("RELADE_SOURCE_BAD_URL", "http://elastic:9200"),
            ("RELADE_SOURCE_GOOD_URL", "http://elastic:9200"),
            ("RELADE_SOURCE_GOOD_USERNAME", "reader"),
            ("RELADE_SOURCE_GOOD_PASSWORD", "secret"),
            ("RELADE_SOURCE_GOOD_INDEX", "app-logs-*"),
            ("RELADE_SOURCE_GOOD_TIMESTAMP_FIELD", "servertime"),
        ]));

        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name, "GOOD");
    }

    #[test]
    fn groups_come_back_in_name_order() {
        let mut pairs = Vec::new();
        for name in ["ZETA", "ALPHA"] {
            pairs.extend([
                (format!("RELADE_SOURCE_{name}_URL"), "u".to_string()),
                (format!("RELADE_SOURCE_{name}_USERNAME"), "u".to_string()),
                (format!("RELADE_SOURCE_{name}_PASSWORD"), "p".to_string()),
                (format!("RELADE_SOURCE_{name}_INDEX"), "i".to_string()),
                (
                    format!("RELADE_SOURCE_{name}_TIMESTAMP_FIELD"),
                    "t".to_string(),
                ),
            ]);
        }
        let sources = copy_sources_from_vars(pairs.into_iter());
        let names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["ALPHA", "ZETA"]);
    }

    #[test]
    fn filter_and_target_index_are_optional_extras() {
        let sources = copy_sources_from_vars(vars(&[
            ("RELADE_SOURCE_APP_URL", "http://elastic:9200"),
            ("RELADE_SOURCE_APP_USERNAME", "reader"),
            ("RELADE_SOURCE_APP_PASSWORD", "secret"),
            ("RELADE_SOURCE_APP_INDEX", "app-logs-*"),
            ("RELADE_SOURCE_APP_TIMESTAMP_FIELD", "servertime"),
            ("RELADE_SOURCE_APP_FILTER_FIELD", "host"),
            ("RELADE_SOURCE_APP_FILTER_VALUE", "web-1"),
            ("RELADE_SOURCE_APP_TARGET_INDEX", "replay-yyyy.mm"),
        ]));

        let source = &sources[0];
        assert_eq!(
            source.filter,
            Some(("host".to_string(), "web-1".to_string()))
        );
        assert_eq!(source.target_index.as_deref(), Some("replay-yyyy.mm"));
    }

    #[test]
    fn half_a_filter_is_dropped() {
        let sources = copy_sources_from_vars(vars(&[
            ("RELADE_SOURCE_APP_URL", "http://elastic:9200"),
            ("RELADE_SOURCE_APP_USERNAME", "reader"),
            ("RELADE_SOURCE_APP_PASSWORD", "secret"),
            ("RELADE_SOURCE_APP_INDEX", "app-logs-*"),
            ("RELADE_SOURCE_APP_TIMESTAMP_FIELD", "servertime"),
            ("RELADE_SOURCE_APP_FILTER_FIELD", "host"),
        ]));
        assert!(sources[0].filter.is_none());
    }
}
