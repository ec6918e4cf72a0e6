//! Detection configuration: defaults, per-field validation and a JSON-backed store.
//!
//! Every option has a documented default. Invalid input never aborts loading:
//! the offending field falls back to its default and a warning is logged and
//! returned to the caller.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::BTreeSet,
    fs,
    path::PathBuf,
    sync::{Arc, RwLock},
    time::Duration,
};

use crate::roles::{self, Role};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectionConfig {
    pub fuzzy_matching_enabled: bool,
    pub fuzzy_confidence_threshold: u8,
    pub fuzzy_matching_timeout_ms: u64,
    pub clickable_roles: Vec<String>,
    pub searchable_attributes: Vec<String>,
    pub fast_path_timeout_ms: u64,
    pub attribute_check_timeout_ms: u64,
    pub cache_ttl_seconds: u64,
    pub max_cache_entries: usize,
    pub performance_history_size: usize,

    pub max_traversal_depth: usize,
    pub max_elements_per_app: usize,
    pub background_workers: usize,
    pub race_timeout_ms: u64,
    pub alert_cooldown_secs: u64,
    pub cleanup_interval_secs: u64,
    pub fuzzy_cache_ttl_secs: u64,
    pub fuzzy_cache_max_entries: usize,
    pub invalidate_cache_on_focus_change: bool,
    pub preload_enabled: bool,
    pub predictive_caching_enabled: bool,

    pub max_recovery_attempts: u32,
    pub permission_check_interval_secs: u64,
    pub recovery_base_delay_ms: u64,
    pub recovery_backoff_multiplier: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            fuzzy_matching_enabled: true,
            fuzzy_confidence_threshold: 85,
            fuzzy_matching_timeout_ms: 200,
            clickable_roles: roles::default_clickable_roles(),
            searchable_attributes: default_searchable_attributes(),
            fast_path_timeout_ms: 2000,
            attribute_check_timeout_ms: 500,
            cache_ttl_seconds: 30,
            max_cache_entries: 10,
            performance_history_size: 100,

            max_traversal_depth: 5,
            max_elements_per_app: 2000,
            background_workers: 2,
            race_timeout_ms: 5000,
            alert_cooldown_secs: 300,
            cleanup_interval_secs: 60,
            fuzzy_cache_ttl_secs: 300,
            fuzzy_cache_max_entries: 1000,
            invalidate_cache_on_focus_change: false,
            preload_enabled: true,
            predictive_caching_enabled: true,

            max_recovery_attempts: 5,
            permission_check_interval_secs: 30,
            recovery_base_delay_ms: 1000,
            recovery_backoff_multiplier: 2.0,
        }
    }
}

fn default_searchable_attributes() -> Vec<String> {
    vec!["title".into(), "description".into(), "value".into()]
}

/// A field that was rejected and replaced by its default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
}

struct Validator<'a> {
    map: &'a Map<String, Value>,
    warnings: Vec<ConfigWarning>,
}

impl<'a> Validator<'a> {
    fn reject(&mut self, field: &str, message: String) {
        log_warn!("config field '{}' invalid ({}); using default", field, message);
        self.warnings.push(ConfigWarning {
            field: field.to_string(),
            message,
        });
    }

    fn bool(&mut self, field: &str, default: bool) -> bool {
        match self.map.get(field) {
            None => default,
            Some(Value::Bool(value)) => *value,
            Some(other) => {
                self.reject(field, format!("expected boolean, got {other}"));
                default
            }
        }
    }

    fn u64_in(&mut self, field: &str, default: u64, min: u64, max: u64) -> u64 {
        match self.map.get(field) {
            None => default,
            Some(value) => match value.as_u64() {
                Some(n) if (min..=max).contains(&n) => n,
                _ => {
                    self.reject(field, format!("expected integer in {min}..={max}, got {value}"));
                    default
                }
            },
        }
    }

    fn f64_in(&mut self, field: &str, default: f64, min: f64, max: f64) -> f64 {
        match self.map.get(field) {
            None => default,
            Some(value) => match value.as_f64() {
                Some(n) if n.is_finite() && n >= min && n <= max => n,
                _ => {
                    self.reject(field, format!("expected number in {min}..={max}, got {value}"));
                    default
                }
            },
        }
    }

    fn string_list(&mut self, field: &str) -> Option<Vec<String>> {
        let value = self.map.get(field)?;
        let Some(items) = value.as_array() else {
            self.reject(field, format!("expected array of strings, got {value}"));
            return None;
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item.as_str() {
                Some(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
                _ => {
                    self.reject(field, format!("non-string or empty entry {item}"));
                    return None;
                }
            }
        }
        if out.is_empty() {
            self.reject(field, "list is empty".into());
            return None;
        }
        Some(out)
    }
}

const KNOWN_FIELDS: &[&str] = &[
    "fuzzyMatchingEnabled",
    "fuzzyConfidenceThreshold",
    "fuzzyMatchingTimeoutMs",
    "clickableRoles",
    "searchableAttributes",
    "fastPathTimeoutMs",
    "attributeCheckTimeoutMs",
    "cacheTtlSeconds",
    "maxCacheEntries",
    "performanceHistorySize",
    "maxTraversalDepth",
    "maxElementsPerApp",
    "backgroundWorkers",
    "raceTimeoutMs",
    "alertCooldownSecs",
    "cleanupIntervalSecs",
    "fuzzyCacheTtlSecs",
    "fuzzyCacheMaxEntries",
    "invalidateCacheOnFocusChange",
    "preloadEnabled",
    "predictiveCachingEnabled",
    "maxRecoveryAttempts",
    "permissionCheckIntervalSecs",
    "recoveryBaseDelayMs",
    "recoveryBackoffMultiplier",
];

impl DetectionConfig {
    /// Builds a config from loosely-typed JSON, substituting defaults for
    /// every invalid field.
    pub fn from_json_value(value: &Value) -> (Self, Vec<ConfigWarning>) {
        let defaults = Self::default();
        let empty = Map::new();
        let map = match value {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                let warning = ConfigWarning {
                    field: "<root>".into(),
                    message: format!("expected object, got {other}"),
                };
                log_warn!("configuration root is not an object; using defaults");
                return (defaults, vec![warning]);
            }
        };

        let mut v = Validator {
            map,
            warnings: Vec::new(),
        };

        for key in map.keys() {
            if !KNOWN_FIELDS.contains(&key.as_str()) {
                log_warn!("ignoring unknown config field '{}'", key);
            }
        }

        let clickable_roles = v
            .string_list("clickableRoles")
            .map(|list| validate_roles(&mut v, list))
            .unwrap_or_else(|| defaults.clickable_roles.clone());

        let searchable_attributes = v
            .string_list("searchableAttributes")
            .map(|list| {
                let mut seen = BTreeSet::new();
                list.into_iter()
                    .filter(|attr| seen.insert(attr.to_lowercase()))
                    .collect()
            })
            .unwrap_or_else(|| defaults.searchable_attributes.clone());

        let config = Self {
            fuzzy_matching_enabled: v.bool("fuzzyMatchingEnabled", defaults.fuzzy_matching_enabled),
            fuzzy_confidence_threshold: v.u64_in(
                "fuzzyConfidenceThreshold",
                defaults.fuzzy_confidence_threshold as u64,
                0,
                100,
            ) as u8,
            fuzzy_matching_timeout_ms: v.u64_in(
                "fuzzyMatchingTimeoutMs",
                defaults.fuzzy_matching_timeout_ms,
                1,
                10_000,
            ),
            clickable_roles,
            searchable_attributes,
            fast_path_timeout_ms: v.u64_in(
                "fastPathTimeoutMs",
                defaults.fast_path_timeout_ms,
                1,
                60_000,
            ),
            attribute_check_timeout_ms: v.u64_in(
                "attributeCheckTimeoutMs",
                defaults.attribute_check_timeout_ms,
                1,
                60_000,
            ),
            cache_ttl_seconds: v.u64_in("cacheTtlSeconds", defaults.cache_ttl_seconds, 1, 86_400),
            max_cache_entries: v.u64_in(
                "maxCacheEntries",
                defaults.max_cache_entries as u64,
                1,
                10_000,
            ) as usize,
            performance_history_size: v.u64_in(
                "performanceHistorySize",
                defaults.performance_history_size as u64,
                1,
                100_000,
            ) as usize,

            max_traversal_depth: v.u64_in(
                "maxTraversalDepth",
                defaults.max_traversal_depth as u64,
                1,
                64,
            ) as usize,
            max_elements_per_app: v.u64_in(
                "maxElementsPerApp",
                defaults.max_elements_per_app as u64,
                1,
                1_000_000,
            ) as usize,
            background_workers: v.u64_in(
                "backgroundWorkers",
                defaults.background_workers as u64,
                1,
                16,
            ) as usize,
            race_timeout_ms: v.u64_in("raceTimeoutMs", defaults.race_timeout_ms, 1, 600_000),
            alert_cooldown_secs: v.u64_in(
                "alertCooldownSecs",
                defaults.alert_cooldown_secs,
                0,
                86_400,
            ),
            cleanup_interval_secs: v.u64_in(
                "cleanupIntervalSecs",
                defaults.cleanup_interval_secs,
                0,
                86_400,
            ),
            fuzzy_cache_ttl_secs: v.u64_in(
                "fuzzyCacheTtlSecs",
                defaults.fuzzy_cache_ttl_secs,
                1,
                86_400,
            ),
            fuzzy_cache_max_entries: v.u64_in(
                "fuzzyCacheMaxEntries",
                defaults.fuzzy_cache_max_entries as u64,
                1,
                1_000_000,
            ) as usize,
            invalidate_cache_on_focus_change: v.bool(
                "invalidateCacheOnFocusChange",
                defaults.invalidate_cache_on_focus_change,
            ),
            preload_enabled: v.bool("preloadEnabled", defaults.preload_enabled),
            predictive_caching_enabled: v.bool(
                "predictiveCachingEnabled",
                defaults.predictive_caching_enabled,
            ),

            max_recovery_attempts: v.u64_in(
                "maxRecoveryAttempts",
                defaults.max_recovery_attempts as u64,
                0,
                1000,
            ) as u32,
            permission_check_interval_secs: v.u64_in(
                "permissionCheckIntervalSecs",
                defaults.permission_check_interval_secs,
                0,
                86_400,
            ),
            recovery_base_delay_ms: v.u64_in(
                "recoveryBaseDelayMs",
                defaults.recovery_base_delay_ms,
                0,
                3_600_000,
            ),
            recovery_backoff_multiplier: v.f64_in(
                "recoveryBackoffMultiplier",
                defaults.recovery_backoff_multiplier,
                1.0,
                10.0,
            ),
        };

        (config, v.warnings)
    }

    /// Parses a JSON document; a syntactically broken document yields the
    /// defaults plus a single warning.
    pub fn from_json_str(json: &str) -> (Self, Vec<ConfigWarning>) {
        match serde_json::from_str::<Value>(json) {
            Ok(value) => Self::from_json_value(&value),
            Err(err) => {
                log_warn!("configuration is not valid JSON ({err}); using defaults");
                (
                    Self::default(),
                    vec![ConfigWarning {
                        field: "<root>".into(),
                        message: format!("invalid JSON: {err}"),
                    }],
                )
            }
        }
    }

    pub fn fuzzy_timeout(&self) -> Duration {
        Duration::from_millis(self.fuzzy_matching_timeout_ms)
    }

    pub fn fast_path_timeout(&self) -> Duration {
        Duration::from_millis(self.fast_path_timeout_ms)
    }

    pub fn attribute_check_timeout(&self) -> Duration {
        Duration::from_millis(self.attribute_check_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn race_timeout(&self) -> Duration {
        Duration::from_millis(self.race_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

fn validate_roles(v: &mut Validator<'_>, list: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for raw in list {
        match Role::parse(&raw) {
            Some(role) => {
                if seen.insert(role) {
                    out.push(role.as_str().to_string());
                }
            }
            None => v.reject("clickableRoles", format!("unknown role '{raw}' skipped")),
        }
    }
    if out.is_empty() {
        v.reject("clickableRoles", "no recognised roles".into());
        return roles::default_clickable_roles();
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredConfig {
    detection: Value,
}

/// JSON file-backed configuration, loaded once and shared.
///
/// Readers get an `Arc` snapshot so a concurrent `update` never changes the
/// options underneath an in-flight detection.
pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<Arc<DetectionConfig>>,
    warnings: RwLock<Vec<ConfigWarning>>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let (config, warnings) = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            Self::parse(&contents)
        } else {
            (DetectionConfig::default(), Vec::new())
        };

        Ok(Self {
            path,
            data: RwLock::new(Arc::new(config)),
            warnings: RwLock::new(warnings),
        })
    }

    fn parse(contents: &str) -> (DetectionConfig, Vec<ConfigWarning>) {
        match serde_json::from_str::<StoredConfig>(contents) {
            Ok(stored) => DetectionConfig::from_json_value(&stored.detection),
            Err(_) => DetectionConfig::from_json_str(contents),
        }
    }

    pub fn config(&self) -> Arc<DetectionConfig> {
        Arc::clone(&self.data.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn warnings(&self) -> Vec<ConfigWarning> {
        self.warnings.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn update(&self, config: DetectionConfig) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(|e| e.into_inner());
        self.persist(&config)?;
        *guard = Arc::new(config);
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read config from {}", self.path.display()))?;
        let (config, warnings) = Self::parse(&contents);
        *self.data.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(config);
        *self.warnings.write().unwrap_or_else(|e| e.into_inner()) = warnings;
        Ok(())
    }

    fn persist(&self, config: &DetectionConfig) -> Result<()> {
        let stored = StoredConfig {
            detection: serde_json::to_value(config)?,
        };
        let serialized = serde_json::to_string_pretty(&stored)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_yields_defaults() {
        let (config, warnings) = DetectionConfig::from_json_value(&json!({}));
        assert_eq!(config, DetectionConfig::default());
        assert!(warnings.is_empty());
    }

    #[test]
    fn documented_defaults() {
        let config = DetectionConfig::default();
        assert!(config.fuzzy_matching_enabled);
        assert_eq!(config.fuzzy_confidence_threshold, 85);
        assert_eq!(config.fuzzy_matching_timeout_ms, 200);
        assert_eq!(config.searchable_attributes, vec!["title", "description", "value"]);
        assert_eq!(config.fast_path_timeout_ms, 2000);
        assert_eq!(config.attribute_check_timeout_ms, 500);
        assert_eq!(config.cache_ttl_seconds, 30);
        assert_eq!(config.max_cache_entries, 10);
        assert_eq!(config.performance_history_size, 100);
        assert_eq!(config.clickable_roles.len(), 11);
    }

    #[test]
    fn invalid_fields_fall_back_individually() {
        let (config, warnings) = DetectionConfig::from_json_value(&json!({
            "fuzzyConfidenceThreshold": 140,
            "cacheTtlSeconds": "soon",
            "fuzzyMatchingEnabled": false,
            "maxCacheEntries": 3,
        }));
        assert_eq!(config.fuzzy_confidence_threshold, 85);
        assert_eq!(config.cache_ttl_seconds, 30);
        assert!(!config.fuzzy_matching_enabled);
        assert_eq!(config.max_cache_entries, 3);
        let fields: Vec<_> = warnings.iter().map(|w| w.field.as_str()).collect();
        assert_eq!(fields, vec!["fuzzyConfidenceThreshold", "cacheTtlSeconds"]);
    }

    #[test]
    fn clickable_roles_are_canonicalised() {
        let (config, warnings) = DetectionConfig::from_json_value(&json!({
            "clickableRoles": ["AXButton", "button", "link", "AXWebArea"],
        }));
        assert_eq!(config.clickable_roles, vec!["button", "link"]);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn all_unknown_roles_restore_default_set() {
        let (config, _) = DetectionConfig::from_json_value(&json!({
            "clickableRoles": ["nonsense"],
        }));
        assert_eq!(config.clickable_roles, roles::default_clickable_roles());
    }

    #[test]
    fn broken_json_yields_defaults() {
        let (config, warnings) = DetectionConfig::from_json_str("{ not json");
        assert_eq!(config, DetectionConfig::default());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn store_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("axlocate.json");

        let store = ConfigStore::new(path.clone()).unwrap();
        assert_eq!(*store.config(), DetectionConfig::default());

        let mut updated = DetectionConfig::default();
        updated.fuzzy_confidence_threshold = 70;
        updated.cache_ttl_seconds = 5;
        store.update(updated.clone()).unwrap();

        let reopened = ConfigStore::new(path).unwrap();
        assert_eq!(*reopened.config(), updated);
        assert!(reopened.warnings().is_empty());
    }

    #[test]
    fn store_accepts_bare_detection_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.json");
        fs::write(&path, r#"{"fuzzyConfidenceThreshold": 60, "maxCacheEntries": -1}"#).unwrap();

        let store = ConfigStore::new(path).unwrap();
        assert_eq!(store.config().fuzzy_confidence_threshold, 60);
        assert_eq!(store.config().max_cache_entries, 10);
        assert_eq!(store.warnings().len(), 1);
    }
}
