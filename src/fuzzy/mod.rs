//! Label matching with confidence scores.
//!
//! [`FuzzyMatcher::match_text`] scores one target/candidate pair;
//! [`FuzzyMatcher::multi_attribute_match`] walks an element's attributes in
//! priority order. Neither ever fails: a broken or slow scorer degrades the
//! single call to exact/substring comparison.

pub mod scoring;

pub use scoring::{ScorerError, SimilarityScorer, WeightedRatioScorer};

use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crate::cache::ElementRecord;
use crate::config::DetectionConfig;
use crate::utils::normalize_text;

const ENABLE_LOGS: bool = true;

use crate::log_debug;

/// Share of entries dropped when the result cache is full.
const EVICT_FRACTION: f64 = 0.2;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Fuzzy,
    Exact,
    Substring,
    None,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MatchOutcome {
    pub matched: bool,
    pub score: u8,
    pub method: MatchMethod,
    /// The scorer failed or overran its budget and exact/substring
    /// comparison was used for this call.
    pub degraded: bool,
}

impl MatchOutcome {
    fn none() -> Self {
        Self {
            matched: false,
            score: 0,
            method: MatchMethod::None,
            degraded: false,
        }
    }

    pub fn as_tuple(&self) -> (bool, u8) {
        (self.matched, self.score)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttributeScore {
    pub attribute: String,
    pub value: String,
    pub score: u8,
    pub matched: bool,
}

/// Result of matching one element across several attributes.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttributeMatch {
    pub found: bool,
    /// Empty when nothing matched.
    pub attribute: String,
    pub score: u8,
    pub method: MatchMethod,
    pub scores: Vec<AttributeScore>,
    pub degraded_calls: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FuzzyStats {
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub degraded_calls: u64,
    pub evictions: u64,
}

type CacheKey = (String, String, u8);

struct MatchCache {
    entries: HashMap<CacheKey, (MatchOutcome, Instant)>,
    last_cleanup: Instant,
    stats: FuzzyStats,
}

pub struct FuzzyMatcher {
    enabled: bool,
    timeout: Duration,
    scorer: Arc<dyn SimilarityScorer>,
    cache: Mutex<MatchCache>,
    cache_ttl: Duration,
    max_entries: usize,
    cleanup_interval: Duration,
}

impl FuzzyMatcher {
    pub fn new(config: &DetectionConfig) -> Self {
        Self::with_scorer(config, Arc::new(WeightedRatioScorer))
    }

    pub fn with_scorer(config: &DetectionConfig, scorer: Arc<dyn SimilarityScorer>) -> Self {
        Self {
            enabled: config.fuzzy_matching_enabled,
            timeout: config.fuzzy_timeout(),
            scorer,
            cache: Mutex::new(MatchCache {
                entries: HashMap::new(),
                last_cleanup: Instant::now(),
                stats: FuzzyStats::default(),
            }),
            cache_ttl: Duration::from_secs(config.fuzzy_cache_ttl_secs),
            max_entries: config.fuzzy_cache_max_entries.max(1),
            cleanup_interval: config.cleanup_interval(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Case/whitespace-insensitive exact or substring comparison.
    ///
    /// Exact scores 100; a substring scores the length ratio of the shorter
    /// to the longer string and counts as matched regardless of threshold.
    pub fn exact_or_substring(target: &str, candidate: &str) -> MatchOutcome {
        let t = normalize_text(target);
        let c = normalize_text(candidate);
        if t == c {
            return MatchOutcome {
                matched: true,
                score: 100,
                method: MatchMethod::Exact,
                degraded: false,
            };
        }
        if t.is_empty() || c.is_empty() {
            return MatchOutcome::none();
        }
        if c.contains(&t) || t.contains(&c) {
            let (t_len, c_len) = (t.chars().count(), c.chars().count());
            let (short, long) = (t_len.min(c_len), t_len.max(c_len));
            let score = (100.0 * short as f64 / long as f64).round() as u8;
            return MatchOutcome {
                matched: true,
                score,
                method: MatchMethod::Substring,
                degraded: false,
            };
        }
        MatchOutcome::none()
    }

    /// Scores `candidate` against `target`; matched when score ≥ threshold.
    pub fn match_text(&self, target: &str, candidate: &str, threshold: u8) -> MatchOutcome {
        let threshold = threshold.min(100);
        if !self.enabled {
            return Self::exact_or_substring(target, candidate);
        }

        let t = normalize_text(target);
        let c = normalize_text(candidate);
        if t == c {
            return MatchOutcome {
                matched: true,
                score: 100,
                method: MatchMethod::Exact,
                degraded: false,
            };
        }

        let key: CacheKey = (t, c, threshold);
        if let Some(hit) = self.cached(&key) {
            return hit;
        }

        let started = Instant::now();
        let scored = self.scorer.score(&key.0, &key.1);
        let elapsed = started.elapsed();

        let outcome = match scored {
            Ok(_) if elapsed > self.timeout => {
                log_debug!(
                    "scorer {} took {:?} (budget {:?}); using exact/substring",
                    self.scorer.name(),
                    elapsed,
                    self.timeout
                );
                self.note_degraded();
                return Self::degraded(target, candidate);
            }
            Ok(raw) => {
                let score = raw.clamp(0.0, 100.0).round() as u8;
                MatchOutcome {
                    matched: score >= threshold,
                    score,
                    method: if score > 0 { MatchMethod::Fuzzy } else { MatchMethod::None },
                    degraded: false,
                }
            }
            Err(err) => {
                log_debug!("scorer {} failed ({}); using exact/substring", self.scorer.name(), err);
                self.note_degraded();
                return Self::degraded(target, candidate);
            }
        };

        self.store(key, outcome);
        outcome
    }

    fn degraded(target: &str, candidate: &str) -> MatchOutcome {
        MatchOutcome {
            degraded: true,
            ..Self::exact_or_substring(target, candidate)
        }
    }

    /// Tries `attributes` in order and returns the first one that matches.
    /// A second exact/substring pass runs before giving up.
    pub fn multi_attribute_match(
        &self,
        element: &ElementRecord,
        target: &str,
        attributes: &[String],
        threshold: u8,
    ) -> AttributeMatch {
        let mut result = AttributeMatch {
            found: false,
            attribute: String::new(),
            score: 0,
            method: MatchMethod::None,
            scores: Vec::new(),
            degraded_calls: 0,
        };
        if normalize_text(target).is_empty() {
            return result;
        }

        for attribute in attributes {
            let Some(value) = element.attribute(attribute) else {
                continue;
            };
            let outcome = self.match_text(target, value, threshold);
            if outcome.degraded {
                result.degraded_calls += 1;
            }
            result.scores.push(AttributeScore {
                attribute: attribute.clone(),
                value: value.to_string(),
                score: outcome.score,
                matched: outcome.matched,
            });
            result.score = result.score.max(outcome.score);
            if outcome.matched {
                result.found = true;
                result.attribute = attribute.clone();
                result.score = outcome.score;
                result.method = outcome.method;
                return result;
            }
        }

        for attribute in attributes {
            let Some(value) = element.attribute(attribute) else {
                continue;
            };
            let outcome = Self::exact_or_substring(target, value);
            if outcome.matched {
                result.found = true;
                result.attribute = attribute.clone();
                result.score = outcome.score;
                result.method = outcome.method;
                return result;
            }
        }

        result
    }

    fn cached(&self, key: &CacheKey) -> Option<MatchOutcome> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        self.maybe_cleanup(&mut cache);
        match cache.entries.get(key) {
            Some((outcome, at)) if at.elapsed() < self.cache_ttl => {
                let outcome = *outcome;
                cache.stats.cache_hits += 1;
                Some(outcome)
            }
            Some(_) => {
                cache.entries.remove(key);
                cache.stats.cache_misses += 1;
                None
            }
            None => {
                cache.stats.cache_misses += 1;
                None
            }
        }
    }

    fn store(&self, key: CacheKey, outcome: MatchOutcome) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.entries.len() >= self.max_entries {
            let drop_count = ((self.max_entries as f64 * EVICT_FRACTION).ceil() as usize).max(1);
            let mut by_age: Vec<(CacheKey, Instant)> = cache
                .entries
                .iter()
                .map(|(k, (_, at))| (k.clone(), *at))
                .collect();
            by_age.sort_by_key(|(_, at)| *at);
            for (k, _) in by_age.into_iter().take(drop_count) {
                cache.entries.remove(&k);
            }
            cache.stats.evictions += drop_count as u64;
        }
        cache.entries.insert(key, (outcome, Instant::now()));
    }

    fn maybe_cleanup(&self, cache: &mut MatchCache) {
        if cache.last_cleanup.elapsed() < self.cleanup_interval {
            return;
        }
        let ttl = self.cache_ttl;
        cache.entries.retain(|_, (_, at)| at.elapsed() < ttl);
        cache.last_cleanup = Instant::now();
    }

    fn note_degraded(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.stats.degraded_calls += 1;
    }

    /// Drops expired results now instead of waiting for the next lookup.
    pub fn cleanup_expired(&self) -> usize {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let before = cache.entries.len();
        let ttl = self.cache_ttl;
        cache.entries.retain(|_, (_, at)| at.elapsed() < ttl);
        cache.last_cleanup = Instant::now();
        before - cache.entries.len()
    }

    pub fn stats(&self) -> FuzzyStats {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        FuzzyStats {
            cache_entries: cache.entries.len(),
            ..cache.stats.clone()
        }
    }
}
