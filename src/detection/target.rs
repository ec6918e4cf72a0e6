//! Cleans a requested label down to the text expected on the element:
//! "click the Send button" -> "send".

use regex::Regex;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{LazyLock, Mutex},
    time::{Duration, Instant},
};

use crate::config::DetectionConfig;
use crate::utils::normalize_text;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

// Double quotes only; apostrophes show up inside real labels.
static QUOTED_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"["“](.+?)["”]"#).ok());

static ACTION_PREFIX_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:please\s+)?(?:click|press|tap|select|choose|hit|push|activate)",
        r"\s+(?:on\s+)?(?:the\s+)?(.+)$",
    ))
    .ok()
});

static ROLE_SUFFIX_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:the\s+|a\s+|an\s+)?(.+?)\s+",
        r"(?:button|link|menu item|menu|tab|checkbox|check box|icon|option|field|toggle)$",
    ))
    .ok()
});

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "please", "on", "click", "press", "tap", "button", "link", "icon",
];

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Pattern,
    StopWords,
    Passthrough,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    pub target: String,
    pub method: ExtractionMethod,
    /// Pattern rules were unavailable and stop-word stripping was used.
    pub fallback: bool,
}

fn capture(re: &LazyLock<Option<Regex>>, text: &str) -> Result<Option<String>, ()> {
    let re = re.as_ref().ok_or(())?;
    Ok(re
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty()))
}

fn apply_patterns(text: &str) -> Result<Option<String>, ()> {
    if let Some(quoted) = capture(&QUOTED_RE, text)? {
        return Ok(Some(normalize_text(&quoted)));
    }

    let normalized = normalize_text(text);
    let mut current = normalized.clone();
    if let Some(rest) = capture(&ACTION_PREFIX_RE, &current)? {
        current = rest;
    }
    if let Some(rest) = capture(&ROLE_SUFFIX_RE, &current)? {
        current = rest;
    }
    Ok((current != normalized).then_some(current))
}

fn strip_stop_words(normalized: &str) -> String {
    normalized
        .split(' ')
        .filter(|word| !STOP_WORDS.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stateless extraction. Never fails: the worst case is the normalised
/// input.
pub fn extract(text: &str) -> Extraction {
    let normalized = normalize_text(text);
    if normalized.is_empty() {
        return Extraction {
            target: normalized,
            method: ExtractionMethod::Passthrough,
            fallback: false,
        };
    }

    let fallback = match apply_patterns(text) {
        Ok(Some(target)) => {
            return Extraction {
                target,
                method: ExtractionMethod::Pattern,
                fallback: false,
            }
        }
        Ok(None) => false,
        Err(()) => {
            log_warn!("target patterns unavailable, using stop-word stripping");
            true
        }
    };

    let stripped = strip_stop_words(&normalized);
    if !stripped.is_empty() && stripped != normalized {
        return Extraction {
            target: stripped,
            method: ExtractionMethod::StopWords,
            fallback,
        };
    }
    Extraction {
        target: normalized,
        method: ExtractionMethod::Passthrough,
        fallback,
    }
}

struct ExtractionCache {
    entries: HashMap<String, (Extraction, Instant)>,
    last_cleanup: Instant,
}

/// [`extract`] with a TTL-bounded result cache.
pub struct TargetExtractor {
    cache: Mutex<ExtractionCache>,
    ttl: Duration,
    max_entries: usize,
    cleanup_interval: Duration,
}

impl TargetExtractor {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            cache: Mutex::new(ExtractionCache {
                entries: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
            ttl: Duration::from_secs(config.fuzzy_cache_ttl_secs),
            max_entries: config.fuzzy_cache_max_entries.max(1),
            cleanup_interval: config.cleanup_interval(),
        }
    }

    pub fn extract(&self, text: &str) -> Extraction {
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((hit, at)) = cache.entries.get(text) {
                if at.elapsed() < self.ttl {
                    return hit.clone();
                }
            }
        }

        let extraction = extract(text);

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.last_cleanup.elapsed() >= self.cleanup_interval {
            let ttl = self.ttl;
            cache.entries.retain(|_, (_, at)| at.elapsed() < ttl);
            cache.last_cleanup = Instant::now();
        }
        if cache.entries.len() >= self.max_entries {
            if let Some(oldest) = cache
                .entries
                .iter()
                .min_by_key(|(_, (_, at))| *at)
                .map(|(k, _)| k.clone())
            {
                cache.entries.remove(&oldest);
            }
        }
        cache
            .entries
            .insert(text.to_string(), (extraction.clone(), Instant::now()));
        log_debug!("extracted target {:?} from {:?}", extraction.target, text);
        extraction
    }

    pub fn cleanup_expired(&self) -> usize {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let before = cache.entries.len();
        let ttl = self.ttl;
        cache.entries.retain(|_, (_, at)| at.elapsed() < ttl);
        cache.last_cleanup = Instant::now();
        before - cache.entries.len()
    }

    pub fn len(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_suffix_and_action_prefix() {
        assert_eq!(extract("the Send button").target, "send");
        assert_eq!(extract("click on the Save Draft button").target, "save draft");
        assert_eq!(extract("press Compose").target, "compose");
        assert_eq!(extract("the Send button").method, ExtractionMethod::Pattern);
    }

    #[test]
    fn quoted_text_wins() {
        assert_eq!(extract(r#"click the "Sign In" link"#).target, "sign in");
        assert_eq!(extract("press “Reply All”").target, "reply all");
    }

    #[test]
    fn apostrophes_are_part_of_the_label() {
        let out = extract("Rock 'n' Roll");
        assert_eq!(out.target, "rock 'n' roll");
        assert_eq!(out.method, ExtractionMethod::Passthrough);
        assert_eq!(extract("click the Rock 'n' Roll button").target, "rock 'n' roll");
        assert_eq!(extract("Don't Save").target, "don't save");
    }

    #[test]
    fn plain_labels_pass_through() {
        let out = extract("  Send ");
        assert_eq!(out.target, "send");
        assert_eq!(out.method, ExtractionMethod::Passthrough);
        assert_eq!(extract("Open").target, "open");
    }

    #[test]
    fn stop_words_are_stripped_when_no_rule_applies() {
        let out = extract("please Archive");
        assert_eq!(out.target, "archive");
        assert_eq!(out.method, ExtractionMethod::StopWords);
    }

    #[test]
    fn never_empties_a_label() {
        assert_eq!(extract("button").target, "button");
        assert_eq!(extract("please").target, "please");
        assert_eq!(extract("").target, "");
    }

    #[test]
    fn cache_hits_and_cleanup() {
        let config = DetectionConfig {
            fuzzy_cache_ttl_secs: 0,
            ..DetectionConfig::default()
        };
        let extractor = TargetExtractor::new(&config);
        assert_eq!(extractor.extract("the Send button").target, "send");
        assert_eq!(extractor.len(), 1);
        assert_eq!(extractor.cleanup_expired(), 1);
        assert!(extractor.is_empty());

        let cached = TargetExtractor::new(&DetectionConfig::default());
        cached.extract("the Send button");
        cached.extract("the Send button");
        assert_eq!(cached.len(), 1);
    }
}
