use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use super::target::ExtractionMethod;
use super::traversal::TraversalStats;
use crate::cache::ElementRecord;
use crate::error::FailureKind;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchStage {
    /// Every clickable role, every configured attribute, fuzzy scoring.
    Enhanced,
    /// Only the platform's primary button role.
    RoleRestricted,
    /// Exact role, exact normalised label.
    Strict,
}

impl SearchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStage::Enhanced => "enhanced",
            SearchStage::RoleRestricted => "role_restricted",
            SearchStage::Strict => "strict",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchedElement {
    pub record: ElementRecord,
    /// Top-left plus half the size, truncated to whole pixels.
    pub center_point: (i64, i64),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FuzzyCandidate {
    pub stage: SearchStage,
    pub role: String,
    pub title: String,
    pub attribute: String,
    pub score: u8,
    pub matched: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticEvent {
    pub kind: FailureKind,
    pub stage: Option<SearchStage>,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub stage: SearchStage,
    pub roles: Vec<String>,
    pub attributes: Vec<String>,
    pub candidates: usize,
    /// Dropped by the enabled/geometry filter.
    pub filtered_out: usize,
    pub scored: usize,
    /// The attribute-check budget ran out before every candidate was scored.
    pub budget_exhausted: bool,
    pub found: bool,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchDiagnostics {
    pub requested_role: String,
    pub requested_label: String,
    /// Label after target extraction.
    pub target: String,
    pub target_method: Option<ExtractionMethod>,
    pub app: Option<String>,
    pub cache_hit: Option<bool>,
    /// A cached entry produced no match and was replaced by a fresh walk.
    pub refreshed: bool,
    pub degraded: bool,
    pub degraded_reason: Option<String>,
    pub recovery_attempted: bool,
    pub events: Vec<DiagnosticEvent>,
    pub stages: Vec<StageReport>,
    pub traversal: Option<TraversalStats>,
    pub timings_ms: BTreeMap<String, f64>,
    pub timed_out: bool,
}

impl MatchDiagnostics {
    pub fn push_event(
        &mut self,
        kind: FailureKind,
        stage: Option<SearchStage>,
        detail: impl Into<String>,
    ) {
        self.events.push(DiagnosticEvent {
            kind,
            stage,
            detail: detail.into(),
        });
    }

    pub fn has_event(&self, kind: FailureKind) -> bool {
        self.events.iter().any(|event| event.kind == kind)
    }

    pub fn add_timing(&mut self, name: &str, duration: Duration) {
        *self.timings_ms.entry(name.to_string()).or_insert(0.0) +=
            duration.as_secs_f64() * 1000.0;
    }

    pub fn timing(&self, name: &str) -> Option<Duration> {
        self.timings_ms
            .get(name)
            .map(|ms| Duration::from_secs_f64(ms / 1000.0))
    }
}

/// Outcome of one detection call. A miss is `found == false` with the
/// diagnostic trail filled in, never an error.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub found: bool,
    pub element: Option<MatchedElement>,
    pub confidence: u8,
    pub matched_attribute: String,
    pub elapsed_ms: f64,
    pub stage: Option<SearchStage>,
    pub roles_checked: Vec<String>,
    pub attributes_checked: Vec<String>,
    pub fuzzy_candidates: Vec<FuzzyCandidate>,
    /// A stage after the enhanced search produced the answer.
    pub fallback_used: bool,
    pub diagnostics: MatchDiagnostics,
}

impl MatchResult {
    pub fn not_found(diagnostics: MatchDiagnostics) -> Self {
        Self {
            diagnostics,
            ..Self::default()
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.elapsed_ms.max(0.0) / 1000.0)
    }

    pub fn center_point(&self) -> Option<(i64, i64)> {
        self.element.as_ref().map(|element| element.center_point)
    }

    pub fn note_role(&mut self, role: &str) {
        if !self.roles_checked.iter().any(|r| r == role) {
            self.roles_checked.push(role.to_string());
        }
    }

    pub fn note_attribute(&mut self, attribute: &str) {
        if !self.attributes_checked.iter().any(|a| a == attribute) {
            self.attributes_checked.push(attribute.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_keeps_diagnostics() {
        let mut diagnostics = MatchDiagnostics::default();
        diagnostics.push_event(FailureKind::ElementNotFound, Some(SearchStage::Strict), "no label");
        let result = MatchResult::not_found(diagnostics);
        assert!(!result.found);
        assert_eq!(result.confidence, 0);
        assert!(result.matched_attribute.is_empty());
        assert!(result.diagnostics.has_event(FailureKind::ElementNotFound));
        assert_eq!(result.center_point(), None);
    }

    #[test]
    fn timings_accumulate_per_stage_name() {
        let mut diagnostics = MatchDiagnostics::default();
        diagnostics.add_timing("matching", Duration::from_millis(3));
        diagnostics.add_timing("matching", Duration::from_millis(2));
        let total = diagnostics.timing("matching").unwrap();
        assert!(total >= Duration::from_micros(4900) && total <= Duration::from_micros(5100));
    }

    #[test]
    fn checked_lists_are_deduplicated() {
        let mut result = MatchResult::default();
        result.note_role("button");
        result.note_role("button");
        result.note_attribute("title");
        assert_eq!(result.roles_checked, vec!["button"]);
        assert_eq!(result.attributes_checked, vec!["title"]);
    }
}
