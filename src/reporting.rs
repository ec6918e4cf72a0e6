//! Health scoring and the operator-facing diagnostic report.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::background::TaskStatus;
use crate::cache::CacheStats;
use crate::config::DetectionConfig;
use crate::fuzzy::FuzzyStats;
use crate::monitor::{Alert, AlertSeverity, MonitorSnapshot, StageSummary, SystemMetrics, Trend};
use crate::recovery::DegradedModeState;

const ENABLE_LOGS: bool = true;

use crate::log_info;

const MIN_LOOKUPS_FOR_HIT_RATE: u64 = 10;
const LOW_HIT_RATE: f64 = 50.0;
const MAX_ALERT_PENALTY: f64 = 15.0;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl HealthStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            HealthStatus::Excellent
        } else if score >= 75.0 {
            HealthStatus::Good
        } else if score >= 50.0 {
            HealthStatus::Fair
        } else {
            HealthStatus::Poor
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthScore {
    pub score: f64,
    pub status: HealthStatus,
    /// Penalty per factor, in points.
    pub factors: BTreeMap<String, f64>,
}

/// Everything a report is built from, collected by the engine.
pub struct ReportInputs<'a> {
    pub config: &'a DetectionConfig,
    pub provider_trusted: bool,
    pub recovery: DegradedModeState,
    pub monitor: MonitorSnapshot,
    pub cache: CacheStats,
    pub fuzzy: FuzzyStats,
    pub background_tasks: Vec<TaskStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub enabled: bool,
    pub degraded: bool,
    pub degraded_reason: Option<String>,
    pub error_count: u32,
    pub recovery_attempts: u32,
    pub max_recovery_attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendSummary {
    pub success: Trend,
    pub latency: Trend,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub health: HealthScore,
    pub success_rate: Option<f64>,
    pub average_latency_ms: Option<f64>,
    pub trends: TrendSummary,
    pub timeout_count: u64,
    pub total_samples: u64,
    pub stages: BTreeMap<String, StageSummary>,
    pub alerts: Vec<Alert>,
    pub system: SystemMetrics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub elements: CacheStats,
    pub fuzzy: FuzzyStats,
    pub background_tasks: Vec<TaskStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub timestamp: DateTime<Utc>,
    pub system_status: SystemStatus,
    pub configuration_snapshot: DetectionConfig,
    pub performance_metrics: PerformanceMetrics,
    pub cache_status: CacheStatus,
    pub recommendations: Vec<String>,
}

impl DiagnosticReport {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize diagnostic report")
    }

    pub fn export(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        log_info!("diagnostic report written to {}", path.display());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportingSystem;

impl ReportingSystem {
    pub fn health_score(&self, inputs: &ReportInputs<'_>) -> HealthScore {
        let mut factors = BTreeMap::new();
        let monitor = &inputs.monitor;

        if inputs.recovery.enabled {
            factors.insert("degradedMode".to_string(), 50.0);
        }
        if let Some(rate) = monitor.success_rate {
            let penalty = (100.0 - rate).max(0.0) * 0.4;
            if penalty > 0.0 {
                factors.insert("successRate".to_string(), penalty);
            }
        }
        if let Some(latency) = monitor.average_latency_ms {
            let penalty = if latency > 5000.0 {
                25.0
            } else if latency > 2000.0 {
                15.0
            } else if latency > 1000.0 {
                5.0
            } else {
                0.0
            };
            if penalty > 0.0 {
                factors.insert("latency".to_string(), penalty);
            }
        }
        if monitor.total_samples > 0 && monitor.timeout_count > 0 {
            let ratio = monitor.timeout_count as f64 / monitor.total_samples as f64;
            factors.insert("timeouts".to_string(), ratio.min(1.0) * 20.0);
        }
        let lookups = inputs.cache.hits + inputs.cache.misses;
        if lookups >= MIN_LOOKUPS_FOR_HIT_RATE && inputs.cache.hit_rate < LOW_HIT_RATE {
            factors.insert("cacheHitRate".to_string(), 10.0);
        }
        let degrading = [monitor.success_trend, monitor.latency_trend]
            .iter()
            .filter(|trend| **trend == Trend::Degrading)
            .count();
        if degrading > 0 {
            factors.insert("trends".to_string(), 5.0 * degrading as f64);
        }
        let critical = monitor
            .recent_alerts
            .iter()
            .filter(|alert| alert.severity == AlertSeverity::Critical)
            .count();
        if critical > 0 {
            factors.insert(
                "criticalAlerts".to_string(),
                (5.0 * critical as f64).min(MAX_ALERT_PENALTY),
            );
        }

        let score = (100.0 - factors.values().sum::<f64>()).clamp(0.0, 100.0);
        HealthScore {
            score,
            status: HealthStatus::from_score(score),
            factors,
        }
    }

    pub fn recommendations(&self, inputs: &ReportInputs<'_>) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |text: String| {
            if !out.contains(&text) {
                out.push(text);
            }
        };
        let recovery = &inputs.recovery;
        let monitor = &inputs.monitor;

        if recovery.enabled {
            if recovery.recovery_attempts >= recovery.policy.max_recovery_attempts {
                push(
                    "Recovery attempts exhausted; grant permission and reset degraded mode"
                        .to_string(),
                );
            } else {
                push(format!(
                    "Accessibility is degraded ({}); recovery will be retried automatically",
                    recovery.reason.as_deref().unwrap_or("unknown reason")
                ));
            }
        }
        if !inputs.provider_trusted {
            push(
                "Process is not trusted for accessibility; grant permission in system settings"
                    .to_string(),
            );
        }
        if let Some(rate) = monitor.success_rate {
            if rate < 70.0 {
                push(format!(
                    "Success rate is {rate:.0}%; lower fuzzyConfidenceThreshold \
                     or add searchable attributes"
                ));
            }
        }
        if let Some(latency) = monitor.average_latency_ms {
            if latency > inputs.config.fast_path_timeout_ms as f64 {
                push(format!(
                    "Average latency {latency:.0}ms exceeds the fast-path budget; \
                     reduce maxTraversalDepth or enable preloading"
                ));
            }
        }
        let lookups = inputs.cache.hits + inputs.cache.misses;
        if lookups >= MIN_LOOKUPS_FOR_HIT_RATE && inputs.cache.hit_rate < LOW_HIT_RATE {
            push(format!(
                "Cache hit rate is {:.0}%; consider raising cacheTtlSeconds",
                inputs.cache.hit_rate
            ));
        }
        if inputs.cache.evictions > 0 && inputs.cache.entries >= inputs.cache.max_entries {
            push("Element cache is at capacity; consider raising maxCacheEntries".to_string());
        }
        if !inputs.config.fuzzy_matching_enabled {
            push(
                "Fuzzy matching is disabled; only exact and substring labels will match"
                    .to_string(),
            );
        }
        if inputs.fuzzy.degraded_calls > 0 {
            push(format!(
                "{} fuzzy comparisons exceeded their budget; raise fuzzyMatchingTimeoutMs",
                inputs.fuzzy.degraded_calls
            ));
        }
        for alert in &monitor.recent_alerts {
            push(alert.recommendation.clone());
        }

        if out.is_empty() {
            out.push("System operating normally".to_string());
        }
        out
    }

    pub fn generate(&self, inputs: &ReportInputs<'_>) -> DiagnosticReport {
        let health = self.health_score(inputs);
        let monitor = &inputs.monitor;
        DiagnosticReport {
            timestamp: Utc::now(),
            system_status: SystemStatus {
                enabled: inputs.provider_trusted,
                degraded: inputs.recovery.enabled,
                degraded_reason: inputs.recovery.reason.clone(),
                error_count: inputs.recovery.error_count,
                recovery_attempts: inputs.recovery.recovery_attempts,
                max_recovery_attempts: inputs.recovery.policy.max_recovery_attempts,
            },
            configuration_snapshot: inputs.config.clone(),
            performance_metrics: PerformanceMetrics {
                health,
                success_rate: monitor.success_rate,
                average_latency_ms: monitor.average_latency_ms,
                trends: TrendSummary {
                    success: monitor.success_trend,
                    latency: monitor.latency_trend,
                },
                timeout_count: monitor.timeout_count,
                total_samples: monitor.total_samples,
                stages: monitor.stages.clone(),
                alerts: monitor.recent_alerts.clone(),
                system: monitor.system.clone(),
            },
            cache_status: CacheStatus {
                elements: inputs.cache.clone(),
                fuzzy: inputs.fuzzy.clone(),
                background_tasks: inputs.background_tasks.clone(),
            },
            recommendations: self.recommendations(inputs),
        }
    }
}
