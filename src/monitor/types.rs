use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// One timed operation, appended to the monitor's bounded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    pub operation: String,
    pub app: Option<String>,
    pub duration_ms: f64,
    pub timeout_ms: f64,
    pub timed_out: bool,
    pub success: bool,
    pub error: Option<String>,
    /// Named sub-stage latencies (`cache_lookup`, `traversal`, `matching`).
    #[serde(default)]
    pub stages_ms: BTreeMap<String, f64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceSample {
    /// `timed_out` is decided after the fact by comparing `duration` with
    /// `timeout`; nothing is preempted.
    pub fn new(operation: impl Into<String>, duration: Duration, timeout: Duration) -> Self {
        Self {
            operation: operation.into(),
            app: None,
            duration_ms: duration.as_secs_f64() * 1000.0,
            timeout_ms: timeout.as_secs_f64() * 1000.0,
            timed_out: duration > timeout,
            success: false,
            error: None,
            stages_ms: BTreeMap::new(),
            metadata: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn app(mut self, app_key: impl Into<String>) -> Self {
        self.app = Some(app_key.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn stage(mut self, name: impl Into<String>, duration: Duration) -> Self {
        self.stages_ms
            .insert(name.into(), duration.as_secs_f64() * 1000.0);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    InsufficientData,
    Improving,
    Degrading,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::InsufficientData => "insufficient_data",
            Trend::Improving => "improving",
            Trend::Degrading => "degrading",
            Trend::Stable => "stable",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowSuccessRate,
    HighLatency,
    ConsecutiveFailures,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub current_value: f64,
    pub threshold: f64,
    pub recommendation: String,
    pub app: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStats {
    pub count: u64,
    pub successes: u64,
    pub timeouts: u64,
    pub total_ms: f64,
    pub max_ms: f64,
}

impl OperationStats {
    pub fn average_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSummary {
    pub average_ms: Option<f64>,
    pub trend: Trend,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub system: SystemMetrics,
    pub total_samples: u64,
    pub window_samples: usize,
    /// Percentage over the rolling window; `None` before the first sample.
    pub success_rate: Option<f64>,
    pub average_latency_ms: Option<f64>,
    pub success_trend: Trend,
    pub latency_trend: Trend,
    pub timeout_count: u64,
    pub stages: BTreeMap<String, StageSummary>,
    pub operations: BTreeMap<String, OperationStats>,
    pub consecutive_failures: BTreeMap<String, u32>,
    pub recent_samples: Vec<PerformanceSample>,
    pub recent_alerts: Vec<Alert>,
    pub suppressed_alerts: u64,
}

impl Default for MonitorSnapshot {
    fn default() -> Self {
        Self {
            system: SystemMetrics {
                cpu_percent: 0.0,
                memory_mb: 0.0,
            },
            total_samples: 0,
            window_samples: 0,
            success_rate: None,
            average_latency_ms: None,
            success_trend: Trend::InsufficientData,
            latency_trend: Trend::InsufficientData,
            timeout_count: 0,
            stages: BTreeMap::new(),
            operations: BTreeMap::new(),
            consecutive_failures: BTreeMap::new(),
            recent_samples: Vec::new(),
            recent_alerts: Vec::new(),
            suppressed_alerts: 0,
        }
    }
}
