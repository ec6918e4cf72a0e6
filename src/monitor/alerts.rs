use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use super::types::{Alert, AlertKind, AlertSeverity};

const MAX_ALERT_HISTORY: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct AlertThresholds {
    pub success_rate_warning: f64,
    pub success_rate_critical: f64,
    pub latency_warning_ms: f64,
    pub latency_critical_ms: f64,
    pub consecutive_failures: u32,
    /// Rate and latency alerts wait for this many samples in the window.
    pub min_samples: usize,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            success_rate_warning: 70.0,
            success_rate_critical: 50.0,
            latency_warning_ms: 2000.0,
            latency_critical_ms: 5000.0,
            consecutive_failures: 5,
            min_samples: 5,
        }
    }
}

impl AlertThresholds {
    pub fn success_rate_alert(&self, rate: f64) -> Option<(AlertSeverity, f64)> {
        if rate < self.success_rate_critical {
            Some((AlertSeverity::Critical, self.success_rate_critical))
        } else if rate < self.success_rate_warning {
            Some((AlertSeverity::Warning, self.success_rate_warning))
        } else {
            None
        }
    }

    pub fn latency_alert(&self, average_ms: f64) -> Option<(AlertSeverity, f64)> {
        if average_ms > self.latency_critical_ms {
            Some((AlertSeverity::Critical, self.latency_critical_ms))
        } else if average_ms > self.latency_warning_ms {
            Some((AlertSeverity::Warning, self.latency_warning_ms))
        } else {
            None
        }
    }
}

/// Alert log with a per-kind cooldown.
#[derive(Debug)]
pub struct AlertManager {
    cooldown: Duration,
    last_fired: HashMap<AlertKind, Instant>,
    history: VecDeque<Alert>,
    suppressed: u64,
}

impl AlertManager {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_fired: HashMap::new(),
            history: VecDeque::with_capacity(MAX_ALERT_HISTORY),
            suppressed: 0,
        }
    }

    /// Records `alert` unless its kind fired within the cooldown window.
    /// Returns whether it was recorded.
    pub fn fire(&mut self, alert: Alert) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_fired.get(&alert.kind) {
            if now.duration_since(*last) < self.cooldown {
                self.suppressed += 1;
                return false;
            }
        }
        self.last_fired.insert(alert.kind, now);
        if self.history.len() == MAX_ALERT_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(alert);
        true
    }

    pub fn history(&self) -> impl Iterator<Item = &Alert> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    pub fn clear(&mut self) {
        self.last_fired.clear();
        self.history.clear();
        self.suppressed = 0;
    }
}

pub fn build_alert(
    kind: AlertKind,
    severity: AlertSeverity,
    current_value: f64,
    threshold: f64,
    app: Option<String>,
) -> Alert {
    let (message, recommendation) = match kind {
        AlertKind::LowSuccessRate => (
            format!("detection success rate {current_value:.1}% below {threshold:.0}%"),
            "check accessibility permissions and whether target apps expose labelled elements"
                .to_string(),
        ),
        AlertKind::HighLatency => (
            format!("average detection latency {current_value:.0}ms above {threshold:.0}ms"),
            "lower maxTraversalDepth or raise cacheTtlSeconds to cut tree walks".to_string(),
        ),
        AlertKind::ConsecutiveFailures => (
            format!(
                "{} failed {current_value:.0} times in a row",
                app.as_deref().unwrap_or("application")
            ),
            "the application may not expose an accessibility tree; prefer the visual fallback"
                .to_string(),
        ),
    };

    Alert {
        kind,
        severity,
        message,
        current_value,
        threshold,
        recommendation,
        app,
        timestamp: Utc::now(),
    }
}
