//! Pipeline health tracking: bounded sample history, rolling success and
//! latency windows, named sub-stage latencies, alerting, and process
//! resource sampling.

mod alerts;
mod rolling;
mod types;

pub use alerts::{AlertManager, AlertThresholds};
pub use rolling::{Direction, RollingStat, DEFAULT_WINDOW, MIN_TREND_SAMPLES};
pub use types::{
    Alert, AlertKind, AlertSeverity, MonitorSnapshot, OperationStats, PerformanceSample,
    StageSummary, SystemMetrics, Trend,
};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

use crate::config::DetectionConfig;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_warn};

const MAX_RECENT_SAMPLES: usize = 20;

pub struct PerformanceMonitor {
    inner: Arc<Mutex<MonitorState>>,
}

struct MonitorState {
    history: VecDeque<PerformanceSample>,
    history_size: usize,
    success: RollingStat,
    latency: RollingStat,
    stages: BTreeMap<String, RollingStat>,
    operations: BTreeMap<String, OperationStats>,
    consecutive_failures: HashMap<String, u32>,
    alerts: AlertManager,
    thresholds: AlertThresholds,
    total_samples: u64,
    timeout_count: u64,
    system: System,
    pid: Pid,
}

impl MonitorState {
    fn system_metrics(&mut self) -> SystemMetrics {
        let pid = self.pid;
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        match self.system.process(pid) {
            Some(process) => SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            },
            None => SystemMetrics {
                cpu_percent: 0.0,
                memory_mb: 0.0,
            },
        }
    }

    fn stage_stat(&mut self, name: &str) -> &mut RollingStat {
        self.stages
            .entry(name.to_string())
            .or_insert_with(|| RollingStat::new(DEFAULT_WINDOW, Direction::LowerIsBetter))
    }

    fn success_rate(&self) -> Option<f64> {
        self.success.mean().map(|m| m * 100.0)
    }

    fn raise(&mut self, alert: Alert) -> Option<Alert> {
        if self.alerts.fire(alert.clone()) {
            match alert.severity {
                AlertSeverity::Critical => log_error!("alert: {}", alert.message),
                _ => log_warn!("alert: {}", alert.message),
            }
            Some(alert)
        } else {
            None
        }
    }

    fn evaluate(&mut self, sample: &PerformanceSample) -> Vec<Alert> {
        let mut raised = Vec::new();

        if self.success.len() >= self.thresholds.min_samples {
            if let Some(rate) = self.success_rate() {
                if let Some((severity, threshold)) = self.thresholds.success_rate_alert(rate) {
                    let alert = alerts::build_alert(
                        AlertKind::LowSuccessRate,
                        severity,
                        rate,
                        threshold,
                        None,
                    );
                    raised.extend(self.raise(alert));
                }
            }
            if let Some(latency) = self.latency.mean() {
                if let Some((severity, threshold)) = self.thresholds.latency_alert(latency) {
                    let alert = alerts::build_alert(
                        AlertKind::HighLatency,
                        severity,
                        latency,
                        threshold,
                        None,
                    );
                    raised.extend(self.raise(alert));
                }
            }
        }

        if let Some(app) = &sample.app {
            let streak = self.consecutive_failures.get(app).copied().unwrap_or(0);
            if streak >= self.thresholds.consecutive_failures {
                let alert = alerts::build_alert(
                    AlertKind::ConsecutiveFailures,
                    AlertSeverity::High,
                    streak as f64,
                    self.thresholds.consecutive_failures as f64,
                    Some(app.clone()),
                );
                raised.extend(self.raise(alert));
            }
        }

        raised
    }
}

impl PerformanceMonitor {
    pub fn new(config: &DetectionConfig) -> Self {
        Self::with_thresholds(config, AlertThresholds::default())
    }

    pub fn with_thresholds(config: &DetectionConfig, thresholds: AlertThresholds) -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // CPU usage is a delta between refreshes; take the baseline now.
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        let history_size = config.performance_history_size.max(1);
        Self {
            inner: Arc::new(Mutex::new(MonitorState {
                history: VecDeque::with_capacity(history_size),
                history_size,
                success: RollingStat::new(DEFAULT_WINDOW, Direction::HigherIsBetter),
                latency: RollingStat::new(DEFAULT_WINDOW, Direction::LowerIsBetter),
                stages: BTreeMap::new(),
                operations: BTreeMap::new(),
                consecutive_failures: HashMap::new(),
                alerts: AlertManager::new(Duration::from_secs(config.alert_cooldown_secs)),
                thresholds,
                total_samples: 0,
                timeout_count: 0,
                system,
                pid,
            })),
        }
    }

    /// Appends `sample`, updates every rolling window it touches and returns
    /// the alerts it raised (already past their cooldown).
    pub async fn record_sample(&self, sample: PerformanceSample) -> Vec<Alert> {
        let mut state = self.inner.lock().await;

        state.total_samples += 1;
        if sample.timed_out {
            state.timeout_count += 1;
        }
        state.success.push(if sample.success { 1.0 } else { 0.0 });
        state.latency.push(sample.duration_ms);
        for (name, ms) in &sample.stages_ms {
            state.stage_stat(name).push(*ms);
        }

        let op = state.operations.entry(sample.operation.clone()).or_default();
        op.count += 1;
        op.total_ms += sample.duration_ms;
        op.max_ms = op.max_ms.max(sample.duration_ms);
        if sample.success {
            op.successes += 1;
        }
        if sample.timed_out {
            op.timeouts += 1;
        }

        if let Some(app) = &sample.app {
            let streak = state.consecutive_failures.entry(app.clone()).or_insert(0);
            *streak = if sample.success { 0 } else { streak.saturating_add(1) };
        }

        let raised = state.evaluate(&sample);

        if state.history.len() == state.history_size {
            state.history.pop_front();
        }
        state.history.push_back(sample);

        raised
    }

    /// Records a sub-stage latency outside of a full sample (preload work).
    pub async fn record_stage(&self, name: &str, duration: Duration) {
        let mut state = self.inner.lock().await;
        state
            .stage_stat(name)
            .push(duration.as_secs_f64() * 1000.0);
    }

    /// Sample current CPU and memory usage of this process.
    pub async fn sample_system_metrics(&self) -> SystemMetrics {
        self.inner.lock().await.system_metrics()
    }

    pub async fn success_trend(&self) -> Trend {
        self.inner.lock().await.success.trend()
    }

    pub async fn latency_trend(&self) -> Trend {
        self.inner.lock().await.latency.trend()
    }

    pub async fn stage_trend(&self, name: &str) -> Trend {
        self.inner
            .lock()
            .await
            .stages
            .get(name)
            .map(RollingStat::trend)
            .unwrap_or(Trend::InsufficientData)
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.inner.lock().await.alerts.history().cloned().collect()
    }

    pub async fn history_len(&self) -> usize {
        self.inner.lock().await.history.len()
    }

    pub async fn get_snapshot(&self) -> MonitorSnapshot {
        let mut state = self.inner.lock().await;
        let system = state.system_metrics();

        let stages = state
            .stages
            .iter()
            .map(|(name, stat)| {
                (
                    name.clone(),
                    StageSummary {
                        average_ms: stat.mean(),
                        trend: stat.trend(),
                        samples: stat.len(),
                    },
                )
            })
            .collect();

        let skip = state.history.len().saturating_sub(MAX_RECENT_SAMPLES);
        let recent_samples = state.history.iter().skip(skip).cloned().collect();

        let alert_count = state.alerts.len();
        let recent_alerts = state
            .alerts
            .history()
            .skip(alert_count.saturating_sub(MAX_RECENT_SAMPLES))
            .cloned()
            .collect();

        MonitorSnapshot {
            system,
            total_samples: state.total_samples,
            window_samples: state.success.len(),
            success_rate: state.success_rate(),
            average_latency_ms: state.latency.mean(),
            success_trend: state.success.trend(),
            latency_trend: state.latency.trend(),
            timeout_count: state.timeout_count,
            stages,
            operations: state.operations.clone(),
            consecutive_failures: state
                .consecutive_failures
                .iter()
                .filter(|(_, streak)| **streak > 0)
                .map(|(app, streak)| (app.clone(), *streak))
                .collect(),
            recent_samples,
            recent_alerts,
            suppressed_alerts: state.alerts.suppressed(),
        }
    }

    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        let pid = state.pid;
        state.history.clear();
        state.success.clear();
        state.latency.clear();
        state.stages.clear();
        state.operations.clear();
        state.consecutive_failures.clear();
        state.alerts.clear();
        state.total_samples = 0;
        state.timeout_count = 0;
        // Re-establish baseline for CPU after reset
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    }
}

impl Clone for PerformanceMonitor {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(success: bool, ms: u64) -> PerformanceSample {
        PerformanceSample::new(
            "find_element",
            Duration::from_millis(ms),
            Duration::from_millis(2000),
        )
        .success(success)
    }

    fn monitor_with_history(size: usize) -> PerformanceMonitor {
        let config = DetectionConfig {
            performance_history_size: size,
            ..DetectionConfig::default()
        };
        PerformanceMonitor::new(&config)
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let monitor = monitor_with_history(3);
        for _ in 0..5 {
            monitor.record_sample(sample(true, 10)).await;
        }
        assert_eq!(monitor.history_len().await, 3);
        let snapshot = monitor.get_snapshot().await;
        assert_eq!(snapshot.total_samples, 5);
        assert_eq!(snapshot.success_rate, Some(100.0));
    }

    #[tokio::test]
    async fn timeouts_are_marked_after_the_fact() {
        let monitor = monitor_with_history(10);
        monitor.record_sample(sample(true, 2500)).await;
        let snapshot = monitor.get_snapshot().await;
        assert_eq!(snapshot.timeout_count, 1);
        assert!(snapshot.recent_samples[0].timed_out);
        assert_eq!(snapshot.operations["find_element"].timeouts, 1);
    }

    #[tokio::test]
    async fn low_success_rate_alerts_once_per_cooldown() {
        let monitor = monitor_with_history(100);
        let mut raised = Vec::new();
        for _ in 0..10 {
            raised.extend(monitor.record_sample(sample(false, 10)).await);
        }
        let rate_alerts: Vec<_> = raised
            .iter()
            .filter(|a| a.kind == AlertKind::LowSuccessRate)
            .collect();
        assert_eq!(rate_alerts.len(), 1);
        assert_eq!(rate_alerts[0].severity, AlertSeverity::Critical);
        assert!(monitor.get_snapshot().await.suppressed_alerts > 0);
    }

    #[tokio::test]
    async fn consecutive_failures_per_app() {
        let monitor = monitor_with_history(100);
        let mut raised = Vec::new();
        for _ in 0..4 {
            raised.extend(monitor.record_sample(sample(false, 10).app("mail")).await);
        }
        assert!(!raised.iter().any(|a| a.kind == AlertKind::ConsecutiveFailures));

        raised.extend(monitor.record_sample(sample(false, 10).app("mail")).await);
        let streak: Vec<_> = raised
            .iter()
            .filter(|a| a.kind == AlertKind::ConsecutiveFailures)
            .collect();
        assert_eq!(streak.len(), 1);
        assert_eq!(streak[0].severity, AlertSeverity::High);
        assert_eq!(streak[0].app.as_deref(), Some("mail"));

        monitor.record_sample(sample(true, 10).app("mail")).await;
        assert!(monitor.get_snapshot().await.consecutive_failures.is_empty());
    }

    #[tokio::test]
    async fn stage_latencies_are_tracked() {
        let monitor = monitor_with_history(100);
        for _ in 0..12 {
            monitor
                .record_sample(
                    sample(true, 50)
                        .stage("cache_lookup", Duration::from_millis(1))
                        .stage("matching", Duration::from_millis(20)),
                )
                .await;
        }
        monitor.record_stage("preload", Duration::from_millis(300)).await;

        let snapshot = monitor.get_snapshot().await;
        assert_eq!(snapshot.stages["matching"].samples, 12);
        assert_eq!(snapshot.stages["matching"].trend, Trend::Stable);
        assert_eq!(snapshot.stages["preload"].trend, Trend::InsufficientData);
        assert_eq!(monitor.stage_trend("missing").await, Trend::InsufficientData);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let monitor = monitor_with_history(10);
        for _ in 0..6 {
            monitor.record_sample(sample(false, 10)).await;
        }
        monitor.reset().await;
        let snapshot = monitor.get_snapshot().await;
        assert_eq!(snapshot.total_samples, 0);
        assert_eq!(snapshot.success_rate, None);
        assert!(monitor.alerts().await.is_empty());
    }
}
