//! Lookup orchestration.
//!
//! One call: recovery gate, target extraction, application resolution,
//! cache or fresh walk, then the stage chain (enhanced, role-restricted,
//! strict) until a candidate matches. Provider calls run on the blocking
//! pool and no lock is held across them.

use std::{
    collections::BTreeSet,
    future::Future,
    path::Path,
    sync::{Arc, Mutex},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use super::result::{
    FuzzyCandidate, MatchDiagnostics, MatchResult, MatchedElement, SearchStage, StageReport,
};
use super::target::TargetExtractor;
use super::traversal::{flatten_application, Traversal, TraversalLimits};
use crate::background::{jobs, TaskId, WorkerPool};
use crate::cache::{CacheEntry, CacheStats, ElementCache, ElementRecord};
use crate::config::DetectionConfig;
use crate::error::{DetectionError, FailureKind, ProviderError};
use crate::fuzzy::{FuzzyMatcher, FuzzyStats, SimilarityScorer};
use crate::monitor::{PerformanceMonitor, PerformanceSample};
use crate::provider::{AppIdentity, TreeProvider};
use crate::recovery::{DegradedModeState, RecoveryManager, RecoveryPolicy};
use crate::reporting::{DiagnosticReport, ReportInputs, ReportingSystem};
use crate::roles::{self, RoleCategory};
use crate::utils::normalize_text;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Upper bound on the scored-candidate trail kept in a [`MatchResult`].
const MAX_FUZZY_CANDIDATES: usize = 25;

const STAGE_TIMINGS: &[&str] = &["cache_lookup", "traversal", "matching"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindRequest {
    /// Requested role; empty or "clickable" means any activatable role.
    pub role: String,
    pub label: String,
    /// Application name or bundle id; `None` targets the focused app.
    pub app: Option<String>,
}

impl FindRequest {
    pub fn new(role: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            label: label.into(),
            app: None,
        }
    }

    pub fn in_app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }
}

/// Outcome of [`DetectionEngine::find_element_racing`].
#[derive(Debug)]
pub enum RaceOutcome<T> {
    /// The accessibility search found the element; the alternative was
    /// cancelled.
    Accessibility(MatchResult),
    /// The accessibility search came up empty (or failed) and the
    /// alternative produced a value within the race timeout.
    Alternative {
        value: T,
        accessibility: Result<MatchResult, DetectionError>,
    },
    Neither {
        accessibility: Result<MatchResult, DetectionError>,
        alternative_timed_out: bool,
    },
}

struct StagePlan {
    stage: SearchStage,
    roles: Vec<String>,
    /// Also take records whose role shares a category with `roles`.
    include_category: bool,
    fuzzy: bool,
}

struct StageHit {
    record: ElementRecord,
    center_point: (i64, i64),
    attribute: String,
    score: u8,
}

struct EngineInner {
    provider: Arc<dyn TreeProvider>,
    config: Arc<DetectionConfig>,
    cache: ElementCache,
    fuzzy: FuzzyMatcher,
    extractor: TargetExtractor,
    recovery: RecoveryManager,
    monitor: PerformanceMonitor,
    workers: WorkerPool,
    clickable_roles: Vec<String>,
    last_focused: Mutex<Option<String>>,
    last_housekeeping: Mutex<Instant>,
}

/// Cheap to clone; clones share caches, monitor and recovery state.
#[derive(Clone)]
pub struct DetectionEngine {
    inner: Arc<EngineInner>,
}

impl DetectionEngine {
    pub fn new(provider: Arc<dyn TreeProvider>, config: DetectionConfig) -> Self {
        let fuzzy = FuzzyMatcher::new(&config);
        Self::build(provider, config, fuzzy)
    }

    pub fn with_scorer(
        provider: Arc<dyn TreeProvider>,
        config: DetectionConfig,
        scorer: Arc<dyn SimilarityScorer>,
    ) -> Self {
        let fuzzy = FuzzyMatcher::with_scorer(&config, scorer);
        Self::build(provider, config, fuzzy)
    }

    fn build(
        provider: Arc<dyn TreeProvider>,
        config: DetectionConfig,
        fuzzy: FuzzyMatcher,
    ) -> Self {
        let clickable_roles: Vec<String> = config
            .clickable_roles
            .iter()
            .map(|role| roles::normalize_role(role))
            .collect();
        let cache = ElementCache::new(
            config.cache_ttl(),
            config.max_cache_entries,
            clickable_roles.clone(),
        );
        let extractor = TargetExtractor::new(&config);
        let recovery = RecoveryManager::new(RecoveryPolicy::from_config(&config));
        let monitor = PerformanceMonitor::new(&config);
        let workers = WorkerPool::new(config.background_workers);

        log_info!(
            "detection engine ready (fuzzy {}, threshold {}, ttl {}s, {} workers)",
            if fuzzy.is_enabled() { "on" } else { "off" },
            config.fuzzy_confidence_threshold,
            config.cache_ttl_seconds,
            workers.workers()
        );

        Self {
            inner: Arc::new(EngineInner {
                provider,
                config: Arc::new(config),
                cache,
                fuzzy,
                extractor,
                recovery,
                monitor,
                workers,
                clickable_roles,
                last_focused: Mutex::new(None),
                last_housekeeping: Mutex::new(Instant::now()),
            }),
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &ElementCache {
        &self.inner.cache
    }

    pub fn fuzzy(&self) -> &FuzzyMatcher {
        &self.inner.fuzzy
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.inner.monitor
    }

    pub fn recovery(&self) -> &RecoveryManager {
        &self.inner.recovery
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.inner.workers
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn fuzzy_stats(&self) -> FuzzyStats {
        self.inner.fuzzy.stats()
    }

    pub fn recovery_state(&self) -> DegradedModeState {
        self.inner.recovery.state()
    }

    pub fn is_degraded(&self) -> bool {
        self.inner.recovery.is_degraded()
    }

    /// Leaves degraded mode unconditionally, e.g. after the user granted
    /// permission.
    pub fn reset_degraded_mode(&self) {
        self.inner.recovery.reset();
    }

    pub fn invalidate_app(&self, app: &AppIdentity) -> bool {
        self.inner.cache.invalidate(&app.cache_key())
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    fn limits(&self) -> TraversalLimits {
        TraversalLimits {
            max_depth: self.inner.config.max_traversal_depth,
            max_elements: self.inner.config.max_elements_per_app,
        }
    }

    async fn with_provider<T, F>(&self, call: F) -> Result<T, ProviderError>
    where
        F: FnOnce(&dyn TreeProvider) -> Result<T, ProviderError> + Send + 'static,
        T: Send + 'static,
    {
        let provider = Arc::clone(&self.inner.provider);
        tokio::task::spawn_blocking(move || call(provider.as_ref()))
            .await
            .unwrap_or_else(|err| {
                Err(ProviderError::CannotComplete(format!(
                    "provider task failed: {err}"
                )))
            })
    }

    /// Fatal provider errors flip the engine into degraded mode and come
    /// back as `Err`; anything else becomes a diagnostic event.
    fn absorb(
        &self,
        err: ProviderError,
        diagnostics: &mut MatchDiagnostics,
        context: &str,
    ) -> Result<(), DetectionError> {
        match DetectionError::from_provider(&err) {
            Some(fatal) => {
                self.inner.recovery.record_error(&err);
                log_warn!("{} failed fatally: {}", context, err);
                Err(fatal)
            }
            None => {
                log_debug!("{} failed: {}", context, err);
                diagnostics.push_event(
                    FailureKind::TreeTraversalFailure,
                    None,
                    format!("{context}: {err}"),
                );
                Ok(())
            }
        }
    }

    fn housekeeping(&self) {
        let due = {
            let mut last = self
                .inner
                .last_housekeeping
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if last.elapsed() >= self.inner.config.cleanup_interval() {
                *last = Instant::now();
                true
            } else {
                false
            }
        };
        if !due {
            return;
        }
        let expired = self.inner.cache.cleanup_expired();
        let fuzzy = self.inner.fuzzy.cleanup_expired();
        let targets = self.inner.extractor.cleanup_expired();
        let reaped = self.inner.workers.reap_finished();
        log_debug!(
            "housekeeping: {} cache entries, {} fuzzy results, {} targets expired; {} tasks reaped",
            expired,
            fuzzy,
            targets,
            reaped
        );
    }

    /// Runs one recovery probe if the backoff schedule allows it.
    pub async fn attempt_recovery(&self) -> bool {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let provider = Arc::clone(&inner.provider);
            inner.recovery.attempt_recovery(|| {
                provider.is_trusted() && provider.list_running_applications().is_ok()
            })
        })
        .await
        .unwrap_or(false)
    }

    fn note_focus(&self, app: &AppIdentity) {
        let key = app.cache_key();
        let mut last = self
            .inner
            .last_focused
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if last.as_deref() == Some(key.as_str()) {
            return;
        }
        let switched = last.is_some();
        *last = Some(key.clone());
        drop(last);

        if switched && self.inner.config.invalidate_cache_on_focus_change {
            self.inner.cache.invalidate(&key);
        }
    }

    /// The focused application, if any. Fatal errors degrade the engine.
    pub async fn focused_application(&self) -> Result<Option<AppIdentity>, DetectionError> {
        let lookup = self
            .with_provider(|provider| provider.get_focused_application())
            .await;
        match lookup {
            Ok(app) => Ok(app),
            Err(err) => {
                let mut scratch = MatchDiagnostics::default();
                self.absorb(err, &mut scratch, "focus lookup")?;
                Ok(None)
            }
        }
    }

    async fn resolve_app(
        &self,
        request: &FindRequest,
        diagnostics: &mut MatchDiagnostics,
    ) -> Result<Option<AppIdentity>, DetectionError> {
        let wanted = request.app.clone();
        let lookup = self
            .with_provider(move |provider| {
                if !provider.is_trusted() {
                    return Err(ProviderError::PermissionDenied(
                        "process is not trusted for accessibility".into(),
                    ));
                }
                match wanted {
                    Some(name) => Ok(provider
                        .list_running_applications()?
                        .into_iter()
                        .find(|app| app.matches_name(&name))
                        .map(|app| (app, false))),
                    None => Ok(provider.get_focused_application()?.map(|app| (app, true))),
                }
            })
            .await;

        match lookup {
            Ok(Some((app, via_focus))) => {
                if via_focus {
                    self.note_focus(&app);
                }
                Ok(Some(app))
            }
            Ok(None) => {
                let detail = match &request.app {
                    Some(name) => format!("application {name:?} is not running"),
                    None => "no focused application".to_string(),
                };
                diagnostics.push_event(FailureKind::ElementNotFound, None, detail);
                Ok(None)
            }
            Err(err) => {
                self.absorb(err, diagnostics, "resolving application")?;
                Ok(None)
            }
        }
    }

    async fn traverse(&self, app: &AppIdentity) -> Result<Traversal, ProviderError> {
        let app = app.clone();
        let limits = self.limits();
        self.with_provider(move |provider| flatten_application(provider, &app, limits))
            .await
    }

    /// Fresh walk of `app`, replacing its cache entry. `Ok(None)` when the
    /// walk failed non-fatally.
    async fn refresh(
        &self,
        app: &AppIdentity,
        diagnostics: &mut MatchDiagnostics,
    ) -> Result<Option<Arc<CacheEntry>>, DetectionError> {
        let started = Instant::now();
        let walked = self.traverse(app).await;
        diagnostics.add_timing("traversal", started.elapsed());

        match walked {
            Ok(traversal) => {
                for failure in traversal.failures {
                    diagnostics.push_event(FailureKind::TreeTraversalFailure, None, failure);
                }
                if traversal.stats.missing_role > 0 {
                    diagnostics.push_event(
                        FailureKind::AttributeAccessFailure,
                        None,
                        format!(
                            "{} element(s) had no readable role under any alias",
                            traversal.stats.missing_role
                        ),
                    );
                }
                diagnostics.traversal = Some(traversal.stats);
                Ok(Some(self.inner.cache.put(app, traversal.elements)))
            }
            Err(err) => {
                self.absorb(err, diagnostics, "traversal")?;
                Ok(None)
            }
        }
    }

    async fn load_entry(
        &self,
        app: &AppIdentity,
        diagnostics: &mut MatchDiagnostics,
    ) -> Result<Option<(Arc<CacheEntry>, bool)>, DetectionError> {
        let started = Instant::now();
        let cached = self.inner.cache.get(&app.cache_key());
        diagnostics.add_timing("cache_lookup", started.elapsed());
        diagnostics.cache_hit = Some(cached.is_some());

        if let Some(entry) = cached {
            return Ok(Some((entry, true)));
        }
        Ok(self.refresh(app, diagnostics).await?.map(|entry| (entry, false)))
    }

    /// Warms the cache for `app` in the foreground. Returns the number of
    /// elements cached; 0 while degraded.
    pub async fn preload_app(&self, app: &AppIdentity) -> Result<usize, DetectionError> {
        if self.inner.recovery.is_degraded() {
            return Ok(0);
        }
        let mut scratch = MatchDiagnostics::default();
        let entry = self.refresh(app, &mut scratch).await?;
        Ok(entry.map(|entry| entry.elements.len()).unwrap_or(0))
    }

    /// Queues a background walk of the focused application, followed by
    /// predictive warming when enabled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn preload_focused_app(&self) -> Option<TaskId> {
        if !self.inner.config.preload_enabled || self.inner.recovery.is_degraded() {
            return None;
        }
        let engine = self.clone();
        Some(
            self.inner
                .workers
                .submit("preload", move |token| jobs::preload_focused(engine, token)),
        )
    }

    /// Queues scoring of the common role/label dictionary against `app`'s
    /// cached elements so those lookups hit the fuzzy result cache.
    ///
    /// Must be called from within a tokio runtime.
    pub fn warm_predictive_cache(&self, app: &AppIdentity) -> Option<TaskId> {
        if !self.inner.config.predictive_caching_enabled {
            return None;
        }
        let engine = self.clone();
        let app_key = app.cache_key();
        Some(self.inner.workers.submit("predictive", move |token| {
            jobs::warm_common_patterns(engine, app_key, token)
        }))
    }

    fn plan_stages(&self, role: &str) -> Vec<StagePlan> {
        let generic = roles::is_generic_request(role);
        let requested = roles::normalize_role(role);
        let clickable = &self.inner.clickable_roles;

        let mut enhanced_roles = clickable.clone();
        if !generic && !enhanced_roles.contains(&requested) {
            enhanced_roles.push(requested.clone());
        }

        let mut plans = vec![StagePlan {
            stage: SearchStage::Enhanced,
            roles: enhanced_roles,
            include_category: true,
            fuzzy: true,
        }];
        if generic {
            plans.push(StagePlan {
                stage: SearchStage::RoleRestricted,
                roles: vec![roles::primary_button_role().to_string()],
                include_category: false,
                fuzzy: true,
            });
        }
        plans.push(StagePlan {
            stage: SearchStage::Strict,
            roles: if generic {
                clickable.clone()
            } else {
                vec![requested]
            },
            include_category: false,
            fuzzy: false,
        });
        plans
    }

    fn candidates<'e>(&self, plan: &StagePlan, entry: &'e CacheEntry) -> Vec<&'e ElementRecord> {
        let mut positions = BTreeSet::new();
        let mut categories = BTreeSet::new();
        for role in &plan.roles {
            positions.extend(entry.index.by_role(role).iter().copied());
            if plan.include_category {
                let category = roles::category_of(role);
                if category != RoleCategory::Other {
                    categories.insert(category);
                }
            }
        }
        for category in categories {
            positions.extend(entry.index.by_category(category).iter().copied());
        }
        positions
            .into_iter()
            .filter_map(|pos| entry.elements.get(pos))
            .collect()
    }

    fn run_stage(
        &self,
        plan: &StagePlan,
        entry: &CacheEntry,
        target: &str,
        raw_label: &str,
        result: &mut MatchResult,
        diagnostics: &mut MatchDiagnostics,
    ) -> Option<StageHit> {
        let config = &self.inner.config;
        let started = Instant::now();
        let attributes = &config.searchable_attributes;
        for role in &plan.roles {
            result.note_role(role);
        }
        for attribute in attributes {
            result.note_attribute(attribute);
        }

        let candidates = self.candidates(plan, entry);
        let mut report = StageReport {
            stage: plan.stage,
            roles: plan.roles.clone(),
            attributes: attributes.clone(),
            candidates: candidates.len(),
            filtered_out: 0,
            scored: 0,
            budget_exhausted: false,
            found: false,
            elapsed_ms: 0.0,
        };

        let raw_label = normalize_text(raw_label);
        let mut bad_geometry = 0usize;
        let mut degraded_calls = 0usize;
        let mut hit = None;

        for record in candidates {
            if !record.enabled {
                report.filtered_out += 1;
                continue;
            }
            let Some(center_point) = record.center_point().filter(|_| record.has_usable_geometry())
            else {
                report.filtered_out += 1;
                bad_geometry += 1;
                continue;
            };
            if plan.fuzzy && started.elapsed() > config.attribute_check_timeout() {
                report.budget_exhausted = true;
                break;
            }
            report.scored += 1;

            if plan.fuzzy {
                let outcome = self.inner.fuzzy.multi_attribute_match(
                    record,
                    target,
                    attributes,
                    config.fuzzy_confidence_threshold,
                );
                degraded_calls += outcome.degraded_calls;

                if result.fuzzy_candidates.len() < MAX_FUZZY_CANDIDATES {
                    if let Some(best) = outcome.scores.iter().max_by_key(|s| s.score) {
                        result.fuzzy_candidates.push(FuzzyCandidate {
                            stage: plan.stage,
                            role: record.role.clone(),
                            title: record.title.clone(),
                            attribute: if outcome.found {
                                outcome.attribute.clone()
                            } else {
                                best.attribute.clone()
                            },
                            score: if outcome.found { outcome.score } else { best.score },
                            matched: outcome.found,
                        });
                    }
                }

                if outcome.found {
                    hit = Some(StageHit {
                        record: record.clone(),
                        center_point,
                        attribute: outcome.attribute,
                        score: outcome.score,
                    });
                    break;
                }
            } else {
                let exact = attributes.iter().find(|attribute| {
                    record.attribute(attribute).is_some_and(|value| {
                        let value = normalize_text(value);
                        !value.is_empty() && (value == target || value == raw_label)
                    })
                });
                if let Some(attribute) = exact {
                    hit = Some(StageHit {
                        record: record.clone(),
                        center_point,
                        attribute: attribute.clone(),
                        score: 100,
                    });
                    break;
                }
            }
        }

        if bad_geometry > 0 {
            diagnostics.push_event(
                FailureKind::CoordinateCalculationFailure,
                Some(plan.stage),
                format!("{bad_geometry} candidate(s) with unusable geometry discarded"),
            );
        }
        if degraded_calls > 0 {
            diagnostics.push_event(
                FailureKind::FuzzyMatchFailure,
                Some(plan.stage),
                format!("{degraded_calls} fuzzy call(s) fell back to exact/substring comparison"),
            );
        }
        if report.budget_exhausted {
            log_debug!(
                "{} stage stopped after {} of {} candidates (attribute budget)",
                plan.stage.as_str(),
                report.scored,
                report.candidates
            );
        }

        report.found = hit.is_some();
        report.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        diagnostics.stages.push(report);
        hit
    }

    fn run_stages(
        &self,
        entry: &CacheEntry,
        request: &FindRequest,
        target: &str,
        result: &mut MatchResult,
        diagnostics: &mut MatchDiagnostics,
    ) -> bool {
        let started = Instant::now();
        let mut found = false;
        for (position, plan) in self.plan_stages(&request.role).iter().enumerate() {
            if let Some(hit) =
                self.run_stage(plan, entry, target, &request.label, result, diagnostics)
            {
                result.found = true;
                result.confidence = hit.score.min(100);
                result.matched_attribute = hit.attribute;
                result.element = Some(MatchedElement {
                    record: hit.record,
                    center_point: hit.center_point,
                });
                result.stage = Some(plan.stage);
                result.fallback_used = position > 0;
                found = true;
                break;
            }
        }
        diagnostics.add_timing("matching", started.elapsed());
        found
    }

    async fn search(&self, request: &FindRequest) -> Result<MatchResult, DetectionError> {
        let mut diagnostics = MatchDiagnostics {
            requested_role: request.role.clone(),
            requested_label: request.label.clone(),
            ..MatchDiagnostics::default()
        };

        if self.inner.recovery.is_degraded() {
            if self.inner.recovery.should_attempt_recovery() {
                diagnostics.recovery_attempted = true;
                self.attempt_recovery().await;
            }
            if self.inner.recovery.is_degraded() {
                let state = self.inner.recovery.state();
                diagnostics.degraded = true;
                diagnostics.push_event(
                    FailureKind::DegradedMode,
                    None,
                    state.reason.clone().unwrap_or_default(),
                );
                diagnostics.degraded_reason = state.reason;
                return Ok(MatchResult::not_found(diagnostics));
            }
        }

        let extraction = self.inner.extractor.extract(&request.label);
        if extraction.fallback {
            diagnostics.push_event(
                FailureKind::TargetExtractionFailure,
                None,
                "pattern rules unavailable; stop words stripped",
            );
        }
        diagnostics.target = extraction.target.clone();
        diagnostics.target_method = Some(extraction.method);

        let Some(app) = self.resolve_app(request, &mut diagnostics).await? else {
            return Ok(MatchResult::not_found(diagnostics));
        };
        diagnostics.app = Some(app.cache_key());

        let Some((mut entry, mut from_cache)) = self.load_entry(&app, &mut diagnostics).await?
        else {
            return Ok(MatchResult::not_found(diagnostics));
        };

        let mut result = MatchResult::default();
        loop {
            if self.run_stages(&entry, request, &extraction.target, &mut result, &mut diagnostics) {
                break;
            }
            // A stale cache is the usual reason for a miss on a hit.
            if !from_cache {
                break;
            }
            diagnostics.refreshed = true;
            match self.refresh(&app, &mut diagnostics).await? {
                Some(fresh) => {
                    entry = fresh;
                    from_cache = false;
                }
                None => break,
            }
        }

        if !result.found {
            diagnostics.push_event(
                FailureKind::ElementNotFound,
                None,
                format!(
                    "no element matched {:?} (role {:?}) in {}",
                    extraction.target,
                    request.role,
                    app.name
                ),
            );
        }
        result.diagnostics = diagnostics;
        Ok(result)
    }

    async fn record_sample(&self, result: &MatchResult) {
        let mut sample = PerformanceSample::new(
            "find_element",
            result.elapsed(),
            self.inner.config.fast_path_timeout(),
        )
        .success(result.found)
        .meta("degraded", result.diagnostics.degraded)
        .meta("fallbackUsed", result.fallback_used);

        if let Some(app) = &result.diagnostics.app {
            sample = sample.app(app.clone());
        }
        if let Some(stage) = result.stage {
            sample = sample.meta("stage", stage.as_str());
        }
        for name in STAGE_TIMINGS {
            if let Some(duration) = result.diagnostics.timing(name) {
                sample = sample.stage(*name, duration);
            }
        }
        self.inner.monitor.record_sample(sample).await;
    }

    /// Locates the element matching `request`.
    ///
    /// A miss is `Ok` with `found == false`. Only permission and
    /// availability failures are `Err`; they also put the engine into
    /// degraded mode, after which calls short-circuit to a miss without
    /// touching the provider until recovery succeeds.
    pub async fn find_element(&self, request: &FindRequest) -> Result<MatchResult, DetectionError> {
        let started = Instant::now();
        self.housekeeping();

        match self.search(request).await {
            Ok(mut result) => {
                let elapsed = started.elapsed();
                result.elapsed_ms = elapsed.as_secs_f64() * 1000.0;
                result.diagnostics.timed_out = elapsed > self.inner.config.fast_path_timeout();
                if result.diagnostics.timed_out {
                    log_warn!(
                        "lookup for {:?} took {:?}, over the fast-path budget",
                        request.label,
                        elapsed
                    );
                }
                self.record_sample(&result).await;
                Ok(result)
            }
            Err(err) => {
                // No resolved identity here, so the per-app failure streak is left alone.
                let sample = PerformanceSample::new(
                    "find_element",
                    started.elapsed(),
                    self.inner.config.fast_path_timeout(),
                )
                .error(err.to_string());
                self.inner.monitor.record_sample(sample).await;
                Err(err)
            }
        }
    }

    /// Runs the accessibility search alongside `alternative` (typically a
    /// slower visual detector). The alternative is cancelled as soon as the
    /// accessibility search finds the element; otherwise it is awaited for
    /// at most `raceTimeoutMs`.
    pub async fn find_element_racing<F, T>(
        &self,
        request: &FindRequest,
        alternative: F,
    ) -> RaceOutcome<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let token = CancellationToken::new();
        let alternative_token = token.clone();
        let alternative = tokio::spawn(async move {
            tokio::select! {
                _ = alternative_token.cancelled() => None,
                value = alternative => Some(value),
            }
        });

        let accessibility = self.find_element(request).await;
        match accessibility {
            Ok(result) if result.found => {
                token.cancel();
                RaceOutcome::Accessibility(result)
            }
            accessibility => {
                match tokio::time::timeout(self.inner.config.race_timeout(), alternative).await {
                    Ok(Ok(Some(value))) => RaceOutcome::Alternative {
                        value,
                        accessibility,
                    },
                    Ok(Ok(None)) => RaceOutcome::Neither {
                        accessibility,
                        alternative_timed_out: false,
                    },
                    Ok(Err(err)) => {
                        log_warn!("alternative detector failed: {}", err);
                        RaceOutcome::Neither {
                            accessibility,
                            alternative_timed_out: false,
                        }
                    }
                    Err(_) => {
                        token.cancel();
                        RaceOutcome::Neither {
                            accessibility,
                            alternative_timed_out: true,
                        }
                    }
                }
            }
        }
    }

    pub async fn diagnostic_report(&self) -> DiagnosticReport {
        let trusted = self
            .with_provider(|provider| Ok(provider.is_trusted()))
            .await
            .unwrap_or(false);
        let inputs = ReportInputs {
            config: self.inner.config.as_ref(),
            provider_trusted: trusted,
            recovery: self.inner.recovery.state(),
            monitor: self.inner.monitor.get_snapshot().await,
            cache: self.inner.cache.stats(),
            fuzzy: self.inner.fuzzy.stats(),
            background_tasks: self.inner.workers.statuses(),
        };
        ReportingSystem.generate(&inputs)
    }

    pub async fn export_report(&self, path: &Path) -> anyhow::Result<DiagnosticReport> {
        let report = self.diagnostic_report().await;
        report.export(path)?;
        Ok(report)
    }

    /// Cancels background work and waits for it to stop.
    pub async fn shutdown(&self) {
        self.inner.workers.shutdown().await;
    }
}
