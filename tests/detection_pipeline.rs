use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axlocate::background::TaskState;
use axlocate::{
    AppIdentity, DetectionConfig, DetectionEngine, DetectionError, FailureKind, FindRequest,
    HealthStatus, MemoryTreeProvider, NodeSpec, ProviderError, RaceOutcome, SearchStage,
};

fn mail() -> AppIdentity {
    AppIdentity::new(501, "Mail").with_bundle_id("com.apple.mail")
}

fn compose_window() -> Vec<NodeSpec> {
    vec![NodeSpec::new("AXWindow")
        .title("New Message")
        .bounds(0.0, 0.0, 900.0, 700.0)
        .child(
            NodeSpec::new("AXToolbar")
                .bounds(0.0, 0.0, 900.0, 50.0)
                .child(
                    NodeSpec::new("AXButton")
                        .title("Send")
                        .bounds(20.0, 10.0, 60.0, 25.0),
                )
                .child(
                    NodeSpec::new("AXStaticText")
                        .title("Send")
                        .bounds(90.0, 10.0, 40.0, 25.0),
                )
                .child(
                    NodeSpec::new("AXLink")
                        .title("Sendgrid")
                        .bounds(140.0, 10.0, 80.0, 25.0),
                )
                .child(
                    NodeSpec::new("AXButton")
                        .attr("AXDescription", "Attach file")
                        .bounds(230.0, 10.0, 30.0, 25.0),
                ),
        )
        .child(
            NodeSpec::new("AXTextField")
                .attr("AXPlaceholderValue", "Subject")
                .bounds(20.0, 80.0, 600.0, 24.0),
        )]
}

fn setup(config: DetectionConfig) -> (DetectionEngine, Arc<MemoryTreeProvider>) {
    let provider = Arc::new(MemoryTreeProvider::new());
    provider.set_app(mail(), compose_window());
    provider.set_focused(Some(mail()));
    let engine = DetectionEngine::new(provider.clone(), config);
    (engine, provider)
}

fn fast_recovery(max_attempts: u32) -> DetectionConfig {
    DetectionConfig {
        max_recovery_attempts: max_attempts,
        permission_check_interval_secs: 0,
        recovery_base_delay_ms: 0,
        ..DetectionConfig::default()
    }
}

#[tokio::test]
async fn button_wins_over_text_and_link() {
    let (engine, _) = setup(DetectionConfig::default());
    let result = engine
        .find_element(&FindRequest::new("", "Send"))
        .await
        .unwrap();

    assert!(result.found);
    let element = result.element.as_ref().unwrap();
    assert_eq!(element.record.role, "button");
    assert_eq!(element.center_point, (50, 22));
    assert_eq!(result.confidence, 100);
    assert_eq!(result.matched_attribute, "title");
    assert!(result.roles_checked.contains(&"button".to_string()));
    assert!(result.attributes_checked.contains(&"title".to_string()));
}

#[tokio::test]
async fn label_phrasing_is_cleaned_up() {
    let (engine, _) = setup(DetectionConfig::default());
    let result = engine
        .find_element(&FindRequest::new("button", "click the Send button"))
        .await
        .unwrap();
    assert!(result.found);
    assert_eq!(result.diagnostics.target, "send");
    assert_eq!(result.element.unwrap().record.title, "Send");
}

#[tokio::test]
async fn description_attribute_is_searched() {
    let (engine, _) = setup(DetectionConfig::default());
    let result = engine
        .find_element(&FindRequest::new("", "Attach file"))
        .await
        .unwrap();
    assert!(result.found);
    assert_eq!(result.matched_attribute, "description");
    assert_eq!(result.center_point(), Some((245, 22)));
}

#[tokio::test]
async fn specific_role_reaches_non_clickable_elements() {
    let config = DetectionConfig {
        searchable_attributes: vec!["title".into(), "placeholder".into()],
        ..DetectionConfig::default()
    };
    let (engine, _) = setup(config);
    let result = engine
        .find_element(&FindRequest::new("AXTextField", "Subject"))
        .await
        .unwrap();
    assert!(result.found);
    assert_eq!(result.element.unwrap().record.role, "textField");
    assert_eq!(result.matched_attribute, "placeholder");
}

#[tokio::test]
async fn miss_returns_a_full_diagnostic_trail() {
    let (engine, _) = setup(DetectionConfig::default());
    let result = engine
        .find_element(&FindRequest::new("", "Quarterly Forecast"))
        .await
        .unwrap();

    assert!(!result.found);
    assert_eq!(result.confidence, 0);
    assert!(result.matched_attribute.is_empty());
    let stages: Vec<_> = result.diagnostics.stages.iter().map(|s| s.stage).collect();
    assert_eq!(
        stages,
        vec![SearchStage::Enhanced, SearchStage::RoleRestricted, SearchStage::Strict]
    );
    assert!(result.diagnostics.has_event(FailureKind::ElementNotFound));
    assert!(!result.fuzzy_candidates.is_empty());
    assert!(result.fuzzy_candidates.iter().all(|c| !c.matched));
}

#[tokio::test]
async fn fuzzy_disabled_falls_back_to_exact_and_substring() {
    let config = DetectionConfig {
        fuzzy_matching_enabled: false,
        ..DetectionConfig::default()
    };
    let provider = Arc::new(MemoryTreeProvider::new());
    provider.set_app(
        mail(),
        vec![NodeSpec::new("AXButton")
            .title("Sign In")
            .bounds(10.0, 10.0, 80.0, 30.0)],
    );
    provider.set_focused(Some(mail()));
    let engine = DetectionEngine::new(provider, config);

    let exact = engine
        .find_element(&FindRequest::new("", "sign in"))
        .await
        .unwrap();
    assert!(exact.found);
    assert_eq!(exact.confidence, 100);

    let partial = engine
        .find_element(&FindRequest::new("", "Sign"))
        .await
        .unwrap();
    assert!(partial.found);
    assert_eq!(partial.confidence, 57);

    let none = engine
        .find_element(&FindRequest::new("", "Register"))
        .await
        .unwrap();
    assert!(!none.found);
}

#[tokio::test]
async fn expired_entry_is_rebuilt() {
    let config = DetectionConfig {
        cache_ttl_seconds: 1,
        ..DetectionConfig::default()
    };
    let (engine, provider) = setup(config);
    let request = FindRequest::new("", "Send");

    engine.find_element(&request).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let result = engine.find_element(&request).await.unwrap();

    assert!(result.found);
    assert_eq!(result.diagnostics.cache_hit, Some(false));
    assert_eq!(provider.top_level_calls(), 2);
    assert_eq!(engine.cache_stats().expirations, 1);
}

#[tokio::test]
async fn permission_loss_degrades_and_short_circuits() {
    let (engine, provider) = setup(DetectionConfig::default());
    let request = FindRequest::new("", "Send");
    engine.find_element(&request).await.unwrap();
    engine.clear_cache();
    let calls = provider.top_level_calls();

    provider.set_trusted(false);
    let err = engine.find_element(&request).await.unwrap_err();
    assert!(matches!(err, DetectionError::PermissionDenied(_)));
    assert!(engine.is_degraded());

    provider.set_trusted(true);
    let result = engine.find_element(&request).await.unwrap();
    assert!(!result.found);
    assert!(result.diagnostics.degraded);
    assert!(result.diagnostics.has_event(FailureKind::DegradedMode));
    assert!(!result.diagnostics.recovery_attempted);
    assert_eq!(provider.top_level_calls(), calls);
}

#[tokio::test]
async fn api_unavailable_during_traversal_is_fatal() {
    let (engine, provider) = setup(DetectionConfig::default());
    provider.fail_top_level(Some(ProviderError::ApiUnavailable("server gone".into())));
    let err = engine
        .find_element(&FindRequest::new("", "Send"))
        .await
        .unwrap_err();
    assert!(matches!(err, DetectionError::ApiUnavailable(_)));
    assert_eq!(engine.recovery_state().error_count, 1);
}

#[tokio::test]
async fn recovery_restores_normal_operation() {
    let (engine, provider) = setup(fast_recovery(3));
    let request = FindRequest::new("", "Send");

    provider.set_trusted(false);
    assert!(engine.find_element(&request).await.is_err());

    provider.set_trusted(true);
    let result = engine.find_element(&request).await.unwrap();
    assert!(result.diagnostics.recovery_attempted);
    assert!(!result.diagnostics.degraded);
    assert!(result.found);
    assert!(!engine.is_degraded());
}

#[tokio::test]
async fn exhausted_recovery_needs_an_explicit_reset() {
    let (engine, provider) = setup(fast_recovery(2));
    let request = FindRequest::new("", "Send");

    provider.set_trusted(false);
    assert!(engine.find_element(&request).await.is_err());
    for _ in 0..2 {
        let result = engine.find_element(&request).await.unwrap();
        assert!(result.diagnostics.recovery_attempted);
        assert!(result.diagnostics.degraded);
    }
    assert_eq!(engine.recovery_state().recovery_attempts, 2);

    // Attempts are used up: further checks are no-ops even once trusted.
    provider.set_trusted(true);
    assert!(!engine.attempt_recovery().await);
    let result = engine.find_element(&request).await.unwrap();
    assert!(!result.diagnostics.recovery_attempted);
    assert!(result.diagnostics.degraded);
    assert_eq!(engine.recovery_state().recovery_attempts, 2);

    engine.reset_degraded_mode();
    assert!(engine.find_element(&request).await.unwrap().found);
}

#[tokio::test]
async fn slow_provider_marks_the_lookup_timed_out() {
    let config = DetectionConfig {
        fast_path_timeout_ms: 10,
        ..DetectionConfig::default()
    };
    let (engine, provider) = setup(config);
    provider.set_latency(Some(Duration::from_millis(30)));

    let result = engine
        .find_element(&FindRequest::new("", "Send"))
        .await
        .unwrap();
    assert!(result.found);
    assert!(result.diagnostics.timed_out);

    let snapshot = engine.monitor().get_snapshot().await;
    assert_eq!(snapshot.timeout_count, 1);
    assert!(snapshot.stages.contains_key("traversal"));
}

#[tokio::test]
async fn race_prefers_accessibility_when_it_finds_the_element() {
    let (engine, _) = setup(DetectionConfig::default());
    let finished = Arc::new(AtomicBool::new(false));
    let alternative_finished = Arc::clone(&finished);
    let outcome = engine
        .find_element_racing(&FindRequest::new("", "Send"), async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            alternative_finished.store(true, Ordering::SeqCst);
            "vision"
        })
        .await;
    match outcome {
        RaceOutcome::Accessibility(result) => assert!(result.found),
        _ => panic!("expected the accessibility result"),
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn race_falls_back_to_the_alternative() {
    let (engine, _) = setup(DetectionConfig::default());
    let outcome = engine
        .find_element_racing(&FindRequest::new("", "Quarterly Forecast"), async {
            (412, 300)
        })
        .await;
    match outcome {
        RaceOutcome::Alternative {
            value,
            accessibility,
        } => {
            assert_eq!(value, (412, 300));
            assert!(!accessibility.unwrap().found);
        }
        _ => panic!("expected the alternative result"),
    }
}

#[tokio::test]
async fn race_gives_up_on_a_slow_alternative() {
    let config = DetectionConfig {
        race_timeout_ms: 50,
        ..DetectionConfig::default()
    };
    let (engine, _) = setup(config);
    let outcome = engine
        .find_element_racing(&FindRequest::new("", "Quarterly Forecast"), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
        })
        .await;
    assert!(matches!(
        outcome,
        RaceOutcome::Neither {
            alternative_timed_out: true,
            ..
        }
    ));
}

#[tokio::test]
async fn background_preload_warms_the_cache() {
    let (engine, provider) = setup(DetectionConfig::default());
    let id = engine.preload_focused_app().unwrap();
    assert_eq!(engine.workers().wait(id).await, Some(TaskState::Completed));
    assert_eq!(provider.top_level_calls(), 1);

    let result = engine
        .find_element(&FindRequest::new("", "Send"))
        .await
        .unwrap();
    assert!(result.found);
    assert_eq!(result.diagnostics.cache_hit, Some(true));
    assert_eq!(provider.top_level_calls(), 1);

    let disabled = DetectionConfig {
        preload_enabled: false,
        ..DetectionConfig::default()
    };
    let (engine, _) = setup(disabled);
    assert!(engine.preload_focused_app().is_none());
}

#[tokio::test]
async fn late_cancel_keeps_the_preloaded_entry() {
    let (engine, provider) = setup(DetectionConfig::default());
    provider.set_latency(Some(Duration::from_millis(50)));
    let id = engine.preload_focused_app().unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(engine.workers().cancel(id));
    assert_eq!(engine.workers().wait(id).await, Some(TaskState::Cancelled));
    assert!(engine.cache().peek(&mail().cache_key()).is_some());

    provider.set_latency(None);
    let result = engine
        .find_element(&FindRequest::new("", "Send"))
        .await
        .unwrap();
    assert!(result.found);
    assert_eq!(result.diagnostics.cache_hit, Some(true));
    assert_eq!(provider.top_level_calls(), 1);
}

#[tokio::test]
async fn predictive_warming_runs_on_the_pool() {
    let (engine, _) = setup(DetectionConfig::default());
    assert!(engine.preload_app(&mail()).await.unwrap() > 0);

    let id = engine.warm_predictive_cache(&mail()).unwrap();
    assert_eq!(engine.workers().wait(id).await, Some(TaskState::Completed));
    assert!(engine.fuzzy_stats().cache_entries > 0);
    assert_eq!(engine.workers().reap_finished(), 1);
}

#[tokio::test]
async fn concurrent_lookups_share_one_engine() {
    let (engine, _) = setup(DetectionConfig::default());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let label = if i % 2 == 0 { "Send" } else { "Attach file" };
                engine.find_element(&FindRequest::new("", label)).await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().found);
    }
    assert_eq!(engine.monitor().history_len().await, 8);
}

#[tokio::test]
async fn diagnostic_report_reflects_engine_state() {
    let (engine, provider) = setup(DetectionConfig::default());
    let request = FindRequest::new("", "Send");
    engine.find_element(&request).await.unwrap();
    engine.find_element(&request).await.unwrap();

    let report = engine.diagnostic_report().await;
    assert!(report.system_status.enabled);
    assert!(!report.system_status.degraded);
    assert_eq!(report.performance_metrics.total_samples, 2);
    assert_eq!(report.performance_metrics.success_rate, Some(100.0));
    assert_eq!(report.cache_status.elements.hits, 1);
    assert_eq!(report.performance_metrics.health.status, HealthStatus::Excellent);

    provider.set_trusted(false);
    engine.clear_cache();
    let _ = engine.find_element(&request).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    let report = engine.export_report(&path).await.unwrap();
    assert!(report.system_status.degraded);
    assert!(!report.system_status.enabled);
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.contains("not trusted")));
    assert!(path.exists());

    engine.shutdown().await;
}
