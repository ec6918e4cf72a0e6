//! Jobs the engine queues on its [`super::WorkerPool`].

use anyhow::Result;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::detection::DetectionEngine;
use crate::roles::normalize_role;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Role/label pairs worth scoring ahead of time; these cover most spoken
/// "click X" requests in document and mail apps.
pub const COMMON_PATTERNS: &[(&str, &str)] = &[
    ("button", "ok"),
    ("button", "cancel"),
    ("button", "save"),
    ("button", "send"),
    ("button", "open"),
    ("button", "close"),
    ("button", "done"),
    ("button", "next"),
    ("button", "back"),
    ("button", "delete"),
    ("button", "search"),
    ("menuItem", "file"),
    ("menuItem", "edit"),
    ("menuItem", "view"),
    ("menuItem", "new"),
    ("menuItem", "copy"),
    ("menuItem", "paste"),
    ("link", "sign in"),
    ("link", "home"),
    ("tab", "general"),
    ("checkbox", "remember me"),
];

/// Walks the focused application into the cache, then warms the fuzzy
/// cache for it when predictive caching is on.
pub async fn preload_focused(engine: DetectionEngine, token: CancellationToken) -> Result<()> {
    let Some(app) = engine.focused_application().await? else {
        log_debug!("preload skipped: no focused application");
        return Ok(());
    };
    if token.is_cancelled() {
        return Ok(());
    }

    let started = Instant::now();
    let cached = engine.preload_app(&app).await?;
    engine
        .monitor()
        .record_stage("preload", started.elapsed())
        .await;
    log_info!("preloaded {} elements for {}", cached, app);

    if engine.config().predictive_caching_enabled && !token.is_cancelled() {
        warm_common_patterns(engine, app.cache_key(), token).await?;
    }
    Ok(())
}

/// Scores every [`COMMON_PATTERNS`] label against the cached titles of the
/// matching role so that later lookups hit the fuzzy result cache.
///
/// Does nothing if `app_key` has no cache entry yet.
pub async fn warm_common_patterns(
    engine: DetectionEngine,
    app_key: String,
    token: CancellationToken,
) -> Result<()> {
    let Some(entry) = engine.cache().peek(&app_key) else {
        log_debug!("predictive warm skipped: {} not cached", app_key);
        return Ok(());
    };
    let threshold = engine.config().fuzzy_confidence_threshold;

    let mut scored = 0usize;
    for (role, label) in COMMON_PATTERNS {
        if token.is_cancelled() {
            break;
        }
        for &pos in entry.index.by_role(&normalize_role(role)) {
            let Some(record) = entry.elements.get(pos) else {
                continue;
            };
            if record.title.is_empty() {
                continue;
            }
            engine.fuzzy().match_text(label, &record.title, threshold);
            scored += 1;
        }
        tokio::task::yield_now().await;
    }

    log_debug!("predictive warm scored {} pairs for {}", scored, app_key);
    Ok(())
}
