//! Bounded-depth flattening of an application's accessibility tree into
//! [`ElementRecord`]s, depth-first in pre-order.

use serde::Serialize;

use crate::cache::ElementRecord;
use crate::error::ProviderError;
use crate::provider::{AppIdentity, BoundingBox, NodeHandle, NodeRef, TreeProvider};
use crate::roles;

const ENABLE_LOGS: bool = false;

use crate::log_debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalLimits {
    /// Roots sit at depth 0; nodes deeper than this are not visited.
    pub max_depth: usize,
    pub max_elements: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TraversalStats {
    pub visited: usize,
    pub skipped_subtrees: usize,
    pub missing_geometry: usize,
    pub missing_role: usize,
    pub deepest: usize,
    /// Stopped at `max_elements`.
    pub truncated: bool,
}

#[derive(Debug, Default)]
pub struct Traversal {
    pub elements: Vec<ElementRecord>,
    pub stats: TraversalStats,
    /// Absorbed subtree failures, for diagnostics.
    pub failures: Vec<String>,
}

/// Reads a logical attribute by trying each platform alias in order.
pub fn read_attribute(
    provider: &dyn TreeProvider,
    node: &NodeHandle,
    logical: &str,
) -> Option<String> {
    let aliases = roles::attribute_aliases(logical);
    let direct = [logical];
    let names: &[&str] = if aliases.is_empty() { &direct } else { aliases };
    names
        .iter()
        .filter_map(|name| provider.get_attribute(node, name))
        .find(|value| !value.trim().is_empty())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

struct Walker<'a> {
    provider: &'a dyn TreeProvider,
    app_key: String,
    limits: TraversalLimits,
    out: Traversal,
}

impl Walker<'_> {
    fn full(&self) -> bool {
        self.out.elements.len() >= self.limits.max_elements
    }

    fn record(&mut self, node: &NodeHandle, depth: usize) {
        let provider = self.provider;
        let raw_role = match read_attribute(provider, node, "role") {
            Some(role) => role,
            None => {
                self.out.stats.missing_role += 1;
                String::new()
            }
        };
        let title = read_attribute(provider, node, "title").unwrap_or_default();
        let bounds = match provider.get_bounding_box(node) {
            Some(bounds) => bounds,
            None => {
                self.out.stats.missing_geometry += 1;
                BoundingBox::zero()
            }
        };
        let enabled = read_attribute(provider, node, "enabled")
            .and_then(|v| parse_flag(&v))
            .unwrap_or(true);

        let mut record = ElementRecord::new(&raw_role, title, bounds, self.app_key.as_str())
            .with_enabled(enabled);
        for logical in roles::TEXT_ATTRIBUTES {
            if let Some(value) = read_attribute(provider, node, logical) {
                record = record.with_attribute(*logical, value);
            }
        }
        record.depth = depth;
        record.node = NodeRef::new(node);
        self.out.elements.push(record);
    }

    fn visit(&mut self, node: &NodeHandle, depth: usize) -> Result<(), ProviderError> {
        if self.full() {
            self.out.stats.truncated = true;
            return Ok(());
        }
        self.out.stats.visited += 1;
        self.out.stats.deepest = self.out.stats.deepest.max(depth);
        self.record(node, depth);

        if depth >= self.limits.max_depth {
            return Ok(());
        }

        let children = match self.provider.get_children(node) {
            Ok(children) => children,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                self.out.stats.skipped_subtrees += 1;
                log_debug!("skipping subtree at depth {}: {}", depth, err);
                self.out
                    .failures
                    .push(format!("children at depth {depth}: {err}"));
                return Ok(());
            }
        };

        for child in &children {
            self.visit(child, depth + 1)?;
            if self.out.stats.truncated {
                break;
            }
        }
        Ok(())
    }
}

/// Walks every top-level element of `app`.
///
/// Failing subtrees are skipped and counted. Permission and availability
/// failures abort the walk, as does any failure listing the top level.
pub fn flatten_application(
    provider: &dyn TreeProvider,
    app: &AppIdentity,
    limits: TraversalLimits,
) -> Result<Traversal, ProviderError> {
    let roots = provider.list_top_level_elements(app)?;
    let mut walker = Walker {
        provider,
        app_key: app.cache_key(),
        limits,
        out: Traversal::default(),
    };
    for root in &roots {
        walker.visit(root, 0)?;
        if walker.out.stats.truncated {
            break;
        }
    }
    log_debug!(
        "flattened {} elements for {} ({} subtrees skipped)",
        walker.out.elements.len(),
        app,
        walker.out.stats.skipped_subtrees
    );
    Ok(walker.out)
}
