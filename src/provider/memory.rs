//! In-memory accessibility tree.
//!
//! Backs the replay binary (trees captured as JSON snapshots) and the test
//! suite. Failure injection mirrors what real providers do under load:
//! revoked permissions, unreadable subtrees, slow IPC.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use super::{AppIdentity, BoundingBox, NodeHandle, TreeProvider};
use crate::error::ProviderError;

#[derive(Debug)]
pub struct MemoryNode {
    attributes: BTreeMap<String, String>,
    bounds: Option<BoundingBox>,
    children: Vec<Arc<MemoryNode>>,
    children_unreadable: bool,
}

/// Builder for [`MemoryNode`] trees.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub role: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub bounds: Option<BoundingBox>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub children: Vec<NodeSpec>,
    #[serde(default)]
    pub children_unreadable: bool,
}

impl NodeSpec {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            ..Self::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn bounds(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.bounds = Some(BoundingBox::new(x, y, width, height));
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }

    pub fn children_unreadable(mut self) -> Self {
        self.children_unreadable = true;
        self
    }

    fn build(&self) -> Arc<MemoryNode> {
        let mut attributes = self.attributes.clone();
        attributes.insert("AXRole".into(), self.role.clone());
        if let Some(title) = &self.title {
            attributes.insert("AXTitle".into(), title.clone());
        }
        if let Some(enabled) = self.enabled {
            attributes.insert("AXEnabled".into(), enabled.to_string());
        }

        Arc::new(MemoryNode {
            attributes,
            bounds: self.bounds,
            children: self.children.iter().map(NodeSpec::build).collect(),
            children_unreadable: self.children_unreadable,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSnapshot {
    pub app: AppIdentity,
    #[serde(default)]
    pub elements: Vec<NodeSpec>,
}

/// Serialisable description of a whole desktop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeSnapshot {
    #[serde(default = "default_trusted")]
    pub trusted: bool,
    #[serde(default)]
    pub focused: Option<String>,
    #[serde(default)]
    pub apps: Vec<AppSnapshot>,
}

fn default_trusted() -> bool {
    true
}

impl TreeSnapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read tree snapshot from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse tree snapshot {}", path.display()))
    }
}

struct AppTree {
    app: AppIdentity,
    roots: Vec<Arc<MemoryNode>>,
}

pub struct MemoryTreeProvider {
    apps: Mutex<Vec<AppTree>>,
    focused: Mutex<Option<AppIdentity>>,
    trusted: AtomicBool,
    top_level_failure: Mutex<Option<ProviderError>>,
    latency: Mutex<Option<Duration>>,
    top_level_calls: AtomicUsize,
}

impl Default for MemoryTreeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTreeProvider {
    pub fn new() -> Self {
        Self {
            apps: Mutex::new(Vec::new()),
            focused: Mutex::new(None),
            trusted: AtomicBool::new(true),
            top_level_failure: Mutex::new(None),
            latency: Mutex::new(None),
            top_level_calls: AtomicUsize::new(0),
        }
    }

    pub fn from_snapshot(snapshot: &TreeSnapshot) -> Self {
        let provider = Self::new();
        provider.trusted.store(snapshot.trusted, Ordering::SeqCst);
        for app in &snapshot.apps {
            provider.set_app(app.app.clone(), app.elements.clone());
        }
        if let Some(name) = &snapshot.focused {
            let focused = snapshot
                .apps
                .iter()
                .find(|entry| entry.app.matches_name(name))
                .map(|entry| entry.app.clone());
            provider.set_focused(focused);
        }
        provider
    }

    /// Adds or replaces an application's tree.
    pub fn set_app(&self, app: AppIdentity, roots: Vec<NodeSpec>) {
        let roots = roots.iter().map(NodeSpec::build).collect();
        let mut apps = self.apps.lock().unwrap_or_else(|e| e.into_inner());
        apps.retain(|tree| tree.app != app);
        apps.push(AppTree { app, roots });
    }

    pub fn remove_app(&self, app: &AppIdentity) {
        let mut apps = self.apps.lock().unwrap_or_else(|e| e.into_inner());
        apps.retain(|tree| &tree.app != app);
    }

    pub fn set_focused(&self, app: Option<AppIdentity>) {
        *self.focused.lock().unwrap_or_else(|e| e.into_inner()) = app;
    }

    pub fn set_trusted(&self, trusted: bool) {
        self.trusted.store(trusted, Ordering::SeqCst);
    }

    /// Makes every `list_top_level_elements` call fail until cleared.
    pub fn fail_top_level(&self, error: Option<ProviderError>) {
        *self
            .top_level_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = error;
    }

    /// Simulated IPC latency applied to `list_top_level_elements`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Number of top-level traversals requested so far.
    pub fn top_level_calls(&self) -> usize {
        self.top_level_calls.load(Ordering::SeqCst)
    }

    fn node<'a>(&self, handle: &'a NodeHandle) -> Option<&'a MemoryNode> {
        handle.downcast_ref::<MemoryNode>()
    }
}

impl TreeProvider for MemoryTreeProvider {
    fn list_top_level_elements(&self, app: &AppIdentity) -> Result<Vec<NodeHandle>, ProviderError> {
        self.top_level_calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = latency {
            std::thread::sleep(delay);
        }

        if let Some(err) = self
            .top_level_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Err(err);
        }
        if !self.trusted.load(Ordering::SeqCst) {
            return Err(ProviderError::PermissionDenied(
                "process is not trusted for accessibility".into(),
            ));
        }

        let apps = self.apps.lock().unwrap_or_else(|e| e.into_inner());
        let tree = apps
            .iter()
            .find(|tree| &tree.app == app)
            .ok_or_else(|| ProviderError::CannotComplete(format!("no such application: {app}")))?;

        Ok(tree
            .roots
            .iter()
            .map(|root| Arc::clone(root) as NodeHandle)
            .collect())
    }

    fn get_children(&self, handle: &NodeHandle) -> Result<Vec<NodeHandle>, ProviderError> {
        let node = self.node(handle).ok_or(ProviderError::InvalidElement)?;
        if node.children_unreadable {
            return Err(ProviderError::CannotComplete("children unreadable".into()));
        }
        Ok(node
            .children
            .iter()
            .map(|child| Arc::clone(child) as NodeHandle)
            .collect())
    }

    fn get_attribute(&self, handle: &NodeHandle, name: &str) -> Option<String> {
        self.node(handle)?.attributes.get(name).cloned()
    }

    fn get_bounding_box(&self, handle: &NodeHandle) -> Option<BoundingBox> {
        self.node(handle)?.bounds
    }

    fn is_trusted(&self) -> bool {
        self.trusted.load(Ordering::SeqCst)
    }

    fn get_focused_application(&self) -> Result<Option<AppIdentity>, ProviderError> {
        Ok(self.focused.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn list_running_applications(&self) -> Result<Vec<AppIdentity>, ProviderError> {
        let apps = self.apps.lock().unwrap_or_else(|e| e.into_inner());
        Ok(apps.iter().map(|tree| tree.app.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail() -> AppIdentity {
        AppIdentity::new(100, "Mail")
    }

    #[test]
    fn serves_tree_and_attributes() {
        let provider = MemoryTreeProvider::new();
        provider.set_app(
            mail(),
            vec![NodeSpec::new("AXWindow")
                .title("Inbox")
                .child(NodeSpec::new("AXButton").title("Send").bounds(10.0, 10.0, 40.0, 20.0))],
        );

        let roots = provider.list_top_level_elements(&mail()).unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(provider.get_attribute(&roots[0], "AXTitle").as_deref(), Some("Inbox"));

        let children = provider.get_children(&roots[0]).unwrap();
        assert_eq!(provider.get_attribute(&children[0], "AXRole").as_deref(), Some("AXButton"));
        assert_eq!(
            provider.get_bounding_box(&children[0]),
            Some(BoundingBox::new(10.0, 10.0, 40.0, 20.0))
        );
        assert_eq!(provider.top_level_calls(), 1);
    }

    #[test]
    fn untrusted_provider_denies_traversal() {
        let provider = MemoryTreeProvider::new();
        provider.set_app(mail(), vec![]);
        provider.set_trusted(false);
        let err = provider.list_top_level_elements(&mail()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn snapshot_round_trip_sets_focus() {
        let json = r#"{
            "focused": "Mail",
            "apps": [{
                "app": {"pid": 100, "name": "Mail"},
                "elements": [{"role": "AXButton", "title": "Send"}]
            }]
        }"#;
        let snapshot: TreeSnapshot = serde_json::from_str(json).unwrap();
        assert!(snapshot.trusted);
        let provider = MemoryTreeProvider::from_snapshot(&snapshot);
        assert_eq!(provider.get_focused_application().unwrap(), Some(mail()));
        assert_eq!(provider.list_running_applications().unwrap(), vec![mail()]);
    }
}
