//! Boundary to the platform accessibility API.
//!
//! The engine never walks a native tree itself; it asks a [`TreeProvider`]
//! for top-level elements, children, attributes and geometry. Calls may block
//! on IPC with the target application, so callers must not hold locks across
//! them.

pub mod memory;

use serde::{Deserialize, Serialize};
use std::{
    any::Any,
    fmt,
    sync::{Arc, Weak},
};

use crate::error::ProviderError;

pub use memory::{AppSnapshot, MemoryNode, MemoryTreeProvider, NodeSpec, TreeSnapshot};

/// Owning handle to a native element, as produced by the provider.
pub type NodeHandle = Arc<dyn Any + Send + Sync>;

/// Non-owning back-reference stored in cached records.
///
/// The platform object may disappear at any time (window closed, app quit);
/// [`NodeRef::upgrade`] then returns `None` and the record stays usable as a
/// plain value.
#[derive(Clone, Default)]
pub struct NodeRef(Option<Weak<dyn Any + Send + Sync>>);

impl NodeRef {
    pub fn new(handle: &NodeHandle) -> Self {
        Self(Some(Arc::downgrade(handle)))
    }

    pub fn detached() -> Self {
        Self(None)
    }

    pub fn upgrade(&self) -> Option<NodeHandle> {
        self.0.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_alive(&self) -> bool {
        self.0
            .as_ref()
            .map(|weak| weak.strong_count() > 0)
            .unwrap_or(false)
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Weak::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

/// A running application as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct AppIdentity {
    pub pid: u32,
    pub name: String,
    #[serde(default)]
    pub bundle_id: Option<String>,
}

impl AppIdentity {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            bundle_id: None,
        }
    }

    pub fn with_bundle_id(mut self, bundle_id: impl Into<String>) -> Self {
        self.bundle_id = Some(bundle_id.into());
        self
    }

    /// Stable cache key: bundle id when known, otherwise the lowercased name.
    pub fn cache_key(&self) -> String {
        match &self.bundle_id {
            Some(bundle) if !bundle.is_empty() => bundle.clone(),
            _ => self.name.to_lowercase(),
        }
    }

    /// Name lookup used when a caller targets an app by name.
    pub fn matches_name(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return false;
        }
        self.name.to_lowercase() == query
            || self
                .bundle_id
                .as_deref()
                .map(|bundle| bundle.to_lowercase() == query)
                .unwrap_or(false)
    }
}

impl fmt::Display for AppIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (pid {})", self.name, self.pid)
    }
}

/// Platform accessibility access.
///
/// Implementations wrap AXUIElement (macOS), UI Automation (Windows) or
/// AT-SPI (Linux). All methods are synchronous and may block.
pub trait TreeProvider: Send + Sync {
    fn list_top_level_elements(&self, app: &AppIdentity) -> Result<Vec<NodeHandle>, ProviderError>;

    fn get_children(&self, node: &NodeHandle) -> Result<Vec<NodeHandle>, ProviderError>;

    /// `None` when the attribute is absent or unreadable on this node.
    fn get_attribute(&self, node: &NodeHandle, name: &str) -> Option<String>;

    fn get_bounding_box(&self, node: &NodeHandle) -> Option<BoundingBox>;

    /// Whether this process holds accessibility permission.
    fn is_trusted(&self) -> bool;

    fn get_focused_application(&self) -> Result<Option<AppIdentity>, ProviderError>;

    fn list_running_applications(&self) -> Result<Vec<AppIdentity>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ref_does_not_keep_node_alive() {
        let handle: NodeHandle = Arc::new(42u32);
        let weak = NodeRef::new(&handle);
        assert!(weak.is_alive());
        assert!(weak.upgrade().is_some());

        drop(handle);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
        assert!(!NodeRef::detached().is_alive());
    }

    #[test]
    fn cache_key_prefers_bundle_id() {
        let mail = AppIdentity::new(10, "Mail").with_bundle_id("com.apple.mail");
        assert_eq!(mail.cache_key(), "com.apple.mail");
        assert_eq!(AppIdentity::new(11, "Notes").cache_key(), "notes");
    }

    #[test]
    fn matches_by_name_or_bundle() {
        let mail = AppIdentity::new(10, "Mail").with_bundle_id("com.apple.mail");
        assert!(mail.matches_name("mail"));
        assert!(mail.matches_name("com.apple.mail"));
        assert!(!mail.matches_name("Safari"));
        assert!(!mail.matches_name("  "));
    }
}
