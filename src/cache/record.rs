use serde::Serialize;
use std::collections::BTreeMap;

use crate::provider::{BoundingBox, NodeRef};
use crate::roles::{self, RoleCategory};

/// Coordinates beyond this are treated as off-screen garbage (some providers
/// report `f64::MAX`-ish sentinels for detached elements).
pub const MAX_SCREEN_COORDINATE: f64 = 20_000.0;

/// One flattened accessibility element.
///
/// Plain value: everything the matcher needs is copied out of the native
/// node during traversal, and `node` is only a weak back-reference.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementRecord {
    /// Canonical role key (see [`roles::normalize_role`]).
    pub role: String,
    /// Role exactly as the platform reported it.
    pub raw_role: String,
    pub title: String,
    pub attributes: BTreeMap<String, String>,
    pub bounds: BoundingBox,
    pub enabled: bool,
    /// Cache key of the owning application.
    pub app_key: String,
    pub depth: usize,
    #[serde(skip)]
    pub node: NodeRef,
}

impl ElementRecord {
    pub fn new(
        raw_role: &str,
        title: impl Into<String>,
        bounds: BoundingBox,
        app_key: impl Into<String>,
    ) -> Self {
        Self {
            role: roles::normalize_role(raw_role),
            raw_role: raw_role.to_string(),
            title: title.into(),
            attributes: BTreeMap::new(),
            bounds,
            enabled: true,
            app_key: app_key.into(),
            depth: 0,
            node: NodeRef::detached(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn category(&self) -> RoleCategory {
        roles::category_of(&self.role)
    }

    /// Logical attribute lookup; `title` and `role` are first-class fields.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        let value = match name {
            "title" => Some(self.title.as_str()),
            "role" => Some(self.role.as_str()),
            _ => self.attributes.get(name).map(String::as_str),
        };
        value.filter(|value| !value.is_empty())
    }

    /// Click target in screen pixels: top-left plus half the size, truncated.
    ///
    /// `None` for non-finite or degenerate geometry.
    pub fn center_point(&self) -> Option<(i64, i64)> {
        let b = &self.bounds;
        if ![b.x, b.y, b.width, b.height].iter().all(|v| v.is_finite()) {
            return None;
        }
        if b.width <= 0.0 || b.height <= 0.0 {
            return None;
        }
        let cx = (b.x + b.width / 2.0).trunc();
        let cy = (b.y + b.height / 2.0).trunc();
        Some((cx as i64, cy as i64))
    }

    /// Non-degenerate geometry inside the plausible screen area.
    pub fn has_usable_geometry(&self) -> bool {
        let b = &self.bounds;
        self.center_point().is_some()
            && b.x >= 0.0
            && b.y >= 0.0
            && b.x <= MAX_SCREEN_COORDINATE
            && b.y <= MAX_SCREEN_COORDINATE
    }

    pub fn is_actionable(&self) -> bool {
        self.enabled && self.has_usable_geometry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(x: f64, y: f64, w: f64, h: f64) -> ElementRecord {
        ElementRecord::new("AXButton", "Send", BoundingBox::new(x, y, w, h), "mail")
    }

    #[test]
    fn center_point_truncates() {
        assert_eq!(record(10.0, 20.0, 31.0, 15.0).center_point(), Some((25, 27)));
        assert_eq!(record(0.0, 0.0, 1.0, 1.0).center_point(), Some((0, 0)));
        assert_eq!(record(10.4, 10.6, 3.0, 3.0).center_point(), Some((11, 12)));
    }

    #[test]
    fn degenerate_geometry_is_rejected() {
        assert_eq!(record(0.0, 0.0, 0.0, 10.0).center_point(), None);
        assert_eq!(record(f64::NAN, 0.0, 10.0, 10.0).center_point(), None);
        assert!(!record(-5.0, 0.0, 10.0, 10.0).has_usable_geometry());
        assert!(!record(0.0, 1e9, 10.0, 10.0).has_usable_geometry());
        assert!(record(100.0, 100.0, 10.0, 10.0).has_usable_geometry());
    }

    #[test]
    fn disabled_elements_are_not_actionable() {
        assert!(!record(1.0, 1.0, 10.0, 10.0).with_enabled(false).is_actionable());
    }

    #[test]
    fn attribute_lookup_skips_empty_values() {
        let rec = record(0.0, 0.0, 1.0, 1.0)
            .with_attribute("description", "send message")
            .with_attribute("value", "");
        assert_eq!(rec.attribute("title"), Some("Send"));
        assert_eq!(rec.attribute("role"), Some("button"));
        assert_eq!(rec.attribute("description"), Some("send message"));
        assert_eq!(rec.attribute("value"), None);
        assert_eq!(rec.attribute("help"), None);
    }
}
