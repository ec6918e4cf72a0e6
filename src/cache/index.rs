use std::collections::{BTreeSet, HashMap};

use super::record::ElementRecord;
use crate::roles::{self, RoleCategory};
use crate::utils::normalize_text;

/// Lookup tables over one cache entry's element list.
///
/// Values are positions into that list. The index is only ever built from a
/// complete list in one go, never patched, so it cannot drift from the
/// records it describes.
#[derive(Debug, Clone, Default)]
pub struct ElementIndex {
    by_role: HashMap<String, Vec<usize>>,
    by_category: HashMap<RoleCategory, Vec<usize>>,
    by_title: HashMap<String, Vec<usize>>,
    by_normalized_title: HashMap<String, Vec<usize>>,
}

impl ElementIndex {
    pub fn build(records: &[ElementRecord]) -> Self {
        let mut index = Self::default();
        for (pos, record) in records.iter().enumerate() {
            index.by_role.entry(record.role.clone()).or_default().push(pos);
            index
                .by_category
                .entry(record.category())
                .or_default()
                .push(pos);

            if !record.title.is_empty() {
                index
                    .by_title
                    .entry(record.title.clone())
                    .or_default()
                    .push(pos);
                let normalized = normalize_text(&record.title);
                if !normalized.is_empty() {
                    index
                        .by_normalized_title
                        .entry(normalized)
                        .or_default()
                        .push(pos);
                }
            }
        }
        index
    }

    pub fn by_role(&self, role_key: &str) -> &[usize] {
        self.by_role.get(role_key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn by_category(&self, category: RoleCategory) -> &[usize] {
        self.by_category
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn by_title(&self, title: &str) -> &[usize] {
        self.by_title.get(title).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn by_normalized_title(&self, title: &str) -> &[usize] {
        self.by_normalized_title
            .get(&normalize_text(title))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn role_count(&self) -> usize {
        self.by_role.len()
    }

    /// Union of role, role-category, exact-title and normalised-title hits,
    /// returned in traversal order.
    ///
    /// An empty or generic `role` expands to `clickable_roles`. Roles outside
    /// the known vocabulary contribute only their own bucket, not the whole
    /// "other" category.
    pub fn lookup(&self, role: &str, title: &str, clickable_roles: &[String]) -> Vec<usize> {
        let role_keys: Vec<String> = if roles::is_generic_request(role) {
            clickable_roles.to_vec()
        } else {
            vec![roles::normalize_role(role)]
        };

        let mut positions = BTreeSet::new();
        let mut categories = BTreeSet::new();
        for key in &role_keys {
            positions.extend(self.by_role(key).iter().copied());
            let category = roles::category_of(key);
            if category != RoleCategory::Other {
                categories.insert(category);
            }
        }
        for category in categories {
            positions.extend(self.by_category(category).iter().copied());
        }

        if !title.is_empty() {
            positions.extend(self.by_title(title).iter().copied());
            positions.extend(self.by_normalized_title(title).iter().copied());
        }

        positions.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::BoundingBox;

    fn rec(role: &str, title: &str) -> ElementRecord {
        ElementRecord::new(role, title, BoundingBox::new(0.0, 0.0, 10.0, 10.0), "app")
    }

    fn sample() -> Vec<ElementRecord> {
        vec![
            rec("AXWindow", "Compose"),
            rec("AXButton", "Send"),
            rec("AXStaticText", "Send"),
            rec("AXLink", "Sendgrid"),
            rec("AXTextField", ""),
            rec("AXWebArea", "  SEND "),
        ]
    }

    #[test]
    fn buckets_by_role_category_and_title() {
        let index = ElementIndex::build(&sample());
        assert_eq!(index.by_role("button"), &[1]);
        assert_eq!(index.by_category(RoleCategory::Clickable), &[1, 3]);
        assert_eq!(index.by_title("Send"), &[1, 2]);
        assert_eq!(index.by_normalized_title("send"), &[1, 2, 5]);
        assert!(index.by_title("").is_empty());
    }

    #[test]
    fn lookup_unions_in_traversal_order() {
        let records = sample();
        let index = ElementIndex::build(&records);
        let clickable = roles::default_clickable_roles();

        assert_eq!(index.lookup("", "Send", &clickable), vec![1, 2, 3, 5]);
        assert_eq!(index.lookup("textField", "", &clickable), vec![4]);
        assert_eq!(index.lookup("AXWebArea", "nothing", &clickable), vec![5]);
    }

    #[test]
    fn rebuild_reflects_only_latest_records() {
        let first = ElementIndex::build(&sample());
        let second = ElementIndex::build(&[rec("AXButton", "Cancel")]);
        assert_eq!(first.by_role("button"), &[1]);
        assert_eq!(second.by_title("Cancel"), &[0]);
        assert!(second.by_title("Send").is_empty());
    }
}
