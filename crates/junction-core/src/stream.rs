//! Stream data model.
//!
//! Streams are hierarchical tag nodes used to categorize events. Sibling
//! streams under the same parent have unique names. Each non-local store's
//! root is a synthesized pseudo-node, never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stream node, possibly carrying its (ordered) children.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    /// Stream id (store-qualified in the federated representation, except
    /// for the local store).
    pub id: String,
    /// Display name, unique among siblings.
    pub name: String,
    /// Parent stream id; `None` means root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Ordered child subtrees.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Stream>,
    /// Soft-trash flag.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub trashed: bool,
    /// Tombstone timestamp; set only on deletion records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Creating principal.
    pub created_by: String,
    /// Last-modification timestamp.
    pub modified: DateTime<Utc>,
    /// Last-modifying principal.
    pub modified_by: String,
}

impl Stream {
    /// Depth-first search for a node by id within this subtree.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Stream> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

/// Caller-supplied fields for creating a stream.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStream {
    /// Explicit id; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name.
    pub name: String,
    /// Parent stream id; `None` means root (of the local store unless the
    /// id is qualified).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// When set, a tombstone is created instead of a live stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DateTime<Utc>>,
}

impl NewStream {
    /// Minimal constructor for the common case.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;

    fn node(id: &str, children: Vec<Stream>) -> Stream {
        Stream {
            id: id.into(),
            name: id.to_uppercase(),
            parent_id: None,
            children,
            trashed: false,
            deleted: None,
            created: Utc::now(),
            created_by: "u1".into(),
            modified: Utc::now(),
            modified_by: "u1".into(),
        }
    }

    #[test]
    fn find_descends_into_children() {
        let tree = node("a", vec![node("b", vec![node("c", vec![])])]);
        assert_eq!(tree.find("c").map(|s| s.id.as_str()), Some("c"));
        assert!(tree.find("missing").is_none());
    }

    #[test]
    fn empty_children_are_omitted_on_the_wire() {
        let json = serde_json::to_value(node("a", vec![])).unwrap();
        assert!(json.get("children").is_none());
        assert!(json.get("parentId").is_none());
    }
}
