//! Event data model.
//!
//! Events are timestamped records with typed, free-form JSON content,
//! referencing one or more streams. All wire-facing field names are
//! camelCase. An event's stream references always belong to the same store
//! as the event's own id — the router enforces this on every write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata for a binary attachment owned by exactly one event.
///
/// Attachment payloads live in the owning store; this struct is only the
/// descriptive entry kept on the event's attachment list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentItem {
    /// Attachment id, unique within the owning event.
    pub id: String,
    /// Original file name.
    pub file_name: String,
    /// Payload size in bytes.
    pub size: u64,
    /// MIME type, when declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Declared pixel width, for image payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Declared pixel height, for image payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// A fully materialized event.
///
/// In the *federated* representation (what router callers see) `id` and
/// `stream_ids` are store-qualified; in a store's *native* representation
/// they are bare local ids.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event id.
    pub id: String,
    /// Ordered stream references.
    pub stream_ids: Vec<String>,
    /// Type tag, e.g. `note/txt` or `mass/kg`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Free-form content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// Start of the event's time window.
    pub time: DateTime<Utc>,
    /// End of the time window; `None` means the event is still running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Creating principal.
    pub created_by: String,
    /// Last-modification timestamp.
    pub modified: DateTime<Utc>,
    /// Last-modifying principal.
    pub modified_by: String,
    /// Soft-trash flag.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub trashed: bool,
    /// Tombstone timestamp; set only on deletion records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DateTime<Utc>>,
    /// Attachment metadata entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<AttachmentItem>>,
    /// Tamper-evidence digest over the event's stable content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    /// For history entries: id of the live event this is a revision of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_id: Option<String>,
}

/// Caller-supplied fields for creating an event.
///
/// The router fills in everything else (generated id, creation/modification
/// metadata, integrity digest).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    /// Explicit id; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Ordered stream references (store-qualified in the federated form).
    pub stream_ids: Vec<String>,
    /// Type tag.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Free-form content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// Start time; defaults to now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    /// End time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Attachments may NOT be supplied here — they are added strictly after
    /// the event exists. Present so the router can reject the attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<AttachmentItem>>,
    /// Pre-computed integrity digest; reserved for trusted bulk import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

impl NewEvent {
    /// Minimal constructor for the common case.
    #[must_use]
    pub fn new(event_type: &str, stream_ids: Vec<String>) -> Self {
        Self {
            event_type: event_type.to_string(),
            stream_ids,
            ..Self::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
