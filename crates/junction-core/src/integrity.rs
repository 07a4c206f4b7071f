//! Tamper-evidence digest over an event's stable content.
//!
//! The digest covers the fields a caller controls — id, stream references,
//! type, content, the time window, and the attachment list — serialized as
//! canonical JSON (`serde_json` maps are ordered, so key order is stable).
//! Server-managed metadata is excluded; mutations that touch the covered
//! fields recompute the digest explicitly.

use sha2::{Digest, Sha256};

use crate::event::Event;

/// Digest format tag, prefixed to the hex hash.
const DIGEST_PREFIX: &str = "sha256";

/// Compute the integrity digest for an event.
#[must_use]
pub fn compute_event_digest(event: &Event) -> String {
    let canonical = serde_json::json!({
        "id": event.id,
        "streamIds": event.stream_ids,
        "type": event.event_type,
        "content": event.content,
        "time": event.time,
        "endTime": event.end_time,
        "attachments": event.attachments,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(DIGEST_PREFIX.len() + 1 + digest.len() * 2);
    hex.push_str(DIGEST_PREFIX);
    hex.push('-');
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Assign a freshly computed digest to the event in place.
pub fn sign_event(event: &mut Event) {
    event.integrity = Some(compute_event_digest(event));
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn sample() -> Event {
        Event {
            id: "e1".into(),
            stream_ids: vec!["s1".into()],
            event_type: "note/txt".into(),
            content: Some(serde_json::json!({"text": "hello"})),
            time: Utc::now(),
            end_time: None,
            created: Utc::now(),
            created_by: "u1".into(),
            modified: Utc::now(),
            modified_by: "u1".into(),
            trashed: false,
            deleted: None,
            attachments: None,
            integrity: None,
            head_id: None,
        }
    }

    #[test]
    fn digest_is_stable_for_identical_content() {
        let event = sample();
        assert_eq!(compute_event_digest(&event), compute_event_digest(&event));
    }

    #[test]
    fn digest_changes_with_content() {
        let event = sample();
        let mut changed = event.clone();
        changed.content = Some(serde_json::json!({"text": "bye"}));
        assert_ne!(compute_event_digest(&event), compute_event_digest(&changed));
    }

    #[test]
    fn digest_ignores_modification_metadata() {
        let event = sample();
        let mut touched = event.clone();
        touched.modified_by = "someone-else".into();
        assert_eq!(compute_event_digest(&event), compute_event_digest(&touched));
    }

    #[test]
    fn digest_changes_with_attachments() {
        let event = sample();
        let mut with_file = event.clone();
        with_file.attachments = Some(vec![crate::event::AttachmentItem {
            id: "a1".into(),
            file_name: "photo.jpg".into(),
            size: 512,
            mime_type: Some("image/jpeg".into()),
            width: None,
            height: None,
        }]);
        assert_ne!(
            compute_event_digest(&event),
            compute_event_digest(&with_file)
        );
    }

    #[test]
    fn sign_event_sets_prefixed_digest() {
        let mut event = sample();
        sign_event(&mut event);
        assert!(event.integrity.as_deref().unwrap().starts_with("sha256-"));
    }
}
