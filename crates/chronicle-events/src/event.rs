use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One immutable entry in a session's repair log. A revert is represented
/// as a *new* `RepairEvent` with `old_parent`/`new_parent` swapped from the
/// event it targets; the original is never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairEvent {
    pub event_id: String,
    pub session_id: String,
    pub message_id: String,
    pub old_parent: Option<String>,
    pub new_parent: Option<String>,
    pub operator: String,
    pub reason: String,
    pub similarity_score: f64,
    pub validation_passed: bool,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_reverted: bool,
    pub reverts_event_id: Option<String>,
    pub event_digest: String,
}

impl RepairEvent {
    /// SHA-256 over `event_id || session_id || timestamp || message_id ||
    /// old_parent || new_parent`, nulls encoded as the literal string
    /// `"null"`, lowercase hex.
    pub fn compute_digest(
        event_id: &str,
        session_id: &str,
        timestamp: DateTime<Utc>,
        message_id: &str,
        old_parent: Option<&str>,
        new_parent: Option<&str>,
    ) -> String {
        let canonical = format!(
            "{event_id}{session_id}{}{message_id}{}{}",
            timestamp.to_rfc3339(),
            old_parent.unwrap_or("null"),
            new_parent.unwrap_or("null"),
        );
        let digest = Sha256::digest(canonical.as_bytes());
        hex_lower(&digest)
    }

    pub fn recompute_digest(&self) -> String {
        Self::compute_digest(
            &self.event_id,
            &self.session_id,
            self.timestamp,
            &self.message_id,
            self.old_parent.as_deref(),
            self.new_parent.as_deref(),
        )
    }

    pub fn digest_is_valid(&self) -> bool {
        self.recompute_digest() == self.event_digest
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let ts = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let a = RepairEvent::compute_digest("e1", "s", ts, "m1", None, Some("p"));
        let b = RepairEvent::compute_digest("e1", "s", ts, "m1", None, Some("p"));
        assert_eq!(a, b);
    }

    #[test]
    fn digest_changes_with_new_parent() {
        let ts = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let a = RepairEvent::compute_digest("e1", "s", ts, "m1", None, Some("p"));
        let b = RepairEvent::compute_digest("e1", "s", ts, "m1", None, Some("q"));
        assert_ne!(a, b);
    }
}
