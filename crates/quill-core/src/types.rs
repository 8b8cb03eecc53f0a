use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current schema version written into log entries.
pub const SCHEMA_VERSION: u32 = 1;

/// Session ID format: UUID v4, minted once per transport.
pub type SessionId = String;

/// Entry ID format: `ent_<ulid>`
pub type EntryId = String;

/// Operating mode of a session. Mutually exclusive; isolated is the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Session-scoped only; the legacy global project pointer is off limits.
    #[default]
    Isolated,
    /// Project-level operations (rotation, legacy pointer) are permitted.
    Project,
}

impl SessionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionMode::Isolated => "isolated",
            SessionMode::Project => "project",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "isolated" => Ok(SessionMode::Isolated),
            "project" => Ok(SessionMode::Project),
            other => Err(format!("unknown session mode: {other}")),
        }
    }
}

/// A durable agent session. Never deleted, only marked expired.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub session_id: SessionId,
    pub transport_id: String,
    pub agent_id: String,
    pub mode: SessionMode,
    pub started_at: String,
    pub last_active_at: String,
    #[serde(default)]
    pub expired: bool,
}

/// The project a session is currently scoped to, guarded by `version`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectBinding {
    pub session_id: SessionId,
    pub project_name: Option<String>,
    pub version: u64,
    pub updated_at: String,
    pub updated_by: String,
}

/// Log categories with required metadata keys.
pub mod kind {
    pub const NOTE: &str = "note";
    pub const CORRECTION: &str = "correction";
    pub const ROTATION: &str = "rotation";
    pub const SCOPE_VIOLATION: &str = "scope_violation";
    pub const MODE_SWITCH: &str = "mode_switch";
    pub const BINDING_CHANGED: &str = "binding_changed";

    /// Kinds only Quill itself writes.
    pub fn is_reserved(kind: &str) -> bool {
        matches!(
            kind,
            CORRECTION | ROTATION | SCOPE_VIOLATION | MODE_SWITCH | BINDING_CHANGED
        )
    }
}

/// Required `structured_meta` keys per log category. Unknown kinds require nothing.
pub fn required_meta_keys(kind: &str) -> &'static [&'static str] {
    match kind {
        kind::SCOPE_VIOLATION => &["session_id", "operation", "mode"],
        kind::MODE_SWITCH => &["session_id", "from", "to"],
        kind::ROTATION => &[
            "rotation_id",
            "previous_log_hash",
            "previous_log_entry_count",
            "sequence_number",
            "chain_root_hash",
        ],
        kind::CORRECTION => &["corrects"],
        kind::BINDING_CHANGED => &["session_id", "version"],
        _ => &[],
    }
}

/// A single audit log entry (one JSONL line in a project's `activity.jsonl`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub id: EntryId,
    pub timestamp_utc: String,
    pub agent_identity: String,
    pub project: Option<String>,
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub structured_meta: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrects: Option<EntryId>,
    pub raw_line: String,
    pub sha256_of_line: String,
    #[serde(default)]
    pub schema_version: u32,
}

/// One link of a per-project rotation chain (one JSONL line in `rotations.jsonl`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RotationRecord {
    pub rotation_id: String,
    pub sequence_number: u64,
    pub previous_log_hash: String,
    pub previous_log_entry_count: u64,
    /// File name of the live log, relative to the log directory.
    pub current_log_path: String,
    /// Archive written by this rotation, relative to the log directory.
    pub archived_log_path: String,
    pub chain_root_hash: String,
    pub rotated_at: String,
}

/// Result of walking a rotation chain. A break is data, not an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainReport {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_at_sequence: Option<u64>,
    pub records_checked: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ChainReport {
    pub fn intact(records_checked: usize) -> Self {
        Self {
            ok: true,
            break_at_sequence: None,
            records_checked,
            detail: None,
        }
    }

    pub fn broken(sequence: u64, records_checked: usize, detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            break_at_sequence: Some(sequence),
            records_checked,
            detail: Some(detail.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_defaults_to_isolated() {
        assert_eq!(SessionMode::default(), SessionMode::Isolated);
    }

    #[test]
    fn mode_parses_and_displays() {
        assert_eq!("project".parse::<SessionMode>().unwrap(), SessionMode::Project);
        assert_eq!(SessionMode::Isolated.to_string(), "isolated");
        assert!("global".parse::<SessionMode>().is_err());
    }

    #[test]
    fn mode_serializes_snake_case() {
        let json = serde_json::to_string(&SessionMode::Project).unwrap();
        assert_eq!(json, r#""project""#);
    }

    #[test]
    fn rotation_kind_requires_link_fields() {
        let keys = required_meta_keys(kind::ROTATION);
        assert!(keys.contains(&"previous_log_hash"));
        assert!(keys.contains(&"chain_root_hash"));
        assert!(required_meta_keys("note").is_empty());
    }

    #[test]
    fn core_written_kinds_are_reserved() {
        assert!(kind::is_reserved(kind::ROTATION));
        assert!(kind::is_reserved(kind::MODE_SWITCH));
        assert!(!kind::is_reserved(kind::NOTE));
        assert!(!kind::is_reserved("deploy"));
    }

    #[test]
    fn chain_report_constructors() {
        let ok = ChainReport::intact(3);
        assert!(ok.ok);
        assert_eq!(ok.break_at_sequence, None);

        let broken = ChainReport::broken(2, 2, "hash mismatch");
        assert!(!broken.ok);
        assert_eq!(broken.break_at_sequence, Some(2));
    }
}
