//! Error taxonomy shared by every Quill crate.
//!
//! Identity, mode and scope violations are always surfaced to the caller.
//! Durable-store unavailability never appears here: it is absorbed by the
//! degraded store tier and logged instead.

use crate::types::SessionMode;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("missing required identity field: {field}")]
    InvalidIdentity { field: &'static str },

    #[error(
        "binding version conflict for session {session_id}: expected {expected_version}, current {current_version}"
    )]
    Conflict {
        session_id: String,
        expected_version: u64,
        current_version: u64,
    },

    #[error("no binding for session {session_id} (expected version {expected_version}, use 0 to create)")]
    BindingNotFound {
        session_id: String,
        expected_version: u64,
    },

    #[error("scope violation: session {session_id} in {mode} mode may not use {operation}")]
    ScopeViolation {
        session_id: String,
        mode: SessionMode,
        operation: &'static str,
    },

    #[error(
        "mode violation: {operation} requested as {requested_mode} but session {session_id} is in {session_mode} mode"
    )]
    ModeViolation {
        session_id: String,
        operation: &'static str,
        session_mode: SessionMode,
        requested_mode: SessionMode,
    },

    #[error("could not lock {} after {attempts} attempts; retry later", path.display())]
    AppendTimeout { path: PathBuf, attempts: u32 },

    #[error("unknown session: {session_id}")]
    UnknownSession { session_id: String },

    #[error("session {session_id} lease expired; resolve a new session from the transport")]
    SessionExpired { session_id: String },

    #[error("session {session_id} has no project binding")]
    Unbound { session_id: String },

    #[error("invalid project name {name:?}: {reason}")]
    InvalidProject { name: String, reason: &'static str },

    #[error("entry of kind {kind} is missing required meta keys: {}", missing.join(", "))]
    InvalidMeta { kind: String, missing: Vec<String> },

    #[error("entry kind {kind:?} is reserved")]
    ReservedKind { kind: String },

    #[error("no entry {entry_id} in the log of project {project}")]
    UnknownEntry { entry_id: String, project: String },

    #[error("rotation of {} aborted: {reason}", path.display())]
    RotationAborted { path: PathBuf, reason: String },

    #[error("durable store failure: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Whether the caller may simply try again (after re-reading state for conflicts).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Conflict { .. } | CoreError::AppendTimeout { .. }
        )
    }

    /// Violations that must be accompanied by a `scope_violation` audit entry.
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            CoreError::ScopeViolation { .. } | CoreError::ModeViolation { .. }
        )
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
