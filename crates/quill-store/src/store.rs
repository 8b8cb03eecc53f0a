//! The durable-store boundary: row-level operations the session core calls.

use quill_core::{ProjectBinding, Session, SessionMode};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// Transient: busy, locked, unreachable. Triggers cache-only fallback upstream.
    #[error("durable store unavailable: {0}")]
    Unavailable(String),

    #[error("binding version conflict: current version is {current_version}")]
    Conflict { current_version: u64 },

    #[error("no row for session {0}")]
    NotFound(String),

    #[error("durable store failure: {0}")]
    Fatal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Insert request for a session row.
#[derive(Debug, Clone)]
pub struct NewSession<'a> {
    pub session_id: &'a str,
    pub transport_id: &'a str,
    pub agent_id: &'a str,
    pub mode: SessionMode,
    pub at: &'a str,
}

/// Row-level session/binding persistence. Every method is atomic at the row level.
pub trait SessionStore: Send + Sync {
    /// The live (non-expired) session for a transport, if any.
    fn get_session(&self, transport_id: &str) -> StoreResult<Option<Session>>;

    fn get_session_by_id(&self, session_id: &str) -> StoreResult<Option<Session>>;

    /// Insert-then-read-on-conflict. When a live session already exists for the
    /// transport, that row is returned unchanged and `new.session_id` is discarded.
    fn upsert_session(&self, new: &NewSession<'_>) -> StoreResult<Session>;

    fn touch_session(&self, session_id: &str, at: &str) -> StoreResult<()>;

    fn set_session_mode(&self, session_id: &str, mode: SessionMode, at: &str) -> StoreResult<()>;

    /// Mark a session expired. The row is kept for audit continuity.
    fn mark_expired(&self, session_id: &str) -> StoreResult<()>;

    fn get_binding(&self, session_id: &str) -> StoreResult<Option<ProjectBinding>>;

    /// Conditional write: succeeds only when the stored version equals
    /// `expected_version` (0 means "no row yet"). Never retries.
    fn set_binding(
        &self,
        session_id: &str,
        project_name: Option<&str>,
        expected_version: u64,
        updated_by: &str,
        at: &str,
    ) -> StoreResult<ProjectBinding>;

    /// The legacy global "current project" pointer.
    fn legacy_project(&self) -> StoreResult<Option<String>>;

    fn set_legacy_project(&self, project_name: Option<&str>) -> StoreResult<()>;
}
