//! Store calls with an explicit outcome, and the degraded fallback tier.
//!
//! The first `Unavailable` error from the durable store flips the tier into
//! cache-only operation for the rest of the process. From then on every call
//! is served by an in-process [`MemorySessionStore`] and reported as
//! [`StoreOutcome::Degraded`].

use quill_core::{CoreError, ProjectBinding, Session, SessionMode};
use quill_store::{MemorySessionStore, NewSession, SessionStore, StoreError, StoreResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutcome<T> {
    /// Served by the durable store.
    Success(T),
    /// Served by the in-process fallback.
    Degraded(T),
    /// A conditional write lost; carries the true current version.
    Conflict { current_version: u64 },
    Fatal(StoreError),
}

impl<T> StoreOutcome<T> {
    pub fn is_degraded(&self) -> bool {
        matches!(self, StoreOutcome::Degraded(_))
    }

    /// Collapse into a plain result, treating both tiers as success.
    pub fn into_result(self) -> StoreResult<T> {
        match self {
            StoreOutcome::Success(v) | StoreOutcome::Degraded(v) => Ok(v),
            StoreOutcome::Conflict { current_version } => {
                Err(StoreError::Conflict { current_version })
            }
            StoreOutcome::Fatal(e) => Err(e),
        }
    }

    /// Like [`into_result`](Self::into_result), mapped into the core error taxonomy.
    pub fn into_core(self) -> Result<T, CoreError> {
        self.into_result().map_err(store_error)
    }
}

pub(crate) fn store_error(e: StoreError) -> CoreError {
    CoreError::Store(e.to_string())
}

fn classify<T>(result: StoreResult<T>, degraded: bool) -> StoreOutcome<T> {
    match result {
        Ok(v) if degraded => StoreOutcome::Degraded(v),
        Ok(v) => StoreOutcome::Success(v),
        Err(StoreError::Conflict { current_version }) => StoreOutcome::Conflict { current_version },
        Err(e) => StoreOutcome::Fatal(e),
    }
}

/// Durable store with a process-lifetime in-memory fallback.
pub struct TieredStore {
    primary: Arc<dyn SessionStore>,
    fallback: MemorySessionStore,
    degraded: AtomicBool,
}

impl TieredStore {
    pub fn new(primary: Arc<dyn SessionStore>) -> Self {
        Self {
            primary,
            fallback: MemorySessionStore::new(),
            degraded: AtomicBool::new(false),
        }
    }

    /// A tier that starts degraded, for when the durable store could not be opened.
    pub fn unavailable(reason: &str) -> Self {
        let tier = Self::new(Arc::new(MemorySessionStore::new()));
        tier.degrade("open", reason);
        tier
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn degrade(&self, operation: &'static str, reason: &str) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                operation,
                reason,
                "durable store unavailable; continuing cache-only for this process"
            );
        }
    }

    fn call<T>(
        &self,
        operation: &'static str,
        f: impl Fn(&dyn SessionStore) -> StoreResult<T>,
    ) -> StoreOutcome<T> {
        if !self.is_degraded() {
            match f(self.primary.as_ref()) {
                Err(StoreError::Unavailable(reason)) => self.degrade(operation, &reason),
                other => return classify(other, false),
            }
        }
        classify(f(&self.fallback), true)
    }

    /// Seed the fallback with a session known from before the store degraded.
    pub fn adopt(&self, session: &Session) {
        let _ = self.fallback.upsert_session(&NewSession {
            session_id: &session.session_id,
            transport_id: &session.transport_id,
            agent_id: &session.agent_id,
            mode: session.mode,
            at: &session.last_active_at,
        });
    }

    pub fn get_session(&self, transport_id: &str) -> StoreOutcome<Option<Session>> {
        self.call("get_session", |s| s.get_session(transport_id))
    }

    pub fn get_session_by_id(&self, session_id: &str) -> StoreOutcome<Option<Session>> {
        self.call("get_session_by_id", |s| s.get_session_by_id(session_id))
    }

    pub fn upsert_session(&self, new: &NewSession<'_>) -> StoreOutcome<Session> {
        self.call("upsert_session", |s| s.upsert_session(new))
    }

    pub fn touch_session(&self, session_id: &str, at: &str) -> StoreOutcome<()> {
        self.call("touch_session", |s| s.touch_session(session_id, at))
    }

    pub fn set_session_mode(&self, session_id: &str, mode: SessionMode, at: &str) -> StoreOutcome<()> {
        self.call("set_session_mode", |s| s.set_session_mode(session_id, mode, at))
    }

    pub fn mark_expired(&self, session_id: &str) -> StoreOutcome<()> {
        self.call("mark_expired", |s| s.mark_expired(session_id))
    }

    pub fn get_binding(&self, session_id: &str) -> StoreOutcome<Option<ProjectBinding>> {
        self.call("get_binding", |s| s.get_binding(session_id))
    }

    pub fn set_binding(
        &self,
        session_id: &str,
        project_name: Option<&str>,
        expected_version: u64,
        updated_by: &str,
        at: &str,
    ) -> StoreOutcome<ProjectBinding> {
        self.call("set_binding", |s| {
            s.set_binding(session_id, project_name, expected_version, updated_by, at)
        })
    }

    pub fn legacy_project(&self) -> StoreOutcome<Option<String>> {
        self.call("legacy_project", |s| s.legacy_project())
    }

    pub fn set_legacy_project(&self, project_name: Option<&str>) -> StoreOutcome<()> {
        self.call("set_legacy_project", |s| s.set_legacy_project(project_name))
    }
}
