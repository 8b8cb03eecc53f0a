//! In-process store with the same row semantics as the SQLite store.
//!
//! Serves as the cache-only fallback once the durable store is unavailable,
//! and as a lightweight store in tests.

use crate::store::{NewSession, SessionStore, StoreError, StoreResult};
use quill_core::{ProjectBinding, Session, SessionMode};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    /// transport_id → session_id, live sessions only.
    live: HashMap<String, String>,
    bindings: HashMap<String, ProjectBinding>,
    legacy_project: Option<String>,
}

#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<Inner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Fatal("memory store poisoned".into()))
    }
}

impl SessionStore for MemorySessionStore {
    fn get_session(&self, transport_id: &str) -> StoreResult<Option<Session>> {
        let inner = self.lock()?;
        Ok(inner
            .live
            .get(transport_id)
            .and_then(|sid| inner.sessions.get(sid))
            .cloned())
    }

    fn get_session_by_id(&self, session_id: &str) -> StoreResult<Option<Session>> {
        Ok(self.lock()?.sessions.get(session_id).cloned())
    }

    fn upsert_session(&self, new: &NewSession<'_>) -> StoreResult<Session> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner
            .live
            .get(new.transport_id)
            .and_then(|sid| inner.sessions.get(sid))
        {
            return Ok(existing.clone());
        }
        let session = Session {
            session_id: new.session_id.to_string(),
            transport_id: new.transport_id.to_string(),
            agent_id: new.agent_id.to_string(),
            mode: new.mode,
            started_at: new.at.to_string(),
            last_active_at: new.at.to_string(),
            expired: false,
        };
        inner
            .live
            .insert(new.transport_id.to_string(), new.session_id.to_string());
        inner
            .sessions
            .insert(new.session_id.to_string(), session.clone());
        Ok(session)
    }

    fn touch_session(&self, session_id: &str, at: &str) -> StoreResult<()> {
        let mut inner = self.lock()?;
        match inner.sessions.get_mut(session_id) {
            Some(s) if !s.expired => {
                s.last_active_at = at.to_string();
                Ok(())
            }
            _ => Err(StoreError::NotFound(session_id.to_string())),
        }
    }

    fn set_session_mode(&self, session_id: &str, mode: SessionMode, at: &str) -> StoreResult<()> {
        let mut inner = self.lock()?;
        match inner.sessions.get_mut(session_id) {
            Some(s) if !s.expired => {
                s.mode = mode;
                s.last_active_at = at.to_string();
                Ok(())
            }
            _ => Err(StoreError::NotFound(session_id.to_string())),
        }
    }

    fn mark_expired(&self, session_id: &str) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let transport = match inner.sessions.get_mut(session_id) {
            Some(s) => {
                s.expired = true;
                s.transport_id.clone()
            }
            None => return Ok(()),
        };
        if inner.live.get(&transport).map(String::as_str) == Some(session_id) {
            inner.live.remove(&transport);
        }
        Ok(())
    }

    fn get_binding(&self, session_id: &str) -> StoreResult<Option<ProjectBinding>> {
        Ok(self.lock()?.bindings.get(session_id).cloned())
    }

    fn set_binding(
        &self,
        session_id: &str,
        project_name: Option<&str>,
        expected_version: u64,
        updated_by: &str,
        at: &str,
    ) -> StoreResult<ProjectBinding> {
        let mut inner = self.lock()?;
        match inner.bindings.get_mut(session_id) {
            Some(b) if b.version == expected_version => {
                b.project_name = project_name.map(|s| s.to_string());
                b.version += 1;
                b.updated_at = at.to_string();
                b.updated_by = updated_by.to_string();
                Ok(b.clone())
            }
            Some(b) => Err(StoreError::Conflict {
                current_version: b.version,
            }),
            None if expected_version == 0 => {
                let binding = ProjectBinding {
                    session_id: session_id.to_string(),
                    project_name: project_name.map(|s| s.to_string()),
                    version: 1,
                    updated_at: at.to_string(),
                    updated_by: updated_by.to_string(),
                };
                inner
                    .bindings
                    .insert(session_id.to_string(), binding.clone());
                Ok(binding)
            }
            None => Err(StoreError::NotFound(session_id.to_string())),
        }
    }

    fn legacy_project(&self) -> StoreResult<Option<String>> {
        Ok(self.lock()?.legacy_project.clone())
    }

    fn set_legacy_project(&self, project_name: Option<&str>) -> StoreResult<()> {
        self.lock()?.legacy_project = project_name.map(|s| s.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AT: &str = "2026-10-19T10:00:00Z";

    fn new_session<'a>(session_id: &'a str, transport_id: &'a str) -> NewSession<'a> {
        NewSession {
            session_id,
            transport_id,
            agent_id: "agent-a",
            mode: SessionMode::Isolated,
            at: AT,
        }
    }

    #[test]
    fn upsert_adopts_live_session() {
        let store = MemorySessionStore::new();
        store.upsert_session(&new_session("s1", "t1")).unwrap();
        let again = store.upsert_session(&new_session("s2", "t1")).unwrap();
        assert_eq!(again.session_id, "s1");
    }

    #[test]
    fn expiry_releases_transport() {
        let store = MemorySessionStore::new();
        store.upsert_session(&new_session("s1", "t1")).unwrap();
        store.mark_expired("s1").unwrap();
        assert!(store.get_session("t1").unwrap().is_none());
        assert!(store.get_session_by_id("s1").unwrap().unwrap().expired);
        assert!(store.touch_session("s1", AT).is_err());

        let fresh = store.upsert_session(&new_session("s2", "t1")).unwrap();
        assert_eq!(fresh.session_id, "s2");
    }

    #[test]
    fn binding_versions_match_sqlite_semantics() {
        let store = MemorySessionStore::new();
        assert_eq!(
            store.set_binding("s1", Some("alpha"), 3, "a", AT).unwrap_err(),
            StoreError::NotFound("s1".into())
        );
        assert_eq!(store.set_binding("s1", Some("alpha"), 0, "a", AT).unwrap().version, 1);
        assert_eq!(
            store.set_binding("s1", Some("beta"), 0, "a", AT).unwrap_err(),
            StoreError::Conflict { current_version: 1 }
        );
        let b = store.set_binding("s1", Some("beta"), 1, "b", AT).unwrap();
        assert_eq!(b.version, 2);
        assert_eq!(b.updated_by, "b");
    }
}
