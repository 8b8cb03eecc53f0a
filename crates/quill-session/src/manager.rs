//! Session resolution: cache, then durable store, then create.

use crate::cache::{KeyedLocks, SessionCache};
use crate::outcome::{store_error, StoreOutcome, TieredStore};
use quill_core::entry::{now_rfc3339, parse_rfc3339};
use quill_core::{CoreError, CoreResult, Session, SessionId, SessionMode};
use quill_store::{NewSession, StoreError};
use std::sync::Arc;
use std::time::Duration;

/// Which tier answered a resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOrigin {
    Cache,
    Store,
    Created,
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub session: Session,
    pub origin: ResolveOrigin,
}

pub struct SessionManager {
    store: Arc<TieredStore>,
    cache: SessionCache,
    keys: KeyedLocks,
    ttl: Duration,
}

fn require(value: &str, field: &'static str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(CoreError::InvalidIdentity { field });
    }
    Ok(())
}

impl SessionManager {
    pub fn new(store: Arc<TieredStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: SessionCache::new(),
            keys: KeyedLocks::default(),
            ttl,
        }
    }

    /// Stable session id for a transport, creating one on first contact.
    pub fn resolve_or_create_session(
        &self,
        transport_id: &str,
        agent_id: &str,
    ) -> CoreResult<SessionId> {
        Ok(self.resolve(transport_id, agent_id)?.session.session_id)
    }

    /// Three-tier lookup. The whole lookup runs under the transport's key lock,
    /// so one process never mints two sessions for the same transport.
    pub fn resolve(&self, transport_id: &str, agent_id: &str) -> CoreResult<Resolved> {
        require(transport_id, "transport_id")?;
        require(agent_id, "agent_identity")?;

        let key = self.keys.lock_for(transport_id);
        let _guard = key.lock();

        if let Some(session) = self.cache.get_by_transport(transport_id) {
            if !self.is_stale(&session) {
                return Ok(Resolved {
                    session,
                    origin: ResolveOrigin::Cache,
                });
            }
            self.expire(&session);
        }

        match self.store.get_session(transport_id).into_core()? {
            Some(session) if !self.is_stale(&session) => {
                self.cache.insert(session.clone());
                return Ok(Resolved {
                    session,
                    origin: ResolveOrigin::Store,
                });
            }
            Some(stale) => self.expire(&stale),
            None => {}
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let session = self
            .store
            .upsert_session(&NewSession {
                session_id: &session_id,
                transport_id,
                agent_id,
                mode: SessionMode::default(),
                at: &now,
            })
            .into_core()?;

        let origin = if session.session_id == session_id {
            tracing::info!(
                session_id = %session.session_id,
                transport_id,
                agent_id,
                "session created"
            );
            ResolveOrigin::Created
        } else {
            // Another process won the insert; adopt its session.
            ResolveOrigin::Store
        };
        self.cache.insert(session.clone());
        Ok(Resolved { session, origin })
    }

    /// Look up a live session by id, expiring it lazily if its lease ran out.
    pub fn session(&self, session_id: &str) -> CoreResult<Session> {
        require(session_id, "session_id")?;

        let session = match self.cache.get(session_id) {
            Some(s) => s,
            None => match self.store.get_session_by_id(session_id).into_core()? {
                Some(s) => s,
                None => {
                    return Err(CoreError::UnknownSession {
                        session_id: session_id.to_string(),
                    })
                }
            },
        };

        if self.is_stale(&session) {
            self.expire(&session);
            return Err(CoreError::SessionExpired {
                session_id: session_id.to_string(),
            });
        }
        self.cache.insert(session.clone());
        Ok(session)
    }

    /// Extend a session's lease in both tiers.
    pub fn heartbeat(&self, session_id: &str) -> CoreResult<Session> {
        let mut session = self.session(session_id)?;
        session.last_active_at = now_rfc3339();
        let outcome = self
            .store
            .touch_session(&session.session_id, &session.last_active_at);
        self.settle(outcome, &session)?;
        self.cache.insert(session.clone());
        Ok(session)
    }

    /// Persist a new mode. Returns the previous mode and the updated session.
    pub fn switch_mode(
        &self,
        session_id: &str,
        mode: SessionMode,
    ) -> CoreResult<(SessionMode, Session)> {
        let mut session = self.session(session_id)?;
        let from = session.mode;
        if from == mode {
            return Ok((from, session));
        }
        session.mode = mode;
        session.last_active_at = now_rfc3339();
        let outcome = self
            .store
            .set_session_mode(&session.session_id, mode, &session.last_active_at);
        self.settle(outcome, &session)?;
        self.cache.insert(session.clone());
        Ok((from, session))
    }

    /// Drop every cached session. The durable store keeps them.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn is_degraded(&self) -> bool {
        self.store.is_degraded()
    }

    /// A session write that the fallback cannot apply because the session
    /// predates degradation: seed the fallback and carry on from the cache.
    fn settle(&self, outcome: StoreOutcome<()>, session: &Session) -> CoreResult<()> {
        match outcome {
            StoreOutcome::Success(()) | StoreOutcome::Degraded(()) => Ok(()),
            StoreOutcome::Fatal(StoreError::NotFound(_)) if self.store.is_degraded() => {
                self.store.adopt(session);
                Ok(())
            }
            StoreOutcome::Fatal(StoreError::NotFound(_)) => Err(CoreError::SessionExpired {
                session_id: session.session_id.clone(),
            }),
            other => other.into_core(),
        }
    }

    fn is_stale(&self, session: &Session) -> bool {
        if session.expired {
            return true;
        }
        let Some(last) = parse_rfc3339(&session.last_active_at) else {
            return true;
        };
        let age = time::OffsetDateTime::now_utc() - last;
        age.whole_milliseconds() > self.ttl.as_millis() as i128
    }

    fn expire(&self, session: &Session) {
        self.cache.remove(&session.session_id);
        if let StoreOutcome::Fatal(e) = self.store.mark_expired(&session.session_id) {
            tracing::warn!(
                session_id = %session.session_id,
                error = %store_error(e),
                "could not mark session expired"
            );
        }
        tracing::info!(
            session_id = %session.session_id,
            transport_id = %session.transport_id,
            last_active_at = %session.last_active_at,
            "session lease expired"
        );
    }
}
