use quill_core::Session;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Inner {
    /// transport_id → session_id
    by_transport: HashMap<String, String>,
    sessions: HashMap<String, Session>,
}

/// In-process session cache, the first tier of every lookup.
#[derive(Default)]
pub struct SessionCache {
    inner: Mutex<Inner>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned cache is still a valid map; the durable store stays authoritative.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_by_transport(&self, transport_id: &str) -> Option<Session> {
        let inner = self.lock();
        inner
            .by_transport
            .get(transport_id)
            .and_then(|sid| inner.sessions.get(sid))
            .cloned()
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.lock().sessions.get(session_id).cloned()
    }

    pub fn insert(&self, session: Session) {
        let mut inner = self.lock();
        inner
            .by_transport
            .insert(session.transport_id.clone(), session.session_id.clone());
        inner.sessions.insert(session.session_id.clone(), session);
    }

    pub fn remove(&self, session_id: &str) {
        let mut inner = self.lock();
        if let Some(session) = inner.sessions.remove(session_id) {
            if inner.by_transport.get(&session.transport_id).map(String::as_str) == Some(session_id)
            {
                inner.by_transport.remove(&session.transport_id);
            }
        }
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.by_transport.clear();
        inner.sessions.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One mutex per key, handed out on demand. Serializes work for a single
/// transport without blocking others. A key's entry lives only while some
/// caller holds a [`KeyLock`] for it.
#[derive(Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Slot>>,
}

struct Slot {
    lock: Arc<Mutex<()>>,
    users: usize,
}

impl KeyedLocks {
    pub fn lock_for(&self, key: &str) -> KeyLock<'_> {
        let mut slots = self.slots();
        let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
            lock: Arc::default(),
            users: 0,
        });
        slot.users += 1;
        KeyLock {
            owner: self,
            key: key.to_string(),
            lock: Arc::clone(&slot.lock),
        }
    }

    /// Keys currently handed out.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle on one key's mutex. Dropping the last handle for a key removes it.
pub struct KeyLock<'a> {
    owner: &'a KeyedLocks,
    key: String,
    lock: Arc<Mutex<()>>,
}

impl KeyLock<'_> {
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        let mut slots = self.owner.slots();
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                slots.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::SessionMode;

    fn session(id: &str, transport: &str) -> Session {
        Session {
            session_id: id.into(),
            transport_id: transport.into(),
            agent_id: "agent-a".into(),
            mode: SessionMode::Isolated,
            started_at: "2026-10-19T10:00:00Z".into(),
            last_active_at: "2026-10-19T10:00:00Z".into(),
            expired: false,
        }
    }

    #[test]
    fn lookup_by_transport_and_id() {
        let cache = SessionCache::new();
        cache.insert(session("s1", "t1"));
        assert_eq!(cache.get_by_transport("t1").unwrap().session_id, "s1");
        assert_eq!(cache.get("s1").unwrap().transport_id, "t1");
        assert!(cache.get_by_transport("t2").is_none());
    }

    #[test]
    fn replacing_session_keeps_new_transport_mapping() {
        let cache = SessionCache::new();
        cache.insert(session("s1", "t1"));
        cache.insert(session("s2", "t1"));
        cache.remove("s1");
        assert_eq!(cache.get_by_transport("t1").unwrap().session_id, "s2");
    }

    #[test]
    fn clear_empties_both_maps() {
        let cache = SessionCache::new();
        cache.insert(session("s1", "t1"));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get_by_transport("t1").is_none());
    }

    #[test]
    fn same_key_shares_one_lock() {
        let locks = KeyedLocks::default();
        let a = locks.lock_for("t1");
        let b = locks.lock_for("t1");
        let c = locks.lock_for("t2");
        assert!(Arc::ptr_eq(&a.lock, &b.lock));
        assert!(!Arc::ptr_eq(&a.lock, &c.lock));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn released_keys_are_forgotten() {
        let locks = KeyedLocks::default();
        let a = locks.lock_for("t1");
        let b = locks.lock_for("t1");
        drop(a);
        assert_eq!(locks.len(), 1);
        drop(b);
        assert!(locks.is_empty());

        for i in 0..100 {
            let key = locks.lock_for(&format!("t{i}"));
            let _guard = key.lock();
        }
        assert!(locks.is_empty());
    }
}
