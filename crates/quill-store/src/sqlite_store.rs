//! SQLite-backed durable session store.
//!
//! One `sessions.db` file in WAL mode, shared by every agent process working
//! in the repository. Row-level atomicity comes from SQLite; cross-process
//! waits are bounded by `busy_timeout`.

use crate::store::{NewSession, SessionStore, StoreError, StoreResult};
use quill_core::{ProjectBinding, Session, SessionMode};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA_SQL: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    transport_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    mode TEXT NOT NULL DEFAULT 'isolated',
    started_at TEXT NOT NULL,
    last_active_at TEXT NOT NULL,
    expired INTEGER NOT NULL DEFAULT 0
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_live_transport
    ON sessions(transport_id) WHERE expired = 0;

CREATE TABLE IF NOT EXISTS bindings (
    session_id TEXT PRIMARY KEY,
    project_name TEXT,
    version INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    updated_by TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS refs (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const SESSION_COLUMNS: &str =
    "session_id, transport_id, agent_id, mode, started_at, last_active_at, expired";

const LEGACY_PROJECT_KEY: &str = "legacy_project";

/// Map SQLite errors onto the store taxonomy: contention and I/O trouble are
/// transient, everything else is fatal.
fn classify(e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::CannotOpen
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::DiskFull
                    | ErrorCode::ReadOnly
            ) =>
        {
            StoreError::Unavailable(e.to_string())
        }
        _ => StoreError::Fatal(e.to_string()),
    }
}

fn map_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let mode: String = row.get(3)?;
    Ok(Session {
        session_id: row.get(0)?,
        transport_id: row.get(1)?,
        agent_id: row.get(2)?,
        // Unknown modes from a newer writer fall back to the narrower one.
        mode: mode.parse().unwrap_or_default(),
        started_at: row.get(4)?,
        last_active_at: row.get(5)?,
        expired: row.get::<_, i64>(6)? != 0,
    })
}

fn map_binding_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectBinding> {
    Ok(ProjectBinding {
        session_id: row.get(0)?,
        project_name: row.get(1)?,
        version: row.get::<_, i64>(2)? as u64,
        updated_at: row.get(3)?,
        updated_by: row.get(4)?,
    })
}

fn read_binding(conn: &Connection, session_id: &str) -> rusqlite::Result<Option<ProjectBinding>> {
    conn.query_row(
        "SELECT session_id, project_name, version, updated_at, updated_by
         FROM bindings WHERE session_id = ?1",
        params![session_id],
        map_binding_row,
    )
    .optional()
}

/// SQLite-backed storage engine.
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    /// Open or create `sessions.db` with full schema.
    pub fn open_or_create(db_path: &Path, busy_timeout: Duration) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }
        let conn = Connection::open(db_path).map_err(classify)?;
        conn.busy_timeout(busy_timeout).map_err(classify)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_schema()?;
        tracing::debug!(path = %db_path.display(), "session store opened");
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Fatal("session store connection poisoned".into()))
    }

    fn apply_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA_SQL).map_err(classify)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('version', '1')",
            [],
        )
        .map_err(classify)?;
        Ok(())
    }

    pub fn schema_version(&self) -> StoreResult<u32> {
        let conn = self.conn()?;
        let version: Option<String> = conn
            .query_row(
                "SELECT value FROM schema_meta WHERE key = 'version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(classify)?;
        Ok(version.and_then(|v| v.parse().ok()).unwrap_or(1))
    }

    /// Number of session rows, live and expired.
    pub fn session_count(&self) -> StoreResult<(u64, u64)> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT COUNT(*) - COALESCE(SUM(expired), 0), COALESCE(SUM(expired), 0) FROM sessions",
            [],
            |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
        )
        .map_err(classify)
    }
}

impl SessionStore for SqliteSessionStore {
    fn get_session(&self, transport_id: &str) -> StoreResult<Option<Session>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE transport_id = ?1 AND expired = 0"),
            params![transport_id],
            map_session_row,
        )
        .optional()
        .map_err(classify)
    }

    fn get_session_by_id(&self, session_id: &str) -> StoreResult<Option<Session>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"),
            params![session_id],
            map_session_row,
        )
        .optional()
        .map_err(classify)
    }

    fn upsert_session(&self, new: &NewSession<'_>) -> StoreResult<Session> {
        let conn = self.conn()?;
        // The partial unique index makes a concurrent insert for the same live
        // transport a no-op; the read below then returns the winner.
        conn.execute(
            "INSERT OR IGNORE INTO sessions
             (session_id, transport_id, agent_id, mode, started_at, last_active_at, expired)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0)",
            params![
                new.session_id,
                new.transport_id,
                new.agent_id,
                new.mode.as_str(),
                new.at
            ],
        )
        .map_err(classify)?;

        conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE transport_id = ?1 AND expired = 0"),
            params![new.transport_id],
            map_session_row,
        )
        .optional()
        .map_err(classify)?
        .ok_or_else(|| {
            StoreError::Fatal(format!(
                "session for transport {} vanished after insert",
                new.transport_id
            ))
        })
    }

    fn touch_session(&self, session_id: &str, at: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let n = conn
            .execute(
                "UPDATE sessions SET last_active_at = ?2 WHERE session_id = ?1 AND expired = 0",
                params![session_id, at],
            )
            .map_err(classify)?;
        if n == 0 {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        Ok(())
    }

    fn set_session_mode(&self, session_id: &str, mode: SessionMode, at: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let n = conn
            .execute(
                "UPDATE sessions SET mode = ?2, last_active_at = ?3
                 WHERE session_id = ?1 AND expired = 0",
                params![session_id, mode.as_str(), at],
            )
            .map_err(classify)?;
        if n == 0 {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        Ok(())
    }

    fn mark_expired(&self, session_id: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sessions SET expired = 1 WHERE session_id = ?1",
            params![session_id],
        )
        .map_err(classify)?;
        Ok(())
    }

    fn get_binding(&self, session_id: &str) -> StoreResult<Option<ProjectBinding>> {
        let conn = self.conn()?;
        read_binding(&conn, session_id).map_err(classify)
    }

    fn set_binding(
        &self,
        session_id: &str,
        project_name: Option<&str>,
        expected_version: u64,
        updated_by: &str,
        at: &str,
    ) -> StoreResult<ProjectBinding> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(classify)?;

        let affected = tx
            .execute(
                "UPDATE bindings
                 SET project_name = ?1, version = version + 1, updated_at = ?2, updated_by = ?3
                 WHERE session_id = ?4 AND version = ?5",
                params![
                    project_name,
                    at,
                    updated_by,
                    session_id,
                    expected_version as i64
                ],
            )
            .map_err(classify)?;

        if affected == 1 {
            let binding = read_binding(&tx, session_id)
                .map_err(classify)?
                .ok_or_else(|| StoreError::Fatal("binding vanished inside transaction".into()))?;
            tx.commit().map_err(classify)?;
            return Ok(binding);
        }

        let current: Option<i64> = tx
            .query_row(
                "SELECT version FROM bindings WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(classify)?;

        match current {
            None if expected_version == 0 => {
                tx.execute(
                    "INSERT INTO bindings (session_id, project_name, version, updated_at, updated_by)
                     VALUES (?1, ?2, 1, ?3, ?4)",
                    params![session_id, project_name, at, updated_by],
                )
                .map_err(classify)?;
                tx.commit().map_err(classify)?;
                Ok(ProjectBinding {
                    session_id: session_id.to_string(),
                    project_name: project_name.map(|s| s.to_string()),
                    version: 1,
                    updated_at: at.to_string(),
                    updated_by: updated_by.to_string(),
                })
            }
            // Dropping the transaction rolls it back.
            None => Err(StoreError::NotFound(session_id.to_string())),
            Some(v) => Err(StoreError::Conflict {
                current_version: v as u64,
            }),
        }
    }

    fn legacy_project(&self) -> StoreResult<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM refs WHERE key = ?1",
            params![LEGACY_PROJECT_KEY],
            |row| row.get(0),
        )
        .optional()
        .map_err(classify)
    }

    fn set_legacy_project(&self, project_name: Option<&str>) -> StoreResult<()> {
        let conn = self.conn()?;
        match project_name {
            Some(name) => conn.execute(
                "INSERT OR REPLACE INTO refs (key, value) VALUES (?1, ?2)",
                params![LEGACY_PROJECT_KEY, name],
            ),
            None => conn.execute(
                "DELETE FROM refs WHERE key = ?1",
                params![LEGACY_PROJECT_KEY],
            ),
        }
        .map_err(classify)?;
        Ok(())
    }
}

impl Drop for SqliteSessionStore {
    fn drop(&mut self) {
        // Merge WAL back into main DB so users see a single file when idle.
        if let Ok(conn) = self.conn.get_mut() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    const AT: &str = "2026-10-19T10:00:00Z";

    fn tmp_store() -> (tempfile::TempDir, SqliteSessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store =
            SqliteSessionStore::open_or_create(&dir.path().join("sessions.db"), Duration::from_secs(5))
                .unwrap();
        (dir, store)
    }

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
    fn schema_creation() {
        let (_dir, store) = tmp_store();
        let tables: Vec<String> = store
            .conn()
            .unwrap()
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(tables.contains(&"sessions".to_string()));
        assert!(tables.contains(&"bindings".to_string()));
        assert!(tables.contains(&"refs".to_string()));
        assert_eq!(store.schema_version().unwrap(), 1);
    }

    #[test]
    fn upsert_then_lookup_by_transport_and_id() {
        let (_dir, store) = tmp_store();
        let s = store.upsert_session(&new_session("s1", "t1")).unwrap();
        assert_eq!(s.session_id, "s1");
        assert_eq!(s.mode, SessionMode::Isolated);
        assert!(!s.expired);

        assert_eq!(store.get_session("t1").unwrap().unwrap().session_id, "s1");
        assert_eq!(store.get_session_by_id("s1").unwrap().unwrap().transport_id, "t1");
        assert!(store.get_session("t2").unwrap().is_none());
    }

    #[test]
    fn second_insert_for_live_transport_adopts_winner() {
        let (_dir, store) = tmp_store();
        store.upsert_session(&new_session("s1", "t1")).unwrap();
        let loser = store.upsert_session(&new_session("s2", "t1")).unwrap();
        assert_eq!(loser.session_id, "s1");
        assert!(store.get_session_by_id("s2").unwrap().is_none());
    }

    #[test]
    fn expired_session_frees_transport_but_keeps_row() {
        let (_dir, store) = tmp_store();
        store.upsert_session(&new_session("s1", "t1")).unwrap();
        store.mark_expired("s1").unwrap();
        assert!(store.get_session("t1").unwrap().is_none());
        assert!(store.get_session_by_id("s1").unwrap().unwrap().expired);

        let fresh = store.upsert_session(&new_session("s2", "t1")).unwrap();
        assert_eq!(fresh.session_id, "s2");
        assert_eq!(store.session_count().unwrap(), (1, 1));
    }

    #[test]
    fn touch_and_mode_switch() {
        let (_dir, store) = tmp_store();
        store.upsert_session(&new_session("s1", "t1")).unwrap();
        store.touch_session("s1", "2026-10-19T11:00:00Z").unwrap();
        store
            .set_session_mode("s1", SessionMode::Project, "2026-10-19T11:05:00Z")
            .unwrap();
        let s = store.get_session_by_id("s1").unwrap().unwrap();
        assert_eq!(s.mode, SessionMode::Project);
        assert_eq!(s.last_active_at, "2026-10-19T11:05:00Z");

        assert_eq!(
            store.touch_session("missing", AT).unwrap_err(),
            StoreError::NotFound("missing".into())
        );
    }

    #[test]
    fn binding_create_update_conflict() {
        let (_dir, store) = tmp_store();
        assert!(store.get_binding("s1").unwrap().is_none());

        let b1 = store.set_binding("s1", Some("alpha"), 0, "agent-a", AT).unwrap();
        assert_eq!(b1.version, 1);

        let err = store.set_binding("s1", Some("beta"), 0, "agent-a", AT).unwrap_err();
        assert_eq!(err, StoreError::Conflict { current_version: 1 });

        let b2 = store.set_binding("s1", Some("beta"), 1, "agent-a", AT).unwrap();
        assert_eq!(b2.version, 2);
        assert_eq!(b2.project_name.as_deref(), Some("beta"));

        let cleared = store.set_binding("s1", None, 2, "agent-a", AT).unwrap();
        assert_eq!(cleared.version, 3);
        assert_eq!(cleared.project_name, None);
    }

    #[test]
    fn binding_missing_row_with_nonzero_version_is_not_found() {
        let (_dir, store) = tmp_store();
        let err = store.set_binding("s1", Some("alpha"), 4, "agent-a", AT).unwrap_err();
        assert_eq!(err, StoreError::NotFound("s1".into()));
        assert!(store.get_binding("s1").unwrap().is_none());
    }

    #[test]
    fn legacy_pointer_round_trip() {
        let (_dir, store) = tmp_store();
        assert_eq!(store.legacy_project().unwrap(), None);
        store.set_legacy_project(Some("alpha")).unwrap();
        assert_eq!(store.legacy_project().unwrap().as_deref(), Some("alpha"));
        store.set_legacy_project(None).unwrap();
        assert_eq!(store.legacy_project().unwrap(), None);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("sessions.db");
        {
            let store = SqliteSessionStore::open_or_create(&db, Duration::from_secs(5)).unwrap();
            store.upsert_session(&new_session("s1", "t1")).unwrap();
            store.set_binding("s1", Some("alpha"), 0, "agent-a", AT).unwrap();
        }
        let store = SqliteSessionStore::open_or_create(&db, Duration::from_secs(5)).unwrap();
        assert_eq!(store.get_session("t1").unwrap().unwrap().session_id, "s1");
        assert_eq!(store.get_binding("s1").unwrap().unwrap().version, 1);
    }

    #[test]
    fn concurrent_connections_one_winner_per_version() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("sessions.db");
        SqliteSessionStore::open_or_create(&db, Duration::from_secs(5)).unwrap();

        let n = 6;
        let barrier = Arc::new(Barrier::new(n));
        let handles: Vec<_> = (0..n)
            .map(|i| {
                let db = db.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let store =
                        SqliteSessionStore::open_or_create(&db, Duration::from_secs(10)).unwrap();
                    barrier.wait();
                    store.set_binding("s1", Some(&format!("p{i}")), 0, "agent", AT)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        for r in results.iter().filter(|r| r.is_err()) {
            assert_eq!(
                r.as_ref().unwrap_err(),
                &StoreError::Conflict { current_version: 1 }
            );
        }
    }
}
