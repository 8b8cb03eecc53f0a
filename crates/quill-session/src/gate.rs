//! Mode Gate: every operation declares the session modes it may run in.
//!
//! A rejection hard-fails and leaves a `scope_violation` entry in the audit
//! log. A successful check yields an [`Admitted`] token; operations on the
//! legacy project pointer take one by reference, so they cannot be reached
//! without passing the gate first.

use crate::audit::AuditLog;
use quill_core::{kind, CoreError, CoreResult, EntryId, Session, SessionMode};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ResolveSession,
    Heartbeat,
    GetBinding,
    SetBinding,
    AppendEntry,
    VerifyChain,
    SwitchMode,
    RotateLog,
    ReadLegacyProject,
    WriteLegacyProject,
}

const BOTH: &[SessionMode] = &[SessionMode::Isolated, SessionMode::Project];
const PROJECT_ONLY: &[SessionMode] = &[SessionMode::Project];

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::ResolveSession => "resolve_session",
            Operation::Heartbeat => "heartbeat",
            Operation::GetBinding => "get_binding",
            Operation::SetBinding => "set_binding",
            Operation::AppendEntry => "append_entry",
            Operation::VerifyChain => "verify_chain",
            Operation::SwitchMode => "switch_mode",
            Operation::RotateLog => "rotate_log",
            Operation::ReadLegacyProject => "read_legacy_project",
            Operation::WriteLegacyProject => "write_legacy_project",
        }
    }

    pub fn allowed_modes(self) -> &'static [SessionMode] {
        match self {
            Operation::RotateLog
            | Operation::ReadLegacyProject
            | Operation::WriteLegacyProject => PROJECT_ONLY,
            _ => BOTH,
        }
    }

    pub fn allows(self, mode: SessionMode) -> bool {
        self.allowed_modes().contains(&mode)
    }
}

/// Proof that the gate admitted `operation` for a session in `mode`.
#[derive(Debug)]
pub struct Admitted {
    session_id: String,
    mode: SessionMode,
    operation: Operation,
}

impl Admitted {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }
}

pub struct ModeGate {
    audit: AuditLog,
}

impl ModeGate {
    pub fn new(audit: AuditLog) -> Self {
        Self { audit }
    }

    /// Admit `operation` for `session`, or fail and record the violation.
    pub fn check(
        &self,
        session: &Session,
        requested_mode: SessionMode,
        agent: &str,
        operation: Operation,
    ) -> CoreResult<Admitted> {
        let violation = if requested_mode != session.mode {
            CoreError::ModeViolation {
                session_id: session.session_id.clone(),
                operation: operation.as_str(),
                session_mode: session.mode,
                requested_mode,
            }
        } else if !operation.allows(session.mode) {
            CoreError::ScopeViolation {
                session_id: session.session_id.clone(),
                mode: session.mode,
                operation: operation.as_str(),
            }
        } else {
            return Ok(Admitted {
                session_id: session.session_id.clone(),
                mode: session.mode,
                operation,
            });
        };

        tracing::warn!(
            session_id = %session.session_id,
            agent,
            operation = operation.as_str(),
            mode = %session.mode,
            requested_mode = %requested_mode,
            "operation refused by mode gate"
        );
        self.record_violation(session, requested_mode, agent, operation, &violation);
        Err(violation)
    }

    fn record_violation(
        &self,
        session: &Session,
        requested_mode: SessionMode,
        agent: &str,
        operation: Operation,
        violation: &CoreError,
    ) {
        let mut meta = Map::new();
        meta.insert("session_id".into(), Value::from(session.session_id.clone()));
        meta.insert("operation".into(), Value::from(operation.as_str()));
        meta.insert("mode".into(), Value::from(session.mode.as_str()));
        meta.insert("requested_mode".into(), Value::from(requested_mode.as_str()));
        meta.insert("transport_id".into(), Value::from(session.transport_id.clone()));

        // The violation itself is returned either way.
        if let Err(e) = self
            .audit
            .record(agent, kind::SCOPE_VIOLATION, &violation.to_string(), meta)
        {
            tracing::error!(
                path = %self.audit.path().display(),
                error = %e,
                "scope violation not written to audit log"
            );
        }
    }

    pub fn record_mode_switch(
        &self,
        session_id: &str,
        agent: &str,
        from: SessionMode,
        to: SessionMode,
    ) -> CoreResult<EntryId> {
        let mut meta = Map::new();
        meta.insert("session_id".into(), Value::from(session_id));
        meta.insert("from".into(), Value::from(from.as_str()));
        meta.insert("to".into(), Value::from(to.as_str()));
        tracing::info!(session_id, agent, %from, %to, "mode switch recorded");
        self.audit.record(
            agent,
            kind::MODE_SWITCH,
            &format!("mode {from} -> {to}"),
            meta,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_ledger::{read_entries, LogWriter, RetryPolicy};

    fn session(mode: SessionMode) -> Session {
        Session {
            session_id: "s1".into(),
            transport_id: "t1".into(),
            agent_id: "agent-a".into(),
            mode,
            started_at: "2026-10-19T10:00:00Z".into(),
            last_active_at: "2026-10-19T10:00:00Z".into(),
            expired: false,
        }
    }

    fn gate(dir: &std::path::Path) -> (ModeGate, std::path::PathBuf) {
        let path = dir.join("_audit").join("activity.jsonl");
        let writer = LogWriter::new(RetryPolicy::default(), false, false);
        (ModeGate::new(AuditLog::new(writer, path.clone())), path)
    }

    #[test]
    fn mode_table() {
        for op in [
            Operation::ResolveSession,
            Operation::Heartbeat,
            Operation::GetBinding,
            Operation::SetBinding,
            Operation::AppendEntry,
            Operation::VerifyChain,
            Operation::SwitchMode,
        ] {
            assert!(op.allows(SessionMode::Isolated), "{}", op.as_str());
            assert!(op.allows(SessionMode::Project), "{}", op.as_str());
        }
        for op in [
            Operation::RotateLog,
            Operation::ReadLegacyProject,
            Operation::WriteLegacyProject,
        ] {
            assert!(!op.allows(SessionMode::Isolated), "{}", op.as_str());
            assert!(op.allows(SessionMode::Project), "{}", op.as_str());
        }
    }

    #[test]
    fn admitted_carries_session_and_operation() {
        let tmp = tempfile::tempdir().unwrap();
        let (gate, audit) = gate(tmp.path());
        let admitted = gate
            .check(
                &session(SessionMode::Project),
                SessionMode::Project,
                "agent-a",
                Operation::ReadLegacyProject,
            )
            .unwrap();
        assert_eq!(admitted.session_id(), "s1");
        assert_eq!(admitted.mode(), SessionMode::Project);
        assert_eq!(admitted.operation(), Operation::ReadLegacyProject);
        assert!(!audit.exists());
    }

    #[test]
    fn isolated_legacy_access_is_a_recorded_scope_violation() {
        let tmp = tempfile::tempdir().unwrap();
        let (gate, audit) = gate(tmp.path());
        let err = gate
            .check(
                &session(SessionMode::Isolated),
                SessionMode::Isolated,
                "agent-a",
                Operation::WriteLegacyProject,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::ScopeViolation {
                operation: "write_legacy_project",
                ..
            }
        ));

        let entries = read_entries(&audit).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, kind::SCOPE_VIOLATION);
        assert_eq!(entries[0].structured_meta["session_id"], "s1");
        assert_eq!(entries[0].structured_meta["operation"], "write_legacy_project");
        assert_eq!(entries[0].structured_meta["mode"], "isolated");
    }

    #[test]
    fn requested_mode_must_match_session_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let (gate, audit) = gate(tmp.path());
        let err = gate
            .check(
                &session(SessionMode::Isolated),
                SessionMode::Project,
                "agent-a",
                Operation::GetBinding,
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::ModeViolation { .. }));
        assert_eq!(read_entries(&audit).unwrap()[0].structured_meta["requested_mode"], "project");
    }

    #[test]
    fn mode_switch_is_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        let (gate, audit) = gate(tmp.path());
        gate.record_mode_switch("s1", "agent-a", SessionMode::Isolated, SessionMode::Project)
            .unwrap();
        let entries = read_entries(&audit).unwrap();
        assert_eq!(entries[0].kind, kind::MODE_SWITCH);
        assert_eq!(entries[0].structured_meta["to"], "project");
    }
}
