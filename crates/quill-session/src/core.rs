//! `SessionCore`: one explicitly constructed entry point per repository.
//!
//! Every operation validates the request context, resolves the session it
//! names, and passes the Mode Gate before touching bindings or logs.

use crate::audit::AuditLog;
use crate::binding::BindingProtocol;
use crate::gate::{Admitted, ModeGate, Operation};
use crate::manager::SessionManager;
use crate::outcome::TieredStore;
use anyhow::Context;
use quill_core::entry::{new_correction_entry, new_entry, EntryParams};
use quill_core::{
    kind, ChainReport, CoreError, CoreResult, EntryId, Identity, ProjectBinding, QuillConfig,
    RequestContext, RotationRecord, Session, SessionMode, ValidatedContext,
};
use quill_ledger::{contains_entry, ChainAuditor, LogWriter, QuillPaths};
use quill_store::{SessionStore, SqliteSessionStore, StoreError};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct SessionCore {
    paths: QuillPaths,
    config: QuillConfig,
    store: Arc<TieredStore>,
    sessions: SessionManager,
    bindings: BindingProtocol,
    gate: ModeGate,
    audit: AuditLog,
    writer: LogWriter,
    chain: ChainAuditor,
}

/// A request that passed validation, resolution and the gate.
struct Entered {
    ctx: ValidatedContext,
    session: Session,
    admitted: Admitted,
}

impl SessionCore {
    /// Open the repository at `repo_root`, creating `.quill/` if needed.
    /// An unreachable session database starts the core degraded instead of failing.
    pub fn open(repo_root: &Path) -> anyhow::Result<Self> {
        let paths = QuillPaths::discover(repo_root);
        paths.ensure_layout()?;
        let config = QuillConfig::load(&paths.config_json)?;
        let store = match SqliteSessionStore::open_or_create(
            &paths.sessions_db,
            config.store_busy_timeout(),
        ) {
            Ok(store) => TieredStore::new(Arc::new(store)),
            Err(StoreError::Unavailable(reason)) => TieredStore::unavailable(&reason),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("opening session store: {}", paths.sessions_db.display())
                })
            }
        };
        Ok(Self::assemble(paths, config, Arc::new(store)))
    }

    /// Build a core over an injected store.
    pub fn with_store(paths: QuillPaths, config: QuillConfig, store: Arc<dyn SessionStore>) -> Self {
        Self::assemble(paths, config, Arc::new(TieredStore::new(store)))
    }

    fn assemble(paths: QuillPaths, config: QuillConfig, store: Arc<TieredStore>) -> Self {
        let writer = LogWriter::from_config(&config);
        let audit = AuditLog::new(writer.clone(), paths.audit_log());
        Self {
            sessions: SessionManager::new(Arc::clone(&store), config.session_ttl()),
            bindings: BindingProtocol::new(Arc::clone(&store)),
            gate: ModeGate::new(audit.clone()),
            chain: ChainAuditor::new(writer.clone()),
            audit,
            writer,
            store,
            paths,
            config,
        }
    }

    pub fn paths(&self) -> &QuillPaths {
        &self.paths
    }

    pub fn config(&self) -> &QuillConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn is_degraded(&self) -> bool {
        self.store.is_degraded()
    }

    fn enter(&self, ctx: &RequestContext, operation: Operation) -> CoreResult<Entered> {
        let ctx = ctx.validate()?;
        let session = match &ctx.identity {
            Identity::Transport(transport_id) => {
                self.sessions.resolve(transport_id, &ctx.agent_identity)?.session
            }
            Identity::Session(session_id) => self.sessions.session(session_id)?,
        };
        let admitted = self
            .gate
            .check(&session, ctx.requested_mode, &ctx.agent_identity, operation)?;
        tracing::debug!(
            session_id = %session.session_id,
            operation = operation.as_str(),
            intent = %ctx.intent,
            "request admitted"
        );
        Ok(Entered {
            ctx,
            session,
            admitted,
        })
    }

    pub fn resolve_session(&self, ctx: &RequestContext) -> CoreResult<Session> {
        Ok(self.enter(ctx, Operation::ResolveSession)?.session)
    }

    pub fn heartbeat(&self, ctx: &RequestContext) -> CoreResult<Session> {
        let e = self.enter(ctx, Operation::Heartbeat)?;
        self.sessions.heartbeat(&e.session.session_id)
    }

    pub fn get_binding(&self, ctx: &RequestContext) -> CoreResult<Option<ProjectBinding>> {
        let e = self.enter(ctx, Operation::GetBinding)?;
        self.bindings.get_binding(&e.session.session_id)
    }

    /// Bind (or unbind, with `None`) the caller's session to a project.
    pub fn set_binding(
        &self,
        ctx: &RequestContext,
        project_name: Option<&str>,
        expected_version: u64,
    ) -> CoreResult<ProjectBinding> {
        let e = self.enter(ctx, Operation::SetBinding)?;
        let binding = self.bindings.set_binding(
            &e.session.session_id,
            project_name,
            expected_version,
            &e.ctx.agent_identity,
        )?;

        let mut meta = Map::new();
        meta.insert("session_id".into(), Value::from(binding.session_id.clone()));
        meta.insert("version".into(), Value::from(binding.version));
        meta.insert("project".into(), Value::from(binding.project_name.clone()));
        let message = match &binding.project_name {
            Some(p) => format!("bound to {p} (v{})", binding.version),
            None => format!("unbound (v{})", binding.version),
        };
        // The binding is committed; a lost audit line must not undo that.
        if let Err(err) = self.audit.record(
            &e.ctx.agent_identity,
            kind::BINDING_CHANGED,
            &message,
            meta,
        ) {
            tracing::error!(session_id = %binding.session_id, error = %err, "binding change not audited");
        }
        Ok(binding)
    }

    pub fn legacy_project(&self, ctx: &RequestContext) -> CoreResult<Option<String>> {
        let e = self.enter(ctx, Operation::ReadLegacyProject)?;
        self.bindings.legacy_project(&e.admitted)
    }

    pub fn set_legacy_project(&self, ctx: &RequestContext, project_name: Option<&str>) -> CoreResult<()> {
        let e = self.enter(ctx, Operation::WriteLegacyProject)?;
        self.bindings.set_legacy_project(&e.admitted, project_name)
    }

    /// Append an entry to the log of the session's bound project.
    pub fn record(
        &self,
        ctx: &RequestContext,
        entry_kind: &str,
        message: &str,
        meta: Map<String, Value>,
    ) -> CoreResult<EntryId> {
        if kind::is_reserved(entry_kind) {
            return Err(CoreError::ReservedKind {
                kind: entry_kind.to_string(),
            });
        }
        let e = self.enter(ctx, Operation::AppendEntry)?;
        let (project, log) = self.bound_log(&e.session)?;
        let entry = new_entry(EntryParams {
            agent_identity: &e.ctx.agent_identity,
            project: Some(&project),
            kind: entry_kind,
            message,
            meta,
            corrects: None,
        })?;
        self.writer.append(&log, &entry)
    }

    /// Append a correction referencing `original_id`, which must exist in the
    /// bound log or its archives. The original line is untouched.
    pub fn correct(&self, ctx: &RequestContext, original_id: &str, message: &str) -> CoreResult<EntryId> {
        let e = self.enter(ctx, Operation::AppendEntry)?;
        let (project, log) = self.bound_log(&e.session)?;
        // Held across lookup and append so a rotation cannot move the original in between.
        let lock = self.writer.lock(&log)?;
        if !contains_entry(&log, original_id)? {
            return Err(CoreError::UnknownEntry {
                entry_id: original_id.to_string(),
                project,
            });
        }
        let entry = new_correction_entry(&e.ctx.agent_identity, Some(&project), original_id, message)?;
        self.writer.append_locked(&lock, &entry)
    }

    /// Explicit, audited mode transition. The context must state the current mode.
    ///
    /// The audit entry is written first; the mode only changes once it is on disk.
    pub fn switch_mode(&self, ctx: &RequestContext, to: SessionMode) -> CoreResult<Session> {
        let e = self.enter(ctx, Operation::SwitchMode)?;
        let from = e.session.mode;
        if from == to {
            return Ok(e.session);
        }
        let agent = &e.ctx.agent_identity;
        let audit_id = self
            .gate
            .record_mode_switch(&e.session.session_id, agent, from, to)?;
        match self.sessions.switch_mode(&e.session.session_id, to) {
            Ok((_, session)) => Ok(session),
            Err(err) => {
                let note = format!("mode switch not applied: {err}");
                if let Err(retract) = self.audit.correct(agent, &audit_id, &note) {
                    tracing::error!(
                        session_id = %e.session.session_id,
                        entry = %audit_id,
                        error = %retract,
                        "could not retract mode_switch audit entry"
                    );
                }
                Err(err)
            }
        }
    }

    pub fn rotate(&self, ctx: &RequestContext, project: &str) -> CoreResult<RotationRecord> {
        let e = self.enter(ctx, Operation::RotateLog)?;
        let log = self.paths.project_log(project)?;
        self.chain.rotate(&log, &e.ctx.agent_identity)
    }

    pub fn verify_chain(&self, ctx: &RequestContext, project: &str) -> CoreResult<ChainReport> {
        self.enter(ctx, Operation::VerifyChain)?;
        let log = self.paths.project_log(project)?;
        self.chain.verify_chain(&log)
    }

    fn bound_log(&self, session: &Session) -> CoreResult<(String, PathBuf)> {
        let project = self
            .bindings
            .get_binding(&session.session_id)?
            .and_then(|b| b.project_name)
            .ok_or_else(|| CoreError::Unbound {
                session_id: session.session_id.clone(),
            })?;
        let log = self.paths.project_log(&project)?;
        Ok((project, log))
    }
}
