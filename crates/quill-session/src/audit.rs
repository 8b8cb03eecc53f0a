use quill_core::entry::{new_correction_entry, new_entry, EntryParams};
use quill_core::{CoreResult, EntryId};
use quill_ledger::LogWriter;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Session-level audit trail: violations, mode switches, binding changes.
#[derive(Clone)]
pub struct AuditLog {
    writer: LogWriter,
    path: PathBuf,
}

impl AuditLog {
    pub fn new(writer: LogWriter, path: PathBuf) -> Self {
        Self { writer, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(
        &self,
        agent: &str,
        kind: &str,
        message: &str,
        meta: Map<String, Value>,
    ) -> CoreResult<EntryId> {
        let entry = new_entry(EntryParams {
            agent_identity: agent,
            project: None,
            kind,
            message,
            meta,
            corrects: None,
        })?;
        self.writer.append(&self.path, &entry)
    }

    /// Amend an earlier audit entry without touching it.
    pub fn correct(&self, agent: &str, original_id: &str, message: &str) -> CoreResult<EntryId> {
        let entry = new_correction_entry(agent, None, original_id, message)?;
        self.writer.append(&self.path, &entry)
    }
}
