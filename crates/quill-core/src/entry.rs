use crate::error::{CoreError, CoreResult};
use crate::hash::sha256_hex;
use crate::types::{kind, required_meta_keys, EntryId, LogEntry, SCHEMA_VERSION};
use serde_json::{Map, Value};

pub fn new_entry_id() -> EntryId {
    format!("ent_{}", ulid::Ulid::new().to_string().to_lowercase())
}

pub fn new_rotation_id() -> String {
    format!("rot_{}", ulid::Ulid::new().to_string().to_lowercase())
}

pub fn now_rfc3339() -> String {
    let now = time::OffsetDateTime::now_utc();
    now.format(&time::format_description::well_known::Rfc3339)
        .expect("RFC3339 formatting should not fail")
}

pub fn parse_rfc3339(ts: &str) -> Option<time::OffsetDateTime> {
    time::OffsetDateTime::parse(ts, &time::format_description::well_known::Rfc3339).ok()
}

/// Parameters for creating a log entry.
pub struct EntryParams<'a> {
    pub agent_identity: &'a str,
    pub project: Option<&'a str>,
    pub kind: &'a str,
    pub message: &'a str,
    pub meta: Map<String, Value>,
    pub corrects: Option<&'a str>,
}

/// Check that `meta` carries every key the category requires.
pub fn validate_meta(kind: &str, meta: &Map<String, Value>) -> CoreResult<()> {
    let missing: Vec<String> = required_meta_keys(kind)
        .iter()
        .filter(|k| !meta.contains_key(**k))
        .map(|k| k.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(CoreError::InvalidMeta {
            kind: kind.to_string(),
            missing,
        })
    }
}

/// Human-readable mirror line. Newlines are escaped so the mirror stays line-oriented.
fn render_raw_line(ts: &str, agent: &str, project: Option<&str>, kind: &str, message: &str) -> String {
    let msg = message.replace('\r', "\\r").replace('\n', "\\n");
    format!(
        "[{ts}] [{agent}] [{}] [{kind}] {msg}",
        project.unwrap_or("-")
    )
}

/// Create a new entry: validate its meta, render the mirror line and hash it.
pub fn new_entry(params: EntryParams<'_>) -> CoreResult<LogEntry> {
    if params.agent_identity.trim().is_empty() {
        return Err(CoreError::InvalidIdentity {
            field: "agent_identity",
        });
    }
    validate_meta(params.kind, &params.meta)?;

    let ts = now_rfc3339();
    let raw_line = render_raw_line(
        &ts,
        params.agent_identity,
        params.project,
        params.kind,
        params.message,
    );
    let sha256_of_line = sha256_hex(raw_line.as_bytes());

    Ok(LogEntry {
        id: new_entry_id(),
        timestamp_utc: ts,
        agent_identity: params.agent_identity.to_string(),
        project: params.project.map(|s| s.to_string()),
        kind: params.kind.to_string(),
        message: params.message.to_string(),
        structured_meta: params.meta,
        corrects: params.corrects.map(|s| s.to_string()),
        raw_line,
        sha256_of_line,
        schema_version: SCHEMA_VERSION,
    })
}

/// Create a correction entry referencing `original_id`. The original is never touched.
pub fn new_correction_entry(
    agent_identity: &str,
    project: Option<&str>,
    original_id: &str,
    message: &str,
) -> CoreResult<LogEntry> {
    let mut meta = Map::new();
    meta.insert("corrects".into(), Value::String(original_id.to_string()));
    new_entry(EntryParams {
        agent_identity,
        project,
        kind: kind::CORRECTION,
        message,
        meta,
        corrects: Some(original_id),
    })
}

/// Check that an entry's mirror line still matches its recorded hash.
pub fn line_hash_matches(entry: &LogEntry) -> bool {
    sha256_hex(entry.raw_line.as_bytes()) == entry.sha256_of_line
}
