//! Rotation hash chain.
//!
//! Rotating a log seals the current file: it is stream-hashed, moved into
//! `archive/`, and replaced by a fresh file whose first entry links back to
//! the sealed one. Each rotation is also recorded in `rotations.jsonl` next to
//! the log. Record N's `previous_log_hash` is the hash of the archive written
//! by rotation N, which begins with the linking entry of rotation N-1.

use crate::paths::{archive_dir, log_dir, mirror_path, rotations_path, validate_project_name};
use crate::writer::{first_entry, read_entries, LogWriter};
use quill_core::entry::{new_entry, new_rotation_id, now_rfc3339, EntryParams};
use quill_core::hash::digest_file;
use quill_core::{kind, ChainReport, CoreError, CoreResult, LogEntry, RotationRecord};
use serde_json::{Map, Value};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

pub struct ChainAuditor {
    writer: LogWriter,
}

impl ChainAuditor {
    pub fn new(writer: LogWriter) -> Self {
        Self { writer }
    }

    /// Seal the current log and start a new one linked to it.
    ///
    /// All-or-nothing: hashing happens before anything moves, the new file is
    /// fully written before the swap, and the swap only stands once the
    /// rotation is recorded in the index. Any later failure moves the archive back.
    pub fn rotate(&self, log_path: &Path, agent: &str) -> CoreResult<RotationRecord> {
        let _lock = self.writer.lock(log_path)?;
        let aborted = |reason: String| CoreError::RotationAborted {
            path: log_path.to_path_buf(),
            reason,
        };

        if !log_path.exists() {
            return Err(aborted("log does not exist".into()));
        }
        let digest =
            digest_file(log_path).map_err(|e| aborted(format!("hashing failed: {e}")))?;

        let records = read_rotations(log_path)?;
        let sequence_number = records.last().map_or(1, |r| r.sequence_number + 1);
        let chain_root_hash = records
            .first()
            .map_or_else(|| digest.sha256.clone(), |r| r.chain_root_hash.clone());

        let dir = log_dir(log_path);
        let stem = log_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "activity".into());
        let current_log_path = log_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{stem}.jsonl"));
        let rotated_at = now_rfc3339();
        let stamp: String = rotated_at
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        let archived_log_path = format!("archive/{stem}.{stamp}.{sequence_number}.jsonl");
        let archive_path = dir.join(&archived_log_path);

        let record = RotationRecord {
            rotation_id: new_rotation_id(),
            sequence_number,
            previous_log_hash: digest.sha256,
            previous_log_entry_count: digest.entry_count,
            current_log_path,
            archived_log_path,
            chain_root_hash,
            rotated_at,
        };
        let link = linking_entry(&record, agent, project_of(log_path).as_deref())?;

        // New file first, in the same directory so the swap is a rename.
        let mut fresh = tempfile::NamedTempFile::new_in(&dir)?;
        fresh.write_all(serde_json::to_string(&link)?.as_bytes())?;
        fresh.write_all(b"\n")?;
        fresh.as_file().sync_all()?;

        std::fs::create_dir_all(archive_dir(log_path))?;
        let line = serde_json::to_string(&record)?;
        swap_in(
            log_path,
            &archive_path,
            || fresh.persist(log_path).map(|_| ()).map_err(|e| e.error),
            || self.writer.append_raw(&rotations_path(log_path), &line),
        )?;

        let mirror = mirror_path(log_path);
        if mirror.exists() {
            let archived_mirror = archive_path.with_extension("log");
            if let Err(e) = std::fs::rename(&mirror, &archived_mirror) {
                tracing::warn!(path = %mirror.display(), error = %e, "mirror not archived");
            }
        }
        self.writer.write_mirror(log_path, &link);

        tracing::info!(
            path = %log_path.display(),
            sequence = record.sequence_number,
            entries = record.previous_log_entry_count,
            hash = %record.previous_log_hash,
            "log rotated"
        );
        Ok(record)
    }

    /// Walk the rotation chain of `log_path`. The first failed check is the
    /// break point; a break is reported, not raised.
    pub fn verify_chain(&self, log_path: &Path) -> CoreResult<ChainReport> {
        let records = read_rotations(log_path)?;
        let Some(first) = records.first() else {
            return Ok(unindexed_rotation(log_path)
                .map_or_else(|| ChainReport::intact(0), |detail| ChainReport::broken(1, 0, detail)));
        };
        let root = &first.chain_root_hash;
        if first.previous_log_hash != *root {
            return Ok(ChainReport::broken(
                first.sequence_number,
                0,
                "chain root differs from the first sealed hash",
            ));
        }

        let dir = log_dir(log_path);
        for (i, rec) in records.iter().enumerate() {
            let expected = i as u64 + 1;
            if rec.sequence_number != expected {
                return Ok(ChainReport::broken(
                    expected,
                    i,
                    format!("sequence gap: found {}", rec.sequence_number),
                ));
            }
            if rec.chain_root_hash != *root {
                return Ok(ChainReport::broken(expected, i, "chain root changed"));
            }

            let archive = dir.join(&rec.archived_log_path);
            let digest = match digest_file(&archive) {
                Ok(d) => d,
                Err(e) => {
                    return Ok(ChainReport::broken(
                        expected,
                        i,
                        format!("archive {} unreadable: {e}", rec.archived_log_path),
                    ))
                }
            };
            if digest.sha256 != rec.previous_log_hash {
                return Ok(ChainReport::broken(
                    expected,
                    i,
                    format!("archive {} hash mismatch", rec.archived_log_path),
                ));
            }
            if digest.entry_count != rec.previous_log_entry_count {
                return Ok(ChainReport::broken(
                    expected,
                    i,
                    format!("archive {} entry count mismatch", rec.archived_log_path),
                ));
            }

            if i > 0 && !links_to(&archive, &records[i - 1]) {
                return Ok(ChainReport::broken(
                    expected,
                    i,
                    format!(
                        "archive {} does not begin with rotation {}",
                        rec.archived_log_path,
                        records[i - 1].rotation_id
                    ),
                ));
            }
        }

        if let Some(last) = records.last() {
            if !links_to(log_path, last) {
                return Ok(ChainReport::broken(
                    last.sequence_number + 1,
                    records.len(),
                    format!("live log does not begin with rotation {}", last.rotation_id),
                ));
            }
        }

        Ok(ChainReport::intact(records.len()))
    }
}

/// Move the live log to `archive_path`, then run `install` and `commit`.
/// If either fails the archive is moved back over whatever is at `log_path`.
fn swap_in(
    log_path: &Path,
    archive_path: &Path,
    install: impl FnOnce() -> std::io::Result<()>,
    commit: impl FnOnce() -> CoreResult<()>,
) -> CoreResult<()> {
    let aborted = |reason: String| CoreError::RotationAborted {
        path: log_path.to_path_buf(),
        reason,
    };
    std::fs::rename(log_path, archive_path)
        .map_err(|e| aborted(format!("archiving failed: {e}")))?;

    let failure = match install() {
        Err(e) => Some(format!("installing new log failed: {e}")),
        Ok(()) => commit()
            .err()
            .map(|e| format!("recording rotation failed: {e}")),
    };
    let Some(reason) = failure else {
        return Ok(());
    };
    if let Err(back) = std::fs::rename(archive_path, log_path) {
        tracing::error!(
            path = %log_path.display(),
            archive = %archive_path.display(),
            error = %back,
            "could not restore log after failed rotation"
        );
    }
    Err(aborted(reason))
}

/// Evidence of a rotation that has no record in the index: a live log that
/// opens with a linking entry, or anything left in `archive/`.
fn unindexed_rotation(log_path: &Path) -> Option<String> {
    if matches!(first_entry(log_path), Ok(Some(e)) if e.kind == kind::ROTATION) {
        return Some("live log begins with a rotation entry but no rotation is recorded".into());
    }
    let archived = std::fs::read_dir(archive_dir(log_path))
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);
    archived.then(|| "archive/ holds sealed logs but no rotation is recorded".into())
}

/// Rotation records of a log, in file order. Missing index means none.
pub fn read_rotations(log_path: &Path) -> CoreResult<Vec<RotationRecord>> {
    let path = rotations_path(log_path);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = std::io::BufReader::new(std::fs::File::open(&path)?);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}

fn linking_entry(record: &RotationRecord, agent: &str, project: Option<&str>) -> CoreResult<LogEntry> {
    let mut meta = Map::new();
    meta.insert("rotation_id".into(), Value::from(record.rotation_id.clone()));
    meta.insert(
        "previous_log_hash".into(),
        Value::from(record.previous_log_hash.clone()),
    );
    meta.insert(
        "previous_log_entry_count".into(),
        Value::from(record.previous_log_entry_count),
    );
    meta.insert("sequence_number".into(), Value::from(record.sequence_number));
    meta.insert(
        "chain_root_hash".into(),
        Value::from(record.chain_root_hash.clone()),
    );
    meta.insert(
        "archived_log_path".into(),
        Value::from(record.archived_log_path.clone()),
    );
    let message = format!(
        "rotation {} sealed {} entries ({})",
        record.sequence_number, record.previous_log_entry_count, record.archived_log_path
    );
    new_entry(EntryParams {
        agent_identity: agent,
        project,
        kind: kind::ROTATION,
        message: &message,
        meta,
        corrects: None,
    })
}

/// Whether the first entry of `path` is the linking entry of `record`.
fn links_to(path: &Path, record: &RotationRecord) -> bool {
    match first_entry(path) {
        Ok(Some(entry)) => {
            entry.kind == kind::ROTATION
                && entry.structured_meta.get("rotation_id").and_then(Value::as_str)
                    == Some(record.rotation_id.as_str())
                && entry
                    .structured_meta
                    .get("previous_log_hash")
                    .and_then(Value::as_str)
                    == Some(record.previous_log_hash.as_str())
        }
        _ => false,
    }
}

/// Project a log belongs to, taken from its directory name when that is a valid project.
fn project_of(log_path: &Path) -> Option<String> {
    let name = log_path.parent()?.file_name()?.to_string_lossy().to_string();
    validate_project_name(&name).ok().map(|_| name)
}

/// Whether `entry_id` was written to `log_path`, before or after any rotation.
pub fn contains_entry(log_path: &Path, entry_id: &str) -> CoreResult<bool> {
    if read_entries(log_path)?.iter().any(|e| e.id == entry_id) {
        return Ok(true);
    }
    for record in read_rotations(log_path)?.iter().rev() {
        let archived = read_entries(&archive_path(log_path, record))?;
        if archived.iter().any(|e| e.id == entry_id) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Absolute archive path of a rotation record.
pub fn archive_path(log_path: &Path, record: &RotationRecord) -> PathBuf {
    log_dir(log_path).join(&record.archived_log_path)
}
