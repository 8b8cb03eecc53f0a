//! Append-only log writer.
//!
//! One structured JSON line per event, followed by an optional human-readable
//! mirror line in the sibling `.log` file. Both writes happen under the log's
//! exclusive lock. The structured line is the source of truth; the mirror may
//! lag or fail without invalidating the trail.

use crate::lock::{LogLock, RetryPolicy};
use crate::paths::mirror_path;
use quill_core::{CoreResult, EntryId, LogEntry, QuillConfig};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, Read, Seek, SeekFrom, Write};
use std::path::Path;

const TAIL_SCAN_CHUNK: u64 = 4096;

#[derive(Debug, Clone)]
pub struct LogWriter {
    policy: RetryPolicy,
    fsync: bool,
    mirror: bool,
}

impl LogWriter {
    pub fn new(policy: RetryPolicy, fsync: bool, mirror: bool) -> Self {
        Self {
            policy,
            fsync,
            mirror,
        }
    }

    pub fn from_config(config: &QuillConfig) -> Self {
        Self::new(RetryPolicy::from_config(config), config.fsync, config.mirror)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Take the exclusive lock for `log_path` within the bounded retry budget.
    pub fn lock(&self, log_path: &Path) -> CoreResult<LogLock> {
        LogLock::acquire(log_path, &self.policy)
    }

    /// Durably append `entry` to `log_path`. Returns the entry id once the
    /// structured line is on disk.
    pub fn append(&self, log_path: &Path, entry: &LogEntry) -> CoreResult<EntryId> {
        let lock = self.lock(log_path)?;
        self.append_locked(&lock, entry)
    }

    /// Append while already holding the log's lock (used by rotation).
    pub fn append_locked(&self, lock: &LogLock, entry: &LogEntry) -> CoreResult<EntryId> {
        let line = serde_json::to_string(entry)?;
        write_line(lock.log_path(), &line, self.fsync)?;
        self.write_mirror(lock.log_path(), entry);
        Ok(entry.id.clone())
    }

    /// Best-effort mirror line. Only called once the structured line is on disk.
    pub(crate) fn write_mirror(&self, log_path: &Path, entry: &LogEntry) {
        if !self.mirror {
            return;
        }
        let mirror = mirror_path(log_path);
        if let Err(e) = write_line(&mirror, &entry.raw_line, self.fsync) {
            tracing::warn!(
                path = %mirror.display(),
                entry_id = %entry.id,
                error = %e,
                "mirror line not written; structured entry is intact"
            );
        }
    }

    /// Append one pre-formed line (no embedded newlines) under the same rules.
    pub fn append_raw(&self, log_path: &Path, line: &str) -> CoreResult<()> {
        if line.contains('\n') || line.contains('\r') {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "log line must not contain newlines",
            )
            .into());
        }
        let _lock = self.lock(log_path)?;
        write_line(log_path, line, self.fsync)
    }
}

/// Write `line + '\n'` at the end of `path` in a single write.
/// On failure the file is truncated back to its previous length.
/// Caller must hold the log's lock.
pub(crate) fn write_line(path: &Path, line: &str, fsync: bool) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;
    let start = repair_tail(&mut file, path)?;

    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');

    let result = file
        .seek(SeekFrom::Start(start))
        .and_then(|_| file.write_all(&buf))
        .and_then(|_| if fsync { file.sync_data() } else { Ok(()) });

    if let Err(e) = result {
        let _ = file.set_len(start);
        let _ = file.sync_data();
        return Err(e.into());
    }
    Ok(())
}

/// Truncate a torn tail (bytes after the last newline) left by a crashed
/// writer. Returns the length of the confirmed prefix.
fn repair_tail(file: &mut File, path: &Path) -> std::io::Result<u64> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(len);
    }

    let mut keep = 0u64;
    let mut pos = len;
    let mut buf = vec![0u8; TAIL_SCAN_CHUNK as usize];
    while pos > 0 {
        let n = pos.min(TAIL_SCAN_CHUNK);
        pos -= n;
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut buf[..n as usize])?;
        if let Some(i) = buf[..n as usize].iter().rposition(|b| *b == b'\n') {
            keep = pos + i as u64 + 1;
            break;
        }
    }

    tracing::warn!(
        path = %path.display(),
        dropped_bytes = len - keep,
        "truncating partial line left by an interrupted write"
    );
    file.set_len(keep)?;
    file.sync_data()?;
    Ok(keep)
}

/// Read all entries of a structured log in order. Missing file means empty.
pub fn read_entries(log_path: &Path) -> CoreResult<Vec<LogEntry>> {
    if !log_path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(log_path)?;
    let reader = std::io::BufReader::new(file);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line)?);
    }
    Ok(entries)
}

/// First entry of a log, if any. Used to check rotation links.
pub fn first_entry(log_path: &Path) -> CoreResult<Option<LogEntry>> {
    let file = File::open(log_path)?;
    let mut reader = std::io::BufReader::new(file);
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line.trim_end())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::entry::{new_entry, EntryParams};
    use quill_core::{kind, CoreError};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    fn note(agent: &str, message: &str) -> LogEntry {
        new_entry(EntryParams {
            agent_identity: agent,
            project: Some("alpha"),
            kind: kind::NOTE,
            message,
            meta: serde_json::Map::new(),
            corrects: None,
        })
        .unwrap()
    }

    fn writer(mirror: bool) -> LogWriter {
        LogWriter::new(
            RetryPolicy {
                attempts: 2000,
                delay: Duration::from_millis(1),
            },
            false,
            mirror,
        )
    }

    #[test]
    fn append_and_read_back() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("alpha").join("activity.jsonl");
        let w = writer(true);

        let e1 = note("agent-a", "first");
        let e2 = note("agent-b", "second");
        assert_eq!(w.append(&log, &e1).unwrap(), e1.id);
        assert_eq!(w.append(&log, &e2).unwrap(), e2.id);

        let entries = read_entries(&log).unwrap();
        assert_eq!(entries, vec![e1.clone(), e2.clone()]);
        assert_eq!(first_entry(&log).unwrap().unwrap().id, e1.id);

        let mirror = std::fs::read_to_string(mirror_path(&log)).unwrap();
        let lines: Vec<&str> = mirror.lines().collect();
        assert_eq!(lines, vec![e1.raw_line.as_str(), e2.raw_line.as_str()]);
    }

    #[test]
    fn mirror_can_be_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("activity.jsonl");
        writer(false).append(&log, &note("a", "x")).unwrap();
        assert!(!mirror_path(&log).exists());
    }

    #[test]
    fn mirror_failure_does_not_fail_append() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("activity.jsonl");
        // A directory where the mirror file should be makes the mirror write fail.
        std::fs::create_dir_all(mirror_path(&log)).unwrap();

        let e = note("a", "structured still lands");
        writer(true).append(&log, &e).unwrap();
        assert_eq!(read_entries(&log).unwrap(), vec![e]);
    }

    #[test]
    fn torn_tail_is_truncated_before_next_append() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("activity.jsonl");
        let w = writer(false);
        let e1 = note("a", "complete");
        w.append(&log, &e1).unwrap();

        let mut f = OpenOptions::new().append(true).open(&log).unwrap();
        f.write_all(br#"{"id":"ent_torn","timesta"#).unwrap();
        drop(f);

        let e2 = note("a", "after crash");
        w.append(&log, &e2).unwrap();
        assert_eq!(read_entries(&log).unwrap(), vec![e1, e2]);
    }

    #[test]
    fn torn_only_line_truncates_to_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("activity.jsonl");
        std::fs::write(&log, "no newline at all").unwrap();
        let e = note("a", "fresh");
        writer(false).append(&log, &e).unwrap();
        assert_eq!(read_entries(&log).unwrap(), vec![e]);
    }

    #[test]
    fn append_raw_rejects_embedded_newlines() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("index.jsonl");
        let w = writer(false);
        w.append_raw(&log, r#"{"ok":true}"#).unwrap();
        assert!(w.append_raw(&log, "two\nlines").is_err());
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "{\"ok\":true}\n");
    }

    #[test]
    fn held_lock_fails_fast_with_append_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("activity.jsonl");
        let impatient = LogWriter::new(
            RetryPolicy {
                attempts: 2,
                delay: Duration::from_millis(1),
            },
            false,
            false,
        );
        let _held = impatient.lock(&log).unwrap();
        let err = impatient.append(&log, &note("a", "blocked")).unwrap_err();
        assert!(matches!(err, CoreError::AppendTimeout { attempts: 2, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn concurrent_appenders_produce_exactly_the_union() {
        let tmp = tempfile::tempdir().unwrap();
        let log = Arc::new(tmp.path().join("activity.jsonl"));
        let threads = 8;
        let per_thread = 125;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let log = Arc::clone(&log);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let w = writer(true);
                    barrier.wait();
                    let mut ids = Vec::new();
                    for i in 0..per_thread {
                        let e = note(&format!("agent-{t}"), &format!("line {i}"));
                        ids.push(w.append(&log, &e).unwrap());
                    }
                    ids
                })
            })
            .collect();

        let mut written: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        written.sort();

        let content = std::fs::read_to_string(log.as_path()).unwrap();
        assert_eq!(content.lines().count(), 1000);
        let mut read: Vec<String> = content
            .lines()
            .map(|l| serde_json::from_str::<LogEntry>(l).unwrap().id)
            .collect();
        read.sort();
        assert_eq!(read, written);

        let mirror = std::fs::read_to_string(mirror_path(&log)).unwrap();
        assert_eq!(mirror.lines().count(), 1000);
    }
}
