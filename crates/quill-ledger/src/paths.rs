use quill_core::{CoreError, CoreResult};
use std::path::{Path, PathBuf};

/// Directory under `logs/` holding the session-level audit log.
pub const AUDIT_DIR: &str = "_audit";

/// All well-known paths under `.quill/`.
#[derive(Debug, Clone)]
pub struct QuillPaths {
    pub root: PathBuf,
    pub quill_dir: PathBuf,
    pub sessions_db: PathBuf,
    pub config_json: PathBuf,
    pub logs_dir: PathBuf,
}

impl QuillPaths {
    /// Derive all paths from a repo root. Pure computation, no I/O.
    pub fn discover(repo_root: impl Into<PathBuf>) -> Self {
        let root = repo_root.into();
        let quill_dir = root.join(".quill");
        Self {
            sessions_db: quill_dir.join("sessions.db"),
            config_json: quill_dir.join("config.json"),
            logs_dir: quill_dir.join("logs"),
            quill_dir,
            root,
        }
    }

    /// Create all required directories. Idempotent.
    pub fn ensure_layout(&self) -> anyhow::Result<()> {
        for dir in [&self.quill_dir, &self.logs_dir, &self.logs_dir.join(AUDIT_DIR)] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Check whether `.quill/` exists.
    pub fn is_initialized(&self) -> bool {
        self.quill_dir.is_dir()
    }

    /// Structured log of a project: `.quill/logs/<project>/activity.jsonl`.
    pub fn project_log(&self, project: &str) -> CoreResult<PathBuf> {
        validate_project_name(project)?;
        Ok(self.logs_dir.join(project).join("activity.jsonl"))
    }

    /// Session-level audit log (violations, mode switches, binding changes).
    pub fn audit_log(&self) -> PathBuf {
        self.logs_dir.join(AUDIT_DIR).join("activity.jsonl")
    }

    /// Projects that have a log directory, sorted.
    pub fn list_projects(&self) -> anyhow::Result<Vec<String>> {
        let mut out = Vec::new();
        if !self.logs_dir.is_dir() {
            return Ok(out);
        }
        for entry in std::fs::read_dir(&self.logs_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name != AUDIT_DIR {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }
}

impl QuillPaths {
    /// Walk up from `start` looking for a directory containing `.quill/`.
    /// Returns `None` if not found.
    pub fn find_root(start: &Path) -> Option<PathBuf> {
        let mut cur = start.to_path_buf();
        loop {
            if cur.join(".quill").is_dir() {
                return Some(cur);
            }
            if !cur.pop() {
                return None;
            }
        }
    }
}

/// Human-readable mirror of a structured log: `activity.jsonl` → `activity.log`.
pub fn mirror_path(log_path: &Path) -> PathBuf {
    log_path.with_extension("log")
}

/// Lock file guarding a log: `activity.jsonl` → `activity.jsonl.lock`.
pub fn lock_path(log_path: &Path) -> PathBuf {
    let mut name = log_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Directory a log lives in.
pub fn log_dir(log_path: &Path) -> PathBuf {
    log_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Rotation chain index kept next to the log.
pub fn rotations_path(log_path: &Path) -> PathBuf {
    log_dir(log_path).join("rotations.jsonl")
}

pub fn archive_dir(log_path: &Path) -> PathBuf {
    log_dir(log_path).join("archive")
}

/// A project name must be a single, plain path component.
pub fn validate_project_name(name: &str) -> CoreResult<()> {
    let invalid = |reason| CoreError::InvalidProject {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("empty"));
    }
    if name.len() > 128 {
        return Err(invalid("longer than 128 bytes"));
    }
    if name.starts_with('.') || name.starts_with('_') {
        return Err(invalid("must not start with '.' or '_'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid("only ASCII letters, digits, '-', '_' and '.' are allowed"));
    }
    Ok(())
}
