use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables read from `.quill/config.json`, each overridable by a `QUILL_*` env var.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuillConfig {
    /// Session lease length; a session idle longer than this expires lazily.
    pub session_ttl_secs: u64,
    /// Attempts to take a log file lock before failing with `AppendTimeout`.
    pub lock_retries: u32,
    pub lock_retry_delay_ms: u64,
    /// SQLite busy timeout; bounds every durable-store call.
    pub store_busy_timeout_ms: u64,
    /// `sync_data` after every append.
    pub fsync: bool,
    /// Write the human-readable `.log` mirror next to each `.jsonl` log.
    pub mirror: bool,
}

impl Default for QuillConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 3600,
            lock_retries: 50,
            lock_retry_delay_ms: 10,
            store_busy_timeout_ms: 5000,
            fsync: true,
            mirror: true,
        }
    }
}

fn env_override<T: std::str::FromStr>(name: &str, slot: &mut T) {
    if let Some(v) = std::env::var(name).ok().and_then(|v| v.parse::<T>().ok()) {
        *slot = v;
    }
}

impl QuillConfig {
    /// Load config from `path` (defaults when missing), then apply env overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env();
        Ok(config)
    }

    /// Read only the file layer. Missing file means defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        env_override("QUILL_SESSION_TTL_SECS", &mut self.session_ttl_secs);
        env_override("QUILL_LOCK_RETRIES", &mut self.lock_retries);
        env_override("QUILL_LOCK_RETRY_DELAY_MS", &mut self.lock_retry_delay_ms);
        env_override("QUILL_STORE_BUSY_TIMEOUT_MS", &mut self.store_busy_timeout_ms);
        env_override("QUILL_FSYNC", &mut self.fsync);
        env_override("QUILL_MIRROR", &mut self.mirror);
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn lock_retry_delay(&self) -> Duration {
        Duration::from_millis(self.lock_retry_delay_ms)
    }

    pub fn store_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.store_busy_timeout_ms)
    }
}
