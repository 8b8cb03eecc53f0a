use crate::paths::lock_path;
use fs2::FileExt;
use quill_core::{CoreError, CoreResult, QuillConfig};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest single back-off between lock attempts.
const MAX_BACKOFF: Duration = Duration::from_millis(50);

/// How hard to try for a log lock before failing fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &QuillConfig) -> Self {
        Self {
            attempts: config.lock_retries.max(1),
            delay: config.lock_retry_delay(),
        }
    }

    /// Linear back-off, capped.
    fn backoff(&self, attempt: u32) -> Duration {
        (self.delay * attempt).min(MAX_BACKOFF.max(self.delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&QuillConfig::default())
    }
}

/// Exclusive lock on one log file, backed by `<log>.lock`.
/// Automatically released when dropped.
pub struct LogLock {
    _file: File,
    log_path: PathBuf,
}

impl LogLock {
    /// Try to acquire the lock, retrying per `policy`.
    /// Fails with `AppendTimeout` instead of blocking indefinitely.
    pub fn acquire(log_path: &Path, policy: &RetryPolicy) -> CoreResult<Self> {
        let lock_file = lock_path(log_path);
        if let Some(parent) = lock_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_file)?;

        for attempt in 1..=policy.attempts {
            if file.try_lock_exclusive().is_ok() {
                return Ok(Self {
                    _file: file,
                    log_path: log_path.to_path_buf(),
                });
            }
            if attempt < policy.attempts {
                std::thread::sleep(policy.backoff(attempt));
            }
        }

        tracing::warn!(
            path = %log_path.display(),
            attempts = policy.attempts,
            "log lock not acquired; failing fast"
        );
        Err(CoreError::AppendTimeout {
            path: log_path.to_path_buf(),
            attempts: policy.attempts,
        })
    }

    /// The log this lock guards.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn acquire_and_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("alpha").join("activity.jsonl");

        let lock = LogLock::acquire(&log, &quick()).unwrap();
        assert_eq!(lock.log_path(), log.as_path());
        // Second acquire should time out while first is held
        match LogLock::acquire(&log, &quick()) {
            Err(CoreError::AppendTimeout { attempts, .. }) => assert_eq!(attempts, 3),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("lock acquired twice"),
        }
        drop(lock);
        // After drop, should succeed again
        let _lock2 = LogLock::acquire(&log, &quick()).unwrap();
    }

    #[test]
    fn different_logs_do_not_contend() {
        let tmp = tempfile::tempdir().unwrap();
        let _a = LogLock::acquire(&tmp.path().join("a.jsonl"), &quick()).unwrap();
        let _b = LogLock::acquire(&tmp.path().join("b.jsonl"), &quick()).unwrap();
    }

    #[test]
    fn waiter_gets_lock_once_released() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("activity.jsonl");
        let held = LogLock::acquire(&log, &quick()).unwrap();

        let log2 = log.clone();
        let waiter = std::thread::spawn(move || {
            let patient = RetryPolicy {
                attempts: 200,
                delay: Duration::from_millis(5),
            };
            LogLock::acquire(&log2, &patient).is_ok()
        });
        std::thread::sleep(Duration::from_millis(30));
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn backoff_is_capped() {
        let p = RetryPolicy {
            attempts: 100,
            delay: Duration::from_millis(10),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(10));
        assert_eq!(p.backoff(3), Duration::from_millis(30));
        assert_eq!(p.backoff(90), MAX_BACKOFF);
    }
}
