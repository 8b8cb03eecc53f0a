pub mod chain;
pub mod lock;
pub mod paths;
pub mod writer;

pub use chain::{contains_entry, read_rotations, ChainAuditor};
pub use lock::{LogLock, RetryPolicy};
pub use paths::QuillPaths;
pub use writer::{read_entries, LogWriter};
