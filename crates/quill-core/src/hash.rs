use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Chunk size used when stream-hashing log files.
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Compute SHA-256 hash of bytes, returning lowercase hex string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash and line count of a log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub sha256: String,
    pub entry_count: u64,
    pub bytes: u64,
}

/// Stream-hash a file in fixed-size chunks, counting newline-terminated entries.
/// Never loads the whole file into memory.
pub fn digest_file(path: &Path) -> std::io::Result<FileDigest> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    let mut entry_count = 0u64;
    let mut bytes = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        entry_count += buf[..n].iter().filter(|b| **b == b'\n').count() as u64;
        bytes += n as u64;
    }
    Ok(FileDigest {
        sha256: hex::encode(hasher.finalize()),
        entry_count,
        bytes,
    })
}
