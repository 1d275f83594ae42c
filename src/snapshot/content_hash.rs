use std::path::{Path, PathBuf};

use bincode::{Decode, Encode};
use compio::BufResult;
use compio::fs::File;
use compio::io::AsyncReadAt;
use derive_more::{AsRef, Display};
use sha2::{Digest, Sha256};
use snafu::{ResultExt, Snafu};

use crate::ext::{AsyncTryFrom, BestEffortPathExt};

/// Size of the chunks a file is streamed through the digest in
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Hex-encoded SHA-256 digest of a file's bytes.
///
/// Two files with the same content share the same hash regardless of where
/// they live, which is what lets the diff follow a file across moves.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, AsRef, Encode, Decode)]
#[as_ref(str)]
pub struct ContentHash(String);

impl ContentHash {
    #[cfg(test)]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self::from_digest(Sha256::digest(bytes).as_slice())
    }

    /// Accepts an already hex-encoded digest, as found in saved snapshots.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        ContentHash(hex.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Streams the file at `path` in `chunk_size` pieces through SHA-256.
    pub async fn from_file(path: &Path, chunk_size: usize) -> Result<Self, HashError> {
        let file = File::open(path).await.context(OpenSnafu {
            path: path.to_path_buf(),
        })?;

        let mut hasher = Sha256::new();
        let mut buffer = Vec::with_capacity(chunk_size.max(1));
        let mut position = 0u64;

        loop {
            buffer.clear();
            let BufResult(read, returned) = file.read_at(buffer, position).await;
            buffer = returned;
            let read = read.context(ReadSnafu {
                path: path.to_path_buf(),
            })?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            position += read as u64;
        }

        Ok(Self::from_digest(hasher.finalize().as_slice()))
    }

    fn from_digest(digest: &[u8]) -> Self {
        ContentHash(hex::encode(digest))
    }
}

impl AsyncTryFrom<&Path> for ContentHash {
    type Error = HashError;

    async fn async_try_from(path: &Path) -> Result<Self, Self::Error> {
        Self::from_file(path, DEFAULT_CHUNK_SIZE).await
    }
}

#[derive(Debug, Snafu)]
pub enum HashError {
    #[snafu(display("Failed to open {} for hashing", path.best_effort_path_display()))]
    OpenError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to read {} while hashing", path.best_effort_path_display()))]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
}
