//! Blob storage for uploaded images plus time-limited read URLs.

pub mod filesystem;
pub mod memory;
pub mod signing;

use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::dao::storage::{StorageError, StorageResult};

pub use signing::UrlSigner;

/// Binary payload read back from the blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Failures raised by blob store backends.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob path segment `{segment}`")]
    InvalidSegment { segment: String },
    #[error("failed to write blob `{path}`")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read blob `{path}`")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt blob metadata for `{path}`")]
    Metadata {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("blob store is offline")]
    Offline,
}

impl From<BlobError> for StorageError {
    fn from(err: BlobError) -> Self {
        StorageError::unavailable(err.to_string(), err)
    }
}

/// Abstraction over the service storing participant uploads.
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `namespace/name`, returning the blob URI once acknowledged.
    fn put_blob(
        &self,
        namespace: &str,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> BoxFuture<'static, StorageResult<String>>;
    /// Fetch a blob; `None` when it does not exist.
    fn get_blob(
        &self,
        namespace: &str,
        name: &str,
    ) -> BoxFuture<'static, StorageResult<Option<StoredBlob>>>;
    /// Mint a read URL valid for `ttl`.
    fn read_url(&self, namespace: &str, name: &str, ttl: Duration) -> String;
    /// Signer used to verify read URLs minted by [`BlobStore::read_url`].
    fn signer(&self) -> &UrlSigner;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Reject segments that could escape the namespace directory.
pub(crate) fn check_segment(segment: &str) -> Result<(), BlobError> {
    let invalid = segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control());
    if invalid {
        Err(BlobError::InvalidSegment {
            segment: segment.to_owned(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_segments_are_rejected() {
        assert!(check_segment("..").is_err());
        assert!(check_segment("a/b").is_err());
        assert!(check_segment("").is_err());
        assert!(check_segment("1700000000000_cat.jpg").is_ok());
    }
}
