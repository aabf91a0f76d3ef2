use std::{
    collections::HashMap,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime},
};

use futures::future::BoxFuture;

use super::{BlobError, BlobStore, StoredBlob, UrlSigner, check_segment};
use crate::dao::storage::StorageResult;

/// Blob store kept in process memory, used by tests and the memory backend.
#[derive(Clone)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<(String, String), StoredBlob>>>,
    online: Arc<AtomicBool>,
    signer: UrlSigner,
}

impl MemoryBlobStore {
    pub fn new(signer: UrlSigner) -> Self {
        Self {
            blobs: Arc::default(),
            online: Arc::new(AtomicBool::new(true)),
            signer,
        }
    }

    /// Switch the store on or off; while off every write fails.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> Result<(), BlobError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BlobError::Offline)
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn put_blob(
        &self,
        namespace: &str,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> BoxFuture<'static, StorageResult<String>> {
        let result: StorageResult<String> = self
            .check_online()
            .and_then(|_| check_segment(namespace))
            .and_then(|_| check_segment(name))
            .map(|_| {
                self.blobs
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(
                        (namespace.to_owned(), name.to_owned()),
                        StoredBlob {
                            bytes,
                            content_type: content_type.to_owned(),
                        },
                    );
                format!("mem://{namespace}/{name}")
            })
            .map_err(Into::into);
        Box::pin(async move { result })
    }

    fn get_blob(
        &self,
        namespace: &str,
        name: &str,
    ) -> BoxFuture<'static, StorageResult<Option<StoredBlob>>> {
        let result: StorageResult<Option<StoredBlob>> =
            self.check_online().map_err(Into::into).map(|_| {
                self.blobs
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&(namespace.to_owned(), name.to_owned()))
                    .cloned()
            });
        Box::pin(async move { result })
    }

    fn read_url(&self, namespace: &str, name: &str, ttl: Duration) -> String {
        self.signer.sign_url(namespace, name, ttl, SystemTime::now())
    }

    fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let result: StorageResult<()> = self.check_online().map_err(Into::into);
        Box::pin(async move { result })
    }
}
