use std::{path::PathBuf, sync::Arc, time::{Duration, SystemTime}};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use super::{BlobError, BlobStore, StoredBlob, UrlSigner, check_segment};
use crate::dao::storage::StorageResult;

const META_SUFFIX: &str = ".meta.json";

#[derive(Debug, Serialize, Deserialize)]
struct BlobMeta {
    content_type: String,
}

/// Blob store writing `{root}/{namespace}/{name}` files with a sidecar metadata file.
#[derive(Clone)]
pub struct FsBlobStore {
    root: Arc<PathBuf>,
    signer: UrlSigner,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            root: Arc::new(root.into()),
            signer,
        }
    }

    fn paths(&self, namespace: &str, name: &str) -> Result<(PathBuf, PathBuf), BlobError> {
        check_segment(namespace)?;
        check_segment(name)?;
        let dir = self.root.join(namespace);
        Ok((dir.join(name), dir.join(format!("{name}{META_SUFFIX}"))))
    }

    async fn write(
        &self,
        namespace: String,
        name: String,
        bytes: Vec<u8>,
        content_type: String,
    ) -> Result<String, BlobError> {
        let (blob_path, meta_path) = self.paths(&namespace, &name)?;
        let path_text = blob_path.display().to_string();
        let write_err = |source| BlobError::Write {
            path: path_text.clone(),
            source,
        };

        if let Some(dir) = blob_path.parent() {
            fs::create_dir_all(dir).await.map_err(write_err)?;
        }
        let meta = serde_json::to_vec(&BlobMeta { content_type }).map_err(|source| {
            BlobError::Metadata {
                path: path_text.clone(),
                source,
            }
        })?;
        fs::write(&meta_path, meta).await.map_err(write_err)?;
        fs::write(&blob_path, bytes).await.map_err(write_err)?;

        debug!(path = %path_text, "blob written");
        Ok(format!("file://{path_text}"))
    }

    async fn read(&self, namespace: String, name: String) -> Result<Option<StoredBlob>, BlobError> {
        let (blob_path, meta_path) = self.paths(&namespace, &name)?;
        let path_text = blob_path.display().to_string();

        let bytes = match fs::read(&blob_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(BlobError::Read {
                    path: path_text,
                    source,
                });
            }
        };
        let meta = fs::read(&meta_path)
            .await
            .map_err(|source| BlobError::Read {
                path: meta_path.display().to_string(),
                source,
            })?;
        let meta: BlobMeta = serde_json::from_slice(&meta)
            .map_err(|source| BlobError::Metadata { path: path_text, source })?;

        Ok(Some(StoredBlob {
            bytes,
            content_type: meta.content_type,
        }))
    }
}

impl BlobStore for FsBlobStore {
    fn put_blob(
        &self,
        namespace: &str,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> BoxFuture<'static, StorageResult<String>> {
        let store = self.clone();
        let (namespace, name, content_type) =
            (namespace.to_owned(), name.to_owned(), content_type.to_owned());
        Box::pin(async move {
            store
                .write(namespace, name, bytes, content_type)
                .await
                .map_err(Into::into)
        })
    }

    fn get_blob(
        &self,
        namespace: &str,
        name: &str,
    ) -> BoxFuture<'static, StorageResult<Option<StoredBlob>>> {
        let store = self.clone();
        let (namespace, name) = (namespace.to_owned(), name.to_owned());
        Box::pin(async move { store.read(namespace, name).await.map_err(Into::into) })
    }

    fn read_url(&self, namespace: &str, name: &str, ttl: Duration) -> String {
        self.signer.sign_url(namespace, name, ttl, SystemTime::now())
    }

    fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let root = self.root.clone();
        Box::pin(async move {
            fs::create_dir_all(root.as_path())
                .await
                .map_err(|source| BlobError::Write {
                    path: root.display().to_string(),
                    source,
                })?;
            Ok(())
        })
    }
}
