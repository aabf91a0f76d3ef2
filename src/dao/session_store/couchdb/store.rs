use std::{collections::HashSet, sync::Arc};

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::from_value;
use tracing::warn;

use crate::dao::{
    models::{
        Revision, ScoringRecordEntity, SessionEntity, UploadEntity, UploadStatusEntity, Versioned,
    },
    session_store::SessionStore,
    storage::{StorageError, StorageResult},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, AllDocsRow, BulkDocsRequest, CouchPredictionDocument,
        CouchSessionDocument, CouchUploadDocument, DeletedDocument, END_SUFFIX, WriteResponse,
        prediction_prefix, session_doc_id, upload_doc_id, upload_prefix,
    },
};

const ALL_DOCS: &str = "_all_docs";
const BULK_DOCS: &str = "_bulk_docs";

/// Record store persisting sessions, uploads and scoring records as CouchDB documents.
#[derive(Clone)]
pub struct CouchSessionStore {
    client: Client,
    base_url: Arc<Url>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchSessionStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let trimmed = config.base_url.trim_end_matches('/');
        let base_url = Url::parse(trimmed)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| CouchDaoError::InvalidBaseUrl {
                url: config.base_url.clone(),
            })?;
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url: Arc::new(base_url),
            database: Arc::<str>::from(config.database),
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    /// Build a URL below the database, percent-encoding each segment.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = (*self.base_url).clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(&self.database).extend(segments);
        }
        url
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth {
            Some((ref user, ref pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(&[path]));
        self.with_auth(builder)
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.url(&[]);

        let response = self
            .with_auth(self.client.get(url.clone()))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .with_auth(self.client.put(url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// Write a document and return its new `_rev`.
    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<Revision>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Err(CouchDaoError::RevisionConflict {
                doc_id: doc_id.to_string(),
            }),
            status if status.is_success() => response
                .json::<WriteResponse>()
                .await
                .map(|written| written.rev)
                .map_err(|source| CouchDaoError::DecodeResponse {
                    path: doc_id.to_string(),
                    source,
                }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn list_rows(&self, prefix: &str, include_docs: bool) -> CouchResult<Vec<AllDocsRow>> {
        let query = [
            ("include_docs", include_docs.to_string()),
            ("startkey", format!("\"{prefix}\"")),
            ("endkey", format!("\"{prefix}{END_SUFFIX}\"")),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;
        Ok(payload.rows)
    }

    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        self.list_rows(prefix, true)
            .await?
            .into_iter()
            .filter_map(|row| row.doc.map(|doc| (row.id, doc)))
            .map(|(id, doc)| {
                from_value(doc).map_err(|source| CouchDaoError::DeserializeValue { path: id, source })
            })
            .collect()
    }

    async fn delete_prefix(&self, prefix: &str) -> CouchResult<()> {
        let docs: Vec<DeletedDocument> = self
            .list_rows(prefix, false)
            .await?
            .into_iter()
            .filter_map(|row| {
                row.value.map(|value| DeletedDocument {
                    id: row.id,
                    rev: value.rev,
                    deleted: true,
                })
            })
            .collect();
        if docs.is_empty() {
            return Ok(());
        }

        let response = self
            .request(Method::POST, BULK_DOCS)
            .json(&BulkDocsRequest { docs })
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: BULK_DOCS.to_string(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::RequestStatus {
                path: BULK_DOCS.to_string(),
                status: response.status(),
            })
        }
    }

    async fn update_session(&self, session: Versioned<SessionEntity>) -> StorageResult<Revision> {
        let doc_id = session_doc_id(&session.value.participant_id);
        if self
            .get_document::<CouchSessionDocument>(&doc_id)
            .await?
            .is_none()
        {
            return Err(StorageError::missing(doc_id));
        }
        let doc = CouchSessionDocument::from((session.value, Some(session.revision)));
        Ok(self.put_document(&doc_id, &doc).await?)
    }

    async fn mark_upload_completed(
        &self,
        participant_id: &str,
        storage_name: &str,
        similarity: f64,
    ) -> CouchResult<bool> {
        let doc_id = upload_doc_id(participant_id, storage_name);
        let Some(mut doc) = self.get_document::<CouchUploadDocument>(&doc_id).await? else {
            return Ok(false);
        };
        doc.upload.status = UploadStatusEntity::Completed;
        doc.upload.similarity = Some(similarity);

        match self.put_document(&doc_id, &doc).await {
            Ok(_) => Ok(true),
            // Deleted (or rewritten) between the read and the write.
            Err(CouchDaoError::RevisionConflict { .. }) => Ok(self
                .get_document::<CouchUploadDocument>(&doc_id)
                .await?
                .is_some_and(|current| current.upload.status == UploadStatusEntity::Completed)),
            Err(err) => Err(err),
        }
    }

    async fn list_scoring_records(
        &self,
        participant_id: &str,
        filenames: Option<HashSet<String>>,
    ) -> CouchResult<Vec<ScoringRecordEntity>> {
        let rows = self
            .list_rows(&prediction_prefix(participant_id), true)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(doc) = row.doc else { continue };
            match from_value::<CouchPredictionDocument>(doc) {
                Ok(doc) => records.push(ScoringRecordEntity::from(doc)),
                Err(err) => {
                    warn!(doc_id = %row.id, error = %err, "skipping malformed scoring record");
                }
            }
        }

        if let Some(filenames) = filenames {
            records.retain(|record| filenames.contains(&record.matched_filename));
        }
        Ok(records)
    }

    async fn health_check(&self) -> CouchResult<()> {
        let url = self.url(&[]);
        let response = self
            .with_auth(self.client.get(url.clone()))
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: url.to_string(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::RequestStatus {
                path: url.to_string(),
                status: response.status(),
            })
        }
    }
}

impl SessionStore for CouchSessionStore {
    fn session_exists(&self, participant_id: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let doc_id = session_doc_id(participant_id);
        Box::pin(async move {
            let response = store
                .request(Method::HEAD, &doc_id)
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: doc_id.clone(),
                    source,
                })?;
            match response.status() {
                StatusCode::NOT_FOUND => Ok(false),
                status if status.is_success() => Ok(true),
                status => Err(CouchDaoError::RequestStatus {
                    path: doc_id,
                    status,
                }
                .into()),
            }
        })
    }

    fn find_session(
        &self,
        participant_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<SessionEntity>>>> {
        let store = self.clone();
        let doc_id = session_doc_id(participant_id);
        Box::pin(async move {
            let maybe_doc = store.get_document::<CouchSessionDocument>(&doc_id).await?;
            Ok(maybe_doc.and_then(|doc| {
                let rev = doc.rev?;
                Some(Versioned::new(doc.session, rev))
            }))
        })
    }

    fn update_session(
        &self,
        session: Versioned<SessionEntity>,
    ) -> BoxFuture<'static, StorageResult<Revision>> {
        let store = self.clone();
        Box::pin(async move { store.update_session(session).await })
    }

    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = CouchSessionDocument::from((session, None));
            store.put_document(&doc.id, &doc).await?;
            Ok(())
        })
    }

    fn list_uploads(
        &self,
        participant_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<UploadEntity>>> {
        let store = self.clone();
        let prefix = upload_prefix(participant_id);
        Box::pin(async move {
            let mut uploads: Vec<UploadEntity> = store
                .list_documents::<CouchUploadDocument>(&prefix)
                .await?
                .into_iter()
                .map(|doc| doc.upload)
                .collect();
            uploads.sort_by_key(|upload| upload.created_at);
            Ok(uploads)
        })
    }

    fn insert_upload(
        &self,
        participant_id: &str,
        upload: UploadEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let doc = CouchUploadDocument::new(participant_id, upload);
        Box::pin(async move {
            store.put_document(&doc.id, &doc).await?;
            Ok(())
        })
    }

    fn mark_upload_completed(
        &self,
        participant_id: &str,
        storage_name: &str,
        similarity: f64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let participant_id = participant_id.to_owned();
        let storage_name = storage_name.to_owned();
        Box::pin(async move {
            store
                .mark_upload_completed(&participant_id, &storage_name, similarity)
                .await
                .map_err(Into::into)
        })
    }

    fn delete_uploads(&self, participant_id: &str) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let prefix = upload_prefix(participant_id);
        Box::pin(async move { store.delete_prefix(&prefix).await.map_err(Into::into) })
    }

    fn list_scoring_records(
        &self,
        participant_id: &str,
        filenames: Option<&HashSet<String>>,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoringRecordEntity>>> {
        let store = self.clone();
        let participant_id = participant_id.to_owned();
        let filenames = filenames.cloned();
        Box::pin(async move {
            store
                .list_scoring_records(&participant_id, filenames)
                .await
                .map_err(Into::into)
        })
    }

    fn delete_scoring_records(
        &self,
        participant_id: &str,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let prefix = prediction_prefix(participant_id);
        Box::pin(async move { store.delete_prefix(&prefix).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.health_check().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
