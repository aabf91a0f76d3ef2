use std::{collections::HashSet, sync::Arc};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{Document, doc},
    options::IndexOptions,
};
use tokio::sync::RwLock;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoPredictionDocument, MongoSessionDocument, MongoUploadDocument, session_filter,
        upload_filter,
    },
};
use crate::dao::{
    models::{Revision, ScoringRecordEntity, SessionEntity, UploadEntity, Versioned},
    session_store::SessionStore,
    storage::{StorageError, StorageResult},
};

const SESSION_COLLECTION_NAME: &str = "sessions";
const UPLOAD_COLLECTION_NAME: &str = "uploads";
const PREDICTION_COLLECTION_NAME: &str = "predictions";

/// Record store backed by MongoDB collections.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.state.read().await.database.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let store = Self {
            inner: Arc::new(MongoInner {
                state: RwLock::new(MongoState { client, database }),
                config,
            }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let uploads = self.uploads().await;
        let upload_index = IndexModel::builder()
            .keys(doc! { "participant_id": 1, "storage_name": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("upload_participant_name_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        uploads
            .create_index(upload_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: UPLOAD_COLLECTION_NAME,
                index: "participant_id,storage_name",
                source,
            })?;

        let predictions = self.predictions().await;
        let prediction_index = IndexModel::builder()
            .keys(doc! { "user": 1, "file_name": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("prediction_user_file_idx".to_owned()))
                    .build(),
            )
            .build();
        predictions
            .create_index(prediction_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: PREDICTION_COLLECTION_NAME,
                index: "user,file_name",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        self.inner.state.read().await.database.clone()
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        self.database().await.collection(SESSION_COLLECTION_NAME)
    }

    async fn uploads(&self) -> Collection<MongoUploadDocument> {
        self.database().await.collection(UPLOAD_COLLECTION_NAME)
    }

    async fn predictions(&self) -> Collection<MongoPredictionDocument> {
        self.database().await.collection(PREDICTION_COLLECTION_NAME)
    }

    async fn find_session(
        &self,
        participant_id: &str,
    ) -> MongoResult<Option<Versioned<SessionEntity>>> {
        let document = self
            .sessions()
            .await
            .find_one(session_filter(participant_id))
            .await
            .map_err(|source| MongoDaoError::LoadSession {
                participant_id: participant_id.to_owned(),
                source,
            })?;

        Ok(document.map(|doc| {
            let revision = doc.revision.to_string();
            Versioned::new(doc.into_entity(), revision)
        }))
    }

    async fn update_session(&self, session: Versioned<SessionEntity>) -> StorageResult<Revision> {
        let participant_id = session.value.participant_id.clone();
        let Ok(expected) = session.revision.parse::<i64>() else {
            return Err(StorageError::conflict(participant_id));
        };
        let next = expected + 1;

        let mut filter = session_filter(&participant_id);
        filter.insert("revision", expected);
        let document = MongoSessionDocument::from_entity(session.value, next);

        let result = self
            .sessions()
            .await
            .replace_one(filter, &document)
            .await
            .map_err(|source| MongoDaoError::SaveSession {
                participant_id: participant_id.clone(),
                source,
            })?;

        if result.matched_count > 0 {
            return Ok(next.to_string());
        }
        match self.find_session(&participant_id).await? {
            Some(_) => Err(StorageError::conflict(participant_id)),
            None => Err(StorageError::missing(participant_id)),
        }
    }

    async fn insert_session(&self, session: SessionEntity) -> MongoResult<()> {
        let participant_id = session.participant_id.clone();
        let document = MongoSessionDocument::from_entity(session, 1);
        self.sessions()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::SaveSession {
                participant_id,
                source,
            })?;
        Ok(())
    }

    async fn list_uploads(&self, participant_id: &str) -> MongoResult<Vec<UploadEntity>> {
        let to_error = |source| MongoDaoError::Uploads {
            participant_id: participant_id.to_owned(),
            source,
        };
        let documents: Vec<MongoUploadDocument> = self
            .uploads()
            .await
            .find(doc! { "participant_id": participant_id })
            .sort(doc! { "created_at": 1, "storage_name": 1 })
            .await
            .map_err(to_error)?
            .try_collect()
            .await
            .map_err(to_error)?;

        Ok(documents.into_iter().map(UploadEntity::from).collect())
    }

    async fn insert_upload(&self, participant_id: &str, upload: UploadEntity) -> MongoResult<()> {
        let document = MongoUploadDocument::from_entity(participant_id, upload);
        self.uploads()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::Uploads {
                participant_id: participant_id.to_owned(),
                source,
            })?;
        Ok(())
    }

    async fn mark_upload_completed(
        &self,
        participant_id: &str,
        storage_name: &str,
        similarity: f64,
    ) -> MongoResult<bool> {
        let result = self
            .uploads()
            .await
            .update_one(
                upload_filter(participant_id, storage_name),
                doc! { "$set": { "status": "completed", "similarity": similarity } },
            )
            .await
            .map_err(|source| MongoDaoError::Uploads {
                participant_id: participant_id.to_owned(),
                source,
            })?;
        Ok(result.matched_count > 0)
    }

    async fn delete_uploads(&self, participant_id: &str) -> MongoResult<()> {
        self.uploads()
            .await
            .delete_many(doc! { "participant_id": participant_id })
            .await
            .map_err(|source| MongoDaoError::Uploads {
                participant_id: participant_id.to_owned(),
                source,
            })?;
        Ok(())
    }

    async fn list_scoring_records(
        &self,
        participant_id: &str,
        filenames: Option<Vec<String>>,
    ) -> MongoResult<Vec<ScoringRecordEntity>> {
        let mut filter: Document = doc! { "user": participant_id };
        if let Some(filenames) = filenames {
            filter.insert("file_name", doc! { "$in": filenames });
        }

        let to_error = |source| MongoDaoError::Predictions {
            participant_id: participant_id.to_owned(),
            source,
        };
        let documents: Vec<MongoPredictionDocument> = self
            .predictions()
            .await
            .find(filter)
            .await
            .map_err(to_error)?
            .try_collect()
            .await
            .map_err(to_error)?;

        Ok(documents.into_iter().map(ScoringRecordEntity::from).collect())
    }

    async fn delete_scoring_records(&self, participant_id: &str) -> MongoResult<()> {
        self.predictions()
            .await
            .delete_many(doc! { "user": participant_id })
            .await
            .map_err(|source| MongoDaoError::Predictions {
                participant_id: participant_id.to_owned(),
                source,
            })?;
        Ok(())
    }
}

impl SessionStore for MongoSessionStore {
    fn session_exists(&self, participant_id: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let participant_id = participant_id.to_owned();
        Box::pin(async move {
            let count = store
                .sessions()
                .await
                .count_documents(session_filter(&participant_id))
                .await
                .map_err(|source| MongoDaoError::LoadSession {
                    participant_id,
                    source,
                })?;
            Ok(count > 0)
        })
    }

    fn find_session(
        &self,
        participant_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<SessionEntity>>>> {
        let store = self.clone();
        let participant_id = participant_id.to_owned();
        Box::pin(async move { store.find_session(&participant_id).await.map_err(Into::into) })
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
        Box::pin(async move { store.insert_session(session).await.map_err(Into::into) })
    }

    fn list_uploads(
        &self,
        participant_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<UploadEntity>>> {
        let store = self.clone();
        let participant_id = participant_id.to_owned();
        Box::pin(async move { store.list_uploads(&participant_id).await.map_err(Into::into) })
    }

    fn insert_upload(
        &self,
        participant_id: &str,
        upload: UploadEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let participant_id = participant_id.to_owned();
        Box::pin(async move {
            store
                .insert_upload(&participant_id, upload)
                .await
                .map_err(Into::into)
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
        let participant_id = participant_id.to_owned();
        Box::pin(async move { store.delete_uploads(&participant_id).await.map_err(Into::into) })
    }

    fn list_scoring_records(
        &self,
        participant_id: &str,
        filenames: Option<&HashSet<String>>,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoringRecordEntity>>> {
        let store = self.clone();
        let participant_id = participant_id.to_owned();
        let filenames = filenames.map(|names| names.iter().cloned().collect::<Vec<_>>());
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
        let participant_id = participant_id.to_owned();
        Box::pin(async move {
            store
                .delete_scoring_records(&participant_id)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
