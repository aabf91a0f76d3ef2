use mongodb::bson::{Bson, DateTime, Document, doc};
use serde::{Deserialize, Serialize};

use crate::dao::models::{ScoringRecordEntity, SessionEntity, UploadEntity, UploadStatusEntity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    pub participant_id: String,
    /// Optimistic concurrency counter, bumped on every replace.
    pub revision: i64,
    pub guesses_remaining: i64,
    pub game_complete: bool,
    pub won: bool,
    pub hidden_target: String,
    pub hidden_target_image_url: String,
    #[serde(default)]
    pub last_guess: Option<String>,
    #[serde(default)]
    pub last_guess_at: Option<DateTime>,
    #[serde(default)]
    pub game_epoch: i64,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl MongoSessionDocument {
    pub fn from_entity(session: SessionEntity, revision: i64) -> Self {
        Self {
            participant_id: session.participant_id,
            revision,
            guesses_remaining: i64::from(session.guesses_remaining),
            game_complete: session.game_complete,
            won: session.won,
            hidden_target: session.hidden_target,
            hidden_target_image_url: session.hidden_target_image_url,
            last_guess: session.last_guess,
            last_guess_at: session.last_guess_at.map(DateTime::from_system_time),
            game_epoch: i64::try_from(session.game_epoch).unwrap_or(i64::MAX),
            created_at: DateTime::from_system_time(session.created_at),
            updated_at: DateTime::from_system_time(session.updated_at),
        }
    }

    pub fn into_entity(self) -> SessionEntity {
        SessionEntity {
            participant_id: self.participant_id,
            guesses_remaining: u32::try_from(self.guesses_remaining.max(0)).unwrap_or(u32::MAX),
            game_complete: self.game_complete,
            won: self.won,
            hidden_target: self.hidden_target,
            hidden_target_image_url: self.hidden_target_image_url,
            last_guess: self.last_guess,
            last_guess_at: self.last_guess_at.map(DateTime::to_system_time),
            game_epoch: u64::try_from(self.game_epoch).unwrap_or_default(),
            created_at: self.created_at.to_system_time(),
            updated_at: self.updated_at.to_system_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoUploadDocument {
    pub participant_id: String,
    pub storage_name: String,
    pub display_name: String,
    pub blob_uri: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: DateTime,
    pub status: UploadStatusEntity,
    #[serde(default)]
    pub similarity: Option<f64>,
}

impl MongoUploadDocument {
    pub fn from_entity(participant_id: &str, upload: UploadEntity) -> Self {
        Self {
            participant_id: participant_id.to_owned(),
            storage_name: upload.storage_name,
            display_name: upload.display_name,
            blob_uri: upload.blob_uri,
            content_type: upload.content_type,
            size_bytes: i64::try_from(upload.size_bytes).unwrap_or(i64::MAX),
            created_at: DateTime::from_system_time(upload.created_at),
            status: upload.status,
            similarity: upload.similarity,
        }
    }
}

impl From<MongoUploadDocument> for UploadEntity {
    fn from(doc: MongoUploadDocument) -> Self {
        Self {
            storage_name: doc.storage_name,
            display_name: doc.display_name,
            blob_uri: doc.blob_uri,
            content_type: doc.content_type,
            size_bytes: u64::try_from(doc.size_bytes).unwrap_or_default(),
            created_at: doc.created_at.to_system_time(),
            status: doc.status,
            similarity: doc.similarity,
        }
    }
}

/// Scoring record appended by the inference worker into `predictions`.
#[derive(Debug, Clone, Deserialize)]
pub struct MongoPredictionDocument {
    #[serde(rename = "_id")]
    pub id: Bson,
    #[serde(flatten)]
    pub record: ScoringRecordEntity,
}

impl From<MongoPredictionDocument> for ScoringRecordEntity {
    fn from(doc: MongoPredictionDocument) -> Self {
        let id = match doc.id {
            Bson::ObjectId(oid) => oid.to_hex(),
            Bson::String(id) => id,
            other => other.to_string(),
        };
        ScoringRecordEntity { id, ..doc.record }
    }
}

pub fn session_filter(participant_id: &str) -> Document {
    doc! { "_id": participant_id }
}

pub fn upload_filter(participant_id: &str, storage_name: &str) -> Document {
    doc! { "participant_id": participant_id, "storage_name": storage_name }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn session_document_keeps_every_field() {
        let at = UNIX_EPOCH + Duration::from_millis(1_700_000_000_000);
        let session = SessionEntity {
            participant_id: "demo".into(),
            guesses_remaining: 2,
            game_complete: false,
            won: false,
            hidden_target: "lion".into(),
            hidden_target_image_url: "https://example.test/lion.jpg".into(),
            last_guess: Some("tiger".into()),
            last_guess_at: Some(at),
            game_epoch: 4,
            created_at: at,
            updated_at: at,
        };

        let doc = MongoSessionDocument::from_entity(session.clone(), 7);
        assert_eq!(doc.revision, 7);
        assert_eq!(doc.into_entity(), session);
    }
}
