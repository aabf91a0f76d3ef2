use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dao::models::{ScoringRecordEntity, SessionEntity, UploadEntity};

pub const SESSION_PREFIX: &str = "session::";
pub const UPLOAD_PREFIX: &str = "upload::";
pub const PREDICTION_PREFIX: &str = "prediction::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub value: Option<RowValue>,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RowValue {
    pub rev: String,
}

/// Body returned by CouchDB on a successful write.
#[derive(Debug, Deserialize)]
pub struct WriteResponse {
    pub rev: String,
}

/// Tombstone sent through `_bulk_docs`.
#[derive(Debug, Serialize)]
pub struct DeletedDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev")]
    pub rev: String,
    #[serde(rename = "_deleted")]
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct BulkDocsRequest {
    pub docs: Vec<DeletedDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchSessionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub session: SessionEntity,
}

impl From<(SessionEntity, Option<String>)> for CouchSessionDocument {
    fn from((session, rev): (SessionEntity, Option<String>)) -> Self {
        Self {
            id: session_doc_id(&session.participant_id),
            rev,
            session,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchUploadDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub participant_id: String,
    #[serde(flatten)]
    pub upload: UploadEntity,
}

impl CouchUploadDocument {
    pub fn new(participant_id: &str, upload: UploadEntity) -> Self {
        Self {
            id: upload_doc_id(participant_id, &upload.storage_name),
            rev: None,
            participant_id: participant_id.to_owned(),
            upload,
        }
    }
}

/// Scoring record as appended by the inference worker.
#[derive(Debug, Clone, Deserialize)]
pub struct CouchPredictionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub record: ScoringRecordEntity,
}

impl From<CouchPredictionDocument> for ScoringRecordEntity {
    fn from(doc: CouchPredictionDocument) -> Self {
        let id = doc
            .id
            .rsplit_once("::")
            .map(|(_, id)| id.to_owned())
            .unwrap_or(doc.id);
        ScoringRecordEntity { id, ..doc.record }
    }
}

pub fn session_doc_id(participant_id: &str) -> String {
    format!("{SESSION_PREFIX}{participant_id}")
}

pub fn upload_prefix(participant_id: &str) -> String {
    format!("{UPLOAD_PREFIX}{participant_id}::")
}

pub fn upload_doc_id(participant_id: &str, storage_name: &str) -> String {
    format!("{}{storage_name}", upload_prefix(participant_id))
}

pub fn prediction_prefix(participant_id: &str) -> String {
    format!("{PREDICTION_PREFIX}{participant_id}::")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prediction_id_is_taken_from_the_document_key() {
        let doc: CouchPredictionDocument = serde_json::from_value(json!({
            "_id": "prediction::demo::abc123",
            "_rev": "1-x",
            "user": "demo",
            "file_name": "1700000000000_cat.jpg",
            "inference": 41.5,
            "timestamp": 1_700_000_000_500i64
        }))
        .unwrap();

        let record: ScoringRecordEntity = doc.into();
        assert_eq!(record.id, "abc123");
        assert_eq!(record.matched_filename, "1700000000000_cat.jpg");
    }

    #[test]
    fn upload_ids_are_scoped_to_the_participant() {
        assert_eq!(upload_doc_id("demo", "1_a.png"), "upload::demo::1_a.png");
        assert!(upload_doc_id("demo", "x").starts_with(&upload_prefix("demo")));
        assert!(!upload_doc_id("demo2", "x").starts_with(&upload_prefix("demo")));
    }
}
