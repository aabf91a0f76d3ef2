use serde::{Deserialize, Serialize};
use serde_with::{TimestampMilliSeconds, serde_as};
use std::time::SystemTime;

/// Opaque revision token handed out by a store for optimistic concurrency.
pub type Revision = String;

/// A stored value paired with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    /// The document payload.
    pub value: T,
    /// Revision the payload was read at; updates must present it back.
    pub revision: Revision,
}

impl<T> Versioned<T> {
    /// Pair a value with its revision.
    pub fn new(value: T, revision: impl Into<Revision>) -> Self {
        Self {
            value,
            revision: revision.into(),
        }
    }
}

/// Participant session persisted by the record store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Normalized participant identifier (trimmed, lowercase).
    pub participant_id: String,
    /// Guesses left in the current game.
    pub guesses_remaining: u32,
    /// Whether the current game reached a terminal state.
    pub game_complete: bool,
    /// Whether the participant found the hidden target.
    pub won: bool,
    /// Animal the participant must guess.
    pub hidden_target: String,
    /// Picture of the hidden target, revealed once the game is complete.
    pub hidden_target_image_url: String,
    /// Last submitted guess, kept for auditing.
    #[serde(default)]
    pub last_guess: Option<String>,
    /// Time of the last submitted guess.
    #[serde(default)]
    pub last_guess_at: Option<SystemTime>,
    /// Incremented on every reset so writers from a previous game can be fenced off.
    #[serde(default)]
    pub game_epoch: u64,
    /// Creation timestamp for auditing/debugging.
    pub created_at: SystemTime,
    /// Last time the session document was updated.
    pub updated_at: SystemTime,
}

/// Analysis status of an upload as stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatusEntity {
    Processing,
    Completed,
}

/// Upload record persisted in the participant's `uploads` sub-collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadEntity {
    /// Generated `<millis>_<original>` name; join key with scoring records.
    pub storage_name: String,
    /// Original filename as provided by the participant.
    pub display_name: String,
    /// Location of the blob returned by the blob store.
    pub blob_uri: String,
    /// MIME type declared at upload time.
    pub content_type: String,
    /// Size of the uploaded binary.
    pub size_bytes: u64,
    /// Creation timestamp, used to order uploads.
    pub created_at: SystemTime,
    /// Whether a scoring record has been reconciled.
    pub status: UploadStatusEntity,
    /// Similarity score, present once completed.
    #[serde(default)]
    pub similarity: Option<f64>,
}

/// Scoring record written by the external inference worker.
///
/// The stored key names (`file_name`, `inference`, `timestamp`, `gcs_uri`,
/// `user`) are the canonical worker schema; no alternate spellings are read.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringRecordEntity {
    /// Opaque record id, taken from the backend document key.
    #[serde(skip)]
    pub id: String,
    /// Participant the record belongs to.
    #[serde(rename = "user", default)]
    pub participant_id: String,
    /// Storage name of the scored upload.
    #[serde(rename = "file_name")]
    pub matched_filename: String,
    /// Similarity score between 0 and 100.
    #[serde(rename = "inference")]
    pub score: f64,
    /// Time the worker produced the score (epoch milliseconds).
    #[serde(rename = "timestamp")]
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub produced_at: SystemTime,
    /// Blob location the worker scored, when it reports one.
    #[serde(rename = "gcs_uri", default, skip_serializing_if = "Option::is_none")]
    pub blob_uri: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn scoring_record_reads_canonical_worker_schema() {
        let payload = json!({
            "user": "demo",
            "file_name": "1700000000000_cat.jpg",
            "inference": 72.0,
            "timestamp": 1_700_000_005_000i64,
            "gcs_uri": "gs://bucket/demo/1700000000000_cat.jpg"
        });

        let record: ScoringRecordEntity = serde_json::from_value(payload).unwrap();
        assert_eq!(record.participant_id, "demo");
        assert_eq!(record.matched_filename, "1700000000000_cat.jpg");
        assert_eq!(record.score, 72.0);
        assert_eq!(
            record.produced_at,
            UNIX_EPOCH + Duration::from_millis(1_700_000_005_000)
        );
        assert!(record.id.is_empty());
    }

    #[test]
    fn scoring_record_rejects_alternate_field_names() {
        let payload = json!({
            "filename": "1700000000000_cat.jpg",
            "score": 72.0,
            "Timestamp": 1_700_000_005_000i64
        });

        assert!(serde_json::from_value::<ScoringRecordEntity>(payload).is_err());
    }
}
