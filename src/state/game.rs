use std::{fmt, time::SystemTime};

use thiserror::Error;

use crate::{
    dao::models::{ScoringRecordEntity, SessionEntity, UploadEntity, UploadStatusEntity},
    state::state_machine::{GameProgress, GameRules},
};

/// Longest accepted participant identifier, after normalization.
pub const MAX_PARTICIPANT_ID_LEN: usize = 128;

/// Reasons a raw participant identifier is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidParticipantId {
    #[error("participant id must not be blank")]
    Blank,
    #[error("participant id exceeds {MAX_PARTICIPANT_ID_LEN} characters")]
    TooLong,
    #[error("participant id contains forbidden character {0:?}")]
    ForbiddenChar(char),
    #[error("participant id must not be a relative path segment")]
    RelativeSegment,
}

/// Normalized (trimmed, lowercase) participant identifier.
///
/// Every piece of per-participant state is keyed by this value, so two raw
/// spellings differing only in case or surrounding whitespace address the
/// same session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn parse(raw: &str) -> Result<Self, InvalidParticipantId> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(InvalidParticipantId::Blank);
        }
        if normalized.chars().count() > MAX_PARTICIPANT_ID_LEN {
            return Err(InvalidParticipantId::TooLong);
        }
        if let Some(c) = normalized
            .chars()
            .find(|c| matches!(c, '/' | '\\' | ':') || c.is_control())
        {
            return Err(InvalidParticipantId::ForbiddenChar(c));
        }
        if normalized == "." || normalized == ".." {
            return Err(InvalidParticipantId::RelativeSegment);
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ParticipantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Analysis status of an upload. A similarity exists exactly when completed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UploadStatus {
    Processing,
    Completed { similarity: f64 },
}

/// An image the participant submitted during the current game.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRecord {
    pub storage_name: String,
    pub display_name: String,
    pub blob_uri: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub created_at: SystemTime,
    pub status: UploadStatus,
}

impl UploadRecord {
    /// Whether the upload still waits for a scoring record.
    pub fn is_pending(&self) -> bool {
        matches!(self.status, UploadStatus::Processing)
    }

    pub fn similarity(&self) -> Option<f64> {
        match self.status {
            UploadStatus::Processing => None,
            UploadStatus::Completed { similarity } => Some(similarity),
        }
    }
}

impl From<UploadEntity> for UploadRecord {
    fn from(entity: UploadEntity) -> Self {
        // A completed document without a score is treated as still pending
        // so the next reconciliation fills it in.
        let status = match (entity.status, entity.similarity) {
            (UploadStatusEntity::Completed, Some(similarity)) => {
                UploadStatus::Completed { similarity }
            }
            _ => UploadStatus::Processing,
        };
        Self {
            storage_name: entity.storage_name,
            display_name: entity.display_name,
            blob_uri: entity.blob_uri,
            content_type: entity.content_type,
            size_bytes: entity.size_bytes,
            created_at: entity.created_at,
            status,
        }
    }
}

impl From<UploadRecord> for UploadEntity {
    fn from(record: UploadRecord) -> Self {
        let (status, similarity) = match record.status {
            UploadStatus::Processing => (UploadStatusEntity::Processing, None),
            UploadStatus::Completed { similarity } => {
                (UploadStatusEntity::Completed, Some(similarity))
            }
        };
        Self {
            storage_name: record.storage_name,
            display_name: record.display_name,
            blob_uri: record.blob_uri,
            content_type: record.content_type,
            size_bytes: record.size_bytes,
            created_at: record.created_at,
            status,
            similarity,
        }
    }
}

/// Result produced by the external inference worker for one upload.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringRecord {
    pub id: String,
    pub matched_filename: String,
    pub score: f64,
    pub produced_at: SystemTime,
    pub blob_uri: Option<String>,
}

impl From<ScoringRecordEntity> for ScoringRecord {
    fn from(entity: ScoringRecordEntity) -> Self {
        Self {
            id: entity.id,
            matched_filename: entity.matched_filename,
            score: entity.score,
            produced_at: entity.produced_at,
            blob_uri: entity.blob_uri,
        }
    }
}

/// Participant session as seen by the game services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub participant_id: ParticipantId,
    pub guesses_remaining: u32,
    pub game_complete: bool,
    pub won: bool,
    pub hidden_target: String,
    pub hidden_target_image_url: String,
    pub last_guess: Option<String>,
    pub last_guess_at: Option<SystemTime>,
    pub game_epoch: u64,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Session {
    /// Brand new session, used when seeding development profiles.
    pub fn new(
        participant_id: ParticipantId,
        hidden_target: impl Into<String>,
        hidden_target_image_url: impl Into<String>,
        rules: &GameRules,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            participant_id,
            guesses_remaining: rules.initial_guesses,
            game_complete: false,
            won: false,
            hidden_target: hidden_target.into(),
            hidden_target_image_url: hidden_target_image_url.into(),
            last_guess: None,
            last_guess_at: None,
            game_epoch: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Game progress combining the session flags with the current upload count.
    pub fn progress(&self, upload_count: usize) -> GameProgress {
        GameProgress {
            guesses_remaining: self.guesses_remaining,
            game_complete: self.game_complete,
            won: self.won,
            upload_count,
        }
    }

    /// Copy the outcome of a transition back into the session flags.
    pub fn apply_progress(&mut self, progress: &GameProgress) {
        self.guesses_remaining = progress.guesses_remaining;
        self.game_complete = progress.game_complete;
        self.won = progress.won;
    }
}

impl TryFrom<SessionEntity> for Session {
    type Error = InvalidParticipantId;

    fn try_from(entity: SessionEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            participant_id: ParticipantId::parse(&entity.participant_id)?,
            guesses_remaining: entity.guesses_remaining,
            game_complete: entity.game_complete,
            won: entity.won,
            hidden_target: entity.hidden_target,
            hidden_target_image_url: entity.hidden_target_image_url,
            last_guess: entity.last_guess,
            last_guess_at: entity.last_guess_at,
            game_epoch: entity.game_epoch,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        })
    }
}

impl From<Session> for SessionEntity {
    fn from(session: Session) -> Self {
        Self {
            participant_id: session.participant_id.0,
            guesses_remaining: session.guesses_remaining,
            game_complete: session.game_complete,
            won: session.won,
            hidden_target: session.hidden_target,
            hidden_target_image_url: session.hidden_target_image_url,
            last_guess: session.last_guess,
            last_guess_at: session.last_guess_at,
            game_epoch: session.game_epoch,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_ids_are_trimmed_and_lowercased() {
        let id = ParticipantId::parse("  Student1 ").unwrap();
        assert_eq!(id.as_str(), "student1");
        assert_eq!(id, ParticipantId::parse("STUDENT1").unwrap());
    }

    #[test]
    fn participant_ids_reject_unsafe_input() {
        assert_eq!(
            ParticipantId::parse("   "),
            Err(InvalidParticipantId::Blank)
        );
        assert_eq!(
            ParticipantId::parse("a/b"),
            Err(InvalidParticipantId::ForbiddenChar('/'))
        );
        assert_eq!(
            ParticipantId::parse("a::b"),
            Err(InvalidParticipantId::ForbiddenChar(':'))
        );
        assert_eq!(
            ParticipantId::parse(".."),
            Err(InvalidParticipantId::RelativeSegment)
        );
        assert_eq!(
            ParticipantId::parse(&"x".repeat(MAX_PARTICIPANT_ID_LEN + 1)),
            Err(InvalidParticipantId::TooLong)
        );
    }

    #[test]
    fn completed_upload_without_score_is_pending_again() {
        let entity = UploadEntity {
            storage_name: "1_a.png".into(),
            display_name: "a.png".into(),
            blob_uri: "mem://demo/1_a.png".into(),
            content_type: "image/png".into(),
            size_bytes: 1,
            created_at: SystemTime::UNIX_EPOCH,
            status: UploadStatusEntity::Completed,
            similarity: None,
        };
        let record = UploadRecord::from(entity);
        assert!(record.is_pending());
        assert_eq!(record.similarity(), None);
    }
}
