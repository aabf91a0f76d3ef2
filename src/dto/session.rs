use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    dto::format_system_time,
    state::{
        game::{Session, UploadRecord, UploadStatus},
        state_machine::{GamePhase, GameRules},
    },
};

/// Phase of the participant's game, derived from the session and upload count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GamePhaseView {
    Uploading,
    Guessing,
    Complete,
}

impl From<GamePhase> for GamePhaseView {
    fn from(phase: GamePhase) -> Self {
        match phase {
            GamePhase::Uploading => Self::Uploading,
            GamePhase::Guessing => Self::Guessing,
            GamePhase::Complete => Self::Complete,
        }
    }
}

/// Game fields visible to the participant. The target stays hidden until the game is complete.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct GameStateView {
    pub phase: GamePhaseView,
    pub guesses_remaining: u32,
    pub game_complete: bool,
    pub won: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden_target_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_guess: Option<String>,
    /// RFC 3339 timestamp of the last guess.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_guess_at: Option<String>,
}

impl GameStateView {
    pub fn new(session: &Session, upload_count: usize, rules: &GameRules) -> Self {
        let progress = session.progress(upload_count);
        let phase = progress.phase(rules);
        let revealed = phase == GamePhase::Complete;
        Self {
            phase: phase.into(),
            guesses_remaining: session.guesses_remaining,
            game_complete: session.game_complete,
            won: session.won,
            hidden_target: revealed.then(|| session.hidden_target.clone()),
            hidden_target_image_url: revealed.then(|| session.hidden_target_image_url.clone()),
            last_guess: session.last_guess.clone(),
            last_guess_at: session.last_guess_at.map(format_system_time),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatusView {
    Processing,
    Completed,
}

/// Upload as returned to the participant.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct UploadView {
    /// Generated name; the key scoring records are matched on.
    pub storage_name: String,
    pub display_name: String,
    pub status: UploadStatusView,
    /// Similarity score 0-100, present once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    pub content_type: String,
    pub size_bytes: u64,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// Time-limited read URL for the image.
    pub image_url: String,
}

impl UploadView {
    pub fn new(record: &UploadRecord, image_url: String) -> Self {
        let (status, similarity) = match record.status {
            UploadStatus::Processing => (UploadStatusView::Processing, None),
            UploadStatus::Completed { similarity } => {
                (UploadStatusView::Completed, Some(similarity))
            }
        };
        Self {
            storage_name: record.storage_name.clone(),
            display_name: record.display_name.clone(),
            status,
            similarity,
            content_type: record.content_type.clone(),
            size_bytes: record.size_bytes,
            created_at: format_system_time(record.created_at),
            image_url,
        }
    }
}

/// Limits the client needs to drive its upload and polling loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct LimitsView {
    pub upload_cap: usize,
    pub initial_guesses: u32,
    pub max_upload_bytes: usize,
    pub poll_interval_ms: u64,
}

/// Everything needed to render a participant's game after login or refresh.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SessionView {
    pub participant_id: String,
    pub game: GameStateView,
    /// Uploads of the current game, oldest first.
    pub uploads: Vec<UploadView>,
    pub limits: LimitsView,
}

/// Answer of the profile existence probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ProfileResponse {
    pub participant_id: String,
    pub exists: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::game::ParticipantId;

    fn session() -> Session {
        Session::new(
            ParticipantId::parse("demo").unwrap(),
            "lion",
            "/images/lion.jpg",
            &GameRules::default(),
        )
    }

    #[test]
    fn target_is_hidden_while_the_game_runs() {
        let view = GameStateView::new(&session(), 10, &GameRules::default());
        assert_eq!(view.phase, GamePhaseView::Guessing);
        assert_eq!(view.hidden_target, None);
        assert_eq!(view.hidden_target_image_url, None);

        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("hidden_target").is_none());
    }

    #[test]
    fn target_is_revealed_once_complete() {
        let mut session = session();
        session.game_complete = true;
        session.guesses_remaining = 0;
        let view = GameStateView::new(&session, 10, &GameRules::default());
        assert_eq!(view.phase, GamePhaseView::Complete);
        assert_eq!(view.hidden_target.as_deref(), Some("lion"));
        assert_eq!(
            view.hidden_target_image_url.as_deref(),
            Some("/images/lion.jpg")
        );
    }
}
