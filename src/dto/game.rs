use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::dto::{session::GameStateView, validation::validate_guess};

/// Guess submitted once the upload cap is reached.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct GuessRequest {
    /// Free-text animal name.
    #[validate(custom(function = "validate_guess"))]
    pub guess: String,
}

/// Result of a guess. Target fields are only present once the game is complete.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct GuessOutcome {
    /// Whether this guess matched the hidden target.
    pub correct: bool,
    pub guesses_remaining: u32,
    pub game_complete: bool,
    pub won: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden_target_image_url: Option<String>,
}

impl GuessOutcome {
    pub fn new(correct: bool, game: &GameStateView) -> Self {
        Self {
            correct,
            guesses_remaining: game.guesses_remaining,
            game_complete: game.game_complete,
            won: game.won,
            hidden_target: game.hidden_target.clone(),
            hidden_target_image_url: game.hidden_target_image_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guess_request_rejects_blank_input() {
        let request = GuessRequest {
            guess: "  ".into(),
        };
        assert!(request.validate().is_err());

        let request = GuessRequest {
            guess: "Lion".into(),
        };
        assert!(request.validate().is_ok());
    }
}
