use thiserror::Error;

/// High-level phases a participant's game can be in.
///
/// The phase is never stored: it is derived from the session flags and the
/// number of uploads of the current game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    /// Fewer uploads than the cap; more images may be submitted.
    Uploading,
    /// Upload cap reached; guesses are accepted.
    Guessing,
    /// Terminal state; only a reset leaves it.
    Complete,
}

/// Events that can be applied to the game progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// A new upload record was persisted.
    UploadRegistered,
    /// A guess was judged against the hidden target.
    GuessSubmitted {
        /// Whether the guess matched the target.
        correct: bool,
    },
    /// Start over with a fresh game.
    Reset,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the game was in when the event was received.
    pub from: GamePhase,
    /// The event that cannot be applied from this phase.
    pub event: GameEvent,
}

/// Tunables shared by every game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameRules {
    /// Uploads required before guessing opens (and the most allowed).
    pub upload_cap: usize,
    /// Guesses granted at the start of a game.
    pub initial_guesses: u32,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            upload_cap: 10,
            initial_guesses: 3,
        }
    }
}

/// The part of a session the state machine reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameProgress {
    pub guesses_remaining: u32,
    pub game_complete: bool,
    pub won: bool,
    pub upload_count: usize,
}

impl GameProgress {
    /// Progress of a game that has just started.
    pub fn fresh(rules: &GameRules) -> Self {
        Self {
            guesses_remaining: rules.initial_guesses,
            game_complete: false,
            won: false,
            upload_count: 0,
        }
    }

    /// Derive the current phase. Running out of guesses is terminal even if
    /// the completion flag was never written.
    pub fn phase(&self, rules: &GameRules) -> GamePhase {
        if self.game_complete || self.guesses_remaining == 0 {
            GamePhase::Complete
        } else if self.upload_count >= rules.upload_cap {
            GamePhase::Guessing
        } else {
            GamePhase::Uploading
        }
    }

    /// Compute the progress after `event` without mutating `self`.
    pub fn plan(&self, event: GameEvent, rules: &GameRules) -> Result<Self, InvalidTransition> {
        let from = self.phase(rules);
        let next = match (from, event) {
            (_, GameEvent::Reset) => Self::fresh(rules),
            (GamePhase::Uploading, GameEvent::UploadRegistered) => Self {
                upload_count: self.upload_count + 1,
                ..*self
            },
            (GamePhase::Guessing, GameEvent::GuessSubmitted { correct }) => {
                let guesses_remaining = if correct {
                    0
                } else {
                    self.guesses_remaining.saturating_sub(1)
                };
                Self {
                    guesses_remaining,
                    game_complete: correct || guesses_remaining == 0,
                    won: correct,
                    upload_count: self.upload_count,
                }
            }
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }
}

/// Judge a guess with the lenient substring rule: after trimming and
/// lowercasing, either string containing the other is a match.
///
/// Callers must reject a blank target beforehand, since it would match anything.
pub fn is_correct_guess(guess: &str, target: &str) -> bool {
    let guess = guess.trim().to_lowercase();
    let target = target.trim().to_lowercase();
    guess.contains(&target) || target.contains(&guess)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: GameRules = GameRules {
        upload_cap: 10,
        initial_guesses: 3,
    };

    fn at_cap() -> GameProgress {
        GameProgress {
            upload_count: RULES.upload_cap,
            ..GameProgress::fresh(&RULES)
        }
    }

    fn apply(progress: GameProgress, event: GameEvent) -> GameProgress {
        progress.plan(event, &RULES).unwrap()
    }

    #[test]
    fn initial_phase_is_uploading() {
        assert_eq!(GameProgress::fresh(&RULES).phase(&RULES), GamePhase::Uploading);
    }

    #[test]
    fn reaching_the_cap_opens_guessing() {
        let mut progress = GameProgress::fresh(&RULES);
        for _ in 0..RULES.upload_cap {
            assert_eq!(progress.phase(&RULES), GamePhase::Uploading);
            progress = apply(progress, GameEvent::UploadRegistered);
        }
        assert_eq!(progress.phase(&RULES), GamePhase::Guessing);

        let err = progress
            .plan(GameEvent::UploadRegistered, &RULES)
            .unwrap_err();
        assert_eq!(err.from, GamePhase::Guessing);
    }

    #[test]
    fn guessing_before_the_cap_is_rejected() {
        let progress = GameProgress {
            upload_count: 9,
            ..GameProgress::fresh(&RULES)
        };
        assert!(
            progress
                .plan(GameEvent::GuessSubmitted { correct: true }, &RULES)
                .is_err()
        );
    }

    #[test]
    fn three_wrong_guesses_lose_the_game() {
        let mut progress = at_cap();
        for expected in [2, 1, 0] {
            progress = apply(progress, GameEvent::GuessSubmitted { correct: false });
            assert_eq!(progress.guesses_remaining, expected);
        }
        assert!(progress.game_complete);
        assert!(!progress.won);
        assert_eq!(progress.phase(&RULES), GamePhase::Complete);
    }

    #[test]
    fn correct_guess_wins_and_zeroes_guesses() {
        let progress = apply(at_cap(), GameEvent::GuessSubmitted { correct: true });
        assert_eq!(progress.guesses_remaining, 0);
        assert!(progress.game_complete);
        assert!(progress.won);
    }

    #[test]
    fn complete_is_a_fixed_point_for_guesses() {
        let done = apply(at_cap(), GameEvent::GuessSubmitted { correct: true });
        for correct in [true, false] {
            let err = done
                .plan(GameEvent::GuessSubmitted { correct }, &RULES)
                .unwrap_err();
            assert_eq!(err.from, GamePhase::Complete);
        }
    }

    #[test]
    fn guesses_never_increase_within_a_game() {
        let mut progress = at_cap();
        let mut previous = progress.guesses_remaining;
        for correct in [false, false, true, false] {
            if let Ok(next) = progress.plan(GameEvent::GuessSubmitted { correct }, &RULES) {
                progress = next;
            }
            assert!(progress.guesses_remaining <= previous);
            previous = progress.guesses_remaining;
        }
    }

    #[test]
    fn zero_guesses_without_flag_is_complete() {
        let progress = GameProgress {
            guesses_remaining: 0,
            ..at_cap()
        };
        assert_eq!(progress.phase(&RULES), GamePhase::Complete);
    }

    #[test]
    fn reset_is_allowed_from_every_phase() {
        let won = apply(at_cap(), GameEvent::GuessSubmitted { correct: true });
        for progress in [GameProgress::fresh(&RULES), at_cap(), won] {
            assert_eq!(
                apply(progress, GameEvent::Reset),
                GameProgress::fresh(&RULES)
            );
        }
    }

    #[test]
    fn guess_matching_is_lenient_substring_in_both_directions() {
        assert!(is_correct_guess("Lion", "lion"));
        assert!(is_correct_guess("  a lion ", "Lion"));
        assert!(is_correct_guess("mountain lion", "lion"));
        assert!(is_correct_guess("lion", "mountain lion"));
        assert!(is_correct_guess("li", "lion"));
        assert!(!is_correct_guess("tiger", "lion"));
    }
}
