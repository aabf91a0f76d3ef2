//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest accepted guess, in characters.
pub const MAX_GUESS_LEN: usize = 200;
/// Most storage names accepted by a single poll request.
pub const MAX_POLL_NAMES: usize = 100;
const MAX_STORAGE_NAME_LEN: usize = 512;

/// Validates that a guess is non-blank and at most [`MAX_GUESS_LEN`] characters.
pub fn validate_guess(guess: &str) -> Result<(), ValidationError> {
    if guess.trim().is_empty() {
        let mut err = ValidationError::new("guess_blank");
        err.message = Some("Guess must not be blank".into());
        return Err(err);
    }

    let len = guess.chars().count();
    if len > MAX_GUESS_LEN {
        let mut err = ValidationError::new("guess_length");
        err.message =
            Some(format!("Guess must be at most {MAX_GUESS_LEN} characters (got {len})").into());
        return Err(err);
    }

    Ok(())
}

/// Validates the storage names a client asks to poll.
pub fn validate_poll_names(names: &[String]) -> Result<(), ValidationError> {
    if names.len() > MAX_POLL_NAMES {
        let mut err = ValidationError::new("pending_too_many");
        err.message = Some(
            format!(
                "At most {MAX_POLL_NAMES} storage names per poll (got {})",
                names.len()
            )
            .into(),
        );
        return Err(err);
    }

    if names
        .iter()
        .any(|name| name.is_empty() || name.len() > MAX_STORAGE_NAME_LEN)
    {
        let mut err = ValidationError::new("pending_name");
        err.message = Some("Storage names must be non-empty and reasonably short".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_guesses_are_rejected() {
        assert!(validate_guess("").is_err());
        assert!(validate_guess("   \t").is_err());
        assert!(validate_guess("lion").is_ok());
    }

    #[test]
    fn overlong_guesses_are_rejected() {
        assert!(validate_guess(&"a".repeat(MAX_GUESS_LEN)).is_ok());
        assert!(validate_guess(&"a".repeat(MAX_GUESS_LEN + 1)).is_err());
    }

    #[test]
    fn poll_names_are_bounded() {
        assert!(validate_poll_names(&[]).is_ok());
        assert!(validate_poll_names(&["1_a.png".into()]).is_ok());
        assert!(validate_poll_names(&["".into()]).is_err());
        assert!(validate_poll_names(&vec!["x".to_string(); MAX_POLL_NAMES + 1]).is_err());
    }
}
