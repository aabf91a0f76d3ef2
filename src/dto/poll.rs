use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::dto::{session::UploadView, validation::validate_poll_names};

/// Storage names the client still considers pending.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct PollRequest {
    #[serde(default)]
    #[validate(custom(function = "validate_poll_names"))]
    pub pending: Vec<String>,
}

/// How a poll request was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    /// Nothing to poll; no store request was made.
    Idle,
    /// Scoring records were fetched and reconciled.
    Fetched,
    /// Another poll was already in flight for this session.
    Skipped,
    /// The store could not be reached; retry on the next tick.
    Failed,
}

/// Outcome of a client-triggered poll.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PollResponse {
    pub status: PollStatus,
    /// Uploads promoted to completed by this poll.
    pub completed: Vec<UploadView>,
    /// Storage names still waiting for a score after this poll.
    pub pending: Vec<String>,
}
