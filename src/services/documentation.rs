use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Mystery Animal Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::session::profile_exists,
        crate::routes::session::load_session,
        crate::routes::session::teardown,
        crate::routes::upload::register_upload,
        crate::routes::game::submit_guess,
        crate::routes::game::reset_game,
        crate::routes::game::poll_results,
        crate::routes::sse::session_stream,
        crate::routes::blob::read_blob,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::SessionView,
            crate::dto::session::GameStateView,
            crate::dto::session::GamePhaseView,
            crate::dto::session::UploadView,
            crate::dto::session::UploadStatusView,
            crate::dto::session::LimitsView,
            crate::dto::session::ProfileResponse,
            crate::dto::game::GuessRequest,
            crate::dto::game::GuessOutcome,
            crate::dto::poll::PollRequest,
            crate::dto::poll::PollResponse,
            crate::dto::poll::PollStatus,
            crate::dto::sse::Handshake,
            crate::dto::sse::UploadRegisteredEvent,
            crate::dto::sse::UploadCompletedEvent,
            crate::dto::sse::GameUpdatedEvent,
            crate::dto::sse::GameResetEvent,
            crate::error::ErrorBody,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "session", description = "Participant login, session loading and logout"),
        (name = "game", description = "Uploads, result polling, guesses and reset"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "blobs", description = "Signed image reads"),
    )
)]
pub struct ApiDoc;
