/// OpenAPI documentation generation.
pub mod documentation;
/// Guess judging and game reset.
pub mod game_service;
/// Health check service.
pub mod health_service;
/// Scoring record polling and reconciliation.
pub mod reconciler;
/// Session bootstrap, live handles and teardown.
pub mod session_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events streaming service.
pub mod sse_service;
/// Record store connection supervisor toggling degraded mode.
pub mod storage_supervisor;
/// Image upload validation and registration.
pub mod upload_service;
