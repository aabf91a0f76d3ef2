//! HTTP integration tests for mystery-animal-back.
//!
//! Every test drives the real router against the in-memory record and blob
//! stores, seeded with the default development profiles.

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use mystery_animal_back::{
    build_router,
    config::AppConfig,
    dao::{
        blob_store::{UrlSigner, memory::MemoryBlobStore},
        session_store::{SessionStore, memory::MemorySessionStore},
    },
    services::session_service,
    state::{AppState, SharedState, state_machine::GameRules},
};
use serde_json::{Value, json};
use tower::ServiceExt;

const PUBLIC_BASE: &str = "http://localhost";

struct TestApp {
    router: Router,
    state: SharedState,
    store: MemorySessionStore,
}

impl TestApp {
    async fn new(config: AppConfig) -> Self {
        // Long period so the background reconciler stays out of the way.
        let config = config.with_poll_interval(Duration::from_secs(3_600));
        let blobs = Arc::new(MemoryBlobStore::new(UrlSigner::new(b"test-key", PUBLIC_BASE)));
        let state = AppState::new(config, blobs);
        let store = MemorySessionStore::new();
        state.install_session_store(Arc::new(store.clone())).await;
        session_service::seed_sessions(&state).await.unwrap();

        Self {
            router: build_router(state.clone()),
            state,
            store,
        }
    }

    async fn with_rules(rules: GameRules) -> Self {
        Self::new(AppConfig::default().with_rules(rules)).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post_json(&self, uri: &str, payload: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn upload(
        &self,
        participant: &str,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> (StatusCode, Value) {
        let (boundary_header, body) = create_upload_multipart(file_name, content_type, bytes);
        self.send(
            Request::builder()
                .method("POST")
                .uri(format!("/sessions/{participant}/uploads"))
                .header(header::CONTENT_TYPE, boundary_header)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    async fn upload_image(&self, participant: &str, file_name: &str) -> String {
        let (status, body) = self
            .upload(participant, file_name, "image/jpeg", b"\xff\xd8\xff\xe0fake-jpeg")
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["storage_name"].as_str().unwrap().to_owned()
    }

    async fn poll(&self, participant: &str, pending: &[&str]) -> Value {
        let (status, body) = self
            .post_json(
                &format!("/sessions/{participant}/poll"),
                json!({ "pending": pending }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }

    async fn guess(&self, participant: &str, guess: &str) -> (StatusCode, Value) {
        self.post_json(
            &format!("/sessions/{participant}/guess"),
            json!({ "guess": guess }),
        )
        .await
    }

    async fn set_guesses_remaining(&self, participant: &str, guesses: u32) {
        let mut session = self.store.find_session(participant).await.unwrap().unwrap();
        session.value.guesses_remaining = guesses;
        self.store.update_session(session).await.unwrap();
    }
}

/// Multipart body with a single `file` part.
fn create_upload_multipart(file_name: &str, content_type: &str, content: &[u8]) -> (String, Vec<u8>) {
    let boundary = "----TestBoundary7MA4YWxkTrZu0gW";
    let mut body = Vec::new();

    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    (format!("multipart/form-data; boundary={boundary}"), body)
}

// ============================================================================
// Health & profiles
// ============================================================================

#[tokio::test]
async fn healthcheck_reports_ok_with_a_store() {
    let app = TestApp::new(AppConfig::default()).await;
    let (status, body) = app.get("/healthcheck").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn profile_probe_normalizes_the_identifier() {
    let app = TestApp::new(AppConfig::default()).await;

    let (status, body) = app.get("/profiles/%20Demo%20").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["participant_id"], "demo");
    assert_eq!(body["exists"], true);

    let (_, body) = app.get("/profiles/ghost").await;
    assert_eq!(body["exists"], false);
}

#[tokio::test]
async fn loading_an_unknown_session_is_not_found() {
    let app = TestApp::new(AppConfig::default()).await;
    let (status, body) = app.get("/sessions/ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn fresh_session_hides_the_target() {
    let app = TestApp::new(AppConfig::default()).await;
    let (status, body) = app.get("/sessions/student1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["game"]["phase"], "uploading");
    assert_eq!(body["game"]["guesses_remaining"], 3);
    assert!(body["game"].get("hidden_target").is_none());
    assert_eq!(body["uploads"], json!([]));
    assert_eq!(body["limits"]["upload_cap"], 10);
}

// ============================================================================
// Uploads & polling
// ============================================================================

#[tokio::test]
async fn scenario_a_upload_is_completed_once_scored() {
    let app = TestApp::new(AppConfig::default()).await;
    let name = app.upload_image("demo", "cat.jpg").await;
    assert!(name.ends_with("_cat.jpg"));

    let body = app.poll("demo", &[&name]).await;
    assert_eq!(body["status"], "fetched");
    assert_eq!(body["completed"], json!([]));
    assert_eq!(body["pending"], json!([name]));

    app.store.append_scoring_record("demo", &name, 72.0);

    let body = app.poll("demo", &[&name]).await;
    assert_eq!(body["completed"][0]["storage_name"], name);
    assert_eq!(body["completed"][0]["status"], "completed");
    assert_eq!(body["completed"][0]["similarity"], 72.0);
    assert_eq!(body["pending"], json!([]));

    let (_, session) = app.get("/sessions/demo").await;
    assert_eq!(session["uploads"][0]["status"], "completed");
    assert_eq!(session["uploads"][0]["similarity"], 72.0);
}

#[tokio::test]
async fn scores_produced_while_away_are_applied_on_load() {
    let app = TestApp::new(AppConfig::default()).await;
    let name = app.upload_image("demo", "dog.png").await;

    let (status, _) = app
        .send(
            Request::builder()
                .method("DELETE")
                .uri("/sessions/demo")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(app.state.sessions().is_empty());

    app.store.append_scoring_record("demo", &name, 41.0);
    app.store.append_scoring_record("demo", "unrelated.png", 99.0);

    let (status, session) = app.get("/sessions/demo").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["uploads"].as_array().unwrap().len(), 1);
    assert_eq!(session["uploads"][0]["similarity"], 41.0);
}

#[tokio::test]
async fn scenario_e_empty_poll_makes_no_store_request() {
    let app = TestApp::new(AppConfig::default()).await;
    let body = app.poll("demo", &[]).await;
    assert_eq!(body["status"], "idle");
    assert_eq!(app.store.scoring_query_count(), 0);
}

#[tokio::test]
async fn poll_failures_are_reported_in_the_body() {
    let app = TestApp::new(AppConfig::default()).await;
    let name = app.upload_image("demo", "cat.jpg").await;
    app.store.set_online(false);

    let body = app.poll("demo", &[&name]).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["pending"], json!([name]));
}

#[tokio::test]
async fn uploads_are_listed_in_creation_order() {
    let app = TestApp::new(AppConfig::default()).await;
    let first = app.upload_image("demo", "a.jpg").await;
    let second = app.upload_image("demo", "a.jpg").await;
    assert_ne!(first, second);

    let (_, session) = app.get("/sessions/demo").await;
    let names: Vec<&str> = session["uploads"]
        .as_array()
        .unwrap()
        .iter()
        .map(|upload| upload["storage_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec![first.as_str(), second.as_str()]);
}

#[tokio::test]
async fn non_image_uploads_are_rejected() {
    let app = TestApp::new(AppConfig::default()).await;
    let (status, body) = app
        .upload("demo", "notes.pdf", "application/pdf", b"%PDF-1.4")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
}

#[tokio::test]
async fn oversized_uploads_are_rejected() {
    let app = TestApp::new(AppConfig::default().with_max_upload_bytes(16)).await;
    let (status, body) = app
        .upload("demo", "big.jpg", "image/jpeg", &[0u8; 32])
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["kind"], "payload_too_large");
}

#[tokio::test]
async fn uploads_past_the_cap_are_refused() {
    let app = TestApp::with_rules(GameRules {
        upload_cap: 1,
        initial_guesses: 3,
    })
    .await;
    app.upload_image("demo", "one.jpg").await;

    let (status, body) = app
        .upload("demo", "two.jpg", "image/jpeg", b"\xff\xd8")
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "invalid_state");
}

#[tokio::test]
async fn signed_read_urls_serve_the_image() {
    let app = TestApp::new(AppConfig::default()).await;
    let (status, upload) = app
        .upload("demo", "cat.jpg", "image/jpeg", b"jpeg-bytes")
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let url = upload["image_url"].as_str().unwrap();
    let path = url.strip_prefix(PUBLIC_BASE).unwrap();
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"jpeg-bytes");

    let tampered = path.replace("signature=", "signature=00");
    let (status, _) = app.get(&tampered).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ============================================================================
// Guessing & reset
// ============================================================================

#[tokio::test]
async fn guessing_before_the_cap_is_an_invalid_state() {
    let app = TestApp::new(AppConfig::default()).await;
    let (status, body) = app.guess("demo", "lion").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "invalid_state");
}

#[tokio::test]
async fn blank_guesses_are_rejected() {
    let app = TestApp::new(AppConfig::default()).await;
    let (status, body) = app.guess("demo", "   ").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
}

#[tokio::test]
async fn scenario_b_substring_guess_wins() {
    let app = TestApp::with_rules(GameRules {
        upload_cap: 1,
        initial_guesses: 3,
    })
    .await;
    app.upload_image("demo", "cat.jpg").await;
    app.set_guesses_remaining("demo", 1).await;

    let (status, body) = app.guess("demo", "i think it's a lion").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["correct"], true);
    assert_eq!(body["guesses_remaining"], 0);
    assert_eq!(body["game_complete"], true);
    assert_eq!(body["won"], true);
    assert_eq!(body["hidden_target"], "lion");
}

#[tokio::test]
async fn scenario_c_last_wrong_guess_loses() {
    let app = TestApp::with_rules(GameRules {
        upload_cap: 1,
        initial_guesses: 3,
    })
    .await;
    app.upload_image("demo", "cat.jpg").await;
    app.set_guesses_remaining("demo", 1).await;

    let (status, body) = app.guess("demo", "tiger").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["correct"], false);
    assert_eq!(body["guesses_remaining"], 0);
    assert_eq!(body["game_complete"], true);
    assert_eq!(body["won"], false);
    assert_eq!(body["hidden_target"], "lion");

    let (status, _) = app.guess("demo", "lion").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn scenario_d_reset_clears_a_complete_game() {
    let app = TestApp::new(AppConfig::default()).await;
    let mut names = Vec::new();
    for n in 0..10 {
        names.push(app.upload_image("demo", &format!("animal{n}.jpg")).await);
    }
    app.store.append_scoring_record("demo", &names[0], 55.0);
    for _ in 0..3 {
        let (status, _) = app.guess("demo", "tiger").await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, session) = app.get("/sessions/demo").await;
    assert_eq!(session["game"]["phase"], "complete");

    let (status, game) = app
        .post_json("/sessions/demo/reset", Value::Null)
        .await;
    assert_eq!(status, StatusCode::OK, "{game}");
    assert_eq!(game["phase"], "uploading");
    assert_eq!(game["guesses_remaining"], 3);
    assert_eq!(game["game_complete"], false);

    let (_, session) = app.get("/sessions/demo").await;
    assert_eq!(session["uploads"], json!([]));
    assert_eq!(session["game"]["phase"], "uploading");
    assert!(session["game"].get("last_guess").is_none());
    assert!(
        app.store
            .list_scoring_records("demo", None)
            .await
            .unwrap()
            .is_empty()
    );

    // Names from the previous game are no longer pending.
    let body = app.poll("demo", &[&names[1]]).await;
    assert_eq!(body["status"], "idle");
}

// ============================================================================
// Degraded mode & streams
// ============================================================================

#[tokio::test]
async fn degraded_mode_answers_service_unavailable() {
    let app = TestApp::new(AppConfig::default()).await;
    app.state.clear_session_store().await;

    let (status, body) = app.get("/sessions/demo").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "storage");

    let (_, health) = app.get("/healthcheck").await;
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn session_stream_opens_for_known_participants() {
    let app = TestApp::new(AppConfig::default()).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/sessions/demo/events")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let (status, _) = app.get("/sessions/ghost/events").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new(AppConfig::default()).await;
    let (status, doc) = app.get("/api-doc/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    assert!(doc["paths"]["/sessions/{participant_id}/uploads"].is_object());
}
