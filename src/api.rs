//! HTTP control surface for the classroom.
//!
//! Local-only axum server: begin/stop narration, adjust the speech rate,
//! manage the lesson text and poll the status line.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classroom::{Classroom, ClassroomError};
use crate::lessons::SampleLesson;
use crate::narration::{NarrationStatus, SpeechRate};

#[derive(Clone)]
pub struct ApiState {
    pub classroom: Arc<Classroom>,
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct LessonRequest {
    text: String,
}

#[derive(Deserialize)]
struct SampleRequest {
    lesson: SampleLesson,
}

#[derive(Deserialize)]
struct ImportRequest {
    path: PathBuf,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RateAction {
    Slower,
    Faster,
    Reset,
}

#[derive(Deserialize)]
struct RateRequest {
    #[serde(default)]
    action: Option<RateAction>,
    #[serde(default)]
    value: Option<f32>,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    line: String,
    speaking: bool,
    narration: NarrationStatus,
    rate: SpeechRate,
    loading: bool,
    lesson_chars: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    lesson_source: Option<String>,
}

#[derive(Serialize)]
struct VoicesResponse {
    status: &'static str,
    voices: Vec<String>,
}

#[derive(Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rate: Option<SpeechRate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            session: None,
            rate: None,
            chars: None,
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::ok("error")
        }
    }
}

impl From<ClassroomError> for SimpleResponse {
    fn from(e: ClassroomError) -> Self {
        Self::err(e.to_string())
    }
}

/// Build the axum router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/voices", get(handle_voices))
        .route("/begin", post(handle_begin))
        .route("/stop", post(handle_stop))
        .route("/rate", post(handle_rate))
        .route("/lesson", put(handle_set_lesson))
        .route("/lesson/sample", post(handle_sample))
        .route("/lesson/clear", post(handle_clear))
        .route("/lesson/import", post(handle_import))
        .route("/test-audio", post(handle_test_audio))
        .with_state(state)
}

/// Bind the API and serve it on a background task.
pub async fn start_api(state: ApiState, port: u16) -> std::io::Result<()> {
    let app = router(state);
    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Classroom API listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Classroom API server error: {e}");
        }
    });
    Ok(())
}

// --- Handlers ---

async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let room = &state.classroom;
    let narration = room.status();
    Json(StatusResponse {
        status: "ok",
        line: narration.to_string(),
        speaking: narration.is_speaking(),
        narration,
        rate: room.rate(),
        loading: room.is_loading(),
        lesson_chars: room.lesson_text().chars().count(),
        lesson_source: room.lesson_source(),
    })
}

async fn handle_voices(State(state): State<ApiState>) -> Json<VoicesResponse> {
    Json(VoicesResponse {
        status: "ok",
        voices: state.classroom.driver().engine().list_voices(),
    })
}

async fn handle_begin(State(state): State<ApiState>) -> Json<SimpleResponse> {
    match state.classroom.start_teaching() {
        Ok(id) => {
            info!("HTTP /begin: session {id}");
            Json(SimpleResponse {
                session: Some(id),
                ..SimpleResponse::ok("speaking")
            })
        }
        Err(e) => Json(e.into()),
    }
}

async fn handle_stop(State(state): State<ApiState>) -> Json<SimpleResponse> {
    state.classroom.stop_teaching();
    Json(SimpleResponse::ok("stopped"))
}

async fn handle_rate(
    State(state): State<ApiState>,
    Json(req): Json<RateRequest>,
) -> Json<SimpleResponse> {
    let room = &state.classroom;
    let rate = match (req.action, req.value) {
        (Some(RateAction::Slower), _) => room.slower(),
        (Some(RateAction::Faster), _) => room.faster(),
        (Some(RateAction::Reset), _) => room.reset_rate(),
        (None, Some(value)) => room.set_rate(SpeechRate::new(value)),
        (None, None) => return Json(SimpleResponse::err("expected an action or a value")),
    };
    Json(SimpleResponse {
        rate: Some(rate),
        ..SimpleResponse::ok("ok")
    })
}

async fn handle_set_lesson(
    State(state): State<ApiState>,
    Json(req): Json<LessonRequest>,
) -> Json<SimpleResponse> {
    let chars = req.text.chars().count();
    state.classroom.set_lesson_text(req.text);
    Json(SimpleResponse {
        chars: Some(chars),
        ..SimpleResponse::ok("ok")
    })
}

async fn handle_sample(
    State(state): State<ApiState>,
    Json(req): Json<SampleRequest>,
) -> Json<SimpleResponse> {
    state.classroom.load_sample(req.lesson);
    Json(SimpleResponse {
        chars: Some(req.lesson.text().chars().count()),
        ..SimpleResponse::ok("ok")
    })
}

async fn handle_clear(State(state): State<ApiState>) -> Json<SimpleResponse> {
    state.classroom.clear();
    Json(SimpleResponse::ok("cleared"))
}

async fn handle_import(
    State(state): State<ApiState>,
    Json(req): Json<ImportRequest>,
) -> Json<SimpleResponse> {
    match state.classroom.import_document(&req.path).await {
        Ok(doc) => Json(SimpleResponse {
            chars: Some(doc.text.chars().count()),
            ..SimpleResponse::ok("loaded")
        }),
        Err(e) => Json(e.into()),
    }
}

async fn handle_test_audio(State(state): State<ApiState>) -> Json<SimpleResponse> {
    match state.classroom.test_audio().await {
        Ok(()) => Json(SimpleResponse::ok("ok")),
        Err(e) => Json(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Method, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::import::DocumentImporter;
    use crate::narration::{ConsoleEngine, DriverSettings, NarrationDriver};
    use crate::notifier::Notifier;

    fn app() -> (Router, Arc<Classroom>) {
        paced_app(Duration::from_millis(1))
    }

    fn paced_app(per_word: Duration) -> (Router, Arc<Classroom>) {
        let engine = Arc::new(ConsoleEngine::new(per_word));
        let classroom = Arc::new(Classroom::new(
            NarrationDriver::new(engine, DriverSettings::default()),
            DocumentImporter::new(None),
            Notifier::disabled(),
            SpeechRate::default(),
        ));
        let router = router(ApiState {
            classroom: classroom.clone(),
        });
        (router, classroom)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Value {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn status_starts_ready() {
        let (app, _) = app();
        let status = call(&app, Method::GET, "/status", None).await;
        assert_eq!(status["line"], "Ready to teach");
        assert_eq!(status["narration"]["state"], "idle");
        assert_eq!(status["speaking"], false);
        assert_eq!(status["rate"], 0.9);
        assert_eq!(status["loading"], false);
    }

    #[tokio::test]
    async fn begin_with_cleared_lesson_is_an_error() {
        let (app, classroom) = app();
        let cleared = call(&app, Method::POST, "/lesson/clear", None).await;
        assert_eq!(cleared["status"], "cleared");

        let begin = call(&app, Method::POST, "/begin", None).await;
        assert_eq!(begin["status"], "error");
        assert!(begin["error"].as_str().unwrap().contains("nothing to narrate"));
        assert!(!classroom.driver().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn begin_then_stop() {
        let (app, classroom) = paced_app(Duration::from_millis(300));
        let mut status = classroom.driver().subscribe();
        call(
            &app,
            Method::PUT,
            "/lesson",
            Some(json!({ "text": "One long sentence to speak here. Another one follows it." })),
        )
        .await;

        let begin = call(&app, Method::POST, "/begin", None).await;
        assert_eq!(begin["status"], "speaking");
        assert_eq!(begin["session"], 1);

        let stop = call(&app, Method::POST, "/stop", None).await;
        assert_eq!(stop["status"], "stopped");

        while !status.borrow_and_update().is_terminal() {
            status.changed().await.unwrap();
        }
        assert_eq!(classroom.status(), NarrationStatus::Stopped);
        assert!(!classroom.driver().is_active());
    }

    #[tokio::test]
    async fn rate_actions_and_values_are_clamped() {
        let (app, _) = app();
        let faster = call(&app, Method::POST, "/rate", Some(json!({ "action": "faster" }))).await;
        assert_eq!(faster["rate"], 1.0);

        let clamped = call(&app, Method::POST, "/rate", Some(json!({ "value": 3.0 }))).await;
        assert_eq!(clamped["rate"], 1.5);

        let reset = call(&app, Method::POST, "/rate", Some(json!({ "action": "reset" }))).await;
        assert_eq!(reset["rate"], 0.9);

        let empty = call(&app, Method::POST, "/rate", Some(json!({}))).await;
        assert_eq!(empty["status"], "error");
    }

    #[tokio::test]
    async fn sample_lesson_replaces_text() {
        let (app, classroom) = app();
        let resp = call(
            &app,
            Method::POST,
            "/lesson/sample",
            Some(json!({ "lesson": "science" })),
        )
        .await;
        assert_eq!(resp["status"], "ok");
        assert!(classroom.lesson_text().starts_with("Welcome to Science class!"));
    }

    #[tokio::test]
    async fn failed_import_reports_error() {
        let (app, _) = app();
        let resp = call(
            &app,
            Method::POST,
            "/lesson/import",
            Some(json!({ "path": "/nonexistent/lesson.pdf" })),
        )
        .await;
        assert_eq!(resp["status"], "error");
    }

    #[tokio::test]
    async fn lists_engine_voices() {
        let (app, _) = app();
        let voices = call(&app, Method::GET, "/voices", None).await;
        assert_eq!(voices["voices"], json!(["console"]));
    }

    #[tokio::test]
    async fn audio_test_succeeds_on_console_engine() {
        let (app, _) = app();
        let resp = call(&app, Method::POST, "/test-audio", None).await;
        assert_eq!(resp["status"], "ok");
    }
}
