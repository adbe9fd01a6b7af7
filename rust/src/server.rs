use anyhow::{anyhow, Context, Result};
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;

use crate::data_uri::DataUri;
use crate::error::GenerationError;
use crate::generator_state::{Action, Effect, GeneratorState, GeneratorView};
use crate::main_ui_html::build_main_ui_html;
use crate::pipeline::GenerationPipeline;
use crate::session_store::SessionStore;

pub struct AppState {
    pub pipeline: GenerationPipeline,
    pub sessions: Mutex<SessionStore>,
    pub server_port: AtomicU16,
}

type ApiResponse = (StatusCode, Json<Value>);

impl AppState {
    pub fn new(pipeline: GenerationPipeline, session_idle: Duration) -> Self {
        Self {
            pipeline,
            sessions: Mutex::new(SessionStore::new(session_idle)),
            server_port: AtomicU16::new(0),
        }
    }
}

pub struct AppServer {
    port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl AppServer {
    pub fn start(state: Arc<AppState>, preferred_port: u16) -> Result<Self> {
        let listener = bind_listener(preferred_port)?;
        let port = listener
            .local_addr()
            .context("failed to inspect server local address")?
            .port();
        listener
            .set_nonblocking(true)
            .context("failed to set listener non-blocking")?;

        state.server_port.store(port, Ordering::Relaxed);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let thread_handle = thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build();
            let runtime = match runtime {
                Ok(runtime) => runtime,
                Err(err) => {
                    log::error!("failed to build server runtime: {err}");
                    return;
                }
            };

            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(listener) {
                    Ok(listener) => listener,
                    Err(err) => {
                        log::error!("failed to adopt listener: {err}");
                        return;
                    }
                };

                let app = build_router(state);
                let server = axum::serve(listener, app).with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                });
                if let Err(err) = server.await {
                    log::error!("server stopped with error: {err}");
                }
            });
        });

        Ok(Self {
            port,
            shutdown_tx: Some(shutdown_tx),
            thread_handle: Some(thread_handle),
        })
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for AppServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct SessionReq {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct GenerateReq {
    session_id: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct HistorySelectReq {
    session_id: String,
    index: usize,
}

fn build_router(state: Arc<AppState>) -> Router {
    let port = state.server_port.load(Ordering::Relaxed);
    let local_origin = HeaderValue::from_str(&format!("http://127.0.0.1:{port}"))
        .expect("127.0.0.1 origin should be valid");
    let localhost_origin = HeaderValue::from_str(&format!("http://localhost:{port}"))
        .expect("localhost origin should be valid");

    let cors = CorsLayer::new()
        .allow_origin([local_origin, localhost_origin])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(get_main_page))
        .route("/ping", get(get_ping))
        .route("/app/session", post(post_app_session))
        .route("/app/session/close", post(post_app_session_close))
        .route("/app/state", get(get_app_state))
        .route("/app/generate", post(post_app_generate))
        .route("/app/clear", post(post_app_clear))
        .route("/app/history/select", post(post_app_history_select))
        .route("/app/history/clear", post(post_app_history_clear))
        .route("/app/download", get(get_app_download))
        .layer(cors)
        .with_state(state)
}

async fn get_main_page() -> Html<String> {
    Html(build_main_ui_html())
}

async fn get_ping(State(state): State<Arc<AppState>>) -> ApiResponse {
    ok_json(json!({ "doctoring": state.pipeline.doctoring_enabled() }))
}

async fn post_app_session(State(state): State<Arc<AppState>>) -> ApiResponse {
    let mut sessions = match state.sessions.lock() {
        Ok(guard) => guard,
        Err(_) => return err_json(StatusCode::INTERNAL_SERVER_ERROR, "session store lock error"),
    };

    sessions.prune_idle();
    let session_id = sessions.create();
    let Some(session) = sessions.get_mut(&session_id) else {
        return err_json(StatusCode::INTERNAL_SERVER_ERROR, "session vanished");
    };

    ok_json(json!({
        "session_id": session_id,
        "view": session.view(),
    }))
}

async fn post_app_session_close(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SessionReq>,
) -> ApiResponse {
    let removed = match state.sessions.lock() {
        Ok(mut sessions) => sessions.remove(&payload.session_id),
        Err(_) => return err_json(StatusCode::INTERNAL_SERVER_ERROR, "session store lock error"),
    };

    ok_json(json!({ "closed": removed }))
}

async fn get_app_state(
    State(state): State<Arc<AppState>>,
    Query(payload): Query<SessionQuery>,
) -> ApiResponse {
    match with_session(&state, &payload.session_id, |session| session.view()) {
        Ok(view) => ok_view(view),
        Err(response) => response,
    }
}

async fn post_app_generate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GenerateReq>,
) -> ApiResponse {
    let submitted = with_session(&state, &payload.session_id, |session| {
        session.apply(Action::EditPrompt(payload.prompt.clone()));
        let effect = session.apply(Action::Submit);
        (effect, session.view())
    });
    let (effect, view) = match submitted {
        Ok(pair) => pair,
        Err(response) => return response,
    };

    let (request_id, prompt) = match effect {
        Effect::Generate { request_id, prompt } => (request_id, prompt),
        Effect::Busy => {
            return err_json(StatusCode::CONFLICT, "a generation is already in progress")
        }
        Effect::None => return ok_view(view),
    };

    log::info!("session {} started request {request_id}", payload.session_id.trim());

    // Detached so a client that disconnects mid-request cannot leave the session loading.
    let task_state = state.clone();
    let session_id = payload.session_id.clone();
    let task = tokio::spawn(async move {
        let result = task_state.pipeline.run(&prompt).await;
        if let Err(err) = &result {
            log::warn!("request {request_id} failed: {err}");
        }
        with_session(&task_state, &session_id, |session| {
            session.apply(Action::Completed { request_id, result });
            session.view()
        })
    });

    match task.await {
        Ok(Ok(view)) => ok_view(view),
        Ok(Err(response)) => response,
        Err(err) => {
            log::error!("request {request_id} task failed: {err}");
            let _ = with_session(&state, &payload.session_id, |session| {
                session.apply(Action::Completed {
                    request_id,
                    result: Err(GenerationError::Unknown(
                        "Image generation was interrupted.".to_string(),
                    )),
                })
            });
            err_json(StatusCode::INTERNAL_SERVER_ERROR, "generation task failed")
        }
    }
}

async fn post_app_clear(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SessionReq>,
) -> ApiResponse {
    apply_and_view(&state, &payload.session_id, Action::Clear)
}

async fn post_app_history_select(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<HistorySelectReq>,
) -> ApiResponse {
    apply_and_view(
        &state,
        &payload.session_id,
        Action::SelectHistoryEntry(payload.index),
    )
}

async fn post_app_history_clear(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SessionReq>,
) -> ApiResponse {
    apply_and_view(&state, &payload.session_id, Action::ClearHistory)
}

async fn get_app_download(
    State(state): State<Arc<AppState>>,
    Query(payload): Query<SessionQuery>,
) -> axum::response::Response {
    let download = with_session(&state, &payload.session_id, |session| {
        session
            .download()
            .map(|(file_name, uri)| (file_name, uri.to_string()))
    });
    let (file_name, uri) = match download {
        Ok(Some(pair)) => pair,
        Ok(None) => {
            return err_json(StatusCode::NOT_FOUND, "no image to download").into_response()
        }
        Err(response) => return response.into_response(),
    };

    let decoded = DataUri::parse(&uri).and_then(|uri| {
        let bytes = uri.decode()?;
        Ok((uri.mime_type, bytes))
    });
    match decoded {
        Ok((mime_type, bytes)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, mime_type),
                (header::CONTENT_DISPOSITION, content_disposition(&file_name)),
            ],
            bytes,
        )
            .into_response(),
        Err(err) => err_json(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("download failed: {err}"),
        )
        .into_response(),
    }
}

fn with_session<T>(
    state: &AppState,
    session_id: &str,
    f: impl FnOnce(&mut GeneratorState) -> T,
) -> std::result::Result<T, ApiResponse> {
    let mut sessions = state
        .sessions
        .lock()
        .map_err(|_| err_json(StatusCode::INTERNAL_SERVER_ERROR, "session store lock error"))?;
    let session = sessions
        .get_mut(session_id)
        .ok_or_else(|| err_json(StatusCode::NOT_FOUND, "session not found"))?;
    Ok(f(session))
}

fn apply_and_view(state: &AppState, session_id: &str, action: Action) -> ApiResponse {
    match with_session(state, session_id, |session| {
        session.apply(action);
        session.view()
    }) {
        Ok(view) => ok_view(view),
        Err(response) => response,
    }
}

fn ok_json(payload: Value) -> ApiResponse {
    let mut body = serde_json::Map::new();
    body.insert("ok".to_string(), Value::Bool(true));

    if let Some(obj) = payload.as_object() {
        for (key, value) in obj {
            body.insert(key.clone(), value.clone());
        }
    } else if !payload.is_null() {
        body.insert("data".to_string(), payload);
    }

    (StatusCode::OK, Json(Value::Object(body)))
}

fn ok_view(view: GeneratorView) -> ApiResponse {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "view": view,
        })),
    )
}

fn err_json(status: StatusCode, message: &str) -> ApiResponse {
    (
        status,
        Json(json!({
            "ok": false,
            "error": message,
        })),
    )
}

/// ASCII `filename` for old clients plus an RFC 5987 `filename*` for the rest.
fn content_disposition(file_name: &str) -> String {
    let ascii: String = file_name
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .collect();
    let mut encoded = String::new();
    for byte in file_name.bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    format!("attachment; filename=\"{ascii}\"; filename*=UTF-8''{encoded}")
}

fn bind_listener(preferred_port: u16) -> Result<TcpListener> {
    if preferred_port == 0 {
        return TcpListener::bind(("127.0.0.1", 0)).context("failed to bind ephemeral port");
    }

    for offset in 0..200u16 {
        let port = preferred_port.saturating_add(offset);
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)) {
            return Ok(listener);
        }
    }

    Err(anyhow!("failed to bind server port"))
}

#[cfg(test)]
mod tests {
    use super::{content_disposition, AppServer, AppState};
    use crate::error::GenerationError;
    use crate::pipeline::fakes::{FakeDoctor, FakeGenerator, PNG_DATA_URI};
    use crate::pipeline::GenerationPipeline;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    const SLOW: Duration = Duration::from_millis(400);

    struct Harness {
        server: AppServer,
        http: reqwest::Client,
        generator: Arc<FakeGenerator>,
    }

    impl Harness {
        fn start(generator: FakeGenerator) -> Self {
            let generator = Arc::new(generator);
            let pipeline = GenerationPipeline::new(
                Some(Arc::new(FakeDoctor::rewriting_to(
                    "a fluffy ginger cat sleeping in a sunbeam, detailed illustration",
                ))),
                generator.clone(),
            );
            let state = Arc::new(AppState::new(pipeline, Duration::from_secs(60)));
            let server = AppServer::start(state, 0).expect("start server");
            Self {
                server,
                http: reqwest::Client::new(),
                generator,
            }
        }

        fn url(&self, path: &str) -> String {
            format!("http://127.0.0.1:{}{}", self.server.port(), path)
        }

        async fn post(&self, path: &str, body: Value) -> (u16, Value) {
            let response = self
                .http
                .post(self.url(path))
                .json(&body)
                .send()
                .await
                .expect("send request");
            let status = response.status().as_u16();
            (status, response.json().await.expect("json body"))
        }

        async fn view(&self, session_id: &str) -> Value {
            let response = self
                .http
                .get(self.url(&format!("/app/state?session_id={session_id}")))
                .send()
                .await
                .expect("state request");
            let body: Value = response.json().await.expect("json body");
            body["view"].clone()
        }

        fn spawn_generate(&self, session_id: &str, prompt: &str) -> JoinHandle<(u16, Value)> {
            let http = self.http.clone();
            let url = self.url("/app/generate");
            let body = json!({ "session_id": session_id, "prompt": prompt });
            tokio::spawn(async move {
                let response = http.post(url).json(&body).send().await.expect("send request");
                let status = response.status().as_u16();
                (status, response.json().await.expect("json body"))
            })
        }

        async fn open_session(&self) -> String {
            let (status, body) = self.post("/app/session", json!({})).await;
            assert_eq!(status, 200);
            assert_eq!(body["view"]["status"], "idle");
            body["session_id"].as_str().expect("session id").to_string()
        }
    }

    #[tokio::test]
    async fn empty_prompt_never_reaches_the_pipeline() {
        let harness = Harness::start(FakeGenerator::returning(PNG_DATA_URI));
        let session_id = harness.open_session().await;

        let (status, body) = harness
            .post(
                "/app/generate",
                json!({ "session_id": session_id, "prompt": "   " }),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["view"]["status"], "error");
        assert_eq!(body["view"]["error_kind"], "empty_prompt");
        assert_eq!(body["view"]["status_message"], "Prompt cannot be empty.");
        assert!(body["view"]["image_data_uri"].is_null());
        assert!(harness.generator.seen().is_empty());
    }

    #[tokio::test]
    async fn a_cat_generates_image_and_history_then_downloads() {
        let harness = Harness::start(FakeGenerator::returning(PNG_DATA_URI));
        let session_id = harness.open_session().await;

        let (status, body) = harness
            .post(
                "/app/generate",
                json!({ "session_id": session_id, "prompt": "a cat" }),
            )
            .await;
        assert_eq!(status, 200);
        let view = &body["view"];
        assert_eq!(view["status"], "success");
        assert!(view["image_data_uri"]
            .as_str()
            .expect("image uri")
            .starts_with("data:image/"));
        assert!(view["error"].is_null());
        assert_eq!(view["history"][0]["prompt"], "a cat");
        assert_eq!(view["can_download"], true);
        assert_eq!(
            harness.generator.seen(),
            vec!["a fluffy ginger cat sleeping in a sunbeam, detailed illustration"]
        );

        let response = harness
            .http
            .get(harness.url(&format!("/app/download?session_id={session_id}")))
            .send()
            .await
            .expect("download");
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(
            response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok()),
            Some("image/png")
        );
        let disposition = response
            .headers()
            .get("content-disposition")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(disposition.contains("filename=\"a_cat.png\""));
        let bytes = response.bytes().await.expect("bytes");
        assert_eq!(&bytes[..4], &[0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn safety_failure_is_reported_without_history() {
        let harness = Harness::start(FakeGenerator::failing(GenerationError::Generation {
            finish_reason: "SAFETY".to_string(),
        }));
        let session_id = harness.open_session().await;

        let (_, body) = harness
            .post(
                "/app/generate",
                json!({ "session_id": session_id, "prompt": "a cat" }),
            )
            .await;
        let view = &body["view"];
        assert_eq!(view["status"], "error");
        assert_eq!(view["error_kind"], "generation");
        assert!(view["error"]
            .as_str()
            .expect("error text")
            .contains("Image generation failed"));
        assert!(view["image_data_uri"].is_null());
        assert_eq!(view["history"], json!([]));

        let response = harness
            .http
            .get(harness.url(&format!("/app/download?session_id={session_id}")))
            .send()
            .await
            .expect("download");
        assert_eq!(response.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn clear_and_history_actions() {
        let harness = Harness::start(FakeGenerator::returning(PNG_DATA_URI));
        let session_id = harness.open_session().await;
        for prompt in ["a cat", "a dog"] {
            harness
                .post(
                    "/app/generate",
                    json!({ "session_id": session_id, "prompt": prompt }),
                )
                .await;
        }

        let (_, body) = harness
            .post("/app/clear", json!({ "session_id": session_id }))
            .await;
        assert_eq!(body["view"]["status"], "idle");
        assert_eq!(body["view"]["prompt"], "");
        assert!(body["view"]["image_data_uri"].is_null());
        assert_eq!(body["view"]["history"].as_array().map(Vec::len), Some(2));

        let (_, body) = harness
            .post(
                "/app/history/select",
                json!({ "session_id": session_id, "index": 1 }),
            )
            .await;
        assert_eq!(body["view"]["prompt"], "a cat");
        assert_eq!(body["view"]["status"], "idle");

        let (_, body) = harness
            .post("/app/history/clear", json!({ "session_id": session_id }))
            .await;
        assert_eq!(body["view"]["history"], json!([]));
        assert_eq!(body["view"]["prompt"], "a cat");
    }

    #[tokio::test]
    async fn unknown_and_closed_sessions_are_not_found() {
        let harness = Harness::start(FakeGenerator::returning(PNG_DATA_URI));
        let (status, body) = harness
            .post(
                "/app/generate",
                json!({ "session_id": "nope", "prompt": "a cat" }),
            )
            .await;
        assert_eq!(status, 404);
        assert_eq!(body["ok"], false);

        let session_id = harness.open_session().await;
        let (_, body) = harness
            .post("/app/session/close", json!({ "session_id": session_id }))
            .await;
        assert_eq!(body["closed"], true);

        let response = harness
            .http
            .get(harness.url(&format!("/app/state?session_id={session_id}")))
            .send()
            .await
            .expect("state");
        assert_eq!(response.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn abandoned_request_still_completes_the_session() {
        let harness = Harness::start(FakeGenerator::returning(PNG_DATA_URI).after(SLOW));
        let session_id = harness.open_session().await;

        let impatient = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("client");
        let outcome = impatient
            .post(harness.url("/app/generate"))
            .json(&json!({ "session_id": session_id, "prompt": "a cat" }))
            .send()
            .await;
        assert!(outcome.is_err(), "client should give up before the image is ready");

        tokio::time::sleep(SLOW * 2).await;
        let view = harness.view(&session_id).await;
        assert_eq!(view["status"], "success");
        assert_eq!(view["is_loading"], false);
        assert_eq!(view["history"][0]["prompt"], "a cat");

        let (status, body) = harness
            .post(
                "/app/generate",
                json!({ "session_id": session_id, "prompt": "a dog" }),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["view"]["status"], "success");
        assert_eq!(body["view"]["history"][0]["prompt"], "a dog");
    }

    #[tokio::test]
    async fn second_submit_while_generating_is_a_conflict() {
        let harness = Harness::start(FakeGenerator::returning(PNG_DATA_URI).after(SLOW));
        let session_id = harness.open_session().await;

        let first = harness.spawn_generate(&session_id, "a cat");
        tokio::time::sleep(Duration::from_millis(150)).await;

        let (status, body) = harness
            .post(
                "/app/generate",
                json!({ "session_id": session_id, "prompt": "a dog" }),
            )
            .await;
        assert_eq!(status, 409);
        assert_eq!(body["ok"], false);

        let view = harness.view(&session_id).await;
        assert_eq!(view["is_loading"], true);
        assert_eq!(view["status"], "loading");
        assert_eq!(view["prompt"], "a cat");
        assert_eq!(view["submit_label"], "Generating...");

        let (status, body) = first.await.expect("first request");
        assert_eq!(status, 200);
        assert_eq!(body["view"]["status"], "success");
        assert_eq!(harness.generator.seen().len(), 1);
    }

    #[tokio::test]
    async fn clear_while_generating_drops_the_late_result() {
        let harness = Harness::start(FakeGenerator::returning(PNG_DATA_URI).after(SLOW));
        let session_id = harness.open_session().await;

        let first = harness.spawn_generate(&session_id, "a cat");
        tokio::time::sleep(Duration::from_millis(150)).await;

        let (status, body) = harness
            .post("/app/clear", json!({ "session_id": session_id }))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["view"]["status"], "idle");
        assert_eq!(body["view"]["is_loading"], false);
        assert_eq!(body["view"]["prompt"], "");

        let (status, body) = first.await.expect("first request");
        assert_eq!(status, 200);
        assert_eq!(body["view"]["status"], "idle");
        assert!(body["view"]["image_data_uri"].is_null());

        let view = harness.view(&session_id).await;
        assert_eq!(view["status"], "idle");
        assert_eq!(view["history"], json!([]));
    }

    #[test]
    fn content_disposition_encodes_non_ascii_names() {
        assert_eq!(
            content_disposition("a_cat.png"),
            "attachment; filename=\"a_cat.png\"; filename*=UTF-8''a_cat.png"
        );
        assert_eq!(
            content_disposition("ねこ.png"),
            "attachment; filename=\"__.png\"; filename*=UTF-8''%E3%81%AD%E3%81%93.png"
        );
    }
}
