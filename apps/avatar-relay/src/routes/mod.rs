mod commands;
mod events;
mod state;
mod videos;

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::{ClipError, CommandError, HubStats, RelayHub};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tokio::sync::watch;

pub use commands::*;
pub use events::*;
pub use state::*;
pub use videos::*;

/// Shared handle given to every request path.
#[derive(Clone)]
pub struct AppContext {
    pub hub: RelayHub,
    metrics: Option<PrometheusHandle>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl AppContext {
    pub fn new(hub: RelayHub) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            hub,
            metrics: None,
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Ends every open event stream so graceful shutdown is not held up by
    /// long-lived push connections.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub(crate) fn shutdown_watch(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        .route("/api/stats", get(hub_stats))
        .route("/api/videos/callback", post(clip_callback))
        .route("/api/videos/poll", get(poll_clip))
        .route("/api/commands", post(submit_command))
        .route("/api/commands/poll", get(poll_commands))
        .route("/api/state", get(get_state).post(update_state))
        .route("/api/state/reset", post(reset_state))
        .route("/api/events", get(stream_events))
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn prometheus_metrics(State(ctx): State<AppContext>) -> impl IntoResponse {
    let body = ctx
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

async fn hub_stats(State(ctx): State<AppContext>) -> Json<HubStats> {
    Json(ctx.hub.stats())
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub success: bool,
}

impl Accepted {
    pub fn ok() -> Json<Self> {
        Json(Self { success: true })
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
}

#[derive(Debug, Serialize)]
struct ApiErrorBody<'a> {
    error: &'a str,
    message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => {
                counter!("avatar_relay_requests_rejected_total").increment(1);
                (
                    StatusCode::BAD_REQUEST,
                    Json(ApiErrorBody {
                        error: "bad_request",
                        message: Some(msg),
                    }),
                )
                    .into_response()
            }
        }
    }
}

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<ClipError> for ApiError {
    fn from(err: ClipError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// `Json` extractor whose rejections (bad syntax, wrong shape, missing
/// content type) all surface as `400 bad_request`.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{self, Body};
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use relay_core::{AppState, ClipDelivery, Command, HubConfig, ScreenMode};
    use serde_json::Value;
    use tower::util::ServiceExt;

    fn app() -> (RelayHub, Router) {
        let hub = RelayHub::new(HubConfig::default());
        let router = build_router(AppContext::new(hub.clone()));
        (hub, router)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn health_and_stats() {
        let (_, app) = app();
        let (status, body) = send(&app, "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(&app, "GET", "/api/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["activeSessions"], 0);
        assert_eq!(body["pendingCommands"], 0);
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn out_of_order_clips_are_polled_in_sequence() {
        let (_, app) = app();
        for sequence in [2, 0, 1] {
            let (status, body) = send(
                &app,
                "POST",
                "/api/videos/callback",
                Some(json!({
                    "videoPath": format!("/clips/s1-{sequence}.mp4"),
                    "sessionId": "s1",
                    "sequence": sequence,
                    "totalCount": 3
                })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], true);
            assert_eq!(body["id"], format!("s1:{sequence}"));
        }

        for sequence in 0..3 {
            let (status, body) = send(&app, "GET", "/api/videos/poll?sessionId=s1", None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["videoPath"], format!("/clips/s1-{sequence}.mp4"));
            assert_eq!(body["sequence"], sequence);
            assert_eq!(body["isComplete"], sequence == 2);
            assert_eq!(body["status"], "ready");
        }

        let (_, body) = send(&app, "GET", "/api/videos/poll?sessionId=s1", None).await;
        assert_eq!(body["videoPath"], Value::Null);
        assert_eq!(body["status"], "unknown");
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn gap_in_sequence_reports_pending() {
        let (_, app) = app();
        send(
            &app,
            "POST",
            "/api/videos/callback",
            Some(json!({"videoPath": "/clips/b.mp4", "sessionId": "s2", "sequence": 1, "totalCount": 2})),
        )
        .await;
        let (status, body) = send(&app, "GET", "/api/videos/poll?sessionId=s2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["videoPath"], Value::Null);
        assert_eq!(body["sessionId"], "s2");
        assert_eq!(body["status"], "pending");
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn legacy_clips_poll_fifo() {
        let (_, app) = app();
        for path in ["/clips/a.mp4", "/clips/b.mp4"] {
            let (status, body) = send(
                &app,
                "POST",
                "/api/videos/callback",
                Some(json!({ "videoPath": path })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert!(body["id"].as_str().unwrap().starts_with("legacy-"));
        }

        let (_, first) = send(&app, "GET", "/api/videos/poll", None).await;
        let (_, second) = send(&app, "GET", "/api/videos/poll", None).await;
        let (_, empty) = send(&app, "GET", "/api/videos/poll", None).await;
        assert_eq!(first, json!({ "videoPath": "/clips/a.mp4" }));
        assert_eq!(second, json!({ "videoPath": "/clips/b.mp4" }));
        assert_eq!(empty, json!({ "videoPath": null }));
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn invalid_clip_callbacks_are_bad_requests() {
        let (hub, app) = app();
        let bodies = [
            json!({ "sessionId": "s1" }),
            json!({ "videoPath": "" }),
            json!({ "videoPath": "/a.mp4", "sessionId": "s1", "sequence": 0, "totalCount": 0 }),
            json!({ "videoPath": "/a.mp4", "sessionId": "s1", "sequence": 3, "totalCount": 3 }),
        ];
        for body in bodies {
            let (status, response) = send(&app, "POST", "/api/videos/callback", Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(response["error"], "bad_request");
        }
        assert_eq!(hub.stats().active_sessions, 0);
        assert_eq!(hub.stats().legacy_queued, 0);
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn command_flow_updates_state_and_queue() {
        let (hub, app) = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/commands",
            Some(json!({ "type": "mode-select", "mode": "chat" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["command"]["type"], "mode-select");

        let state = hub.state();
        assert_eq!(state.screen_mode, ScreenMode::Chat);
        assert!(state.has_started);

        let (status, body) = send(&app, "GET", "/api/commands/poll", None).await;
        assert_eq!(status, StatusCode::OK);
        let commands: Vec<Command> = serde_json::from_value(body["commands"].clone()).unwrap();
        assert_eq!(
            commands,
            vec![Command::ModeSelect {
                mode: ScreenMode::Chat
            }]
        );

        let (_, body) = send(&app, "GET", "/api/commands/poll", None).await;
        assert_eq!(body["commands"], json!([]));
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn malformed_commands_are_bad_requests() {
        let (hub, app) = app();
        let bodies = [
            json!({ "type": "launch-rockets" }),
            json!({ "type": "mode-select" }),
            json!({ "type": "send-script", "script": "   " }),
            json!(["not", "an", "object"]),
        ];
        for body in bodies {
            let (status, response) = send(&app, "POST", "/api/commands", Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(response["error"], "bad_request");
        }

        let request = Request::builder()
            .method("POST")
            .uri("/api/commands")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(hub.commands().is_empty());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn state_patch_merges_and_reset_restores_defaults() {
        let (_, app) = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/state",
            Some(json!({ "hasStarted": true, "currentScript": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));

        let (_, body) = send(&app, "GET", "/api/state", None).await;
        let state: AppState = serde_json::from_value(body).unwrap();
        assert!(state.has_started);
        assert_eq!(state.screen_mode, ScreenMode::Standby);
        assert_eq!(state.current_script.as_deref(), Some("hello"));

        send(&app, "POST", "/api/state", Some(json!({ "currentScript": null }))).await;
        let (_, body) = send(&app, "GET", "/api/state", None).await;
        assert_eq!(body["currentScript"], Value::Null);
        assert_eq!(body["hasStarted"], true);

        let (status, _) = send(&app, "POST", "/api/state/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&app, "GET", "/api/state", None).await;
        let state: AppState = serde_json::from_value(body).unwrap();
        assert_eq!(state, AppState::default());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn malformed_state_patch_is_bad_request() {
        let (_, app) = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/state",
            Some(json!({ "hasStarted": "yes" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn metrics_renders_relay_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let hub = RelayHub::default();
        metrics::with_local_recorder(&recorder, || {
            hub.submit_command(Command::ToggleIntegration { enabled: true })
                .unwrap();
            hub.ingest_clip(ClipDelivery {
                video_path: "/clips/a.mp4".into(),
                session_id: None,
                sequence: None,
                total_count: None,
            })
            .unwrap();
        });
        let app = build_router(AppContext::new(hub).with_metrics(recorder.handle()));

        let request = Request::builder()
            .method("GET")
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; version=0.0.4"
        );
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(
            text.contains(r#"avatar_relay_commands_accepted_total{kind="toggle-integration"} 1"#),
            "got {text}"
        );
        assert!(
            text.contains(r#"avatar_relay_clips_ingested_total{route="legacy"} 1"#),
            "got {text}"
        );
    }
}
