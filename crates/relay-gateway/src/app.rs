//! HTTP surface over the message processor and the user registry.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use relay_core::registry::run_blocking;
use relay_core::{
    ChannelReplies, CollectedReplies, InboundMessage, MessageProcessor, NewUser, RegistryError,
    RouteOutcome, UserRegistry,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

pub struct AppState {
    pub processor: MessageProcessor,
    pub registry: Arc<dyn UserRegistry>,
}

#[derive(Deserialize)]
pub struct PostbackRequest {
    pub user_id: String,
    pub data: String,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub user_id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
}

/// Routing outcome plus every reply sent during the cycle.
#[derive(Serialize)]
pub struct CycleResponse {
    #[serde(flatten)]
    pub outcome: RouteOutcome,
    pub replies: Vec<String>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/callback", post(callback))
        .route("/callback/stream", post(callback_stream))
        .route("/postback", post(postback))
        .route("/register", post(register))
        .route("/users/stats", get(user_stats))
        .with_state(state)
        .layer(axum::middleware::from_fn(log_request))
}

async fn log_request(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    tracing::debug!(target: "relay::gateway", %method, %path, status = %response.status(), "request served");
    response
}

/// POST /callback: one inbound message, one routing cycle.
async fn callback(
    State(state): State<Arc<AppState>>,
    Json(message): Json<InboundMessage>,
) -> Json<CycleResponse> {
    let replies = CollectedReplies::new();
    let outcome = state.processor.handle_message(&message, &replies).await;
    Json(CycleResponse {
        outcome,
        replies: replies.into_texts(),
    })
}

/// POST /callback/stream: replies arrive as `reply` events while the cycle runs (the
/// fallback acknowledgment comes before the language-model call finishes), then one
/// `outcome` event closes the stream.
async fn callback_stream(
    State(state): State<Arc<AppState>>,
    Json(message): Json<InboundMessage>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (replies, rx) = ChannelReplies::new();
    let task =
        tokio::spawn(async move { state.processor.handle_message(&message, &replies).await });
    Sse::new(cycle_events(rx, task))
}

fn cycle_events(
    rx: UnboundedReceiver<String>,
    task: JoinHandle<RouteOutcome>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(Some((rx, task)), |cycle| async move {
        let (mut rx, task) = cycle?;
        match rx.recv().await {
            Some(text) => {
                let event = Event::default().event("reply").data(text);
                Some((Ok(event), Some((rx, task))))
            }
            None => {
                let event = match task.await {
                    Ok(outcome) => Event::default()
                        .event("outcome")
                        .json_data(&outcome)
                        .unwrap_or_else(|_| Event::default().event("outcome")),
                    Err(e) => {
                        tracing::error!(target: "relay::gateway", error = %e, "message cycle aborted");
                        Event::default().event("error").data("processing failed")
                    }
                };
                Some((Ok(event), None))
            }
        }
    })
}

async fn postback(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PostbackRequest>,
) -> Json<CycleResponse> {
    let replies = CollectedReplies::new();
    let outcome = state
        .processor
        .handle_postback(&req.user_id, &req.data, &replies)
        .await;
    Json(CycleResponse {
        outcome,
        replies: replies.into_texts(),
    })
}

/// POST /register: form-submission registration.
async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    if req.name.trim().is_empty() || !req.email.contains('@') {
        return error_response(StatusCode::BAD_REQUEST, "name and a valid email are required");
    }
    let mut user = NewUser::new(req.user_id, req.name).email(req.email);
    if let Some(phone) = req.phone {
        user = user.phone(phone);
    }
    if let Some(extension) = req.extension {
        user = user.extension(extension);
    }

    match run_blocking(state.registry.clone(), move |r| r.add(user)).await {
        Ok(record) => (StatusCode::OK, Json(json!({ "success": true, "user": record }))).into_response(),
        Err(e @ RegistryError::Conflict { .. }) => error_response(StatusCode::CONFLICT, &e.to_string()),
        Err(e @ RegistryError::InvalidInput(_)) => {
            error_response(StatusCode::BAD_REQUEST, &e.to_string())
        }
        Err(e) => {
            tracing::error!(target: "relay::gateway", error = %e, "registration failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "registration failed")
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    match run_blocking(state.registry.clone(), |r| r.health_status()).await {
        Ok(registry) => {
            let status = if registry.healthy {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            let body = json!({
                "status": if registry.healthy { "ok" } else { "degraded" },
                "version": relay_core::version(),
                "registry": registry,
            });
            (status, Json(body)).into_response()
        }
        Err(e) => {
            tracing::error!(target: "relay::gateway", error = %e, "health check failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "registry unavailable")
        }
    }
}

async fn user_stats(State(state): State<Arc<AppState>>) -> Response {
    match run_blocking(state.registry.clone(), |r| r.statistics()).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            tracing::error!(target: "relay::gateway", error = %e, "statistics failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "statistics unavailable")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{
        Collaborators, FileUserRegistry, HeuristicAnalyzer, KeywordNlu, RegistryConfig,
        RelayConfig, WebhookWorkflow,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    fn app(dir: &std::path::Path) -> Router {
        let registry: Arc<dyn UserRegistry> =
            Arc::new(FileUserRegistry::open(&RegistryConfig::in_dir(dir)).unwrap());
        let processor = MessageProcessor::new(
            &RelayConfig::default(),
            registry.clone(),
            Collaborators {
                nlu: Arc::new(KeywordNlu::default()),
                analyzer: Arc::new(HeuristicAnalyzer),
                workflow: Arc::new(WebhookWorkflow::new(None)),
            },
        );
        build_router(Arc::new(AppState {
            processor,
            registry,
        }))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_registry() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = call(&app(dir.path()), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["registry"]["total_users"], 0);
    }

    #[tokio::test]
    async fn unregistered_callback_asks_for_registration() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let (status, body) = call(
            &app,
            "POST",
            "/callback",
            Some(json!({ "user_id": "U9", "text": "/畫圖 龍" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "registration_required");
        assert_eq!(body["replies"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn register_then_route_a_command() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let form = json!({ "user_id": "U1", "name": "Alice", "email": "alice@example.com" });
        let (status, body) = call(&app, "POST", "/register", Some(form)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["user_id"], "U1");

        let (_, body) = call(
            &app,
            "POST",
            "/callback",
            Some(json!({ "user_id": "U1", "text": "/help" })),
        )
        .await;
        assert_eq!(body["outcome"], "handled");
        assert_eq!(body["tier"], "command");

        let (_, stats) = call(&app, "GET", "/users/stats", None).await;
        assert_eq!(stats["total_users"], 1);
    }

    #[tokio::test]
    async fn conflicting_email_is_409() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let first = json!({ "user_id": "U1", "name": "Alice", "email": "alice@example.com" });
        call(&app, "POST", "/register", Some(first)).await;
        let second = json!({ "user_id": "U2", "name": "Bob", "email": "alice@example.com" });
        let (status, body) = call(&app, "POST", "/register", Some(second)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);

        let bad = json!({ "user_id": "U3", "name": "", "email": "nope" });
        let (status, _) = call(&app, "POST", "/register", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn streamed_cycle_sends_ack_before_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let form = json!({ "user_id": "U1", "name": "Alice", "email": "alice@example.com" });
        call(&app, "POST", "/register", Some(form)).await;

        let request = Request::builder()
            .method("POST")
            .uri("/callback/stream")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "user_id": "U1", "text": "今天天氣如何" }).to_string()))
            .unwrap();
        let resp = app.oneshot(request).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();

        let first_reply = body.find("event: reply").unwrap();
        let ack = body.find(relay_core::messages::ANALYZING).unwrap();
        let outcome = body.find("event: outcome").unwrap();
        assert!(first_reply < ack && ack < outcome);
        assert!(body.contains("\"reason\":\"cannot_automate\""));
    }

    #[tokio::test]
    async fn postback_without_pending_task() {
        let dir = tempfile::tempdir().unwrap();
        let (_, body) = call(
            &app(dir.path()),
            "POST",
            "/postback",
            Some(json!({ "user_id": "U1", "data": "confirm_task" })),
        )
        .await;
        assert_eq!(body["outcome"], "unhandled");
        assert_eq!(body["reason"], "nothing_pending");
    }
}
