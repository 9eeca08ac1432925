//! HTTP surface for docent.
//!
//! A compact Axum router mapping requests onto [`ConversationApi`]:
//!
//! - `POST /chat` – `{ "session_id", "message" }` → chat reply with sources, mode and strategy.
//! - `POST /chat/document?session_id=&filename=&message=` – raw file body; attaches the document
//!   to the session and answers `message` (or summarizes when it is empty).
//! - `GET /chat/history/:session_id` / `DELETE /chat/history/:session_id` – read or drop a session.
//! - `POST /documents?filename=` – raw PDF body ingested into the knowledge base.
//! - `GET /documents/status` / `DELETE /documents` – chunk count and full reset.
//! - `GET /metrics` – pipeline counters.
//! - `GET /health` – liveness probe.

use crate::ingest::IngestionOutcome;
use crate::metrics::MetricsSnapshot;
use crate::orchestrator::{ChatReply, ConversationApi, ServiceError, UploadReply};
use crate::session::SessionView;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Build the HTTP router.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: ConversationApi + 'static,
{
    Router::new()
        .route("/chat", post(chat::<S>))
        .route("/chat/document", post(upload::<S>))
        .route(
            "/chat/history/:session_id",
            get(history::<S>).delete(clear_history::<S>),
        )
        .route(
            "/documents",
            post(ingest_document::<S>).delete(reset_documents::<S>),
        )
        .route("/documents/status", get(documents_status::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(service)
}

/// Request body for `POST /chat`.
#[derive(Deserialize)]
struct ChatRequest {
    session_id: String,
    message: String,
}

async fn chat<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, AppError>
where
    S: ConversationApi,
{
    if request.session_id.trim().is_empty() {
        return Err(AppError::bad_request("session_id must not be empty"));
    }
    let reply = service
        .handle_chat(&request.session_id, &request.message)
        .await?;
    Ok(Json(reply))
}

/// Query string for `POST /chat/document`.
#[derive(Deserialize)]
struct UploadQuery {
    session_id: String,
    filename: String,
    #[serde(default)]
    message: String,
}

async fn upload<S>(
    State(service): State<Arc<S>>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<UploadReply>, AppError>
where
    S: ConversationApi,
{
    if body.is_empty() {
        return Err(AppError::bad_request("request body must contain the file"));
    }
    let reply = service
        .handle_upload(&query.session_id, &query.filename, body.to_vec(), &query.message)
        .await?;
    Ok(Json(reply))
}

async fn history<S>(
    State(service): State<Arc<S>>,
    Path(session_id): Path<String>,
) -> Json<SessionView>
where
    S: ConversationApi,
{
    Json(service.get_history(&session_id).await)
}

/// Response body for `DELETE /chat/history/:session_id`.
#[derive(Serialize)]
struct ClearResponse {
    session_id: String,
    cleared: bool,
}

async fn clear_history<S>(
    State(service): State<Arc<S>>,
    Path(session_id): Path<String>,
) -> Json<ClearResponse>
where
    S: ConversationApi,
{
    let cleared = service.clear_session(&session_id).await;
    Json(ClearResponse {
        session_id,
        cleared,
    })
}

/// Query string for `POST /documents`.
#[derive(Deserialize)]
struct IngestQuery {
    filename: String,
}

async fn ingest_document<S>(
    State(service): State<Arc<S>>,
    Query(query): Query<IngestQuery>,
    body: Bytes,
) -> Result<Json<IngestionOutcome>, AppError>
where
    S: ConversationApi,
{
    if body.is_empty() {
        return Err(AppError::bad_request("request body must contain the file"));
    }
    let outcome = service
        .ingest_document(&query.filename, body.to_vec())
        .await?;
    tracing::info!(
        document = %outcome.document,
        indexed = outcome.indexed,
        skipped_duplicates = outcome.skipped_duplicates,
        "Ingest request completed"
    );
    Ok(Json(outcome))
}

/// Response body for `GET /documents/status`.
#[derive(Serialize)]
struct StatusResponse {
    chunk_count: usize,
}

async fn documents_status<S>(State(service): State<Arc<S>>) -> Result<Json<StatusResponse>, AppError>
where
    S: ConversationApi,
{
    let chunk_count = service.knowledge_base_status().await?;
    Ok(Json(StatusResponse { chunk_count }))
}

async fn reset_documents<S>(State(service): State<Arc<S>>) -> Result<StatusCode, AppError>
where
    S: ConversationApi,
{
    service.reset_knowledge_base().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: ConversationApi,
{
    Json(service.metrics_snapshot())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

enum AppError {
    BadRequest(String),
    Service(ServiceError),
}

impl AppError {
    fn bad_request(message: &str) -> Self {
        Self::BadRequest(message.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Service(error) => {
                let status = match &error {
                    ServiceError::UnsupportedInput(_) => StatusCode::BAD_REQUEST,
                    ServiceError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    error if error.is_external_failure() => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::error!(%error, "Request failed");
                } else {
                    tracing::warn!(%error, "Request rejected");
                }
                (status, error.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(inner: ServiceError) -> Self {
        Self::Service(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::create_router;
    use crate::extract::ExtractError;
    use crate::ingest::IngestionOutcome;
    use crate::llm::LlmError;
    use crate::metrics::MetricsSnapshot;
    use crate::orchestrator::{
        ChatReply, ConversationApi, ProcessingStatus, ServiceError, UploadReply,
    };
    use crate::session::SessionView;
    use crate::types::{AnswerStrategy, Language, Mode, SourceRef};
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Clone, Debug, PartialEq)]
    struct UploadCall {
        session_id: String,
        filename: String,
        bytes: Vec<u8>,
        message: String,
    }

    #[derive(Default)]
    struct StubConversation {
        uploads: Mutex<Vec<UploadCall>>,
        fail_chat_with_llm: bool,
    }

    #[async_trait]
    impl ConversationApi for StubConversation {
        async fn handle_chat(&self, _session_id: &str, message: &str) -> Result<ChatReply, ServiceError> {
            if self.fail_chat_with_llm {
                return Err(ServiceError::Llm(LlmError::ProviderUnavailable("down".into())));
            }
            Ok(ChatReply {
                response: format!("echo: {message}"),
                sources: vec![SourceRef {
                    source: "guide.pdf".into(),
                    page: 3,
                    header: "Asylum".into(),
                }],
                language: Language::English,
                timestamp: "2026-01-01T00:00:00Z".into(),
                mode: Mode::GeneralQa,
                strategy: AnswerStrategy::KnowledgeBase,
            })
        }

        async fn handle_upload(
            &self,
            session_id: &str,
            filename: &str,
            bytes: Vec<u8>,
            message: &str,
        ) -> Result<UploadReply, ServiceError> {
            if filename.ends_with(".txt") {
                return Err(ServiceError::UnsupportedInput(filename.into()));
            }
            if filename.starts_with("empty") {
                return Err(ServiceError::Extraction(ExtractError::Empty(filename.into())));
            }
            self.uploads.lock().await.push(UploadCall {
                session_id: session_id.into(),
                filename: filename.into(),
                bytes,
                message: message.into(),
            });
            Ok(UploadReply {
                response: "summary".into(),
                filename: filename.into(),
                sources: Vec::new(),
                language: Language::Spanish,
                processing_status: ProcessingStatus::Completed,
                mode: Mode::DocumentQa,
                strategy: AnswerStrategy::FullText,
                timestamp: "2026-01-01T00:00:00Z".into(),
            })
        }

        async fn get_history(&self, session_id: &str) -> SessionView {
            SessionView {
                session_id: session_id.into(),
                mode: Mode::GeneralQa,
                document: None,
                history: Vec::new(),
            }
        }

        async fn clear_session(&self, session_id: &str) -> bool {
            session_id == "known"
        }

        async fn ingest_document(
            &self,
            filename: &str,
            _bytes: Vec<u8>,
        ) -> Result<IngestionOutcome, ServiceError> {
            Ok(IngestionOutcome {
                document: filename.into(),
                chunk_count: 4,
                indexed: 3,
                skipped_duplicates: 1,
                questions_generated: 30,
            })
        }

        async fn knowledge_base_status(&self) -> Result<usize, ServiceError> {
            Ok(42)
        }

        async fn reset_knowledge_base(&self) -> Result<(), ServiceError> {
            Ok(())
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot {
                documents_ingested: 1,
                chunks_indexed: 3,
                general_turns: 2,
                document_turns: 5,
                map_reduce_runs: 1,
                failed_windows: 0,
            }
        }
    }

    async fn send(
        service: Arc<StubConversation>,
        method: Method,
        uri: &str,
        body: Body,
    ) -> (StatusCode, serde_json::Value) {
        let response = create_router(service)
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .expect("request"),
            )
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, json)
    }

    #[tokio::test]
    async fn chat_route_returns_reply_with_sources() {
        let payload = json!({ "session_id": "s1", "message": "Hello" });
        let (status, json) = send(
            Arc::new(StubConversation::default()),
            Method::POST,
            "/chat",
            Body::from(payload.to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["response"], "echo: Hello");
        assert_eq!(json["mode"], "GENERAL_QA");
        assert_eq!(json["strategy"], "knowledge_base");
        assert_eq!(json["language"], "english");
        assert_eq!(json["sources"][0]["page"], 3);
    }

    #[tokio::test]
    async fn upload_route_passes_raw_body_and_query() {
        let service = Arc::new(StubConversation::default());
        let (status, json) = send(
            service.clone(),
            Method::POST,
            "/chat/document?session_id=s9&filename=carta.pdf&message=Resume%20esto",
            Body::from(vec![1u8, 2, 3]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["processing_status"], "completed");
        assert_eq!(json["mode"], "DOCUMENT_QA");

        let uploads = service.uploads.lock().await.clone();
        assert_eq!(
            uploads,
            vec![UploadCall {
                session_id: "s9".into(),
                filename: "carta.pdf".into(),
                bytes: vec![1, 2, 3],
                message: "Resume esto".into(),
            }]
        );
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let service = Arc::new(StubConversation::default());
        let (status, json) = send(
            service.clone(),
            Method::POST,
            "/chat/document?session_id=s&filename=notes.txt",
            Body::from("text"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().expect("error").contains("notes.txt"));

        let (status, _) = send(
            service,
            Method::POST,
            "/chat/document?session_id=s&filename=empty.pdf",
            Body::from("x"),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let failing = Arc::new(StubConversation {
            fail_chat_with_llm: true,
            ..StubConversation::default()
        });
        let payload = json!({ "session_id": "s1", "message": "Hello" });
        let (status, _) = send(failing, Method::POST, "/chat", Body::from(payload.to_string())).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn empty_upload_body_is_rejected() {
        let (status, _) = send(
            Arc::new(StubConversation::default()),
            Method::POST,
            "/chat/document?session_id=s&filename=a.pdf",
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn history_routes_read_and_clear() {
        let service = Arc::new(StubConversation::default());
        let (status, json) = send(service.clone(), Method::GET, "/chat/history/abc", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["session_id"], "abc");
        assert_eq!(json["history"], json!([]));

        let (_, json) = send(service, Method::DELETE, "/chat/history/known", Body::empty()).await;
        assert_eq!(json["cleared"], true);
    }

    #[tokio::test]
    async fn knowledge_base_routes() {
        let service = Arc::new(StubConversation::default());
        let (status, json) = send(
            service.clone(),
            Method::POST,
            "/documents?filename=guide.pdf",
            Body::from("%PDF"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["indexed"], 3);
        assert_eq!(json["skipped_duplicates"], 1);

        let (_, json) = send(service.clone(), Method::GET, "/documents/status", Body::empty()).await;
        assert_eq!(json["chunk_count"], 42);

        let (status, _) = send(service.clone(), Method::DELETE, "/documents", Body::empty()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, json) = send(service, Method::GET, "/metrics", Body::empty()).await;
        assert_eq!(json["document_turns"], 5);
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (status, json) = send(
            Arc::new(StubConversation::default()),
            Method::GET,
            "/health",
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }
}
