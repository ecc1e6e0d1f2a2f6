use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::bus::EventBus;
use crate::error::{RecordError, SessionError, ValidationError};
use crate::manager::SessionManager;
use crate::upload::FileUpload;
use crate::workspace::{
    feedback::FeedbackKind,
    finance::NewBill,
    knowledge::{KnowledgeFilter, NewKnowledge},
    profile::ProfileUpdate,
    templates::TemplateSort,
    Workspace,
};

/// Request bodies may exceed the upload policy so the policy, not the
/// transport, decides what is too large.
const BODY_LIMIT: usize = 32 * 1024 * 1024;

// -----------------------------------------------------------------------------
// Errors
// -----------------------------------------------------------------------------

/// JSON error body: `{ "error": "<message>" }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        let status = match err {
            ValidationError::EmptyInput => StatusCode::BAD_REQUEST,
            ValidationError::UnsupportedFileType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ValidationError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ValidationError::ViewingHistory | ValidationError::Busy => StatusCode::CONFLICT,
        };
        Self::new(status, err.to_string())
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Validation(e) => e.into(),
            SessionError::SessionNotFound(_) | SessionError::MessageNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, err.to_string())
            }
            SessionError::NotAFileMessage => Self::bad_request(err.to_string()),
            SessionError::Storage(_) => {
                error!("api error: {}", err);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }
}

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::Validation(e) => e.into(),
            RecordError::NotFound { .. } => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            RecordError::Invalid(_) => Self::bad_request(err.to_string()),
            RecordError::Storage(_) => {
                error!("api error: {}", err);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Server
// -----------------------------------------------------------------------------

pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub workspace: Arc<Workspace>,
    pub event_bus: Arc<EventBus>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/chat", get(chat_view))
        .route("/api/chat/messages", post(send_message))
        .route("/api/chat/messages/:id", delete(remove_file_message))
        .route("/api/chat/upload", post(upload_file))
        .route("/api/chat/new", post(new_chat))
        .route("/api/chat/persona", post(select_persona))
        .route("/api/history", get(list_history))
        .route("/api/history/:id", delete(delete_history))
        .route("/api/history/:id/select", post(select_history))
        .route("/api/personas", get(list_personas))
        .route("/api/events", get(events))
        .route("/api/feedback", get(list_feedback).post(submit_feedback))
        .route("/api/knowledge", get(list_knowledge).post(add_knowledge))
        .route("/api/knowledge/:id/submit", post(submit_knowledge))
        .route("/api/templates", get(list_templates))
        .route("/api/templates/:id/favorite", post(toggle_favorite))
        .route("/api/templates/:id/rating", post(rate_template))
        .route("/api/finance/bills", get(list_bills).post(add_bill))
        .route("/api/profile", get(get_profile).put(update_profile))
        .route("/api/profile/avatar", post(upload_avatar))
        .with_state(state)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// -----------------------------------------------------------------------------
// Chat
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessage {
    content: String,
    #[serde(default)]
    deep_thinking: bool,
}

#[derive(Debug, Deserialize)]
struct SelectPersona {
    id: String,
}

async fn chat_view(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.sessions.view().await)
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendMessage>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .sessions
        .submit(&body.content, body.deep_thinking)
        .await?;
    Ok(Json(view))
}

async fn upload_file(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let (file, question) = read_upload(multipart).await?;
    info!("Received upload {} ({} bytes)", file.name, file.size());
    let view = state
        .sessions
        .upload(file, question.as_deref())
        .await?;
    Ok(Json(view))
}

async fn new_chat(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let view = state.sessions.new_session().await?;
    Ok(Json(view))
}

async fn select_persona(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SelectPersona>,
) -> impl IntoResponse {
    let stub = state.sessions.select_persona(&body.id).await;
    Json(json!({ "stub": stub }))
}

async fn remove_file_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .sessions
        .remove_file_message(&id)
        .await?;
    Ok(Json(view))
}

async fn list_history(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.sessions.history().await)
}

async fn select_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .sessions
        .select_history(&id)
        .await?;
    Ok(Json(view))
}

async fn delete_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .sessions
        .delete_history(&id)
        .await?;
    Ok(Json(view))
}

async fn list_personas(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.sessions.personas().summaries())
}

async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, axum::BoxError>>> {
    info!("New SSE connection established");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(data) => yield Ok(SseEvent::default().data(data)),
                    Err(e) => error!("Failed to encode event: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("SSE client lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Pull the `file` part and the optional `question` field out of a form.
async fn read_upload(mut multipart: Multipart) -> Result<(FileUpload, Option<String>), ApiError> {
    let mut file = None;
    let mut question = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        match field.name() {
            Some("file") => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                file = Some(FileUpload::new(name, mime, bytes.to_vec()));
            }
            Some("question") => {
                question = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::bad_request(e.to_string()))?,
                );
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| ApiError::bad_request("Form has no 'file' part"))?;
    Ok((file, question))
}

// -----------------------------------------------------------------------------
// Workspace
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NewFeedback {
    #[serde(rename = "type", default)]
    kind: FeedbackKind,
    content: String,
}

#[derive(Debug, Deserialize)]
struct TemplateQuery {
    #[serde(default)]
    sort: TemplateSort,
}

#[derive(Debug, Deserialize)]
struct Rating {
    rating: f32,
}

async fn list_feedback(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let list = state.workspace.feedback().await?;
    Ok(Json(list))
}

async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewFeedback>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state
        .workspace
        .submit_feedback(body.kind, &body.content)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn list_knowledge(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<KnowledgeFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let items = state
        .workspace
        .knowledge(&filter)
        .await?;
    Ok(Json(items))
}

async fn add_knowledge(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewKnowledge>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state
        .workspace
        .add_knowledge(body)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn submit_knowledge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state
        .workspace
        .submit_knowledge(&id)
        .await?;
    Ok(Json(item))
}

async fn list_templates(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TemplateQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let templates = state
        .workspace
        .templates(query.sort)
        .await?;
    Ok(Json(templates))
}

async fn toggle_favorite(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let favorite = state
        .workspace
        .toggle_favorite(&id)
        .await?;
    Ok(Json(json!({ "id": id, "favorite": favorite })))
}

async fn rate_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<Rating>,
) -> Result<impl IntoResponse, ApiError> {
    let template = state
        .workspace
        .rate_template(&id, body.rating)
        .await?;
    Ok(Json(template))
}

async fn list_bills(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let bills = state.workspace.bills().await?;
    Ok(Json(bills))
}

async fn add_bill(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewBill>,
) -> Result<impl IntoResponse, ApiError> {
    let bill = state
        .workspace
        .add_bill(body)
        .await?;
    Ok((StatusCode::CREATED, Json(bill)))
}

async fn get_profile(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let profile = state.workspace.profile().await?;
    Ok(Json(profile))
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProfileUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state
        .workspace
        .update_profile(body)
        .await?;
    Ok(Json(profile))
}

async fn upload_avatar(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let (file, _) = read_upload(multipart).await?;
    let profile = state
        .workspace
        .set_avatar(&file)
        .await?;
    Ok(Json(profile))
}
