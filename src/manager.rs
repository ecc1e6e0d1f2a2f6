use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::agent::{AgentBackend, AskRequest, ProgressSink};
use crate::bus::{Event, EventBus, NotificationLevel};
use crate::chat::{ChatMessage, ChatSession, MessageKind};
use crate::error::{SessionError, ValidationError};
use crate::history::SessionStore;
use crate::id::new_id;
use crate::persona::{PersonaRegistry, DEFAULT_PERSONA};
use crate::upload::{FileUpload, UploadPolicy};

pub const FALLBACK_REPLY: &str =
    "Sorry, the assistant is temporarily unavailable. Please try again later.";
pub const UPLOAD_FALLBACK_REPLY: &str = "The file upload or the assistant's reply failed.";
pub const FILE_UPLOADED: &str = "File uploaded";

/// How long the upload indicator lingers after an upload settles.
const PROGRESS_CLEAR_DELAY: Duration = Duration::from_millis(500);

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    AwaitingResponse,
    UploadingFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    #[serde(skip)]
    token: String,
    pub file_name: String,
    pub percent: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub id: String,
    pub title: String,
    pub time: String,
}

/// Snapshot of everything the chat page renders.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    pub session: ChatSession,
    /// Set while a history entry is shown read-only.
    pub viewing_history: Option<String>,
    pub persona_id: String,
    pub phase: Phase,
    pub compose_enabled: bool,
    pub upload: Option<UploadProgress>,
    pub history: Vec<HistorySummary>,
}

struct ChatState {
    live: ChatSession,
    persona_id: String,
    viewing: Option<String>,
    /// Session id with an `ask` in flight.
    awaiting: Option<String>,
    /// Session id with an upload in flight.
    uploading: Option<String>,
    history: Vec<ChatSession>,
}

impl ChatState {
    fn is_busy(&self) -> bool {
        self.awaiting.as_deref() == Some(self.live.id.as_str())
            || self.uploading.as_deref() == Some(self.live.id.as_str())
    }

    fn phase(&self) -> Phase {
        if self.viewing.is_some() {
            Phase::Idle
        } else if self.uploading.as_deref() == Some(self.live.id.as_str()) {
            Phase::UploadingFile
        } else if self.awaiting.as_deref() == Some(self.live.id.as_str()) {
            Phase::AwaitingResponse
        } else {
            Phase::Idle
        }
    }

    fn ensure_composable(&self) -> std::result::Result<(), ValidationError> {
        if self.viewing.is_some() {
            return Err(ValidationError::ViewingHistory);
        }
        if self.is_busy() {
            return Err(ValidationError::Busy);
        }
        Ok(())
    }

    /// Replace the live session with a fresh one on the default persona.
    fn reset_live(&mut self) {
        self.live = ChatSession::new();
        self.persona_id = DEFAULT_PERSONA.to_string();
        self.viewing = None;
    }
}

/// Owns the live session, the cached history and the in-flight bookkeeping.
///
/// History writes happen under the state lock. The lock is released while a
/// backend call is in flight and the reply is routed back to the session that
/// asked, even if it has since been archived.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    backend: Arc<dyn AgentBackend>,
    personas: PersonaRegistry,
    policy: UploadPolicy,
    event_bus: Arc<EventBus>,
    user_id: String,
    state: Mutex<ChatState>,
    progress: Arc<StdMutex<Option<UploadProgress>>>,
}

impl SessionManager {
    /// Load the history and start with a fresh live session.
    pub async fn load(
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn AgentBackend>,
        personas: PersonaRegistry,
        event_bus: Arc<EventBus>,
        user_id: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let history = store.load().await?;
        info!("Session manager ready with {} archived sessions", history.len());

        Ok(Self {
            store,
            backend,
            personas,
            policy: UploadPolicy::chat(),
            event_bus,
            user_id: user_id.into(),
            state: Mutex::new(ChatState {
                live: ChatSession::new(),
                persona_id: DEFAULT_PERSONA.to_string(),
                viewing: None,
                awaiting: None,
                uploading: None,
                history,
            }),
            progress: Arc::new(StdMutex::new(None)),
        })
    }

    pub fn personas(&self) -> &PersonaRegistry {
        &self.personas
    }

    pub async fn view(&self) -> ChatView {
        let state = self.state.lock().await;
        self.render(&state)
    }

    pub async fn history(&self) -> Vec<ChatSession> {
        self.state.lock().await.history.clone()
    }

    fn render(&self, state: &ChatState) -> ChatView {
        let session = state
            .viewing
            .as_ref()
            .and_then(|id| state.history.iter().find(|s| &s.id == id))
            .unwrap_or(&state.live)
            .clone();
        let phase = state.phase();

        ChatView {
            session,
            viewing_history: state.viewing.clone(),
            persona_id: state.persona_id.clone(),
            phase,
            compose_enabled: state.viewing.is_none() && phase == Phase::Idle,
            upload: self.progress.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            history: state
                .history
                .iter()
                .map(|s| HistorySummary {
                    id: s.id.clone(),
                    title: s.title.clone(),
                    time: s.last_activity_label.clone(),
                })
                .collect(),
        }
    }

    // -------------------------------------------------------------------------
    // Composing
    // -------------------------------------------------------------------------

    /// Send a user message and wait for the assistant's reply.
    pub async fn submit(&self, content: &str, deep_thinking: bool) -> Result<ChatView> {
        let (origin, request) = {
            let mut state = self.state.lock().await;
            state.ensure_composable()?;
            if content.trim().is_empty() {
                return Err(ValidationError::EmptyInput.into());
            }

            let message = ChatMessage::user(content);
            state.live.push(message.clone());
            state.live.derive_title();
            let origin = state.live.id.clone();
            state.awaiting = Some(origin.clone());
            self.publish_message(&origin, message);

            let (function_id, persona) = self.personas.resolve(&state.persona_id);
            let request = AskRequest {
                function_id: function_id.to_string(),
                content: content.to_string(),
                api_key: persona.credential.clone(),
                file_id: None,
                deep_thinking: Some(deep_thinking),
            };
            (origin, request)
        };

        self.ask_and_record(&origin, request, FALLBACK_REPLY).await;
        Ok(self.view().await)
    }

    /// Upload a file for the current persona, then ask about it.
    ///
    /// `pending_text` is whatever sits in the compose field; when blank a
    /// default question naming the file is used.
    pub async fn upload(&self, file: FileUpload, pending_text: Option<&str>) -> Result<ChatView> {
        let token = new_id();
        let (origin, function_id, api_key) = {
            let mut state = self.state.lock().await;
            state.ensure_composable()?;
            if let Err(e) = self.policy.check(&file) {
                warn!("Rejected upload of {}: {}", file.name, e);
                self.event_bus.notify(NotificationLevel::Error, e.to_string());
                return Err(e.into());
            }

            let origin = state.live.id.clone();
            state.uploading = Some(origin.clone());
            let (function_id, persona) = self.personas.resolve(&state.persona_id);
            (origin, function_id.to_string(), persona.credential.clone())
        };

        let question = pending_text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Please analyze the uploaded file: {}", file.name));

        self.set_progress(&token, &file.name, 0);
        let sink = self.progress_sink(&token, &file.name);
        let uploaded = self
            .backend
            .upload_file(&file, &api_key, &self.user_id, sink)
            .await;
        self.clear_progress_later(token, file.name.clone());

        match uploaded {
            Ok(file_id) => {
                self.event_bus.notify(
                    NotificationLevel::Success,
                    format!("File \"{}\" uploaded", file.name),
                );
                {
                    let mut state = self.state.lock().await;
                    let message = ChatMessage::file(FILE_UPLOADED, &file.name, file.size());
                    self.deliver(&mut state, &origin, message).await;
                    if state.uploading.as_deref() == Some(origin.as_str()) {
                        state.uploading = None;
                    }
                    state.awaiting = Some(origin.clone());
                }

                let request = AskRequest {
                    function_id,
                    content: question,
                    api_key,
                    file_id: Some(file_id),
                    deep_thinking: None,
                };
                self.ask_and_record(&origin, request, UPLOAD_FALLBACK_REPLY)
                    .await;
            }
            Err(e) => {
                error!("Upload of {} failed: {}", file.name, e);
                self.event_bus.notify(
                    NotificationLevel::Error,
                    format!("Upload failed: {}", e),
                );
                let mut state = self.state.lock().await;
                self.deliver(&mut state, &origin, ChatMessage::assistant(UPLOAD_FALLBACK_REPLY))
                    .await;
                if state.uploading.as_deref() == Some(origin.as_str()) {
                    state.uploading = None;
                }
            }
        }

        Ok(self.view().await)
    }

    /// Pick the persona for the next question. Returns the compose stub.
    pub async fn select_persona(&self, persona_id: &str) -> String {
        let (resolved, _) = self.personas.resolve(persona_id);
        let mut state = self.state.lock().await;
        state.persona_id = resolved.to_string();
        self.personas.prompt_stub(resolved)
    }

    /// Remove an uploaded-file message from the live session.
    pub async fn remove_file_message(&self, message_id: &str) -> Result<ChatView> {
        let mut state = self.state.lock().await;
        if state.viewing.is_some() {
            return Err(ValidationError::ViewingHistory.into());
        }

        let kind = state
            .live
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| m.kind)
            .ok_or_else(|| SessionError::MessageNotFound(message_id.to_string()))?;
        if kind != MessageKind::File {
            return Err(SessionError::NotAFileMessage);
        }

        state.live.remove_message(message_id);
        Ok(self.render(&state))
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Archive the live session if it has content and start a fresh one.
    pub async fn new_session(&self) -> Result<ChatView> {
        let mut state = self.state.lock().await;
        self.archive_live(&mut state).await?;
        state.reset_live();
        state.awaiting = None;
        state.uploading = None;
        info!("Started new session {}", state.live.id);
        Ok(self.render(&state))
    }

    /// Show a history entry read-only. A live session with content is archived
    /// first.
    pub async fn select_history(&self, session_id: &str) -> Result<ChatView> {
        let mut state = self.state.lock().await;
        if !state.history.iter().any(|s| s.id == session_id) {
            self.event_bus.notify(
                NotificationLevel::Warning,
                "That conversation no longer exists; start a new chat instead",
            );
            return Err(SessionError::SessionNotFound(session_id.to_string()));
        }

        if state.live.is_substantive() {
            self.archive_live(&mut state).await?;
            state.reset_live();
        }
        state.viewing = Some(session_id.to_string());
        state.persona_id = DEFAULT_PERSONA.to_string();
        Ok(self.render(&state))
    }

    /// Delete a history entry. If it was on screen, fall back to a fresh chat.
    pub async fn delete_history(&self, session_id: &str) -> Result<ChatView> {
        let mut state = self.state.lock().await;
        if !state.history.iter().any(|s| s.id == session_id) {
            return Err(SessionError::SessionNotFound(session_id.to_string()));
        }

        let updated: Vec<ChatSession> = state
            .history
            .iter()
            .filter(|s| s.id != session_id)
            .cloned()
            .collect();
        self.store.save(&updated).await?;
        state.history = updated;
        info!("Deleted session {} from history", session_id);

        if state.viewing.as_deref() == Some(session_id) {
            // A reply may have landed in the hidden live session meanwhile.
            self.archive_live(&mut state).await?;
            state.reset_live();
        }
        self.event_bus.publish(Event::HistoryChanged);
        Ok(self.render(&state))
    }

    async fn archive_live(&self, state: &mut ChatState) -> Result<()> {
        if !state.live.is_substantive() {
            return Ok(());
        }

        let archived = state.live.clone().archive();
        let mut updated = Vec::with_capacity(state.history.len() + 1);
        updated.push(archived);
        updated.extend(state.history.iter().cloned());

        self.store.save(&updated).await?;
        info!("Archived session {} ({})", updated[0].id, updated[0].title);
        state.history = updated;
        self.event_bus.publish(Event::HistoryChanged);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Backend round trips
    // -------------------------------------------------------------------------

    async fn ask_and_record(&self, origin: &str, request: AskRequest, fallback: &str) {
        let persona = request.function_id.clone();
        let reply = match self.backend.ask(request).await {
            Ok(content) => ChatMessage::assistant(content),
            Err(e) => {
                error!("Agent [{}] failed to reply: {}", persona, e);
                self.event_bus.notify(
                    NotificationLevel::Error,
                    format!("Assistant request failed: {}", e),
                );
                ChatMessage::assistant(fallback)
            }
        };

        let mut state = self.state.lock().await;
        self.deliver(&mut state, origin, reply).await;
        if state.awaiting.as_deref() == Some(origin) {
            state.awaiting = None;
        }
    }

    /// Append a message to the session it belongs to: the live session if it
    /// is still live, otherwise its archived history entry.
    async fn deliver(&self, state: &mut ChatState, origin: &str, message: ChatMessage) {
        if state.live.id == origin {
            state.live.push(message.clone());
            self.publish_message(origin, message);
            return;
        }

        let Some(archived) = state.history.iter_mut().find(|s| s.id == origin) else {
            warn!("Dropping reply for session {} which no longer exists", origin);
            return;
        };
        archived.push(message.clone());

        if let Err(e) = self.store.save(&state.history).await {
            error!("Failed to persist late reply for {}: {:#}", origin, e);
            self.event_bus.notify(
                NotificationLevel::Warning,
                "A reply arrived but could not be saved to history",
            );
        }
        self.publish_message(origin, message);
        self.event_bus.publish(Event::HistoryChanged);
    }

    fn publish_message(&self, session_id: &str, message: ChatMessage) {
        self.event_bus.publish(Event::MessageAppended {
            session_id: session_id.to_string(),
            message,
        });
    }

    // -------------------------------------------------------------------------
    // Upload indicator
    // -------------------------------------------------------------------------

    fn set_progress(&self, token: &str, file_name: &str, percent: u8) {
        update_progress(&self.progress, &self.event_bus, token, file_name, percent);
    }

    fn progress_sink(&self, token: &str, file_name: &str) -> ProgressSink {
        let progress = self.progress.clone();
        let bus = self.event_bus.clone();
        let token = token.to_string();
        let file_name = file_name.to_string();
        Arc::new(move |percent| update_progress(&progress, &bus, &token, &file_name, percent))
    }

    /// Drop the indicator after a short delay, unless a newer upload owns it.
    fn clear_progress_later(&self, token: String, file_name: String) {
        let progress = self.progress.clone();
        let bus = self.event_bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(PROGRESS_CLEAR_DELAY).await;
            let mut current = progress.lock().unwrap_or_else(|e| e.into_inner());
            if current.as_ref().map(|p| p.token.as_str()) == Some(token.as_str()) {
                *current = None;
                bus.publish(Event::UploadProgress {
                    file_name,
                    percent: None,
                });
            }
        });
    }
}

fn update_progress(
    progress: &StdMutex<Option<UploadProgress>>,
    bus: &EventBus,
    token: &str,
    file_name: &str,
    percent: u8,
) {
    let percent = percent.min(100);
    *progress.lock().unwrap_or_else(|e| e.into_inner()) = Some(UploadProgress {
        token: token.to_string(),
        file_name: file_name.to_string(),
        percent,
    });
    bus.publish(Event::UploadProgress {
        file_name: file_name.to_string(),
        percent: Some(percent),
    });
}
