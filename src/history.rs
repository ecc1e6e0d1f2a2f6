use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::chat::{truncate_to_millis, ChatMessage, ChatSession, MessageKind, Sender};
use crate::id::new_id;
use crate::store::{keys, Store};

/// Durable, most-recent-first list of archived sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read the whole history. Corrupt data yields an empty list, never an error.
    async fn load(&self) -> Result<Vec<ChatSession>>;

    /// Replace the whole history.
    async fn save(&self, sessions: &[ChatSession]) -> Result<()>;
}

/// History persisted in the key-value [`Store`].
#[derive(Clone, Debug)]
pub struct SqliteSessionStore {
    store: Store,
}

impl SqliteSessionStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn load(&self) -> Result<Vec<ChatSession>> {
        let Some(raw) = self.store.get_raw(keys::CHAT_HISTORY).await? else {
            return Ok(Vec::new());
        };

        match parse_history(&raw) {
            Some(sessions) => {
                debug!("Loaded {} archived sessions", sessions.len());
                // Repaired records get fresh ids and timestamps; store them so
                // the next load sees the same values.
                let stored: Option<Value> = serde_json::from_str(&raw).ok();
                if stored != serde_json::to_value(&sessions).ok() {
                    warn!("Chat history needed repair, rewriting it");
                    self.save(&sessions).await?;
                }
                Ok(sessions)
            }
            None => {
                warn!("Chat history is corrupted, discarding it");
                self.store.remove(keys::CHAT_HISTORY).await?;
                Ok(Vec::new())
            }
        }
    }

    async fn save(&self, sessions: &[ChatSession]) -> Result<()> {
        self.store.put_json(keys::CHAT_HISTORY, sessions).await
    }
}

/// History kept in memory only.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: std::sync::Mutex<Vec<ChatSession>>,
}

#[cfg(test)]
impl MemorySessionStore {
    pub fn with_sessions(sessions: Vec<ChatSession>) -> Self {
        Self {
            sessions: std::sync::Mutex::new(sessions),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Vec<ChatSession>> {
        Ok(self.sessions.lock().unwrap().clone())
    }

    async fn save(&self, sessions: &[ChatSession]) -> Result<()> {
        *self.sessions.lock().unwrap() = sessions.to_vec();
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Boundary schema
// -----------------------------------------------------------------------------

/// Loose shape of a stored session. Everything is optional so that a bad record
/// can be recognised and dropped instead of failing the whole list.
#[derive(Debug, Deserialize)]
struct StoredSession {
    id: Option<String>,
    title: Option<String>,
    messages: Option<Vec<Value>>,
    #[serde(default)]
    time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredMessage {
    id: Option<String>,
    content: Option<String>,
    sender: Option<String>,
    timestamp: Option<StoredTimestamp>,
    #[serde(alias = "type")]
    kind: Option<String>,
    file_name: Option<String>,
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredTimestamp {
    Millis(i64),
    Text(String),
}

impl StoredTimestamp {
    fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            StoredTimestamp::Millis(ms) => DateTime::from_timestamp_millis(*ms),
            StoredTimestamp::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

/// Parse a stored history document. Returns `None` when the value as a whole is
/// unusable and should be discarded.
fn parse_history(raw: &str) -> Option<Vec<ChatSession>> {
    let records: Vec<Value> = serde_json::from_str(raw).ok()?;

    let sessions = records
        .into_iter()
        .filter_map(|record| {
            let stored: StoredSession = serde_json::from_value(record).ok()?;
            let (Some(id), Some(title), Some(messages)) =
                (stored.id, stored.title, stored.messages)
            else {
                return None;
            };
            if id.is_empty() || title.is_empty() {
                return None;
            }

            Some(ChatSession {
                id,
                title,
                messages: messages.into_iter().map(rehydrate_message).collect(),
                last_activity_label: stored.time.unwrap_or_default(),
            })
        })
        .collect();

    Some(sessions)
}

fn rehydrate_message(value: Value) -> ChatMessage {
    let stored: StoredMessage = serde_json::from_value(value).unwrap_or_default();

    let sender = match stored.sender.as_deref() {
        Some("user") => Sender::User,
        _ => Sender::Assistant,
    };
    let timestamp = stored
        .timestamp
        .as_ref()
        .and_then(StoredTimestamp::to_datetime)
        .unwrap_or_else(|| truncate_to_millis(Utc::now()));

    ChatMessage {
        id: stored.id.filter(|id| !id.is_empty()).unwrap_or_else(new_id),
        content: stored.content.unwrap_or_default(),
        sender,
        timestamp,
        kind: match stored.kind.as_deref() {
            Some("file") => MessageKind::File,
            _ => MessageKind::Text,
        },
        file_name: stored.file_name,
        file_size: stored.file_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::temp_store;

    fn sample_session() -> ChatSession {
        let mut session = ChatSession::new();
        session.push(ChatMessage::user("hello"));
        session.push(ChatMessage::assistant("hi there"));
        session.archive()
    }

    #[tokio::test]
    async fn empty_store_loads_empty_history() {
        let (_dir, store) = temp_store().await;
        let history = SqliteSessionStore::new(store);
        assert!(history.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn saved_sessions_round_trip() {
        let (_dir, store) = temp_store().await;
        let history = SqliteSessionStore::new(store);
        let session = sample_session();

        history.save(std::slice::from_ref(&session)).await.unwrap();
        let loaded = history.load().await.unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], session);
    }

    #[tokio::test]
    async fn loading_twice_is_idempotent() {
        let (_dir, store) = temp_store().await;
        let history = SqliteSessionStore::new(store);
        history.save(&[sample_session(), sample_session()]).await.unwrap();

        let first = history.load().await.unwrap();
        let second = history.load().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn repaired_history_is_stable_across_loads() {
        let (_dir, store) = temp_store().await;
        store
            .put_raw(
                keys::CHAT_HISTORY,
                r#"[{"id":"s","title":"t","messages":[{"content":"no id or time"}]},{"title":"dropped"}]"#,
            )
            .await
            .unwrap();
        let history = SqliteSessionStore::new(store);

        let first = history.load().await.unwrap();
        let second = history.load().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unparseable_history_is_discarded() {
        let (_dir, store) = temp_store().await;
        store.put_raw(keys::CHAT_HISTORY, "[{broken").await.unwrap();
        let history = SqliteSessionStore::new(store.clone());

        assert!(history.load().await.unwrap().is_empty());
        assert_eq!(store.get_raw(keys::CHAT_HISTORY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn non_array_history_is_discarded() {
        let (_dir, store) = temp_store().await;
        store
            .put_raw(keys::CHAT_HISTORY, r#"{"id":"1","title":"t","messages":[]}"#)
            .await
            .unwrap();
        let history = SqliteSessionStore::new(store);
        assert!(history.load().await.unwrap().is_empty());
    }

    #[test]
    fn invalid_records_are_dropped() {
        let raw = r#"[
            {"id":"a","title":"kept","messages":[]},
            {"title":"no id","messages":[]},
            {"id":"c","messages":[]},
            {"id":"d","title":"no messages"},
            {"id":"e","title":"bad messages","messages":"nope"},
            42
        ]"#;
        let sessions = parse_history(raw).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "a");
    }

    #[test]
    fn messages_are_rehydrated_with_defaults() {
        let raw = r#"[{"id":"s","title":"t","time":"07-15 09:25","messages":[
            {"id":"m1","content":"hi","sender":"user","timestamp":"2025-07-15T09:25:00.123Z"},
            {"content":"reply","timestamp":1752571500123},
            {"id":"m3","sender":"agent","type":"file","fileName":"a.pdf","fileSize":2048}
        ]}]"#;
        let sessions = parse_history(raw).unwrap();
        let messages = &sessions[0].messages;

        assert_eq!(sessions[0].last_activity_label, "07-15 09:25");
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[0].timestamp.timestamp_millis(), 1752571500123);

        assert_eq!(messages[1].sender, Sender::Assistant);
        assert!(!messages[1].id.is_empty());
        assert_eq!(messages[1].timestamp.timestamp_millis(), 1752571500123);

        assert_eq!(messages[2].sender, Sender::Assistant);
        assert_eq!(messages[2].content, "");
        assert_eq!(messages[2].kind, MessageKind::File);
        assert_eq!(messages[2].file_size, Some(2048));
    }

    #[tokio::test]
    async fn memory_store_keeps_last_save() {
        let store = MemorySessionStore::default();
        store.save(&[sample_session()]).await.unwrap();
        store.save(&[]).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }
}
