use crate::id::new_id;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Title every fresh session starts with until the first user message names it.
pub const UNTITLED: &str = "New chat";

/// Title used when a session is archived without ever receiving a user message.
pub const UNNAMED: &str = "Untitled chat";

/// Seed message placed at the top of every live session.
pub const GREETING: &str = "Hello! I'm your assistant. How can I help you today?";

/// Number of characters kept from the first user message when deriving a title.
pub const TITLE_CHARS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub sender: Sender,
    /// Stored as epoch milliseconds so it survives a storage round trip exactly.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Sender::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Sender::Assistant, content)
    }

    pub fn greeting() -> Self {
        Self::assistant(GREETING)
    }

    /// Assistant-side record of a file that was accepted by the backend.
    pub fn file(content: impl Into<String>, file_name: impl Into<String>, file_size: u64) -> Self {
        Self {
            kind: MessageKind::File,
            file_name: Some(file_name.into()),
            file_size: Some(file_size),
            ..Self::text(Sender::Assistant, content)
        }
    }

    fn text(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            content: content.into(),
            sender,
            timestamp: truncate_to_millis(Utc::now()),
            kind: MessageKind::Text,
            file_name: None,
            file_size: None,
        }
    }
}

/// One conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    /// Display label for recency, fixed when the session is archived.
    #[serde(rename = "time", default)]
    pub last_activity_label: String,
}

impl ChatSession {
    /// A fresh live session: new id, sentinel title, greeting only.
    pub fn new() -> Self {
        Self {
            id: new_id(),
            title: UNTITLED.to_string(),
            messages: vec![ChatMessage::greeting()],
            last_activity_label: String::new(),
        }
    }

    /// True once the session holds anything beyond the seed greeting.
    pub fn is_substantive(&self) -> bool {
        self.messages.len() > 1
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn first_user_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.sender == Sender::User)
    }

    /// Name a sentinel-titled session after its first user message.
    /// Returns true when the title changed.
    pub fn derive_title(&mut self) -> bool {
        if self.title != UNTITLED {
            return false;
        }
        match self.first_user_message() {
            Some(first) => {
                self.title = title_from(&first.content);
                true
            }
            None => false,
        }
    }

    /// Freeze the session for history: make sure it carries a title and stamp
    /// the recency label.
    pub fn archive(mut self) -> Self {
        self.derive_title();
        if self.title == UNTITLED {
            self.title = UNNAMED.to_string();
        }
        self.last_activity_label = activity_label(Local::now());
        self
    }

    /// Drop a single message by id. Returns the removed message.
    pub fn remove_message(&mut self, message_id: &str) -> Option<ChatMessage> {
        let index = self.messages.iter().position(|m| m.id == message_id)?;
        Some(self.messages.remove(index))
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

/// First `TITLE_CHARS` characters plus an ellipsis, or the whole text when it fits.
pub fn title_from(content: &str) -> String {
    if content.chars().count() > TITLE_CHARS {
        let head: String = content.chars().take(TITLE_CHARS).collect();
        format!("{}...", head)
    } else {
        content.to_string()
    }
}

pub fn activity_label(at: DateTime<Local>) -> String {
    at.format("%m-%d %H:%M").to_string()
}

pub fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_has_only_the_greeting() {
        let session = ChatSession::new();
        assert_eq!(session.title, UNTITLED);
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].sender, Sender::Assistant);
        assert!(!session.is_substantive());
    }

    #[test]
    fn short_first_message_becomes_title_verbatim() {
        let mut session = ChatSession::new();
        session.push(ChatMessage::user("hello"));
        assert!(session.derive_title());
        assert_eq!(session.title, "hello");
    }

    #[test]
    fn long_first_message_is_cut_to_fifteen_chars() {
        let mut session = ChatSession::new();
        let text = "one two three four five six seven eight nine ten \
                    eleven twelve thirteen fourteen fifteen sixteen seventeen \
                    eighteen nineteen twenty";
        session.push(ChatMessage::user(text));
        session.derive_title();
        assert_eq!(session.title, "one two three f...");
    }

    #[test]
    fn title_counts_characters_not_bytes() {
        assert_eq!(title_from("社区活动通知社区活动通知社区活动通知"), "社区活动通知社区活动通知社区活...");
    }

    #[test]
    fn derived_title_is_not_overwritten() {
        let mut session = ChatSession::new();
        session.push(ChatMessage::user("first"));
        session.derive_title();
        session.push(ChatMessage::user("second"));
        assert!(!session.derive_title());
        assert_eq!(session.title, "first");
    }

    #[test]
    fn archive_without_user_message_uses_unnamed_title() {
        let mut session = ChatSession::new();
        session.push(ChatMessage::file("File uploaded", "a.pdf", 10));
        let archived = session.archive();
        assert_eq!(archived.title, UNNAMED);
        assert!(!archived.last_activity_label.is_empty());
    }

    #[test]
    fn message_serializes_timestamp_as_millis() {
        let msg = ChatMessage::user("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["timestamp"].as_i64(), Some(msg.timestamp.timestamp_millis()));
        assert_eq!(json["sender"], "user");
        assert_eq!(json["kind"], "text");
        assert!(json.get("fileName").is_none());
    }
}
