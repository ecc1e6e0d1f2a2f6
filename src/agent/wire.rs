use serde::{Deserialize, Serialize};
use serde_json::Value;

// Backend wire types for the /ask and /upload endpoints

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AskBody {
    pub function_id: String,
    pub content: String,
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deep_thinking: Option<bool>,
}

/// Reply from /ask. On failure the backend may send `code`/`message` instead.
#[derive(Debug, Deserialize)]
pub struct AskReply {
    pub content: Option<String>,
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl AskReply {
    pub fn error_code(&self) -> Option<String> {
        match &self.code {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

/// Reply from /upload: `{ success?, data: { id } | "<id>", message? }`.
#[derive(Debug, Deserialize)]
pub struct UploadReply {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl UploadReply {
    pub fn file_id(&self) -> Option<String> {
        let id = match self.data.as_ref()? {
            Value::Object(map) => map.get("id")?.as_str()?.to_string(),
            Value::String(id) => id.clone(),
            _ => return None,
        };
        (!id.is_empty()).then_some(id)
    }
}

/// Error body shape shared by both endpoints.
#[derive(Debug, Deserialize)]
pub struct ErrorReply {
    pub message: Option<String>,
}
