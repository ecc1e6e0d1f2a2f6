pub mod client;
pub mod wire;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::GatewayError;
use crate::upload::FileUpload;

pub use client::HttpGateway;

/// Receives upload progress as a percentage, 0 to 100.
pub type ProgressSink = Arc<dyn Fn(u8) + Send + Sync>;

/// One question for an agent persona.
#[derive(Debug, Clone, PartialEq)]
pub struct AskRequest {
    pub function_id: String,
    pub content: String,
    pub api_key: String,
    pub file_id: Option<String>,
    pub deep_thinking: Option<bool>,
}

/// The boundary to the external agent service.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Ask a persona a question and return its answer verbatim.
    async fn ask(&self, request: AskRequest) -> Result<String, GatewayError>;

    /// Upload a file on behalf of `user_id` and return the backend's file id.
    async fn upload_file(
        &self,
        file: &FileUpload,
        api_key: &str,
        user_id: &str,
        progress: ProgressSink,
    ) -> Result<String, GatewayError>;
}
