use thiserror::Error;

/// Input rejected locally, before any state change or network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message is empty")]
    EmptyInput,

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("File is {size} bytes, the limit is {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("A past session is being viewed; start a new chat to send messages")]
    ViewingHistory,

    #[error("Still waiting for the previous reply")]
    Busy,
}

/// Failures talking to the agent backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Backend request failed: {0}")]
    RequestFailed(String),

    #[error("File upload failed: {0}")]
    UploadFailed(String),

    #[error("Upload succeeded but no file id was returned")]
    MissingFileId,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Session '{0}' not found in history")]
    SessionNotFound(String),

    #[error("Message '{0}' not found")]
    MessageNotFound(String),

    #[error("Only file messages can be removed")]
    NotAFileMessage,

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Failures in the workspace record lists.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{0}")]
    Invalid(String),

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}
