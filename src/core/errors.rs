use thiserror::Error;
use super::types::{RecordId, UploadStatus};

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server error: status code {status_code}, message: {message}")]
    Server {
        status_code: u16,
        message: String,
    },

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("No account selected for record {0}")]
    AccountNotSelected(RecordId),

    #[error("Record {id} cannot be dispatched while {status}")]
    NotDispatchable {
        id: RecordId,
        status: UploadStatus,
    },

    #[error("Invalid transition for record {id}: {from} -> {to}")]
    InvalidTransition {
        id: RecordId,
        from: UploadStatus,
        to: UploadStatus,
    },

    #[error("Record {id} cannot be edited while {status}")]
    RecordLocked {
        id: RecordId,
        status: UploadStatus,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status_code,
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// 调用方的拒绝，而不是上传本身的失败
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            UploadError::RecordNotFound(_)
                | UploadError::AccountNotSelected(_)
                | UploadError::NotDispatchable { .. }
                | UploadError::RecordLocked { .. }
        )
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;
