//! Hub adapter error types

use cpflow_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Hub API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),

    #[error("Unexpected response payload: {0}")]
    InvalidResponse(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<HubError> for CloudError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::NotFound(what) => CloudError::ResourceNotFound(what),
            HubError::Http(e) if e.status().is_none() => CloudError::Transport(e.to_string()),
            HubError::InvalidResponse(msg) => CloudError::InvalidStatus(msg),
            HubError::JsonError(e) => CloudError::InvalidStatus(e.to_string()),
            HubError::InvalidUrl(msg) => CloudError::InvalidConfig(msg),
            other => CloudError::ApiError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, HubError>;
