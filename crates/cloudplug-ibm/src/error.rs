//! SoftLayer SDK error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SoftLayerError {
    /// The API answered with a SoftLayer exception.
    #[error("SoftLayer API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("SoftLayer object not found: {0}")]
    NotFound(String),

    #[error("SoftLayer request failed: {0}")]
    Transport(String),

    /// The response could not be decoded.
    #[error("unexpected SoftLayer response: {0}")]
    InvalidResponse(String),
}

impl SoftLayerError {
    pub fn api(code: &str, message: impl Into<String>) -> Self {
        SoftLayerError::Api {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, SoftLayerError>;
