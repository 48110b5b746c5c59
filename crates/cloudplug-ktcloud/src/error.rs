//! KT Cloud SDK error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KtApiError {
    /// The API answered with an error code.
    #[error("KT Cloud API error {code}: {message}")]
    Api { code: u16, message: String },

    #[error("KT Cloud resource not found: {0}")]
    NotFound(String),

    #[error("KT Cloud API rate limit exceeded for {0}")]
    RateLimited(String),

    #[error("KT Cloud request failed: {0}")]
    Transport(String),

    /// The response could not be decoded.
    #[error("unexpected KT Cloud response: {0}")]
    InvalidResponse(String),
}

pub type ApiResult<T> = std::result::Result<T, KtApiError>;
