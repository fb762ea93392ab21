//! ---
//! fsd_section: "05-networking-external-interfaces"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Failure taxonomy of the remote resource boundary."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---

/// Errors returned by a [`crate::ResourceApi`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The server refused the bearer token (missing, invalid or expired).
    #[error("authorization rejected by the server")]
    Unauthorized,
    /// The request never produced a response (connection, timeout, TLS).
    #[error("transport failure: {0}")]
    Transport(String),
    /// The server answered but reported failure.
    #[error("server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// The response body did not match the expected shape.
    #[error("unexpected response payload: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        ApiError::Rejected {
            status,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}
