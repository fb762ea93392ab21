//! ---
//! fsd_section: "04-configuration-orchestration"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Error taxonomy of the dashboard orchestration engine."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use fsd_api::ApiError;
use thiserror::Error;

/// Top-level error returned by engine operations. None of these are fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DashboardError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error("remote error: {0}")]
    Remote(ApiError),
}

impl DashboardError {
    pub fn is_auth(&self) -> bool {
        matches!(self, DashboardError::Auth(_))
    }
}

impl From<ApiError> for DashboardError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => DashboardError::Auth(AuthError::SessionExpired),
            ApiError::Transport(message) => DashboardError::Transport(message),
            other => DashboardError::Remote(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("authentication service unreachable: {0}")]
    Unreachable(String),
    #[error("session expired or was revoked; log in again")]
    SessionExpired,
    #[error("not logged in")]
    NotLoggedIn,
    #[error("authentication is disabled for this deployment")]
    Disabled,
    #[error("server requires authentication but auth mode is disabled")]
    AuthenticationRequired,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("invalid file name '{name}': {reason}")]
    InvalidFileName { name: String, reason: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScenarioError {
    #[error("explain mode is active; disable it to run scenarios")]
    ExplainModeActive,
    #[error("scenario '{active}' is already running")]
    AlreadyRunning { active: String },
    #[error("unknown scenario '{0}'")]
    UnknownScenario(String),
    #[error("scenario '{0}' only supports explain")]
    ExplainOnly(String),
}

/// Failures of the on-disk session store.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session store is corrupt: {0}")]
    Format(#[from] serde_json::Error),
}

/// Reject names the server would treat as paths.
pub fn validate_file_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::Empty("file name"));
    }
    let reason = if name.contains('/') || name.contains('\\') {
        Some("path separators are not allowed")
    } else if name == "." || name == ".." || name.contains("..") {
        Some("parent directory references are not allowed")
    } else if name.chars().any(char::is_control) {
        Some("control characters are not allowed")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ValidationError::InvalidFileName {
            name: name.to_owned(),
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_into_taxonomy() {
        assert_eq!(
            DashboardError::from(ApiError::Unauthorized),
            DashboardError::Auth(AuthError::SessionExpired)
        );
        assert!(matches!(
            DashboardError::from(ApiError::Transport("refused".into())),
            DashboardError::Transport(_)
        ));
        assert!(matches!(
            DashboardError::from(ApiError::rejected(500, "Delete failed")),
            DashboardError::Remote(ApiError::Rejected { status: 500, .. })
        ));
    }

    #[test]
    fn file_names_are_validated_locally() {
        assert!(validate_file_name("demo-write-lock.txt").is_ok());
        assert_eq!(
            validate_file_name("  "),
            Err(ValidationError::Empty("file name"))
        );
        assert!(validate_file_name("../../../etc/passwd").is_err());
        assert!(validate_file_name("a\\b").is_err());
        assert!(validate_file_name("bad\nname").is_err());
    }
}
