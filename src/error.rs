#[cfg(feature = "web")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Application-wide error type.
///
/// Every fallible operation in the portal resolves to one of these
/// variants so that handlers can map failures to HTTP responses in a
/// single place. Validation and authorization failures carry a
/// user-facing message; external failures wrap the underlying error.
#[derive(Error, Debug)]
pub enum PortalError {
    /// A guard condition or input check failed. The message is shown
    /// to the user as-is.
    #[error("{0}")]
    Validation(String),

    /// The acting user is not allowed to perform the operation.
    #[error("{0}")]
    Authorization(String),

    /// The requested record does not exist.
    #[error("{0}")]
    NotFound(String),

    /// A conditional update found the record in a different state than
    /// the caller expected.
    #[error("{0}")]
    Conflict(String),

    /// A spreadsheet could not be parsed.
    #[error("{0}")]
    Parse(String),

    /// A dependency (storage, PDF rendering, mail) failed.
    #[error("Internal error: {0}")]
    External(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl PortalError {
    /// Shorthand for a validation error with a formatted message.
    pub fn validation(msg: impl Into<String>) -> Self {
        PortalError::Validation(msg.into())
    }

    /// Shorthand for an external error wrapping an io error.
    pub fn io(err: std::io::Error) -> Self {
        PortalError::External(Box::new(err))
    }
}

#[cfg(feature = "web")]
impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let status = match self {
            PortalError::Validation { .. } | PortalError::Parse { .. } => StatusCode::BAD_REQUEST,
            PortalError::Authorization { .. } => StatusCode::FORBIDDEN,
            PortalError::NotFound { .. } => StatusCode::NOT_FOUND,
            PortalError::Conflict { .. } => StatusCode::CONFLICT,
            PortalError::External { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_is_user_facing() {
        let err = PortalError::validation("Quote amount must be greater than zero");
        assert_eq!(err.to_string(), "Quote amount must be greater than zero");
    }

    #[test]
    fn external_error_is_prefixed() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = PortalError::io(io);
        assert!(err.to_string().starts_with("Internal error:"));
    }
}
