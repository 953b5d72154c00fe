//! Error types for roster-lms.

use thiserror::Error;

use roster_core::RemoteError;

/// Transport-level failures of the HTTP destination client.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The destination answered with a non-success status.
    #[error("{operation}: HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// Connection, DNS, TLS or timeout failure.
    #[error("{operation}: transport error: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    /// The response body was not the expected JSON.
    #[error("{operation}: malformed response: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// `password_env` names a variable that is not set.
    #[error("environment variable {var} is not set")]
    MissingPassword { var: String },
}

impl DirectoryError {
    pub fn operation(&self) -> &'static str {
        match self {
            DirectoryError::Status { operation, .. }
            | DirectoryError::Transport { operation, .. }
            | DirectoryError::Decode { operation, .. } => *operation,
            DirectoryError::MissingPassword { .. } => "connect",
        }
    }
}

impl From<DirectoryError> for RemoteError {
    fn from(err: DirectoryError) -> Self {
        let operation = err.operation();
        let message = match &err {
            DirectoryError::Status { status, body, .. } if body.is_empty() => {
                format!("HTTP {status}")
            }
            DirectoryError::Status { status, body, .. } => format!("HTTP {status}: {body}"),
            DirectoryError::Transport { message, .. } => message.clone(),
            DirectoryError::Decode { source, .. } => format!("malformed response: {source}"),
            DirectoryError::MissingPassword { .. } => err.to_string(),
        };
        RemoteError::new(operation, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_maps_to_remote_error() {
        let remote: RemoteError = DirectoryError::Status {
            operation: "create_person",
            status: 409,
            body: "duplicate sync key".to_string(),
        }
        .into();
        assert_eq!(remote.operation, "create_person");
        assert_eq!(remote.message, "HTTP 409: duplicate sync key");
    }

    #[test]
    fn empty_body_is_omitted() {
        let remote: RemoteError = DirectoryError::Status {
            operation: "delete_person",
            status: 500,
            body: String::new(),
        }
        .into();
        assert_eq!(remote.to_string(), "delete_person failed: HTTP 500");
    }
}
