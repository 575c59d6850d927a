//! Inference error types.

use thiserror::Error;

/// Errors that can occur while talking to the VLM server.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Socket-level failure: refused, reset, broken pipe, server disconnect.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The server answered but the body was not the expected JSON envelope.
    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<InferenceError>,
    },

    #[error("Inference client shut down")]
    Closed,
}

impl InferenceError {
    /// Whether the failure points at a broken connection pool rather than
    /// a slow or misbehaving model.
    pub fn is_connection(&self) -> bool {
        match self {
            InferenceError::Connection(_) => true,
            InferenceError::Exhausted { source, .. } => source.is_connection(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            InferenceError::Timeout
        } else if e.is_decode() {
            InferenceError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            InferenceError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            // connect, request and body errors all mean the socket went away
            InferenceError::Connection(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_class_survives_exhaustion() {
        let err = InferenceError::Exhausted {
            attempts: 5,
            source: Box::new(InferenceError::Connection("reset by peer".into())),
        };
        assert!(err.is_connection());
        assert!(err.to_string().contains("5 attempts"));

        let err = InferenceError::Exhausted {
            attempts: 5,
            source: Box::new(InferenceError::Status {
                status: 500,
                body: "oom".into(),
            }),
        };
        assert!(!err.is_connection());
        assert!(!InferenceError::Timeout.is_connection());
    }
}
