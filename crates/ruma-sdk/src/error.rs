//! Error conditions.

use thiserror::Error;

/// The error type returned by most operations in this crate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The underlying transport or the homeserver reported an error for a Matrix API call.
    #[error("matrix api error: {0}")]
    Api(#[from] crate::api::MatrixApiError),

    /// The persistent store reported an error.
    #[error("database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    /// The encryption subsystem reported an error.
    #[error("encryption error: {0}")]
    Encryption(#[from] crate::encryption::EncryptionError),

    /// A Matrix identifier failed to parse or validate.
    #[error("invalid identifier: {0}")]
    Identifier(#[from] ruma_common::IdParseError),

    /// A JSON payload could not be decoded into the expected shape.
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    /// An input did not satisfy a precondition that is the caller's responsibility.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The client is not in a state that allows the requested operation (not logged in, no
    /// homeserver configured, disposed, ...).
    #[error("invalid client state: {0}")]
    State(String),
}

impl Error {
    /// Returns the Matrix `errcode` carried by this error, if it wraps a protocol-level
    /// [`MatrixApiError::Protocol`][crate::api::MatrixApiError::Protocol].
    pub fn errcode(&self) -> Option<&str> {
        match self {
            Error::Api(crate::api::MatrixApiError::Protocol { errcode, .. }) => Some(errcode),
            _ => None,
        }
    }

    /// Whether this error represents the homeserver rejecting our access token
    /// (`M_UNKNOWN_TOKEN`), which the sync engine treats as an implicit logout.
    pub fn is_unknown_token(&self) -> bool {
        self.errcode() == Some("M_UNKNOWN_TOKEN")
    }
}

#[cfg(test)]
mod tests {
    use crate::api::MatrixApiError;

    use super::Error;

    #[test]
    fn unknown_token_is_detected() {
        let err: Error = MatrixApiError::Protocol {
            errcode: "M_UNKNOWN_TOKEN".to_owned(),
            error: "Invalid access token".to_owned(),
            retry_after_ms: None,
            session: None,
        }
        .into();

        assert!(err.is_unknown_token());
    }

    #[test]
    fn other_protocol_errors_are_not_unknown_token() {
        let err: Error = MatrixApiError::Protocol {
            errcode: "M_FORBIDDEN".to_owned(),
            error: "no".to_owned(),
            retry_after_ms: None,
            session: None,
        }
        .into();

        assert!(!err.is_unknown_token());
        assert_eq!(err.errcode(), Some("M_FORBIDDEN"));
    }
}
