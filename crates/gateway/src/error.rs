//! Error types for the relay

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use courier_chats::{ChannelId, ErrorCode, ServerEvent, UserId};
use serde_json::json;
use thiserror::Error;

/// Failures raised while handling a single inbound signal.
///
/// A failure is isolated to the signal that caused it; only the variants
/// for which [`RelayError::closes_channel`] is true end the channel.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("channel is not authenticated")]
    NotAuthenticated,

    #[error("authentication was not completed in time")]
    HandshakeTimeout,

    #[error("unknown recipient: {0}")]
    UnknownRecipient(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("persistence failed: {0}")]
    PersistenceFailure(String),

    #[error("channel {channel} is already bound to {owner}")]
    ChannelOwned { channel: ChannelId, owner: UserId },

    #[error("malformed frame: {0}")]
    Malformed(String),
}

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::AuthenticationFailure(_) => ErrorCode::AuthenticationFailed,
            RelayError::NotAuthenticated | RelayError::HandshakeTimeout => {
                ErrorCode::NotAuthenticated
            }
            RelayError::UnknownRecipient(_) => ErrorCode::UnknownRecipient,
            RelayError::InvalidMessage(_) => ErrorCode::InvalidMessage,
            RelayError::PersistenceFailure(_) => ErrorCode::PersistenceFailure,
            RelayError::ChannelOwned { .. } => ErrorCode::ChannelOwned,
            RelayError::Malformed(_) => ErrorCode::Malformed,
        }
    }

    pub fn closes_channel(&self) -> bool {
        matches!(
            self,
            RelayError::AuthenticationFailure(_) | RelayError::HandshakeTimeout
        )
    }

    /// Whether a failed `send-message` should be answered with `message-failed`.
    pub fn fails_message(&self) -> bool {
        matches!(
            self,
            RelayError::UnknownRecipient(_)
                | RelayError::InvalidMessage(_)
                | RelayError::PersistenceFailure(_)
        )
    }

    /// The `error` frame sent back to the channel, if the failure is reported there.
    ///
    /// Dropped signals and message failures are not reported with an `error` frame.
    pub fn error_frame(&self) -> Option<ServerEvent> {
        match self {
            RelayError::UnknownRecipient(_)
            | RelayError::InvalidMessage(_)
            | RelayError::PersistenceFailure(_) => None,
            _ => Some(ServerEvent::error(self.code(), self.to_string())),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::AuthenticationFailure(_)
            | RelayError::NotAuthenticated
            | RelayError::HandshakeTimeout => StatusCode::UNAUTHORIZED,
            RelayError::UnknownRecipient(_) => StatusCode::NOT_FOUND,
            RelayError::InvalidMessage(_) | RelayError::Malformed(_) => StatusCode::BAD_REQUEST,
            RelayError::ChannelOwned { .. } => StatusCode::CONFLICT,
            RelayError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = json!({
            "error": status.as_str(),
            "code": self.code(),
            "message": self.to_string(),
        });

        (status, Json(error_response)).into_response()
    }
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

impl From<courier_auth::AuthError> for RelayError {
    fn from(error: courier_auth::AuthError) -> Self {
        RelayError::AuthenticationFailure(error.to_string())
    }
}

impl From<courier_chats::ChatError> for RelayError {
    fn from(error: courier_chats::ChatError) -> Self {
        use courier_chats::ChatError;
        match error {
            ChatError::ChatNotFound { id } => RelayError::UnknownRecipient(format!("chat {id}")),
            ChatError::MessageNotFound { id } => {
                RelayError::UnknownRecipient(format!("message {id}"))
            }
            ChatError::AccessDenied { reason } => RelayError::UnknownRecipient(reason),
            ChatError::Validation { message } => RelayError::InvalidMessage(message),
            ChatError::Storage { message } => RelayError::PersistenceFailure(message),
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(error: serde_json::Error) -> Self {
        RelayError::Malformed(error.to_string())
    }
}
