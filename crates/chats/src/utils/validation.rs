//! Validation utilities.

use crate::types::ChatError;

/// Maximum accepted message body, in bytes.
pub const MAX_CONTENT_LEN: usize = 100_000;

/// Validation utilities
pub struct Validator;

impl Validator {
    /// Validate message content
    pub fn message_content(content: &str) -> Result<(), ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::validation("Message content cannot be empty"));
        }

        if content.len() > MAX_CONTENT_LEN {
            return Err(ChatError::validation(
                "Message content too long (max 100,000 characters)",
            ));
        }

        Ok(())
    }

    /// Validate the participant list of a new chat room
    pub fn participants(participants: &[crate::UserId]) -> Result<(), ChatError> {
        if participants.is_empty() {
            return Err(ChatError::validation("A chat needs at least one participant"));
        }

        if participants.iter().any(|user| user.as_str().trim().is_empty()) {
            return Err(ChatError::validation("Participant ids cannot be empty"));
        }

        Ok(())
    }
}
