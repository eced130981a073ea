use serde::{Deserialize, Serialize};

use super::ids::{ChatId, UserId};

/// A conversation and the identities allowed to take part in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: ChatId,
    pub participants: Vec<UserId>,
}

impl ChatRoom {
    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.iter().any(|member| member == user)
    }
}
