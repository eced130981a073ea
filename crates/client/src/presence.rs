use std::collections::{HashMap, HashSet};

use courier_chats::{ChatId, PresenceStatus, UserId};

/// Client-side view of who is online and who is typing where.
#[derive(Debug, Default)]
pub struct PresenceView {
    online: HashSet<UserId>,
    typing: HashMap<ChatId, HashSet<UserId>>,
}

impl PresenceView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the online set with a snapshot from the relay.
    pub fn apply_snapshot(&mut self, online: Vec<UserId>) {
        self.online = online.into_iter().collect();
        let online = &self.online;
        for typists in self.typing.values_mut() {
            typists.retain(|user| online.contains(user));
        }
        self.typing.retain(|_, typists| !typists.is_empty());
    }

    /// Returns `true` when the status changed the view.
    pub fn apply_status(&mut self, user_id: &UserId, status: PresenceStatus) -> bool {
        match status {
            PresenceStatus::Online => self.online.insert(user_id.clone()),
            PresenceStatus::Offline => {
                for typists in self.typing.values_mut() {
                    typists.remove(user_id);
                }
                self.typing.retain(|_, typists| !typists.is_empty());
                self.online.remove(user_id)
            }
        }
    }

    pub fn apply_typing(&mut self, chat_id: &ChatId, user_id: &UserId, is_typing: bool) -> bool {
        if is_typing {
            self.typing
                .entry(chat_id.clone())
                .or_default()
                .insert(user_id.clone())
        } else {
            let Some(typists) = self.typing.get_mut(chat_id) else {
                return false;
            };
            let removed = typists.remove(user_id);
            if typists.is_empty() {
                self.typing.remove(chat_id);
            }
            removed
        }
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.online.contains(user_id)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<_> = self.online.iter().cloned().collect();
        users.sort();
        users
    }

    pub fn typing_in(&self, chat_id: &ChatId) -> Vec<UserId> {
        let mut users: Vec<_> = self
            .typing
            .get(chat_id)
            .map(|typists| typists.iter().cloned().collect())
            .unwrap_or_default();
        users.sort();
        users
    }
}
