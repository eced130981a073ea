//! Connection registry: identity to the set of its live channels.
//!
//! The registry is a plain data structure. It is only ever touched while
//! the hub lock is held, so it carries no synchronisation of its own.

use std::collections::{HashMap, HashSet};

use courier_chats::{ChannelId, ServerEvent, UserId};
use tokio::sync::mpsc;

use crate::error::RelayError;

/// Outbound queue of one channel.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

/// Result of a successful [`ConnectionRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The identity had no live channel before this one.
    FirstChannel,
    AdditionalChannel,
    /// The channel was already bound to the same identity.
    AlreadyRegistered,
}

/// Result of removing a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistration {
    pub user: UserId,
    /// True when the identity has no live channel left.
    pub was_last: bool,
}

struct ChannelEntry {
    owner: UserId,
    outbox: Outbox,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    channels: HashMap<ChannelId, ChannelEntry>,
    by_user: HashMap<UserId, HashSet<ChannelId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `channel` to `user`. Idempotent for the same pair; a channel
    /// already owned by another identity is rejected.
    pub fn register(
        &mut self,
        user: &UserId,
        channel: ChannelId,
        outbox: Outbox,
    ) -> Result<Registration, RelayError> {
        if let Some(entry) = self.channels.get(&channel) {
            if &entry.owner == user {
                return Ok(Registration::AlreadyRegistered);
            }
            return Err(RelayError::ChannelOwned {
                channel,
                owner: entry.owner.clone(),
            });
        }

        self.channels.insert(
            channel,
            ChannelEntry {
                owner: user.clone(),
                outbox,
            },
        );

        let set = self.by_user.entry(user.clone()).or_default();
        set.insert(channel);
        if set.len() == 1 {
            Ok(Registration::FirstChannel)
        } else {
            Ok(Registration::AdditionalChannel)
        }
    }

    /// Remove a channel. No-op when it is not registered.
    pub fn unregister(&mut self, channel: ChannelId) -> Option<Unregistration> {
        let entry = self.channels.remove(&channel)?;

        let was_last = match self.by_user.get_mut(&entry.owner) {
            Some(set) => {
                set.remove(&channel);
                set.is_empty()
            }
            None => true,
        };
        if was_last {
            self.by_user.remove(&entry.owner);
        }

        Some(Unregistration {
            user: entry.owner,
            was_last,
        })
    }

    /// Raw liveness: true iff the identity has at least one channel.
    pub fn is_online(&self, user: &UserId) -> bool {
        self.by_user.get(user).is_some_and(|set| !set.is_empty())
    }

    pub fn channels_for(&self, user: &UserId) -> Vec<ChannelId> {
        let mut channels: Vec<_> = self
            .by_user
            .get(user)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        channels.sort();
        channels
    }

    pub fn identity_of(&self, channel: ChannelId) -> Option<&UserId> {
        self.channels.get(&channel).map(|entry| &entry.owner)
    }

    pub fn online_identities(&self) -> Vec<UserId> {
        let mut users: Vec<_> = self.by_user.keys().cloned().collect();
        users.sort();
        users
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn identity_count(&self) -> usize {
        self.by_user.len()
    }

    /// Queue `event` on one channel. Returns false if the channel is gone.
    pub fn send_to_channel(&self, channel: ChannelId, event: ServerEvent) -> bool {
        match self.channels.get(&channel) {
            Some(entry) => entry.outbox.send(event).is_ok(),
            None => false,
        }
    }

    /// Queue `event` on every channel of `user`; returns how many accepted it.
    pub fn send_to_identity(&self, user: &UserId, event: &ServerEvent) -> usize {
        self.by_user
            .get(user)
            .map(|set| {
                set.iter()
                    .filter(|channel| self.send_to_channel(**channel, event.clone()))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Queue `event` on every channel whose identity is not `excluded`.
    pub fn broadcast_except(&self, excluded: &UserId, event: &ServerEvent) -> usize {
        self.channels
            .values()
            .filter(|entry| &entry.owner != excluded)
            .filter(|entry| entry.outbox.send(event.clone()).is_ok())
            .count()
    }
}
