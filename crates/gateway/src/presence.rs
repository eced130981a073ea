//! Debounced presence and typing state.
//!
//! Every key owns an explicit `{state, timer}` pair. Timers are tokio tasks
//! tagged with a generation number: re-arming aborts the previous task and
//! takes a fresh generation, and a timer that fires with a stale generation
//! changes nothing.

use std::collections::HashMap;

use courier_chats::{ChatId, UserId};
use tokio::task::AbortHandle;

enum OnlineState {
    Online,
    PendingOffline {
        generation: u64,
        timer: Option<AbortHandle>,
    },
}

struct TypingEntry {
    participants: Vec<UserId>,
    generation: u64,
    timer: Option<AbortHandle>,
}

/// Visible effect of a channel being registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineTransition {
    /// OFFLINE to ONLINE; other identities must be told.
    CameOnline,
    /// PENDING_OFFLINE back to ONLINE within the grace window; invisible.
    Resumed,
    Unchanged,
}

/// A typing indicator that has to be withdrawn from a chat's participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearedTyping {
    pub chat_id: ChatId,
    pub participants: Vec<UserId>,
}

#[derive(Default)]
pub struct PresenceTracker {
    online: HashMap<UserId, OnlineState>,
    typing: HashMap<(UserId, ChatId), TypingEntry>,
    next_generation: u64,
}

fn abort(timer: Option<AbortHandle>) {
    if let Some(timer) = timer {
        timer.abort();
    }
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    pub fn channel_registered(&mut self, user: &UserId) -> OnlineTransition {
        match self.online.insert(user.clone(), OnlineState::Online) {
            None => OnlineTransition::CameOnline,
            Some(OnlineState::Online) => OnlineTransition::Unchanged,
            Some(OnlineState::PendingOffline { timer, .. }) => {
                abort(timer);
                OnlineTransition::Resumed
            }
        }
    }

    /// ONLINE to PENDING_OFFLINE. Returns the generation the grace timer
    /// must carry, or `None` if the identity was not online.
    pub fn last_channel_closed(&mut self, user: &UserId) -> Option<u64> {
        if !matches!(self.online.get(user), Some(OnlineState::Online)) {
            return None;
        }
        let generation = self.next_generation();
        self.online.insert(
            user.clone(),
            OnlineState::PendingOffline {
                generation,
                timer: None,
            },
        );
        Some(generation)
    }

    pub fn attach_grace_timer(&mut self, user: &UserId, generation: u64, handle: AbortHandle) {
        match self.online.get_mut(user) {
            Some(OnlineState::PendingOffline {
                generation: current,
                timer,
            }) if *current == generation => {
                abort(timer.replace(handle));
            }
            _ => handle.abort(),
        }
    }

    /// Grace window elapsed. Returns the typing indicators to withdraw when
    /// the identity really goes OFFLINE, `None` for a stale timer.
    pub fn grace_expired(&mut self, user: &UserId, generation: u64) -> Option<Vec<ClearedTyping>> {
        match self.online.get(user) {
            Some(OnlineState::PendingOffline {
                generation: current,
                ..
            }) if *current == generation => {}
            _ => return None,
        }
        self.online.remove(user);

        let keys: Vec<_> = self
            .typing
            .keys()
            .filter(|(typist, _)| typist == user)
            .cloned()
            .collect();

        let mut cleared = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = self.typing.remove(&key) {
                abort(entry.timer);
                cleared.push(ClearedTyping {
                    chat_id: key.1,
                    participants: entry.participants,
                });
            }
        }
        cleared.sort_by(|a, b| a.chat_id.cmp(&b.chat_id));
        Some(cleared)
    }

    /// Debounced liveness: true while ONLINE or PENDING_OFFLINE.
    pub fn is_online(&self, user: &UserId) -> bool {
        self.online.contains_key(user)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<_> = self.online.keys().cloned().collect();
        users.sort();
        users
    }

    /// Arm (or re-arm) the typing timer. Returns whether this is a
    /// NOT_TYPING to TYPING transition, and the generation for the timer.
    pub fn typing_started(
        &mut self,
        user: &UserId,
        chat_id: &ChatId,
        participants: Vec<UserId>,
    ) -> (bool, u64) {
        let generation = self.next_generation();
        let key = (user.clone(), chat_id.clone());
        match self.typing.get_mut(&key) {
            Some(entry) => {
                abort(entry.timer.take());
                entry.generation = generation;
                entry.participants = participants;
                (false, generation)
            }
            None => {
                self.typing.insert(
                    key,
                    TypingEntry {
                        participants,
                        generation,
                        timer: None,
                    },
                );
                (true, generation)
            }
        }
    }

    pub fn attach_typing_timer(
        &mut self,
        user: &UserId,
        chat_id: &ChatId,
        generation: u64,
        handle: AbortHandle,
    ) {
        match self.typing.get_mut(&(user.clone(), chat_id.clone())) {
            Some(entry) if entry.generation == generation => abort(entry.timer.replace(handle)),
            _ => handle.abort(),
        }
    }

    /// Explicit stop. Returns the participants to notify if the identity was typing.
    pub fn typing_stopped(&mut self, user: &UserId, chat_id: &ChatId) -> Option<Vec<UserId>> {
        let entry = self.typing.remove(&(user.clone(), chat_id.clone()))?;
        abort(entry.timer);
        Some(entry.participants)
    }

    pub fn typing_expired(
        &mut self,
        user: &UserId,
        chat_id: &ChatId,
        generation: u64,
    ) -> Option<Vec<UserId>> {
        let key = (user.clone(), chat_id.clone());
        if self.typing.get(&key)?.generation != generation {
            return None;
        }
        self.typing.remove(&key).map(|entry| entry.participants)
    }

    pub fn is_typing(&self, user: &UserId, chat_id: &ChatId) -> bool {
        self.typing.contains_key(&(user.clone(), chat_id.clone()))
    }
}
