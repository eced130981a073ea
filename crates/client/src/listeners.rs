//! Subscription surface of the client runtime.
//!
//! Each subscriber gets its own unbounded queue and pulls notifications at
//! its own pace. Subscribers whose receiver was dropped are pruned on the
//! next emit.

use std::collections::HashMap;
use std::fmt;

use courier_chats::{ChatId, ErrorCode, MessageId, MessageRecord, MessageStatus, PresenceStatus, UserId};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Typing,
    Presence,
    Status,
    Connection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connecting { attempt: u32 },
    Authenticated { user_id: UserId },
    Disconnected,
    /// Credentials were refused; the runtime will not reconnect.
    Rejected { reason: String },
    /// Reconnect attempts were exhausted.
    GaveUp { attempts: u32 },
    ServerError { code: ErrorCode, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientNotification {
    Message(MessageRecord),
    /// A locally authored message was acknowledged and now carries its server id.
    Reconciled {
        client_message_id: String,
        message: MessageRecord,
    },
    Status {
        message_id: MessageId,
        status: MessageStatus,
    },
    Typing {
        chat_id: ChatId,
        user_id: UserId,
        is_typing: bool,
    },
    Presence {
        user_id: UserId,
        status: PresenceStatus,
    },
    PresenceSnapshot {
        online: Vec<UserId>,
    },
    Connection(ConnectionEvent),
}

impl ClientNotification {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientNotification::Message(_) => EventKind::Message,
            ClientNotification::Reconciled { .. } | ClientNotification::Status { .. } => {
                EventKind::Status
            }
            ClientNotification::Typing { .. } => EventKind::Typing,
            ClientNotification::Presence { .. } | ClientNotification::PresenceSnapshot { .. } => {
                EventKind::Presence
            }
            ClientNotification::Connection(_) => EventKind::Connection,
        }
    }
}

/// Which notifications a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    kinds: Option<Vec<EventKind>>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self { kinds: None }
    }

    pub fn only(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
        }
    }

    pub fn matches(&self, kind: EventKind) -> bool {
        self.kinds
            .as_ref()
            .map_or(true, |kinds| kinds.contains(&kind))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<ClientNotification>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next notification. `None` once unsubscribed or the
    /// runtime has stopped.
    pub async fn recv(&mut self) -> Option<ClientNotification> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ClientNotification> {
        self.receiver.try_recv().ok()
    }
}

struct Listener {
    filter: EventFilter,
    sender: mpsc::UnboundedSender<ClientNotification>,
}

#[derive(Default)]
pub struct ListenerSet {
    next_id: u64,
    listeners: HashMap<SubscriptionId, Listener>,
    closed: bool,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, filter: EventFilter) -> Subscription {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        let (sender, receiver) = mpsc::unbounded_channel();
        if !self.closed {
            self.listeners.insert(id, Listener { filter, sender });
        }
        Subscription { id, receiver }
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn emit(&mut self, notification: ClientNotification) {
        let kind = notification.kind();
        self.listeners.retain(|_, listener| {
            if !listener.filter.matches(kind) {
                return !listener.sender.is_closed();
            }
            listener.sender.send(notification.clone()).is_ok()
        });
    }

    /// Drop every listener so `recv` resolves to `None` once queued
    /// notifications are drained. Later subscriptions start closed.
    pub fn close(&mut self) {
        self.closed = true;
        self.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
