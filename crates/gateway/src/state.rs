//! Shared relay state

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use courier_auth::IdentityVerifier;
use courier_chats::{
    ChannelId, ChatId, MessageStore, PresenceStatus, ServerEvent, UserId,
};
use courier_config::RelayConfig;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::acks::AckLedger;
use crate::presence::{ClearedTyping, PresenceTracker};
use crate::registry::{ConnectionRegistry, Outbox};

/// Timing and sizing knobs of the relay.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub presence_grace: Duration,
    pub typing_timeout: Duration,
    pub handshake_timeout: Duration,
    pub ack_ledger_capacity: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for RelaySettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            presence_grace: Duration::from_millis(config.presence_grace_ms),
            typing_timeout: Duration::from_millis(config.typing_timeout_ms),
            handshake_timeout: Duration::from_millis(config.handshake_timeout_ms),
            ack_ledger_capacity: config.ack_ledger_capacity,
        }
    }
}

/// Everything guarded by the hub lock.
pub(crate) struct HubState {
    pub(crate) registry: ConnectionRegistry,
    pub(crate) presence: PresenceTracker,
    pub(crate) acks: AckLedger,
}

impl HubState {
    /// Send `typing(false)` for `from` to every other participant.
    pub(crate) fn withdraw_typing(&self, from: &UserId, chat_id: &ChatId, participants: &[UserId]) {
        self.notify_typing(from, chat_id, participants, false);
    }

    pub(crate) fn notify_typing(
        &self,
        from: &UserId,
        chat_id: &ChatId,
        participants: &[UserId],
        is_typing: bool,
    ) {
        let event = ServerEvent::Typing {
            chat_id: chat_id.clone(),
            from: from.clone(),
            is_typing,
        };
        for participant in participants.iter().filter(|member| *member != from) {
            self.registry.send_to_identity(participant, &event);
        }
    }

    pub(crate) fn announce_status(&self, user: &UserId, status: PresenceStatus) {
        let event = ServerEvent::UserStatus {
            user_id: user.clone(),
            status,
        };
        let reached = self.registry.broadcast_except(user, &event);
        debug!(user_id = %user, ?status, reached, "broadcast presence change");
    }

    /// Debounced online identities, excluding `viewer`.
    pub(crate) fn snapshot_for(&self, viewer: &UserId) -> ServerEvent {
        let online = self
            .presence
            .online_users()
            .into_iter()
            .filter(|user| user != viewer)
            .collect();
        ServerEvent::PresenceSnapshot { online }
    }
}

pub(crate) struct HubInner {
    pub(crate) state: Mutex<HubState>,
    pub(crate) store: Arc<dyn MessageStore>,
    pub(crate) verifier: Arc<dyn IdentityVerifier>,
    pub(crate) settings: RelaySettings,
    sequencer: Mutex<HashMap<ChatId, Arc<Mutex<()>>>>,
}

/// The relay: registry, presence tracker and acknowledgement ledger behind
/// one lock, plus the collaborators it persists and authenticates through.
///
/// Cheap to clone; every clone shares the same state.
#[derive(Clone)]
pub struct RelayHub {
    pub(crate) inner: Arc<HubInner>,
}

/// Outcome of handling one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Server-side half of one channel.
pub struct ChannelSession {
    id: ChannelId,
    identity: Option<UserId>,
    outbox: Outbox,
}

impl ChannelSession {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn identity(&self) -> Option<&UserId> {
        self.identity.as_ref()
    }

    pub(crate) fn bind(&mut self, user: UserId) {
        self.identity = Some(user);
    }

    pub(crate) fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    /// Queue a frame for this channel only.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.outbox.send(event).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubCounts {
    pub identities: usize,
    pub channels: usize,
    /// Chats with a send in flight.
    pub sequenced_chats: usize,
}

impl RelayHub {
    pub fn new(
        store: Arc<dyn MessageStore>,
        verifier: Arc<dyn IdentityVerifier>,
        settings: RelaySettings,
    ) -> Self {
        let state = HubState {
            registry: ConnectionRegistry::new(),
            presence: PresenceTracker::new(),
            acks: AckLedger::new(settings.ack_ledger_capacity),
        };

        Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(state),
                store,
                verifier,
                settings,
                sequencer: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.inner.settings
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.inner.store
    }

    /// Accept a new physical connection. Frames queued for it arrive on
    /// the returned receiver.
    pub fn open_channel(&self) -> (ChannelSession, mpsc::UnboundedReceiver<ServerEvent>) {
        let (outbox, receiver) = mpsc::unbounded_channel();
        let session = ChannelSession {
            id: ChannelId::new(),
            identity: None,
            outbox,
        };
        debug!(channel_id = %session.id, "channel opened");
        (session, receiver)
    }

    /// Remove a closed channel. When it was the identity's last one the
    /// grace timer is armed; nothing is broadcast yet.
    pub async fn disconnect(&self, session: &ChannelSession) {
        let mut state = self.inner.state.lock().await;
        let Some(removed) = state.registry.unregister(session.id) else {
            debug!(channel_id = %session.id, "unauthenticated channel closed");
            return;
        };

        debug!(
            channel_id = %session.id,
            user_id = %removed.user,
            was_last = removed.was_last,
            "channel closed"
        );

        if !removed.was_last {
            return;
        }

        if let Some(generation) = state.presence.last_channel_closed(&removed.user) {
            let handle = self.spawn_grace_timer(removed.user.clone(), generation);
            state
                .presence
                .attach_grace_timer(&removed.user, generation, handle);
        }
    }

    /// Debounced presence of `user`.
    pub async fn is_online(&self, user: &UserId) -> bool {
        self.inner.state.lock().await.presence.is_online(user)
    }

    pub async fn is_typing(&self, user: &UserId, chat_id: &ChatId) -> bool {
        self.inner.state.lock().await.presence.is_typing(user, chat_id)
    }

    pub async fn channels_for(&self, user: &UserId) -> Vec<ChannelId> {
        self.inner.state.lock().await.registry.channels_for(user)
    }

    pub async fn counts(&self) -> HubCounts {
        let sequenced_chats = self.inner.sequencer.lock().await.len();
        let state = self.inner.state.lock().await;
        HubCounts {
            identities: state.registry.identity_count(),
            channels: state.registry.channel_count(),
            sequenced_chats,
        }
    }

    /// Per-chat gate held across persist and fan-out.
    pub(crate) async fn sequencer_for(&self, chat_id: &ChatId) -> Arc<Mutex<()>> {
        let mut gates = self.inner.sequencer.lock().await;
        gates.entry(chat_id.clone()).or_default().clone()
    }

    /// Hand back a gate taken with `sequencer_for`. The entry is dropped once
    /// no other sender holds or waits on it; clones are only taken under the
    /// map lock, so the count cannot grow while it is checked.
    pub(crate) async fn release_sequencer(&self, chat_id: &ChatId, gate: Arc<Mutex<()>>) {
        let mut gates = self.inner.sequencer.lock().await;
        let idle = gates
            .get(chat_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &gate) && Arc::strong_count(&gate) == 2);
        if idle {
            gates.remove(chat_id);
        }
    }

    fn downgrade(&self) -> Weak<HubInner> {
        Arc::downgrade(&self.inner)
    }

    fn spawn_grace_timer(&self, user: UserId, generation: u64) -> tokio::task::AbortHandle {
        let hub = self.downgrade();
        let grace = self.inner.settings.presence_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(inner) = hub.upgrade() {
                RelayHub { inner }.expire_presence(&user, generation).await;
            }
        })
        .abort_handle()
    }

    pub(crate) fn spawn_typing_timer(
        &self,
        user: UserId,
        chat_id: ChatId,
        generation: u64,
    ) -> tokio::task::AbortHandle {
        let hub = self.downgrade();
        let timeout = self.inner.settings.typing_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = hub.upgrade() {
                RelayHub { inner }
                    .expire_typing(&user, &chat_id, generation)
                    .await;
            }
        })
        .abort_handle()
    }

    async fn expire_presence(&self, user: &UserId, generation: u64) {
        let mut state = self.inner.state.lock().await;
        let Some(cleared) = state.presence.grace_expired(user, generation) else {
            return;
        };

        for ClearedTyping {
            chat_id,
            participants,
        } in &cleared
        {
            state.withdraw_typing(user, chat_id, participants);
        }
        state.announce_status(user, PresenceStatus::Offline);
        info!(user_id = %user, "identity went offline");
    }

    async fn expire_typing(&self, user: &UserId, chat_id: &ChatId, generation: u64) {
        let mut state = self.inner.state.lock().await;
        if let Some(participants) = state.presence.typing_expired(user, chat_id, generation) {
            state.withdraw_typing(user, chat_id, &participants);
            debug!(user_id = %user, chat_id = %chat_id, "typing indicator expired");
        }
    }
}
