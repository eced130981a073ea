//! Inbound signal handlers.
//!
//! Every handler runs its hub mutations in one short critical section and
//! queues the resulting frames before releasing the lock. Store calls are
//! made outside the hub lock.

use courier_chats::utils::Validator;
use courier_chats::{
    ChatId, ClientEvent, MessageId, MessageRecord, MessageStatus, PresenceStatus, ServerEvent,
    UserId,
};
use tracing::{debug, info, warn};

use crate::acks::AckOutcome;
use crate::error::{RelayError, RelayResult};
use crate::presence::OnlineTransition;
use crate::relay::fan_out;
use crate::state::{ChannelSession, Flow, RelayHub};

impl RelayHub {
    /// Parse and handle one text frame.
    pub async fn handle_text(&self, session: &mut ChannelSession, text: &str) -> Flow {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.dispatch(session, event).await,
            Err(err) => self.report(session, RelayError::from(err)),
        }
    }

    /// Handle one inbound signal. Failures are reported to the channel
    /// and never propagate beyond it.
    pub async fn dispatch(&self, session: &mut ChannelSession, event: ClientEvent) -> Flow {
        let outcome = match event {
            ClientEvent::Authenticate { token } => self.authenticate(session, &token).await,
            ClientEvent::SendMessage {
                chat_id,
                content,
                client_message_id,
            } => {
                let result = self
                    .send_message(session, &chat_id, &content, &client_message_id)
                    .await;
                if let Err(err) = &result {
                    if err.fails_message() {
                        session.send(ServerEvent::MessageFailed {
                            client_message_id,
                            reason: err.to_string(),
                        });
                    }
                }
                result
            }
            ClientEvent::Typing { chat_id, is_typing } => {
                self.typing(session, &chat_id, is_typing).await
            }
            ClientEvent::MarkAsRead { message_id } => self.mark_as_read(session, &message_id).await,
            ClientEvent::Sync => self.sync(session).await,
            ClientEvent::Ping => {
                session.send(ServerEvent::Pong);
                Ok(())
            }
        };

        match outcome {
            Ok(()) => Flow::Continue,
            Err(err) => self.report(session, err),
        }
    }

    /// Log a handler failure and tell the channel when it should know.
    pub fn report(&self, session: &ChannelSession, err: RelayError) -> Flow {
        let channel_id = session.id();
        match &err {
            RelayError::UnknownRecipient(_) | RelayError::InvalidMessage(_) => {
                debug!(%channel_id, error = %err, "dropped signal");
            }
            RelayError::PersistenceFailure(_) => {
                warn!(%channel_id, error = %err, "persistence failed");
            }
            RelayError::AuthenticationFailure(_) | RelayError::HandshakeTimeout => {
                info!(%channel_id, error = %err, "rejecting channel");
            }
            _ => debug!(%channel_id, error = %err, "signal rejected"),
        }

        if let Some(frame) = err.error_frame() {
            session.send(frame);
        }

        if err.closes_channel() {
            Flow::Close
        } else {
            Flow::Continue
        }
    }

    /// Resolve a credential through the identity collaborator.
    pub async fn verify(&self, token: &str) -> RelayResult<UserId> {
        Ok(self.inner.verifier.verify(token).await?)
    }

    async fn authenticate(&self, session: &mut ChannelSession, token: &str) -> RelayResult<()> {
        let user = self.verify(token).await?;
        self.bind_identity(session, user).await
    }

    /// Register the channel under an already verified identity.
    pub async fn bind_identity(&self, session: &mut ChannelSession, user: UserId) -> RelayResult<()> {
        let mut state = self.inner.state.lock().await;
        let registration = state.registry.register(&user, session.id(), session.outbox())?;
        let transition = state.presence.channel_registered(&user);

        if transition == OnlineTransition::CameOnline {
            state.announce_status(&user, PresenceStatus::Online);
        }

        session.send(ServerEvent::Authenticated {
            user_id: user.clone(),
        });
        session.send(state.snapshot_for(&user));
        drop(state);

        info!(
            channel_id = %session.id(),
            user_id = %user,
            ?registration,
            ?transition,
            "channel authenticated"
        );
        session.bind(user);
        Ok(())
    }

    async fn send_message(
        &self,
        session: &ChannelSession,
        chat_id: &ChatId,
        content: &str,
        client_message_id: &str,
    ) -> RelayResult<()> {
        let sender = session
            .identity()
            .cloned()
            .ok_or(RelayError::NotAuthenticated)?;
        Validator::message_content(content)?;

        let participants = self.inner.store.participants_of(chat_id).await?;
        if !participants.contains(&sender) {
            return Err(RelayError::UnknownRecipient(format!(
                "{sender} is not a participant of chat {chat_id}"
            )));
        }

        let gate = self.sequencer_for(chat_id).await;
        let relayed = {
            let _turn = gate.lock().await;
            self.persist_and_relay(session, &sender, chat_id, content, client_message_id, &participants)
                .await
        };
        self.release_sequencer(chat_id, gate).await;

        if let Some(message_id) = relayed? {
            self.write_back(&message_id, MessageStatus::Delivered).await;
        }
        Ok(())
    }

    /// Persist one message and fan it out while the chat's gate is held.
    /// Returns the message id when a recipient channel was reached.
    async fn persist_and_relay(
        &self,
        session: &ChannelSession,
        sender: &UserId,
        chat_id: &ChatId,
        content: &str,
        client_message_id: &str,
        participants: &[UserId],
    ) -> RelayResult<Option<MessageId>> {
        let repeated = {
            let state = self.inner.state.lock().await;
            state
                .acks
                .sent_by(sender, client_message_id)
                .cloned()
                .map(|message_id| {
                    let status = state.acks.status_of(&message_id);
                    (message_id, status)
                })
        };
        if let Some((message_id, tracked)) = repeated {
            let mut message = self.resolve_message(&message_id).await?;
            if let Some(status) = tracked.filter(|status| message.status.can_advance_to(*status)) {
                message.status = status;
            }
            debug!(message_id = %message_id, %client_message_id, "repeated send answered from store");
            session.send(ServerEvent::MessageSent {
                client_message_id: client_message_id.to_string(),
                message,
            });
            return Ok(None);
        }

        let mut record = self
            .inner
            .store
            .create_message(sender, chat_id, content)
            .await?;

        record.status = MessageStatus::Sent;
        if let Err(err) = self
            .inner
            .store
            .update_status(&record.id, MessageStatus::Sent)
            .await
        {
            warn!(message_id = %record.id, error = %err, "failed to record sent status");
        }

        let mut state = self.inner.state.lock().await;
        state
            .acks
            .track_sent(&record, participants, client_message_id);

        let outcome = fan_out(
            &state.registry,
            &record,
            participants,
            Some((session.id(), client_message_id)),
        );

        let delivered = outcome.reached_recipient()
            && matches!(
                state.acks.advance(&record.id, MessageStatus::Delivered),
                AckOutcome::Advanced { .. }
            );
        if delivered {
            state.registry.send_to_identity(
                sender,
                &ServerEvent::MessageDelivered {
                    message_id: record.id.clone(),
                },
            );
        }

        if let Some(typing_participants) = state.presence.typing_stopped(sender, chat_id) {
            state.withdraw_typing(sender, chat_id, &typing_participants);
        }

        debug!(
            message_id = %record.id,
            chat_id = %chat_id,
            channels = outcome.channels_reached,
            recipient_channels = outcome.recipient_channels_reached,
            "message relayed"
        );
        Ok(delivered.then_some(record.id))
    }

    async fn typing(
        &self,
        session: &ChannelSession,
        chat_id: &ChatId,
        is_typing: bool,
    ) -> RelayResult<()> {
        let user = session
            .identity()
            .cloned()
            .ok_or(RelayError::NotAuthenticated)?;

        if !is_typing {
            let mut state = self.inner.state.lock().await;
            if let Some(participants) = state.presence.typing_stopped(&user, chat_id) {
                state.withdraw_typing(&user, chat_id, &participants);
            }
            return Ok(());
        }

        let participants = self.inner.store.participants_of(chat_id).await?;
        if !participants.contains(&user) {
            return Err(RelayError::UnknownRecipient(format!(
                "{user} is not a participant of chat {chat_id}"
            )));
        }

        let mut state = self.inner.state.lock().await;
        let (started, generation) =
            state
                .presence
                .typing_started(&user, chat_id, participants.clone());
        if started {
            state.notify_typing(&user, chat_id, &participants, true);
        }
        let handle = self.spawn_typing_timer(user.clone(), chat_id.clone(), generation);
        state
            .presence
            .attach_typing_timer(&user, chat_id, generation, handle);
        Ok(())
    }

    async fn mark_as_read(&self, session: &ChannelSession, message_id: &MessageId) -> RelayResult<()> {
        let reader = session
            .identity()
            .cloned()
            .ok_or(RelayError::NotAuthenticated)?;

        let tracked = {
            let state = self.inner.state.lock().await;
            state.acks.entry(message_id).is_some()
        };

        if !tracked {
            let record = self.resolve_message(message_id).await?;
            let participants = self.inner.store.participants_of(&record.chat_id).await?;
            let mut state = self.inner.state.lock().await;
            state.acks.track(&record, &participants);
        }

        let mut state = self.inner.state.lock().await;
        let (sender, chat_id) = match state.acks.entry(message_id) {
            Some(entry) if entry.accepts_reader(&reader) => {
                (entry.sender.clone(), entry.chat_id.clone())
            }
            Some(_) => {
                return Err(RelayError::UnknownRecipient(format!(
                    "{reader} cannot read message {message_id}"
                )))
            }
            None => {
                return Err(RelayError::UnknownRecipient(format!("message {message_id}")))
            }
        };

        match state.acks.advance(message_id, MessageStatus::Read) {
            AckOutcome::Advanced { .. } => {
                state.registry.send_to_identity(
                    &sender,
                    &ServerEvent::MessageRead {
                        message_id: message_id.clone(),
                        reader: reader.clone(),
                    },
                );
                drop(state);
                debug!(message_id = %message_id, chat_id = %chat_id, reader = %reader, "message read");
                self.write_back(message_id, MessageStatus::Read).await;
            }
            AckOutcome::Unchanged | AckOutcome::Unknown => {
                debug!(message_id = %message_id, chat_id = %chat_id, reader = %reader, "duplicate read ignored");
            }
        }
        Ok(())
    }

    async fn sync(&self, session: &ChannelSession) -> RelayResult<()> {
        let user = session.identity().ok_or(RelayError::NotAuthenticated)?;
        let state = self.inner.state.lock().await;
        session.send(state.snapshot_for(user));
        Ok(())
    }

    async fn resolve_message(&self, message_id: &MessageId) -> RelayResult<MessageRecord> {
        self.inner
            .store
            .find_message(message_id)
            .await?
            .ok_or_else(|| RelayError::UnknownRecipient(format!("message {message_id}")))
    }

    async fn write_back(&self, message_id: &MessageId, status: MessageStatus) {
        if let Err(err) = self.inner.store.update_status(message_id, status).await {
            warn!(message_id = %message_id, %status, error = %err, "failed to write back status");
        }
    }
}
