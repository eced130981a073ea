//! Fan-out of persisted messages to live channels.

use std::collections::HashSet;

use courier_chats::{ChannelId, MessageRecord, ServerEvent, UserId};

use crate::registry::ConnectionRegistry;

/// What a fan-out reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub channels_reached: usize,
    /// Channels reached that belong to participants other than the sender.
    pub recipient_channels_reached: usize,
}

impl FanOut {
    pub fn reached_recipient(&self) -> bool {
        self.recipient_channels_reached > 0
    }
}

/// Push `message` to every live channel of every participant exactly once.
///
/// The originating channel gets `message-sent` carrying the message instead
/// of `new-message`. Participants without live channels get nothing.
pub fn fan_out(
    registry: &ConnectionRegistry,
    message: &MessageRecord,
    participants: &[UserId],
    origin: Option<(ChannelId, &str)>,
) -> FanOut {
    let mut seen = HashSet::new();
    let mut outcome = FanOut::default();

    for participant in participants {
        if !seen.insert(participant) {
            continue;
        }

        for channel in registry.channels_for(participant) {
            let event = match origin {
                Some((origin_channel, client_message_id)) if origin_channel == channel => {
                    ServerEvent::MessageSent {
                        client_message_id: client_message_id.to_string(),
                        message: message.clone(),
                    }
                }
                _ => ServerEvent::NewMessage {
                    message: message.clone(),
                },
            };

            if registry.send_to_channel(channel, event) {
                outcome.channels_reached += 1;
                if participant != &message.sender {
                    outcome.recipient_channels_reached += 1;
                }
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_chats::{ChatId, MessageId, MessageStatus};
    use tokio::sync::mpsc;

    fn message() -> MessageRecord {
        MessageRecord {
            id: MessageId::from("m1"),
            chat_id: ChatId::from("room"),
            sender: UserId::from("alice"),
            content: "hi".into(),
            created_at: Utc::now(),
            status: MessageStatus::Sent,
        }
    }

    #[test]
    fn every_channel_receives_the_message_once() {
        let mut registry = ConnectionRegistry::new();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        let (a1, a2, b1) = (ChannelId::new(), ChannelId::new(), ChannelId::new());
        let (a1_tx, mut a1_rx) = mpsc::unbounded_channel();
        let (a2_tx, mut a2_rx) = mpsc::unbounded_channel();
        let (b1_tx, mut b1_rx) = mpsc::unbounded_channel();
        registry.register(&alice, a1, a1_tx).unwrap();
        registry.register(&alice, a2, a2_tx).unwrap();
        registry.register(&bob, b1, b1_tx).unwrap();

        let participants = vec![alice.clone(), bob.clone(), bob.clone()];
        let outcome = fan_out(&registry, &message(), &participants, Some((a1, "local-1")));

        assert_eq!(outcome.channels_reached, 3);
        assert_eq!(outcome.recipient_channels_reached, 1);
        assert!(matches!(a1_rx.try_recv(), Ok(ServerEvent::MessageSent { .. })));
        assert!(a1_rx.try_recv().is_err());
        assert!(matches!(a2_rx.try_recv(), Ok(ServerEvent::NewMessage { .. })));
        assert!(matches!(b1_rx.try_recv(), Ok(ServerEvent::NewMessage { .. })));
        assert!(b1_rx.try_recv().is_err());
    }

    #[test]
    fn offline_recipient_is_not_an_error() {
        let mut registry = ConnectionRegistry::new();
        let origin = ChannelId::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(&UserId::from("alice"), origin, tx).unwrap();

        let participants = vec![UserId::from("alice"), UserId::from("bob")];
        let outcome = fan_out(&registry, &message(), &participants, Some((origin, "local-1")));

        assert_eq!(outcome.channels_reached, 1);
        assert!(!outcome.reached_recipient());
    }
}
