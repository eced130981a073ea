use std::sync::Arc;
use std::time::Duration;

use courier_auth::StaticVerifier;
use courier_chats::{
    ChatId, ChatRoom, ClientEvent, ErrorCode, MemoryStore, MessageId, MessageStatus, MessageStore,
    PresenceStatus, ServerEvent, UserId,
};
use courier_gateway::{ChannelSession, Flow, RelayHub, RelaySettings};
use tokio::sync::mpsc::UnboundedReceiver;

struct Harness {
    hub: RelayHub,
    store: Arc<MemoryStore>,
}

struct Client {
    session: ChannelSession,
    frames: UnboundedReceiver<ServerEvent>,
}

impl Client {
    fn drain(&mut self) -> Vec<ServerEvent> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

fn settings() -> RelaySettings {
    RelaySettings {
        presence_grace: Duration::from_secs(3),
        typing_timeout: Duration::from_secs(3),
        handshake_timeout: Duration::from_secs(10),
        ack_ledger_capacity: 128,
    }
}

fn room() -> ChatId {
    ChatId::from("room")
}

async fn harness() -> Harness {
    harness_with(settings()).await
}

async fn harness_with(settings: RelaySettings) -> Harness {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_chat(ChatRoom {
            id: room(),
            participants: vec![UserId::from("alice"), UserId::from("bob")],
        })
        .await;

    let verifier = StaticVerifier::with_tokens([
        ("token-alice", "alice"),
        ("token-bob", "bob"),
        ("token-carol", "carol"),
    ]);

    let hub = RelayHub::new(store.clone(), Arc::new(verifier), settings);
    Harness { hub, store }
}

impl Harness {
    async fn connect(&self, token: &str) -> Client {
        let (mut session, frames) = self.hub.open_channel();
        let flow = self
            .hub
            .dispatch(
                &mut session,
                ClientEvent::Authenticate {
                    token: token.to_string(),
                },
            )
            .await;
        assert_eq!(flow, Flow::Continue);
        Client { session, frames }
    }

    async fn send(&self, client: &mut Client, content: &str, local_id: &str) -> Flow {
        self.hub
            .dispatch(
                &mut client.session,
                ClientEvent::SendMessage {
                    chat_id: room(),
                    content: content.to_string(),
                    client_message_id: local_id.to_string(),
                },
            )
            .await
    }
}

fn status_changes(frames: &[ServerEvent]) -> Vec<(UserId, PresenceStatus)> {
    frames
        .iter()
        .filter_map(|frame| match frame {
            ServerEvent::UserStatus { user_id, status } => Some((user_id.clone(), *status)),
            _ => None,
        })
        .collect()
}

fn sent_message_id(frames: &[ServerEvent]) -> MessageId {
    frames
        .iter()
        .find_map(|frame| match frame {
            ServerEvent::MessageSent { message, .. } => Some(message.id.clone()),
            _ => None,
        })
        .expect("message-sent frame")
}

#[tokio::test(start_paused = true)]
async fn hi_is_delivered_and_read_receipt_reaches_sender() {
    let h = harness().await;
    let mut a1 = h.connect("token-alice").await;
    let mut b1 = h.connect("token-bob").await;
    a1.drain();
    b1.drain();

    assert_eq!(h.send(&mut a1, "hi", "local-1").await, Flow::Continue);

    let b_frames = b1.drain();
    let message = b_frames
        .iter()
        .find_map(|frame| match frame {
            ServerEvent::NewMessage { message } => Some(message.clone()),
            _ => None,
        })
        .expect("bob receives new-message");
    assert_eq!(message.content, "hi");
    assert_eq!(message.sender, UserId::from("alice"));

    let a_frames = a1.drain();
    let sent_id = sent_message_id(&a_frames);
    assert_eq!(sent_id, message.id);
    assert!(a_frames.contains(&ServerEvent::MessageDelivered {
        message_id: message.id.clone()
    }));
    assert!(!a_frames
        .iter()
        .any(|frame| matches!(frame, ServerEvent::NewMessage { .. })));

    let stored = h.store.find_message(&message.id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Delivered);

    let flow = h
        .hub
        .dispatch(
            &mut b1.session,
            ClientEvent::MarkAsRead {
                message_id: message.id.clone(),
            },
        )
        .await;
    assert_eq!(flow, Flow::Continue);

    assert_eq!(
        a1.drain(),
        vec![ServerEvent::MessageRead {
            message_id: message.id.clone(),
            reader: UserId::from("bob"),
        }]
    );
    assert!(b1.drain().is_empty(), "read receipts are not broadcast to the room");

    let stored = h.store.find_message(&message.id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Read);
}

#[tokio::test(start_paused = true)]
async fn repeated_client_message_id_is_not_relayed_twice() {
    let h = harness().await;
    let mut a1 = h.connect("token-alice").await;
    let mut b1 = h.connect("token-bob").await;
    a1.drain();
    b1.drain();

    h.send(&mut a1, "hi", "local-1").await;
    let first = sent_message_id(&a1.drain());
    assert_eq!(b1.drain().len(), 1);

    // Same signal again from a fresh channel, as after a reconnect.
    let mut a2 = h.connect("token-alice").await;
    a2.drain();
    assert_eq!(h.send(&mut a2, "hi", "local-1").await, Flow::Continue);

    let frames = a2.drain();
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        ServerEvent::MessageSent {
            client_message_id,
            message,
        } => {
            assert_eq!(client_message_id, "local-1");
            assert_eq!(message.id, first);
            assert_eq!(message.status, MessageStatus::Delivered);
        }
        other => panic!("expected message-sent, got {other:?}"),
    }
    assert!(a1.drain().is_empty());
    assert!(b1.drain().is_empty());
    assert_eq!(h.store.messages_in(&room()).await.len(), 1);

    h.send(&mut a2, "hi", "local-2").await;
    assert_eq!(h.store.messages_in(&room()).await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn offline_recipient_leaves_message_sent() {
    let h = harness().await;
    let mut a1 = h.connect("token-alice").await;
    a1.drain();

    h.send(&mut a1, "anyone there?", "local-1").await;
    let frames = a1.drain();
    let id = sent_message_id(&frames);
    assert!(!frames
        .iter()
        .any(|frame| matches!(frame, ServerEvent::MessageDelivered { .. })));

    tokio::time::sleep(Duration::from_secs(30)).await;
    let stored = h.store.find_message(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Sent);
}

#[tokio::test(start_paused = true)]
async fn duplicate_read_signal_is_ignored() {
    let h = harness().await;
    let mut a1 = h.connect("token-alice").await;
    let mut b1 = h.connect("token-bob").await;
    h.send(&mut a1, "hi", "local-1").await;
    let id = sent_message_id(&a1.drain());
    b1.drain();

    for _ in 0..2 {
        h.hub
            .dispatch(
                &mut b1.session,
                ClientEvent::MarkAsRead {
                    message_id: id.clone(),
                },
            )
            .await;
    }

    let receipts = a1
        .drain()
        .into_iter()
        .filter(|frame| matches!(frame, ServerEvent::MessageRead { .. }))
        .count();
    assert_eq!(receipts, 1);
}

#[tokio::test(start_paused = true)]
async fn sender_cannot_mark_own_message_read() {
    let h = harness().await;
    let mut a1 = h.connect("token-alice").await;
    let _b1 = h.connect("token-bob").await;
    h.send(&mut a1, "hi", "local-1").await;
    let id = sent_message_id(&a1.drain());

    h.hub
        .dispatch(
            &mut a1.session,
            ClientEvent::MarkAsRead {
                message_id: id.clone(),
            },
        )
        .await;

    assert!(a1.drain().is_empty());
    let stored = h.store.find_message(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Delivered);
}

#[tokio::test(start_paused = true)]
async fn read_for_message_outside_ledger_is_resolved_from_store() {
    let h = harness().await;
    let record = h
        .store
        .create_message(&UserId::from("alice"), &room(), "from history")
        .await
        .unwrap();
    h.store
        .update_status(&record.id, MessageStatus::Sent)
        .await
        .unwrap();

    let mut a1 = h.connect("token-alice").await;
    let mut b1 = h.connect("token-bob").await;
    a1.drain();

    h.hub
        .dispatch(
            &mut b1.session,
            ClientEvent::MarkAsRead {
                message_id: record.id.clone(),
            },
        )
        .await;

    assert_eq!(
        a1.drain(),
        vec![ServerEvent::MessageRead {
            message_id: record.id.clone(),
            reader: UserId::from("bob"),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn multi_device_identity_stays_online_until_last_channel_and_grace() {
    let h = harness().await;
    let a1 = h.connect("token-alice").await;
    let a2 = h.connect("token-alice").await;
    let mut b1 = h.connect("token-bob").await;
    b1.drain();
    let alice = UserId::from("alice");

    h.hub.disconnect(&a1.session).await;
    assert!(h.hub.is_online(&alice).await);
    assert_eq!(h.hub.channels_for(&alice).await, vec![a2.session.id()]);

    h.hub.disconnect(&a2.session).await;
    assert!(h.hub.is_online(&alice).await, "grace window keeps identity online");

    tokio::time::sleep(Duration::from_millis(2_900)).await;
    assert!(h.hub.is_online(&alice).await);
    assert!(status_changes(&b1.drain()).is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    tokio::task::yield_now().await;
    assert!(!h.hub.is_online(&alice).await);
    assert_eq!(
        status_changes(&b1.drain()),
        vec![(alice, PresenceStatus::Offline)]
    );
}

#[tokio::test(start_paused = true)]
async fn reconnect_within_grace_causes_no_flap() {
    let h = harness().await;
    let a1 = h.connect("token-alice").await;
    let mut b1 = h.connect("token-bob").await;
    b1.drain();

    h.hub.disconnect(&a1.session).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    let _a1_again = h.connect("token-alice").await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    tokio::task::yield_now().await;

    assert!(status_changes(&b1.drain()).is_empty());
    assert!(h.hub.is_online(&UserId::from("alice")).await);
}

#[tokio::test(start_paused = true)]
async fn first_connection_is_announced_to_others() {
    let h = harness().await;
    let mut b1 = h.connect("token-bob").await;
    let frames = b1.drain();
    assert!(frames.contains(&ServerEvent::Authenticated {
        user_id: UserId::from("bob")
    }));
    assert!(frames.contains(&ServerEvent::PresenceSnapshot { online: vec![] }));

    let mut a1 = h.connect("token-alice").await;
    assert_eq!(
        status_changes(&b1.drain()),
        vec![(UserId::from("alice"), PresenceStatus::Online)]
    );
    assert!(a1.drain().contains(&ServerEvent::PresenceSnapshot {
        online: vec![UserId::from("bob")]
    }));

    let _a2 = h.connect("token-alice").await;
    assert!(status_changes(&b1.drain()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn typing_reverts_after_timeout_without_stop_signal() {
    let h = harness().await;
    let mut a1 = h.connect("token-alice").await;
    let mut b1 = h.connect("token-bob").await;
    a1.drain();
    b1.drain();
    let alice = UserId::from("alice");

    let typing = |is_typing| ClientEvent::Typing {
        chat_id: room(),
        is_typing,
    };

    h.hub.dispatch(&mut a1.session, typing(true)).await;
    assert_eq!(
        b1.drain(),
        vec![ServerEvent::Typing {
            chat_id: room(),
            from: alice.clone(),
            is_typing: true
        }]
    );
    assert!(a1.drain().is_empty(), "typists do not see their own indicator");

    tokio::time::sleep(Duration::from_secs(2)).await;
    h.hub.dispatch(&mut a1.session, typing(true)).await;
    assert!(b1.drain().is_empty(), "re-arming is silent");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(h.hub.is_typing(&alice, &room()).await);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    tokio::task::yield_now().await;
    assert!(!h.hub.is_typing(&alice, &room()).await);
    assert_eq!(
        b1.drain(),
        vec![ServerEvent::Typing {
            chat_id: room(),
            from: alice,
            is_typing: false
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn sending_a_message_stops_typing() {
    let h = harness().await;
    let mut a1 = h.connect("token-alice").await;
    let mut b1 = h.connect("token-bob").await;
    h.hub
        .dispatch(
            &mut a1.session,
            ClientEvent::Typing {
                chat_id: room(),
                is_typing: true,
            },
        )
        .await;
    b1.drain();

    h.send(&mut a1, "done typing", "local-1").await;
    let frames = b1.drain();
    assert!(frames.contains(&ServerEvent::Typing {
        chat_id: room(),
        from: UserId::from("alice"),
        is_typing: false,
    }));
    assert!(!h.hub.is_typing(&UserId::from("alice"), &room()).await);
}

#[tokio::test(start_paused = true)]
async fn going_offline_withdraws_typing() {
    let h = harness_with(RelaySettings {
        typing_timeout: Duration::from_secs(60),
        ..settings()
    })
    .await;
    let mut a1 = h.connect("token-alice").await;
    let mut b1 = h.connect("token-bob").await;
    h.hub
        .dispatch(
            &mut a1.session,
            ClientEvent::Typing {
                chat_id: room(),
                is_typing: true,
            },
        )
        .await;
    b1.drain();

    h.hub.disconnect(&a1.session).await;
    tokio::time::sleep(Duration::from_millis(3_100)).await;
    tokio::task::yield_now().await;

    assert_eq!(
        b1.drain(),
        vec![
            ServerEvent::Typing {
                chat_id: room(),
                from: UserId::from("alice"),
                is_typing: false,
            },
            ServerEvent::UserStatus {
                user_id: UserId::from("alice"),
                status: PresenceStatus::Offline,
            },
        ]
    );
    assert!(!h.hub.is_typing(&UserId::from("alice"), &room()).await);
}

#[tokio::test(start_paused = true)]
async fn non_participant_cannot_send_or_type() {
    let h = harness().await;
    let mut c1 = h.connect("token-carol").await;
    let mut b1 = h.connect("token-bob").await;
    c1.drain();
    b1.drain();

    assert_eq!(h.send(&mut c1, "let me in", "local-9").await, Flow::Continue);
    let frames = c1.drain();
    assert!(matches!(
        frames.as_slice(),
        [ServerEvent::MessageFailed { client_message_id, .. }] if client_message_id == "local-9"
    ));

    h.hub
        .dispatch(
            &mut c1.session,
            ClientEvent::Typing {
                chat_id: room(),
                is_typing: true,
            },
        )
        .await;
    assert!(b1.drain().is_empty());
    assert!(h.store.messages_in(&room()).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn persistence_failure_is_not_broadcast() {
    let h = harness().await;
    let mut a1 = h.connect("token-alice").await;
    let mut b1 = h.connect("token-bob").await;
    a1.drain();
    b1.drain();

    h.store.fail_writes(true);
    assert_eq!(h.send(&mut a1, "hi", "local-1").await, Flow::Continue);

    assert!(matches!(
        a1.drain().as_slice(),
        [ServerEvent::MessageFailed { .. }]
    ));
    assert!(b1.drain().is_empty());
    assert_eq!(h.hub.counts().await.sequenced_chats, 0);
}

#[tokio::test(start_paused = true)]
async fn idle_chats_do_not_keep_sequencer_entries() {
    let h = harness().await;
    let mut a1 = h.connect("token-alice").await;
    let mut b1 = h.connect("token-bob").await;

    for index in 0..200 {
        let chat_id = ChatId::new(format!("room-{index}"));
        h.store
            .insert_chat(ChatRoom {
                id: chat_id.clone(),
                participants: vec![UserId::from("alice"), UserId::from("bob")],
            })
            .await;
        let flow = h
            .hub
            .dispatch(
                &mut a1.session,
                ClientEvent::SendMessage {
                    chat_id,
                    content: "hi".to_string(),
                    client_message_id: format!("local-{index}"),
                },
            )
            .await;
        assert_eq!(flow, Flow::Continue);
    }

    let received = b1
        .drain()
        .into_iter()
        .filter(|frame| matches!(frame, ServerEvent::NewMessage { .. }))
        .count();
    assert_eq!(received, 200);
    assert_eq!(h.hub.counts().await.sequenced_chats, 0);
}

#[tokio::test(start_paused = true)]
async fn blank_content_is_rejected() {
    let h = harness().await;
    let mut a1 = h.connect("token-alice").await;
    a1.drain();

    h.send(&mut a1, "   ", "local-1").await;
    assert!(matches!(
        a1.drain().as_slice(),
        [ServerEvent::MessageFailed { .. }]
    ));
}

#[tokio::test(start_paused = true)]
async fn bad_token_closes_channel_without_registering() {
    let h = harness().await;
    let (mut session, mut frames) = h.hub.open_channel();

    let flow = h
        .hub
        .dispatch(
            &mut session,
            ClientEvent::Authenticate {
                token: "forged".into(),
            },
        )
        .await;

    assert_eq!(flow, Flow::Close);
    assert!(matches!(
        frames.try_recv(),
        Ok(ServerEvent::Error {
            code: ErrorCode::AuthenticationFailed,
            ..
        })
    ));
    assert_eq!(h.hub.counts().await.channels, 0);
}

#[tokio::test(start_paused = true)]
async fn signals_before_authentication_are_rejected() {
    let h = harness().await;
    let (mut session, mut frames) = h.hub.open_channel();

    let flow = h.hub.dispatch(&mut session, ClientEvent::Sync).await;
    assert_eq!(flow, Flow::Continue);
    assert!(matches!(
        frames.try_recv(),
        Ok(ServerEvent::Error {
            code: ErrorCode::NotAuthenticated,
            ..
        })
    ));

    assert_eq!(h.hub.dispatch(&mut session, ClientEvent::Ping).await, Flow::Continue);
    assert_eq!(frames.try_recv().unwrap(), ServerEvent::Pong);
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_do_not_close_the_channel() {
    let h = harness().await;
    let mut a1 = h.connect("token-alice").await;
    a1.drain();

    let flow = h.hub.handle_text(&mut a1.session, "{not json").await;
    assert_eq!(flow, Flow::Continue);
    assert!(matches!(
        a1.drain().as_slice(),
        [ServerEvent::Error {
            code: ErrorCode::Malformed,
            ..
        }]
    ));

    let flow = h
        .hub
        .handle_text(&mut a1.session, r#"{"type":"ping"}"#)
        .await;
    assert_eq!(flow, Flow::Continue);
    assert_eq!(a1.drain(), vec![ServerEvent::Pong]);
}

#[tokio::test(start_paused = true)]
async fn reauthenticating_as_someone_else_is_rejected() {
    let h = harness().await;
    let mut a1 = h.connect("token-alice").await;
    a1.drain();

    let flow = h
        .hub
        .dispatch(
            &mut a1.session,
            ClientEvent::Authenticate {
                token: "token-bob".into(),
            },
        )
        .await;

    assert_eq!(flow, Flow::Continue);
    assert!(matches!(
        a1.drain().as_slice(),
        [ServerEvent::Error {
            code: ErrorCode::ChannelOwned,
            ..
        }]
    ));
    assert!(!h.hub.is_online(&UserId::from("bob")).await);
}

#[tokio::test(start_paused = true)]
async fn fan_out_order_matches_persistence_order() {
    let h = harness().await;
    let mut a1 = h.connect("token-alice").await;
    let mut b1 = h.connect("token-bob").await;
    b1.drain();

    for (index, body) in ["one", "two", "three"].iter().enumerate() {
        h.send(&mut a1, body, &format!("local-{index}")).await;
    }

    let received: Vec<_> = b1
        .drain()
        .into_iter()
        .filter_map(|frame| match frame {
            ServerEvent::NewMessage { message } => Some(message.id),
            _ => None,
        })
        .collect();
    let persisted: Vec<_> = h
        .store
        .messages_in(&room())
        .await
        .into_iter()
        .map(|message| message.id)
        .collect();
    assert_eq!(received, persisted);
}
