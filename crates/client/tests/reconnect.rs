//! Reconnect behaviour against a scripted relay that drops the link at
//! chosen points.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::Utc;
use courier_chats::{ChatId, ClientEvent, MessageId, MessageRecord, MessageStatus, ServerEvent, UserId};
use courier_client::{ChatClient, ClientNotification, ConnectionEvent, ConnectionState, EventFilter, EventKind};
use courier_config::ClientConfig;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(5);

type RelaySocket = WebSocketStream<TcpStream>;

fn room() -> ChatId {
    ChatId::from("room")
}

fn client_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        url: format!("ws://{addr}/ws"),
        max_reconnect_attempts: 3,
        reconnect_delay_ms: 50,
        typing_idle_ms: 60_000,
    }
}

async fn accept(listener: &TcpListener) -> RelaySocket {
    let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
        .await
        .expect("client connects in time")
        .expect("accept connection");
    tokio_tungstenite::accept_async(stream)
        .await
        .expect("websocket handshake")
}

async fn next_signal(socket: &mut RelaySocket) -> ClientEvent {
    loop {
        let frame = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("signal in time")
            .expect("socket open")
            .expect("readable frame");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("client signal");
        }
    }
}

async fn reply(socket: &mut RelaySocket, event: ServerEvent) {
    let payload = serde_json::to_string(&event).expect("encode frame");
    socket
        .send(Message::Text(payload))
        .await
        .expect("send frame");
}

/// Accept a channel and answer the handshake and sync the way the relay does.
async fn accept_session(listener: &TcpListener, online: Vec<UserId>) -> RelaySocket {
    let mut socket = accept(listener).await;
    assert_eq!(
        next_signal(&mut socket).await,
        ClientEvent::Authenticate {
            token: "token-alice".into()
        }
    );
    reply(
        &mut socket,
        ServerEvent::Authenticated {
            user_id: UserId::from("alice"),
        },
    )
    .await;
    assert_eq!(next_signal(&mut socket).await, ClientEvent::Sync);
    reply(&mut socket, ServerEvent::PresenceSnapshot { online }).await;
    socket
}

async fn until(subscription: &mut courier_client::Subscription, count: usize) -> Vec<ClientNotification> {
    let mut seen = Vec::new();
    while seen.len() < count {
        let notification = tokio::time::timeout(WAIT, subscription.recv())
            .await
            .expect("notification in time")
            .expect("subscription open");
        seen.push(notification);
    }
    seen
}

#[tokio::test]
async fn dropped_session_reauthenticates_and_resyncs() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("address");

    let alice = ChatClient::connect(&client_config(addr), UserId::from("alice"), "token-alice");
    let mut events = alice
        .subscribe(EventFilter::only([EventKind::Connection, EventKind::Presence]))
        .await;

    let first = accept_session(&listener, vec![UserId::from("bob")]).await;
    let opened = until(&mut events, 3).await;
    assert_eq!(
        opened,
        vec![
            ClientNotification::Connection(ConnectionEvent::Connecting { attempt: 1 }),
            ClientNotification::Connection(ConnectionEvent::Authenticated {
                user_id: UserId::from("alice")
            }),
            ClientNotification::PresenceSnapshot {
                online: vec![UserId::from("bob")]
            },
        ]
    );
    assert!(alice.is_online(&UserId::from("bob")).await);

    drop(first);
    let _second = accept_session(&listener, Vec::new()).await;

    let resumed = until(&mut events, 4).await;
    assert_eq!(
        resumed,
        vec![
            ClientNotification::Connection(ConnectionEvent::Disconnected),
            ClientNotification::Connection(ConnectionEvent::Connecting { attempt: 1 }),
            ClientNotification::Connection(ConnectionEvent::Authenticated {
                user_id: UserId::from("alice")
            }),
            ClientNotification::PresenceSnapshot { online: Vec::new() },
        ]
    );
    assert_eq!(alice.connection_state().await, ConnectionState::Authenticated);
    assert!(!alice.is_online(&UserId::from("bob")).await);

    alice.shutdown().await;
}

#[tokio::test]
async fn unacknowledged_message_is_sent_again_after_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("address");

    let alice = ChatClient::connect(&client_config(addr), UserId::from("alice"), "token-alice");
    let mut first = accept_session(&listener, Vec::new()).await;

    let local = alice.send_message(&room(), "hi").await.expect("send");
    let ClientEvent::SendMessage {
        client_message_id, ..
    } = next_signal(&mut first).await
    else {
        panic!("expected send-message");
    };
    assert_eq!(client_message_id, local.id.as_str());

    // The link goes down before the relay answers.
    drop(first);

    let mut second = accept_session(&listener, Vec::new()).await;
    let resent = next_signal(&mut second).await;
    assert_eq!(
        resent,
        ClientEvent::SendMessage {
            chat_id: room(),
            content: "hi".into(),
            client_message_id: client_message_id.clone(),
        }
    );

    let stored = MessageRecord {
        id: MessageId::from("m-1"),
        chat_id: room(),
        sender: UserId::from("alice"),
        content: "hi".into(),
        created_at: Utc::now(),
        status: MessageStatus::Delivered,
    };
    reply(
        &mut second,
        ServerEvent::MessageSent {
            client_message_id,
            message: stored.clone(),
        },
    )
    .await;

    let reconciled = tokio::time::timeout(WAIT, async {
        loop {
            if alice.status_of(&stored.id).await.is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(reconciled.is_ok(), "message never reconciled");

    assert_eq!(alice.status_of(&stored.id).await, Some(MessageStatus::Delivered));
    assert_eq!(alice.status_of(&local.id).await, None);
    assert_eq!(alice.messages(&room()).await.len(), 1);

    alice.shutdown().await;
}
