//! Connection task behind a [`ChatClient`](crate::ChatClient).
//!
//! The task owns the websocket. It authenticates, requests a presence sync,
//! flushes signals queued while offline and applies inbound events to the
//! shared client state. On a drop it reconnects with a fixed delay until the
//! attempt budget is spent. Messages written to a socket that dropped before
//! the relay acknowledged them are sent again after the next sync; the relay
//! answers a repeated client message id with the message it already stored.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use courier_chats::{ChatId, ClientEvent, ErrorCode, MessageId, MessageStatus, ServerEvent, UserId};
use courier_config::ClientConfig;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::listeners::{ClientNotification, ConnectionEvent, ListenerSet};
use crate::log::MessageLog;
use crate::presence::PresenceView;
use crate::typing::TypingDebouncer;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketSink = SplitSink<Socket, Message>;
type SocketStream = SplitStream<Socket>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Reconnecting,
    /// The runtime ended: shut down, rejected or out of attempts.
    Stopped,
}

/// State shared between the handle and the connection task.
pub(crate) struct ClientState {
    pub(crate) user: UserId,
    pub(crate) log: MessageLog,
    pub(crate) presence: PresenceView,
    pub(crate) listeners: ListenerSet,
    pub(crate) connection: ConnectionState,
}

impl ClientState {
    pub(crate) fn new(user: UserId) -> Self {
        Self {
            user,
            log: MessageLog::new(),
            presence: PresenceView::new(),
            listeners: ListenerSet::new(),
            connection: ConnectionState::Connecting,
        }
    }

    pub(crate) fn fail_message(&mut self, client_message_id: &str) {
        if self.log.mark_failed(client_message_id) {
            self.listeners.emit(ClientNotification::Status {
                message_id: MessageId::new(client_message_id),
                status: MessageStatus::Failed,
            });
        }
    }
}

pub(crate) enum Command {
    Signal(ClientEvent),
    Keystroke(ChatId),
    StopTyping(ChatId),
    TypingIdle { chat_id: ChatId, generation: u64 },
    Shutdown,
}

enum Step {
    Send(Vec<ClientEvent>),
    Shutdown,
}

enum SessionEnd {
    Dropped { authenticated: bool },
    Rejected(String),
    Shutdown,
}

pub(crate) struct ConnectionRuntime {
    url: String,
    token: String,
    max_attempts: u32,
    retry_delay: Duration,
    typing_idle: Duration,
    state: Arc<Mutex<ClientState>>,
    commands: mpsc::UnboundedReceiver<Command>,
    timers: mpsc::WeakUnboundedSender<Command>,
    typing: TypingDebouncer,
    backlog: VecDeque<ClientEvent>,
    /// `send-message` signals written but not yet answered, in send order.
    in_flight: Vec<ClientEvent>,
}

impl ConnectionRuntime {
    pub(crate) fn new(
        config: &ClientConfig,
        token: String,
        state: Arc<Mutex<ClientState>>,
        commands: mpsc::UnboundedReceiver<Command>,
        timers: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            url: config.url.clone(),
            token,
            max_attempts: config.max_reconnect_attempts.max(1),
            retry_delay: Duration::from_millis(config.reconnect_delay_ms),
            typing_idle: Duration::from_millis(config.typing_idle_ms),
            state,
            commands,
            timers,
            typing: TypingDebouncer::new(),
            backlog: VecDeque::new(),
            in_flight: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        let mut failures = 0u32;

        loop {
            self.notify_connection(ConnectionEvent::Connecting {
                attempt: failures + 1,
            })
            .await;

            let end = match connect_async(self.url.as_str()).await {
                Ok((socket, _)) => self.session(socket).await,
                Err(error) => {
                    warn!(url = %self.url, %error, "failed to connect to relay");
                    SessionEnd::Dropped {
                        authenticated: false,
                    }
                }
            };
            self.requeue_in_flight();

            match end {
                SessionEnd::Shutdown => {
                    info!("client runtime shutting down");
                    break;
                }
                SessionEnd::Rejected(reason) => {
                    warn!(%reason, "relay rejected credentials, not reconnecting");
                    self.fail_queued().await;
                    self.notify_connection(ConnectionEvent::Rejected { reason })
                        .await;
                    break;
                }
                SessionEnd::Dropped { authenticated } => {
                    failures = if authenticated { 0 } else { failures + 1 };
                    {
                        let mut state = self.state.lock().await;
                        state.connection = ConnectionState::Reconnecting;
                        state
                            .listeners
                            .emit(ClientNotification::Connection(ConnectionEvent::Disconnected));
                    }

                    if failures >= self.max_attempts {
                        warn!(attempts = failures, "giving up on relay connection");
                        self.fail_queued().await;
                        self.notify_connection(ConnectionEvent::GaveUp { attempts: failures })
                            .await;
                        break;
                    }

                    debug!(failures, delay_ms = self.retry_delay.as_millis() as u64, "reconnecting");
                    if !self.wait_before_retry().await {
                        break;
                    }
                }
            }
        }

        let mut state = self.state.lock().await;
        state.connection = ConnectionState::Stopped;
        state.listeners.close();
    }

    async fn session(&mut self, socket: Socket) -> SessionEnd {
        let (mut sink, mut stream): (SocketSink, SocketStream) = socket.split();
        let mut authenticated = false;

        let handshake = ClientEvent::Authenticate {
            token: self.token.clone(),
        };
        if let Err(error) = send_event(&mut sink, &handshake).await {
            debug!(%error, "failed to send authenticate");
            return SessionEnd::Dropped { authenticated };
        }

        loop {
            tokio::select! {
                frame = stream.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(error)) => {
                            debug!(%error, "relay connection dropped");
                            break;
                        }
                    };

                    let event = match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => event,
                        Err(error) => {
                            warn!(%error, "ignoring unreadable frame from relay");
                            continue;
                        }
                    };

                    match event {
                        ServerEvent::Authenticated { user_id } => {
                            authenticated = true;
                            self.on_authenticated(user_id).await;
                            if let Err(error) = self.resume(&mut sink).await {
                                debug!(%error, "connection dropped while resuming");
                                break;
                            }
                        }
                        ServerEvent::Error { code: ErrorCode::AuthenticationFailed, message } => {
                            let _ = sink.send(Message::Close(None)).await;
                            return SessionEnd::Rejected(message);
                        }
                        event => {
                            self.settle_in_flight(&event);
                            self.apply(event).await;
                        }
                    }
                }
                command = self.commands.recv() => {
                    let step = match command {
                        Some(command) => self.handle_command(command),
                        None => Step::Shutdown,
                    };
                    match step {
                        Step::Shutdown => {
                            let _ = sink.send(Message::Close(None)).await;
                            return SessionEnd::Shutdown;
                        }
                        Step::Send(events) if authenticated => {
                            let mut events = events.into_iter();
                            while let Some(event) = events.next() {
                                if let Err(error) = self.transmit(&mut sink, &event).await {
                                    debug!(%error, "send failed, queueing for reconnect");
                                    self.backlog.push_back(event);
                                    self.backlog.extend(events);
                                    return SessionEnd::Dropped { authenticated };
                                }
                            }
                        }
                        Step::Send(events) => self.backlog.extend(events),
                    }
                }
            }
        }

        SessionEnd::Dropped { authenticated }
    }

    async fn on_authenticated(&mut self, user_id: UserId) {
        let mut state = self.state.lock().await;
        if user_id != state.user {
            warn!(expected = %state.user, actual = %user_id, "relay bound a different identity");
        }
        info!(user_id = %user_id, "authenticated with relay");
        state.connection = ConnectionState::Authenticated;
        state
            .listeners
            .emit(ClientNotification::Connection(ConnectionEvent::Authenticated {
                user_id,
            }));
    }

    /// Request a presence sync, then flush signals queued while offline.
    async fn resume(&mut self, sink: &mut SocketSink) -> ClientResult<()> {
        send_event(sink, &ClientEvent::Sync).await?;

        if !self.backlog.is_empty() {
            debug!(queued = self.backlog.len(), "flushing queued signals");
        }
        while let Some(event) = self.backlog.pop_front() {
            if let Err(error) = self.transmit(sink, &event).await {
                self.backlog.push_front(event);
                return Err(error);
            }
        }
        Ok(())
    }

    /// Write one signal, remembering messages until the relay answers them.
    async fn transmit(&mut self, sink: &mut SocketSink, event: &ClientEvent) -> ClientResult<()> {
        send_event(sink, event).await?;
        if matches!(event, ClientEvent::SendMessage { .. }) {
            self.in_flight.push(event.clone());
        }
        Ok(())
    }

    fn settle_in_flight(&mut self, event: &ServerEvent) {
        let answered = match event {
            ServerEvent::MessageSent {
                client_message_id, ..
            }
            | ServerEvent::MessageFailed {
                client_message_id, ..
            } => client_message_id,
            _ => return,
        };
        self.in_flight.retain(|pending| {
            !matches!(pending, ClientEvent::SendMessage { client_message_id, .. } if client_message_id == answered)
        });
    }

    /// Put unanswered messages back at the front of the backlog, ahead of
    /// anything queued while the session was down.
    fn requeue_in_flight(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        debug!(unanswered = self.in_flight.len(), "requeueing unacknowledged messages");
        for event in self.in_flight.drain(..).rev() {
            self.backlog.push_front(event);
        }
    }

    fn handle_command(&mut self, command: Command) -> Step {
        let mut outgoing = Vec::new();
        match command {
            Command::Signal(event) => {
                if let ClientEvent::SendMessage { chat_id, .. } = &event {
                    if self.typing.stop(chat_id) {
                        outgoing.push(ClientEvent::Typing {
                            chat_id: chat_id.clone(),
                            is_typing: false,
                        });
                    }
                }
                outgoing.push(event);
            }
            Command::Keystroke(chat_id) => {
                let keystroke = self.typing.keystroke(&chat_id);
                self.arm_typing_timer(&chat_id, keystroke.generation);
                if keystroke.started {
                    outgoing.push(ClientEvent::Typing {
                        chat_id,
                        is_typing: true,
                    });
                }
            }
            Command::StopTyping(chat_id) => {
                if self.typing.stop(&chat_id) {
                    outgoing.push(ClientEvent::Typing {
                        chat_id,
                        is_typing: false,
                    });
                }
            }
            Command::TypingIdle {
                chat_id,
                generation,
            } => {
                if self.typing.expire(&chat_id, generation) {
                    outgoing.push(ClientEvent::Typing {
                        chat_id,
                        is_typing: false,
                    });
                }
            }
            Command::Shutdown => return Step::Shutdown,
        }
        Step::Send(outgoing)
    }

    fn arm_typing_timer(&mut self, chat_id: &ChatId, generation: u64) {
        let timers = self.timers.clone();
        let idle = self.typing_idle;
        let chat = chat_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            if let Some(commands) = timers.upgrade() {
                let _ = commands.send(Command::TypingIdle {
                    chat_id: chat,
                    generation,
                });
            }
        });
        self.typing
            .attach_timer(chat_id, generation, timer.abort_handle());
    }

    /// Sleep out the retry delay while still accepting commands.
    async fn wait_before_retry(&mut self) -> bool {
        let deadline = Instant::now() + self.retry_delay;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return true,
                command = self.commands.recv() => {
                    let step = match command {
                        Some(command) => self.handle_command(command),
                        None => Step::Shutdown,
                    };
                    match step {
                        Step::Shutdown => return false,
                        Step::Send(events) => self.backlog.extend(events),
                    }
                }
            }
        }
    }

    async fn apply(&mut self, event: ServerEvent) {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        match event {
            ServerEvent::NewMessage { message } => {
                if state.log.insert_remote(message.clone(), Some(&state.user)) {
                    state.listeners.emit(ClientNotification::Message(message));
                } else {
                    debug!(message_id = %message.id, "suppressed duplicate message");
                }
            }
            ServerEvent::MessageSent {
                client_message_id,
                message,
            } => {
                let message = state.log.reconcile_sent(&client_message_id, message);
                state.listeners.emit(ClientNotification::Reconciled {
                    client_message_id,
                    message,
                });
            }
            ServerEvent::MessageFailed {
                client_message_id,
                reason,
            } => {
                warn!(%client_message_id, %reason, "relay failed to deliver message");
                state.fail_message(&client_message_id);
            }
            ServerEvent::MessageDelivered { message_id } => {
                if state.log.advance(&message_id, MessageStatus::Delivered) {
                    state.listeners.emit(ClientNotification::Status {
                        message_id,
                        status: MessageStatus::Delivered,
                    });
                }
            }
            ServerEvent::MessageRead { message_id, reader } => {
                debug!(message_id = %message_id, reader = %reader, "message read");
                if state.log.advance(&message_id, MessageStatus::Read) {
                    state.listeners.emit(ClientNotification::Status {
                        message_id,
                        status: MessageStatus::Read,
                    });
                }
            }
            ServerEvent::UserStatus { user_id, status } => {
                if state.presence.apply_status(&user_id, status) {
                    state
                        .listeners
                        .emit(ClientNotification::Presence { user_id, status });
                }
            }
            ServerEvent::PresenceSnapshot { online } => {
                state.presence.apply_snapshot(online.clone());
                state
                    .listeners
                    .emit(ClientNotification::PresenceSnapshot { online });
            }
            ServerEvent::Typing {
                chat_id,
                from,
                is_typing,
            } => {
                if state.presence.apply_typing(&chat_id, &from, is_typing) {
                    state.listeners.emit(ClientNotification::Typing {
                        chat_id,
                        user_id: from,
                        is_typing,
                    });
                }
            }
            ServerEvent::Error { code, message } => {
                warn!(?code, %message, "relay reported an error");
                state
                    .listeners
                    .emit(ClientNotification::Connection(ConnectionEvent::ServerError {
                        code,
                        message,
                    }));
            }
            ServerEvent::Pong | ServerEvent::Authenticated { .. } => {}
        }
    }

    /// Mark every message still waiting on the relay as failed. Runs once the
    /// runtime has given up, so unanswered messages are failed as well.
    async fn fail_queued(&mut self) {
        let mut state = self.state.lock().await;
        for event in self.backlog.drain(..) {
            if let ClientEvent::SendMessage {
                client_message_id, ..
            } = event
            {
                state.fail_message(&client_message_id);
            }
        }
        for client_message_id in state.log.fail_pending() {
            state.listeners.emit(ClientNotification::Status {
                message_id: MessageId::new(client_message_id),
                status: MessageStatus::Failed,
            });
        }
    }

    async fn notify_connection(&self, event: ConnectionEvent) {
        let mut state = self.state.lock().await;
        if matches!(event, ConnectionEvent::Connecting { .. })
            && state.connection != ConnectionState::Reconnecting
        {
            state.connection = ConnectionState::Connecting;
        }
        state.listeners.emit(ClientNotification::Connection(event));
    }
}

async fn send_event(sink: &mut SocketSink, event: &ClientEvent) -> ClientResult<()> {
    let payload = serde_json::to_string(event)?;
    sink.send(Message::Text(payload))
        .await
        .map_err(ClientError::from)
}
