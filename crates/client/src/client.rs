use std::sync::Arc;

use courier_chats::utils::Validator;
use courier_chats::{ChatId, ClientEvent, MessageId, MessageRecord, MessageStatus, UserId};
use courier_config::ClientConfig;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};
use crate::listeners::{ClientNotification, EventFilter, Subscription, SubscriptionId};
use crate::runtime::{ClientState, Command, ConnectionRuntime, ConnectionState};

/// Handle to a client runtime holding one logical channel to the relay.
///
/// Dropping the handle ends the connection task once it notices the command
/// queue has closed.
pub struct ChatClient {
    user: UserId,
    state: Arc<Mutex<ClientState>>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl ChatClient {
    /// Spawn the connection task. Must be called inside a tokio runtime.
    pub fn connect(config: &ClientConfig, user: UserId, token: impl Into<String>) -> Self {
        let state = Arc::new(Mutex::new(ClientState::new(user.clone())));
        let (commands, receiver) = mpsc::unbounded_channel();
        let runtime = ConnectionRuntime::new(
            config,
            token.into(),
            state.clone(),
            receiver,
            commands.downgrade(),
        );
        let task = tokio::spawn(runtime.run());

        Self {
            user,
            state,
            commands,
            task,
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Send a message. The returned record is the optimistic local copy,
    /// keyed by its client message id until the relay acknowledges it.
    pub async fn send_message(&self, chat_id: &ChatId, content: &str) -> ClientResult<MessageRecord> {
        Validator::message_content(content)
            .map_err(|error| ClientError::InvalidMessage(error.to_string()))?;

        let client_message_id = Uuid::new_v4().to_string();
        let record = {
            let mut state = self.state.lock().await;
            if state.connection == ConnectionState::Stopped {
                return Err(ClientError::Closed);
            }
            let state = &mut *state;
            let record = state
                .log
                .insert_local(chat_id, &state.user, content, &client_message_id);
            state
                .listeners
                .emit(ClientNotification::Message(record.clone()));
            record
        };

        let signal = ClientEvent::SendMessage {
            chat_id: chat_id.clone(),
            content: content.to_string(),
            client_message_id: client_message_id.clone(),
        };
        if self.command(Command::Signal(signal)).is_err() {
            self.state.lock().await.fail_message(&client_message_id);
            return Err(ClientError::Closed);
        }

        debug!(chat_id = %chat_id, %client_message_id, "queued message");
        Ok(record)
    }

    /// Register a keystroke in `chat_id`. Emits `typing(true)` on the first
    /// keystroke and `typing(false)` once input goes idle.
    pub fn typing(&self, chat_id: &ChatId) -> ClientResult<()> {
        self.command(Command::Keystroke(chat_id.clone()))
    }

    pub fn stop_typing(&self, chat_id: &ChatId) -> ClientResult<()> {
        self.command(Command::StopTyping(chat_id.clone()))
    }

    pub async fn mark_as_read(&self, message_id: &MessageId) -> ClientResult<()> {
        self.state
            .lock()
            .await
            .log
            .advance(message_id, MessageStatus::Read);
        self.command(Command::Signal(ClientEvent::MarkAsRead {
            message_id: message_id.clone(),
        }))
    }

    /// Ask the relay for a fresh presence snapshot.
    pub fn sync(&self) -> ClientResult<()> {
        self.command(Command::Signal(ClientEvent::Sync))
    }

    pub async fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.state.lock().await.listeners.subscribe(filter)
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.state.lock().await.listeners.unsubscribe(id)
    }

    pub async fn messages(&self, chat_id: &ChatId) -> Vec<MessageRecord> {
        self.state.lock().await.log.messages(chat_id)
    }

    pub async fn status_of(&self, message_id: &MessageId) -> Option<MessageStatus> {
        self.state.lock().await.log.status_of(message_id)
    }

    /// Merge history fetched out of band. Returns how many messages were new.
    pub async fn merge_history(&self, chat_id: &ChatId, history: Vec<MessageRecord>) -> usize {
        self.state.lock().await.log.merge_history(chat_id, history)
    }

    pub async fn unread_count(&self, chat_id: &ChatId) -> usize {
        self.state.lock().await.log.unread_count(chat_id)
    }

    pub async fn set_active_chat(&self, chat_id: Option<ChatId>) {
        self.state.lock().await.log.set_active(chat_id);
    }

    pub async fn is_online(&self, user_id: &UserId) -> bool {
        self.state.lock().await.presence.is_online(user_id)
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        self.state.lock().await.presence.online_users()
    }

    pub async fn typing_in(&self, chat_id: &ChatId) -> Vec<UserId> {
        self.state.lock().await.presence.typing_in(chat_id)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.state.lock().await.connection
    }

    /// Close the channel and wait for the connection task to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(error) = self.task.await {
            debug!(%error, "client runtime ended abnormally");
        }
    }

    fn command(&self, command: Command) -> ClientResult<()> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::Closed)
    }
}
