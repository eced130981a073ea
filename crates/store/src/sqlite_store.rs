//! `MessageStore` backed by SQLite.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use courier_chats::utils::Validator;
use courier_chats::{
    ChatError, ChatId, ChatResult, ChatRoom, MessageId, MessageRecord, MessageStatus,
    MessageStore, UserId,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, content, status, created_at";

/// Persistence collaborator over a SQLite pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Most recent `limit` messages of a chat, oldest first.
    pub async fn history(&self, chat_id: &ChatId, limit: i64) -> ChatResult<Vec<MessageRecord>> {
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM (
                 SELECT seq, {MESSAGE_COLUMNS} FROM messages
                 WHERE chat_id = ? ORDER BY seq DESC LIMIT ?
             ) ORDER BY seq ASC"
        );
        let rows = sqlx::query(&query)
            .bind(chat_id.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;

        rows.iter()
            .map(message_from_row)
            .collect::<StoreResult<Vec<_>>>()
            .map_err(ChatError::from)
    }

    pub async fn chat_exists(&self, chat_id: &ChatId) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM chats WHERE id = ?")
            .bind(chat_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn message_from_row(row: &SqliteRow) -> StoreResult<MessageRecord> {
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;

    let status = status
        .parse::<MessageStatus>()
        .map_err(|err| StoreError::CorruptRow(err.to_string()))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|err| StoreError::CorruptRow(format!("created_at: {err}")))?
        .with_timezone(&Utc);

    Ok(MessageRecord {
        id: MessageId::new(row.try_get::<String, _>("id")?),
        chat_id: ChatId::new(row.try_get::<String, _>("chat_id")?),
        sender: UserId::new(row.try_get::<String, _>("sender_id")?),
        content: row.try_get("content")?,
        created_at,
        status,
    })
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn create_message(
        &self,
        sender: &UserId,
        chat_id: &ChatId,
        content: &str,
    ) -> ChatResult<MessageRecord> {
        Validator::message_content(content)?;
        if !self.chat_exists(chat_id).await? {
            return Err(ChatError::chat_not_found(chat_id.as_str()));
        }

        let record = MessageRecord {
            id: MessageId::new(cuid2::create_id()),
            chat_id: chat_id.clone(),
            sender: sender.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
            status: MessageStatus::Sending,
        };
        let now = timestamp(record.created_at);

        sqlx::query(
            "INSERT INTO messages (id, chat_id, sender_id, content, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.as_str())
        .bind(chat_id.as_str())
        .bind(sender.as_str())
        .bind(&record.content)
        .bind(record.status.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        debug!(message_id = %record.id, chat_id = %chat_id, sender = %sender, "created message");
        Ok(record)
    }

    async fn participants_of(&self, chat_id: &ChatId) -> ChatResult<Vec<UserId>> {
        if !self.chat_exists(chat_id).await? {
            return Err(ChatError::chat_not_found(chat_id.as_str()));
        }

        let rows = sqlx::query("SELECT user_id FROM chat_members WHERE chat_id = ? ORDER BY user_id")
            .bind(chat_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("user_id")
                    .map(UserId::new)
                    .map_err(|err| ChatError::from(StoreError::from(err)))
            })
            .collect()
    }

    async fn find_message(&self, message_id: &MessageId) -> ChatResult<Option<MessageRecord>> {
        let query = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?");
        let row = sqlx::query(&query)
            .bind(message_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;

        match row {
            Some(row) => Ok(Some(message_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_status(
        &self,
        message_id: &MessageId,
        status: MessageStatus,
    ) -> ChatResult<()> {
        // The forward-only check lives in the WHERE clause so the write is a
        // single statement and concurrent write-backs queue on the busy timeout.
        let from: Vec<MessageStatus> = MessageStatus::ALL
            .into_iter()
            .filter(|current| current.can_advance_to(status))
            .collect();

        if !from.is_empty() {
            let placeholders = vec!["?"; from.len()].join(", ");
            let query = format!(
                "UPDATE messages SET status = ?, updated_at = ? WHERE id = ? AND status IN ({placeholders})"
            );
            let mut update = sqlx::query(&query)
                .bind(status.as_str())
                .bind(timestamp(Utc::now()))
                .bind(message_id.as_str());
            for current in &from {
                update = update.bind(current.as_str());
            }

            let result = update.execute(&self.pool).await.map_err(StoreError::from)?;
            if result.rows_affected() > 0 {
                return Ok(());
            }
        }

        let current: Option<String> = sqlx::query_scalar("SELECT status FROM messages WHERE id = ?")
            .bind(message_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;

        match current {
            Some(current) => {
                debug!(message_id = %message_id, %current, requested = %status, "ignoring status regression");
                Ok(())
            }
            None => Err(ChatError::message_not_found(message_id.as_str())),
        }
    }

    async fn create_chat(&self, participants: Vec<UserId>) -> ChatResult<ChatRoom> {
        Validator::participants(&participants)?;

        let mut participants = participants;
        participants.sort();
        participants.dedup();

        let room = ChatRoom {
            id: ChatId::new(cuid2::create_id()),
            participants,
        };

        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        sqlx::query("INSERT INTO chats (id, created_at) VALUES (?, ?)")
            .bind(room.id.as_str())
            .bind(timestamp(Utc::now()))
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;

        for member in &room.participants {
            sqlx::query("INSERT INTO chat_members (chat_id, user_id) VALUES (?, ?)")
                .bind(room.id.as_str())
                .bind(member.as_str())
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from)?;
        }
        tx.commit().await.map_err(StoreError::from)?;

        info!(chat_id = %room.id, members = room.participants.len(), "created chat");
        Ok(room)
    }
}
