//! In-memory acknowledgement ledger.
//!
//! Tracks the status of recently relayed messages so delivery and read
//! signals can be applied without a store round-trip. The ledger is bounded;
//! the oldest entries are evicted first and fall back to the store.
//!
//! Relayed messages are also indexed by their sender's client message id so a
//! send repeated after a reconnect resolves to the message already stored.

use std::collections::{HashMap, VecDeque};

use courier_chats::{ChatId, MessageId, MessageRecord, MessageStatus, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckEntry {
    pub sender: UserId,
    pub chat_id: ChatId,
    pub participants: Vec<UserId>,
    pub status: MessageStatus,
    pub client_message_id: Option<String>,
}

impl AckEntry {
    /// Whether `reader` may acknowledge reading this message.
    pub fn accepts_reader(&self, reader: &UserId) -> bool {
        reader != &self.sender && self.participants.contains(reader)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Advanced { previous: MessageStatus },
    /// Duplicate or backwards signal; nothing changed.
    Unchanged,
    Unknown,
}

pub struct AckLedger {
    entries: HashMap<MessageId, AckEntry>,
    by_client: HashMap<(UserId, String), MessageId>,
    order: VecDeque<MessageId>,
    capacity: usize,
}

impl AckLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_client: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Start tracking a message. An already tracked message keeps its entry.
    pub fn track(&mut self, record: &MessageRecord, participants: &[UserId]) {
        self.insert(record, participants, None);
    }

    /// Track a freshly relayed message under its sender's client message id.
    pub fn track_sent(
        &mut self,
        record: &MessageRecord,
        participants: &[UserId],
        client_message_id: &str,
    ) {
        self.insert(record, participants, Some(client_message_id));
    }

    /// The message already relayed for `sender` under `client_message_id`.
    pub fn sent_by(&self, sender: &UserId, client_message_id: &str) -> Option<&MessageId> {
        self.by_client
            .get(&(sender.clone(), client_message_id.to_string()))
    }

    fn insert(
        &mut self,
        record: &MessageRecord,
        participants: &[UserId],
        client_message_id: Option<&str>,
    ) {
        if self.entries.contains_key(&record.id) {
            return;
        }

        if let Some(client_message_id) = client_message_id {
            self.by_client.insert(
                (record.sender.clone(), client_message_id.to_string()),
                record.id.clone(),
            );
        }

        self.entries.insert(
            record.id.clone(),
            AckEntry {
                sender: record.sender.clone(),
                chat_id: record.chat_id.clone(),
                participants: participants.to_vec(),
                status: record.status,
                client_message_id: client_message_id.map(str::to_string),
            },
        );
        self.order.push_back(record.id.clone());

        while self.order.len() > self.capacity {
            let Some(evicted) = self.order.pop_front() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&evicted) {
                if let Some(client_message_id) = entry.client_message_id {
                    self.by_client.remove(&(entry.sender, client_message_id));
                }
            }
        }
    }

    pub fn advance(&mut self, message_id: &MessageId, next: MessageStatus) -> AckOutcome {
        let Some(entry) = self.entries.get_mut(message_id) else {
            return AckOutcome::Unknown;
        };

        if !entry.status.can_advance_to(next) {
            return AckOutcome::Unchanged;
        }

        let previous = entry.status;
        entry.status = next;
        AckOutcome::Advanced { previous }
    }

    pub fn entry(&self, message_id: &MessageId) -> Option<&AckEntry> {
        self.entries.get(message_id)
    }

    pub fn status_of(&self, message_id: &MessageId) -> Option<MessageStatus> {
        self.entries.get(message_id).map(|entry| entry.status)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: &str, status: MessageStatus) -> MessageRecord {
        MessageRecord {
            id: MessageId::from(id),
            chat_id: ChatId::from("room"),
            sender: UserId::from("alice"),
            content: "hi".into(),
            created_at: Utc::now(),
            status,
        }
    }

    fn members() -> Vec<UserId> {
        vec![UserId::from("alice"), UserId::from("bob")]
    }

    #[test]
    fn duplicate_read_is_a_no_op() {
        let mut ledger = AckLedger::new(16);
        ledger.track(&record("m1", MessageStatus::Delivered), &members());

        assert_eq!(
            ledger.advance(&MessageId::from("m1"), MessageStatus::Read),
            AckOutcome::Advanced {
                previous: MessageStatus::Delivered
            }
        );
        assert_eq!(
            ledger.advance(&MessageId::from("m1"), MessageStatus::Read),
            AckOutcome::Unchanged
        );
        assert_eq!(
            ledger.status_of(&MessageId::from("m1")),
            Some(MessageStatus::Read)
        );
    }

    #[test]
    fn status_never_moves_backwards() {
        let mut ledger = AckLedger::new(16);
        ledger.track(&record("m1", MessageStatus::Read), &members());

        assert_eq!(
            ledger.advance(&MessageId::from("m1"), MessageStatus::Delivered),
            AckOutcome::Unchanged
        );
        assert_eq!(
            ledger.advance(&MessageId::from("missing"), MessageStatus::Read),
            AckOutcome::Unknown
        );
    }

    #[test]
    fn oldest_entries_are_evicted_past_capacity() {
        let mut ledger = AckLedger::new(2);
        for id in ["m1", "m2", "m3"] {
            ledger.track(&record(id, MessageStatus::Sent), &members());
        }

        assert_eq!(ledger.len(), 2);
        assert!(ledger.entry(&MessageId::from("m1")).is_none());
        assert!(ledger.entry(&MessageId::from("m3")).is_some());
    }

    #[test]
    fn repeated_sends_resolve_until_evicted() {
        let mut ledger = AckLedger::new(1);
        let alice = UserId::from("alice");
        ledger.track_sent(&record("m1", MessageStatus::Sent), &members(), "local-1");

        assert_eq!(
            ledger.sent_by(&alice, "local-1"),
            Some(&MessageId::from("m1"))
        );
        assert!(ledger.sent_by(&UserId::from("bob"), "local-1").is_none());

        ledger.track(&record("m2", MessageStatus::Sent), &members());
        assert!(ledger.sent_by(&alice, "local-1").is_none());
    }

    #[test]
    fn only_non_sender_participants_may_read() {
        let mut ledger = AckLedger::new(4);
        ledger.track(&record("m1", MessageStatus::Sent), &members());
        let entry = ledger.entry(&MessageId::from("m1")).unwrap();

        assert_eq!(entry.chat_id, ChatId::from("room"));
        assert!(entry.accepts_reader(&UserId::from("bob")));
        assert!(!entry.accepts_reader(&UserId::from("alice")));
        assert!(!entry.accepts_reader(&UserId::from("mallory")));
    }
}
