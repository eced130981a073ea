//! Local typing debounce.
//!
//! Each keystroke re-arms an idle timer. `typing(true)` is emitted on the
//! first keystroke only; `typing(false)` is emitted once, either when the
//! timer fires or when the message is sent.

use std::collections::HashMap;

use courier_chats::ChatId;
use tokio::task::AbortHandle;

struct Armed {
    generation: u64,
    timer: Option<AbortHandle>,
}

#[derive(Default)]
pub struct TypingDebouncer {
    active: HashMap<ChatId, Armed>,
    next_generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keystroke {
    /// `typing(true)` must be sent.
    pub started: bool,
    pub generation: u64,
}

impl TypingDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a keystroke. Any previous timer for the chat is cancelled; the
    /// caller arms a new one tagged with the returned generation.
    pub fn keystroke(&mut self, chat_id: &ChatId) -> Keystroke {
        self.next_generation += 1;
        let generation = self.next_generation;

        match self.active.get_mut(chat_id) {
            Some(armed) => {
                if let Some(timer) = armed.timer.take() {
                    timer.abort();
                }
                armed.generation = generation;
                Keystroke {
                    started: false,
                    generation,
                }
            }
            None => {
                self.active.insert(
                    chat_id.clone(),
                    Armed {
                        generation,
                        timer: None,
                    },
                );
                Keystroke {
                    started: true,
                    generation,
                }
            }
        }
    }

    pub fn attach_timer(&mut self, chat_id: &ChatId, generation: u64, timer: AbortHandle) {
        match self.active.get_mut(chat_id) {
            Some(armed) if armed.generation == generation => armed.timer = Some(timer),
            _ => timer.abort(),
        }
    }

    /// Idle timer fired. Returns `true` when `typing(false)` must be sent.
    pub fn expire(&mut self, chat_id: &ChatId, generation: u64) -> bool {
        match self.active.get(chat_id) {
            Some(armed) if armed.generation == generation => {
                self.active.remove(chat_id);
                true
            }
            _ => false,
        }
    }

    /// Explicit stop, e.g. the message was sent. Returns `true` when
    /// `typing(false)` must be sent.
    pub fn stop(&mut self, chat_id: &ChatId) -> bool {
        match self.active.remove(chat_id) {
            Some(armed) => {
                if let Some(timer) = armed.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    pub fn is_typing(&self, chat_id: &ChatId) -> bool {
        self.active.contains_key(chat_id)
    }
}
