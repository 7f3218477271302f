//! The shared, append-only conversation transcript.

use std::sync::Mutex;

use stepwise_core::Message;

/// Ordered message history guarded by a mutex.
///
/// Readers always get a copy; the loop is the only writer during a run.
#[derive(Debug, Default)]
pub(crate) struct Transcript {
    messages: Mutex<Vec<Message>>,
}

impl Transcript {
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Message>> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn reset(&self, messages: Vec<Message>) {
        *self.lock() = messages;
    }

    pub(crate) fn push(&self, message: Message) {
        self.lock().push(message);
    }

    pub(crate) fn snapshot(&self) -> Vec<Message> {
        self.lock().clone()
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }
}
