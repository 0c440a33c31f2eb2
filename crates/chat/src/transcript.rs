use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::watch;

use crate::message::{Message, MessageId};

/// Append-only, ordered list of messages for one session.
///
/// Readers hold [`TranscriptSnapshot`]s. An append copies the list only while some
/// snapshot still shares it, so a snapshot being iterated never sees later appends.
pub struct Transcript {
    snapshots: watch::Sender<TranscriptSnapshot>,
}

impl Transcript {
    pub fn new() -> Self {
        let (snapshots, _) = watch::channel(TranscriptSnapshot::default());
        Self { snapshots }
    }

    pub fn append(&self, message: Message) {
        let message_id = message.id();
        self.snapshots.send_modify(|snapshot| {
            Arc::make_mut(&mut snapshot.messages).push(message);
        });
        tracing::trace!(message_id = %message_id, len = self.len(), "transcript appended");
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receives a fresh snapshot after every append.
    ///
    /// The channel closes once the transcript is dropped together with its session.
    pub fn subscribe(&self) -> watch::Receiver<TranscriptSnapshot> {
        self.snapshots.subscribe()
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of a transcript at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TranscriptSnapshot {
    messages: Arc<Vec<Message>>,
}

impl TranscriptSnapshot {
    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn get(&self, message_id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id() == message_id)
    }

    /// Messages appended after the first `seen` entries.
    pub fn since(&self, seen: usize) -> &[Message] {
        self.messages.get(seen..).unwrap_or_default()
    }
}

impl Deref for TranscriptSnapshot {
    type Target = [Message];

    fn deref(&self) -> &[Message] {
        &self.messages
    }
}

impl<'a> IntoIterator for &'a TranscriptSnapshot {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
