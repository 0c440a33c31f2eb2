use std::fmt;

/// Stable identifier for one message, used as the rendering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Creates a typed message identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "you",
            Self::Assistant => "tutor",
        }
    }
}

/// One immutable transcript entry.
///
/// Fields are private so a message can never be edited after creation, and the
/// constructor refuses text that is empty after trimming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: MessageId,
    sender: Sender,
    text: String,
}

impl Message {
    /// Creates a message, or `None` when `text` is blank.
    ///
    /// The text is stored as given; callers decide whether to trim it first.
    pub fn new(id: MessageId, sender: Sender, text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return None;
        }

        Some(Self { id, sender, text })
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn sender(&self) -> Sender {
        self.sender
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_from_user(&self) -> bool {
        matches!(self.sender, Sender::User)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_never_becomes_a_message() {
        assert!(Message::new(MessageId::new(1), Sender::User, "").is_none());
        assert!(Message::new(MessageId::new(2), Sender::Assistant, " \n\t ").is_none());
    }

    #[test]
    fn text_is_kept_as_given() {
        let message = Message::new(MessageId::new(7), Sender::Assistant, " line one\nline two ")
            .expect("non-blank text");
        assert_eq!(message.id(), MessageId::new(7));
        assert_eq!(message.sender(), Sender::Assistant);
        assert_eq!(message.text(), " line one\nline two ");
        assert!(!message.is_from_user());
    }
}
