#![deny(unsafe_code)]

//! Conversation engine shared by the chat and tutor screens.
//!
//! A [`ConversationScreen`] owns one [`ConversationController`] (and with it one
//! [`Transcript`]) plus a [`PeerVisibilityGuard`] that keeps the host's tab bar hidden
//! while the screen is mounted.

pub mod controller;
/// Immutable transcript entries.
pub mod message;
pub mod screen;
pub mod transcript;
/// Hiding and restoring shared chrome around a screen's lifetime.
pub mod visibility;

pub use controller::{
    ControllerConfig, ConversationController, DEFAULT_FALLBACK_MESSAGE, ExchangeState,
    OverlapPolicy, TurnId,
};
pub use message::{Message, MessageId, Sender};
pub use screen::{ConversationScreen, ExitReason};
pub use transcript::{Transcript, TranscriptSnapshot};
pub use visibility::{PeerRegion, PeerVisibilityGuard, VisibilityConfig};
