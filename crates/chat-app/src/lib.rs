#![deny(unsafe_code)]

/// Terminal shell that mounts conversational screens over stdin and stdout.
pub mod app;
/// Layered engine settings.
pub mod settings;
pub mod terminal;
