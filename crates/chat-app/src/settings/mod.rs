pub mod state;

pub use state::{EngineSettings, OpenAiSettings, SettingsError, SettingsStore};
