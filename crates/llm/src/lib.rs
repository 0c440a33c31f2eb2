use std::sync::Arc;
use std::time::Duration;

mod answering;
mod canned;
mod dispatcher;
mod rig_adapter;

pub use answering::{
    ANSWERING_SERVICE_DISPATCHER_ID, AnsweringServiceDispatcher, DEFAULT_ANSWER_PATH,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use canned::{
    CANNED_DISPATCHER_ID, CannedDispatcher, DEFAULT_CANNED_DELAY, DEFAULT_CANNED_REPLY,
    PROMPT_PLACEHOLDER,
};
pub use dispatcher::{DispatchError, DispatchResult, PromptDispatcher};
pub use futures::future::BoxFuture;
pub use rig_adapter::{
    DEFAULT_OPENAI_MODEL, RIG_OPENAI_DISPATCHER_ID, RigDispatcher, RigDispatcherConfig,
};

/// Everything needed to pick and build one dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatcherConfig {
    AnsweringService {
        base_url: String,
        answer_path: String,
        timeout: Duration,
    },
    RigOpenAi(RigDispatcherConfig),
    Canned {
        reply_template: String,
        delay: Duration,
    },
}

impl DispatcherConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AnsweringService { .. } => ANSWERING_SERVICE_DISPATCHER_ID,
            Self::RigOpenAi(_) => RIG_OPENAI_DISPATCHER_ID,
            Self::Canned { .. } => CANNED_DISPATCHER_ID,
        }
    }
}

pub fn create_dispatcher(config: DispatcherConfig) -> DispatchResult<Arc<dyn PromptDispatcher>> {
    match config {
        DispatcherConfig::AnsweringService {
            base_url,
            answer_path,
            timeout,
        } => Ok(Arc::new(AnsweringServiceDispatcher::new(
            &base_url,
            &answer_path,
            timeout,
        )?)),
        DispatcherConfig::RigOpenAi(config) => Ok(Arc::new(RigDispatcher::new(config)?)),
        DispatcherConfig::Canned {
            reply_template,
            delay,
        } => Ok(Arc::new(CannedDispatcher::new(reply_template, delay))),
    }
}

/// Normalizes user-facing dispatcher kind names to dispatcher ids.
pub fn parse_dispatcher_kind(raw: &str) -> DispatchResult<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "answering-service" | "answering" | "http" => Ok(ANSWERING_SERVICE_DISPATCHER_ID),
        "openai" | "rig-openai" => Ok(RIG_OPENAI_DISPATCHER_ID),
        "canned" | "offline" | "tutor" => Ok(CANNED_DISPATCHER_ID),
        _ => Err(DispatchError::UnsupportedDispatcher {
            stage: "parse-dispatcher-kind",
            kind: raw.trim().to_string(),
        }),
    }
}
