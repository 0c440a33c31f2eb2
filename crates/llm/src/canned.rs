use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::dispatcher::{DispatchResult, PromptDispatcher};

pub const CANNED_DISPATCHER_ID: &str = "canned";
pub const DEFAULT_CANNED_REPLY: &str =
    "This is a sample response from your AI tutor. Connect an answering service for real answers.";
pub const DEFAULT_CANNED_DELAY: Duration = Duration::from_millis(1000);
/// Placeholder replaced by the prompt inside a reply template.
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

/// Offline stand-in that answers after a fixed delay.
///
/// The reply template may contain [`PROMPT_PLACEHOLDER`] to echo the prompt back.
#[derive(Debug, Clone)]
pub struct CannedDispatcher {
    reply_template: String,
    delay: Duration,
}

impl CannedDispatcher {
    pub fn new(reply_template: impl Into<String>, delay: Duration) -> Self {
        let reply_template = reply_template.into();
        let reply_template = if reply_template.trim().is_empty() {
            DEFAULT_CANNED_REPLY.to_string()
        } else {
            reply_template
        };

        Self {
            reply_template,
            delay,
        }
    }

    pub fn echo(delay: Duration) -> Self {
        Self::new(PROMPT_PLACEHOLDER, delay)
    }

    pub fn reply_for(&self, prompt: &str) -> String {
        self.reply_template.replace(PROMPT_PLACEHOLDER, prompt)
    }
}

impl Default for CannedDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CANNED_REPLY, DEFAULT_CANNED_DELAY)
    }
}

impl PromptDispatcher for CannedDispatcher {
    fn id(&self) -> &str {
        CANNED_DISPATCHER_ID
    }

    fn name(&self) -> &str {
        "Canned tutor"
    }

    fn send<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, DispatchResult<String>> {
        async move {
            tokio::time::sleep(self.delay).await;
            Ok(self.reply_for(prompt))
        }
        .boxed()
    }
}
