use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::message::AssistantContent;
use rig::prelude::CompletionClient;
use rig::providers::openai;
use snafu::{ResultExt, ensure};

use super::dispatcher::{
    CompletionsFailedSnafu, DispatchResult, MalformedResponseSnafu, MissingApiKeySnafu,
    PromptDispatcher, RigHttpClientSnafu, TimeoutSnafu, non_blank_answer,
};

pub const RIG_OPENAI_DISPATCHER_ID: &str = "openai";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, PartialEq)]
pub struct RigDispatcherConfig {
    pub api_key: String,
    pub base_url: String,
    pub model_id: String,
    pub preamble: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub timeout: Duration,
}

impl RigDispatcherConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_key: api_key.into().trim().to_string(),
            base_url: base_url.into().trim().to_string(),
            model_id: DEFAULT_OPENAI_MODEL.to_string(),
            preamble: None,
            temperature: None,
            max_tokens: None,
            timeout,
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        if !model_id.trim().is_empty() {
            self.model_id = model_id.trim().to_string();
        }
        self
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Answers prompts with a single-turn OpenAI-compatible completion.
pub struct RigDispatcher {
    config: RigDispatcherConfig,
}

impl RigDispatcher {
    pub fn new(config: RigDispatcherConfig) -> DispatchResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-dispatcher-new",
                dispatcher_id: RIG_OPENAI_DISPATCHER_ID,
            }
        );

        Ok(Self { config })
    }

    pub fn model_id(&self) -> &str {
        &self.config.model_id
    }

    fn build_client(config: &RigDispatcherConfig) -> DispatchResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.base_url.is_empty() {
            builder = builder.base_url(config.base_url.as_str());
        }
        builder.build().context(RigHttpClientSnafu {
            stage: "build-client",
        })
    }

    fn preamble(&self) -> Option<&str> {
        self.config
            .preamble
            .as_deref()
            .filter(|preamble| !preamble.trim().is_empty())
    }

    async fn complete(&self, prompt: &str) -> DispatchResult<String> {
        let client = Self::build_client(&self.config)?;
        let model = client.completion_model(self.config.model_id.clone());

        let mut builder = model.completion_request(RigMessage::user(prompt));
        if let Some(preamble) = self.preamble() {
            builder = builder.preamble(preamble.to_string());
        }
        if let Some(temperature) = self.config.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        let response = builder.send().await.context(CompletionsFailedSnafu {
            stage: "send-completion",
        })?;

        // Only text parts become transcript content; tool calls and reasoning are dropped.
        let text = response
            .choice
            .iter()
            .filter_map(|content| match content {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return MalformedResponseSnafu {
                stage: "collect-completion-text",
                details: "completion carried no text content".to_string(),
            }
            .fail();
        }

        non_blank_answer("validate-completion-text", text)
    }
}

impl PromptDispatcher for RigDispatcher {
    fn id(&self) -> &str {
        RIG_OPENAI_DISPATCHER_ID
    }

    fn name(&self) -> &str {
        "Rig OpenAI"
    }

    fn send<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, DispatchResult<String>> {
        async move {
            let timeout = self.config.timeout;
            match tokio::time::timeout(timeout, self.complete(prompt)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        model_id = %self.config.model_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "completion did not finish in time"
                    );
                    TimeoutSnafu {
                        stage: "await-completion",
                        after: timeout,
                    }
                    .fail()
                }
            }
        }
        .boxed()
    }
}
