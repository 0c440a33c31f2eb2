use std::time::Duration;

use futures::future::BoxFuture;
use snafu::Snafu;

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Answers one prompt with one outbound exchange.
///
/// Callers hand over a prompt that is already trimmed and non-empty; implementations
/// do not validate it again. Every call performs exactly one request, without retry
/// or caching, and every failure resolves to [`DispatchError`].
pub trait PromptDispatcher: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn send<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, DispatchResult<String>>;
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DispatchError {
    #[snafu(display("answering endpoint is not configured for dispatcher '{dispatcher_id}'"))]
    MissingEndpoint {
        stage: &'static str,
        dispatcher_id: String,
    },
    #[snafu(display("missing API key for dispatcher '{dispatcher_id}'"))]
    MissingApiKey {
        stage: &'static str,
        dispatcher_id: String,
    },
    #[snafu(display("dispatcher kind '{kind}' is not supported"))]
    UnsupportedDispatcher { stage: &'static str, kind: String },
    #[snafu(display("failed to build http client on `{stage}`, {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("transport failed on `{stage}`, {source}"))]
    Transport {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("no answer within {after:?} on `{stage}`"))]
    Timeout { stage: &'static str, after: Duration },
    #[snafu(display("answering service returned status {status}: {body}"))]
    Status {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("malformed answer on `{stage}`: {details}"))]
    MalformedResponse {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("rig http client failed on `{stage}`, {source}"))]
    RigHttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
}

impl DispatchError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::MissingEndpoint { stage, .. }
            | Self::MissingApiKey { stage, .. }
            | Self::UnsupportedDispatcher { stage, .. }
            | Self::BuildClient { stage, .. }
            | Self::Transport { stage, .. }
            | Self::Timeout { stage, .. }
            | Self::Status { stage, .. }
            | Self::MalformedResponse { stage, .. }
            | Self::RigHttpClient { stage, .. }
            | Self::CompletionsFailed { stage, .. } => stage,
        }
    }

    /// Maps a reqwest failure, splitting client-side timeouts from other transport errors.
    pub(crate) fn from_reqwest(
        stage: &'static str,
        timeout: Duration,
        source: reqwest::Error,
    ) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                stage,
                after: timeout,
            }
        } else {
            Self::Transport { stage, source }
        }
    }
}

/// Rejects answers that would produce an empty transcript entry.
pub(crate) fn non_blank_answer(stage: &'static str, answer: String) -> DispatchResult<String> {
    if answer.trim().is_empty() {
        return MalformedResponseSnafu {
            stage,
            details: "answer is blank".to_string(),
        }
        .fail();
    }

    Ok(answer)
}
