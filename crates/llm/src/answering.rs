use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};

use super::dispatcher::{
    BuildClientSnafu, DispatchError, DispatchResult, MalformedResponseSnafu, MissingEndpointSnafu,
    PromptDispatcher, StatusSnafu, non_blank_answer,
};

pub const ANSWERING_SERVICE_DISPATCHER_ID: &str = "answering-service";
pub const DEFAULT_ANSWER_PATH: &str = "ask";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct PromptBody<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnswerBody {
    answer: String,
}

/// Remote answering service spoken to with `POST {prompt}` / `{answer}` JSON bodies.
pub struct AnsweringServiceDispatcher {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl AnsweringServiceDispatcher {
    pub fn new(base_url: &str, answer_path: &str, timeout: Duration) -> DispatchResult<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        ensure!(
            !base_url.is_empty(),
            MissingEndpointSnafu {
                stage: "answering-dispatcher-new",
                dispatcher_id: ANSWERING_SERVICE_DISPATCHER_ID,
            }
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context(BuildClientSnafu {
                stage: "build-answering-client",
            })?;

        Ok(Self {
            client,
            url: Self::join_url(base_url, answer_path),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn join_url(base_url: &str, answer_path: &str) -> String {
        let answer_path = answer_path.trim().trim_start_matches('/');
        if answer_path.is_empty() {
            base_url.to_string()
        } else {
            format!("{base_url}/{answer_path}")
        }
    }

    async fn ask(&self, prompt: &str) -> DispatchResult<String> {
        let response = self
            .client
            .post(&self.url)
            .json(&PromptBody { prompt })
            .send()
            .await
            .map_err(|source| DispatchError::from_reqwest("send-prompt", self.timeout, source))?;

        let status = response.status();
        let payload = response
            .text()
            .await
            .map_err(|source| DispatchError::from_reqwest("read-answer", self.timeout, source))?;

        if !status.is_success() {
            return StatusSnafu {
                stage: "answer-http-status",
                status: status.as_u16(),
                body: payload,
            }
            .fail();
        }

        let body = serde_json::from_str::<AnswerBody>(&payload).map_err(|error| {
            MalformedResponseSnafu {
                stage: "parse-answer",
                details: error.to_string(),
            }
            .build()
        })?;

        non_blank_answer("validate-answer", body.answer)
    }
}

impl PromptDispatcher for AnsweringServiceDispatcher {
    fn id(&self) -> &str {
        ANSWERING_SERVICE_DISPATCHER_ID
    }

    fn name(&self) -> &str {
        "Answering service"
    }

    fn send<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, DispatchResult<String>> {
        async move {
            let result = self.ask(prompt).await;
            if let Err(error) = &result {
                tracing::debug!(
                    url = %self.url,
                    stage = error.stage(),
                    error = %error,
                    "answering service dispatch failed"
                );
            }
            result
        }
        .boxed()
    }
}
