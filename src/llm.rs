//! Minimal client for OpenAI-compatible chat completion endpoints.
//!
//! Shared by the LLM judge and the LLM user simulator. Non-streaming only;
//! each call is one request with a hard timeout and bounded retries.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use backon::Retryable;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::channel::retry::llm_backoff;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl ChatClient {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(ChatClient {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    async fn complete_once(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.0,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("chat endpoint returned HTTP {status}: {text}");
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("chat response carried no content"))
    }

    /// One completion with bounded retries on transport or server failure.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        (|| self.complete_once(messages))
            .retry(llm_backoff())
            .notify(|err, dur| {
                warn!(error = %err, "chat call failed, retrying in {dur:?}");
            })
            .await
    }
}
