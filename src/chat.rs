//! Chat-completion provider boundary.
//!
//! A [`ChatClient`] turns an ordered list of role-tagged messages into a
//! single generated reply plus token accounting. The model is chosen per
//! call so the store's selected default model flows through unchanged.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ChatConfig;
use crate::error::ApiError;
use crate::models::{ChatMessage, ChatResponse, Role, Usage};
use crate::retry::{send_with_retry, RetryPolicy};

/// A chat model the CLI knows how to budget for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: &'static str,
    /// Context window in tokens.
    pub context_tokens: usize,
}

pub const KNOWN_MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "gpt-3.5-turbo",
        context_tokens: 16_385,
    },
    ModelInfo {
        name: "gpt-4",
        context_tokens: 8_192,
    },
    ModelInfo {
        name: "gpt-4-turbo",
        context_tokens: 128_000,
    },
    ModelInfo {
        name: "gpt-4o",
        context_tokens: 128_000,
    },
    ModelInfo {
        name: "gpt-4o-mini",
        context_tokens: 128_000,
    },
];

pub fn lookup_model(name: &str) -> Option<&'static ModelInfo> {
    KNOWN_MODELS.iter().find(|m| m.name == name)
}

/// Trait for chat-completion providers.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Continue a conversation given a (possibly synthesized) message history.
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<ChatResponse>;
}

/// Chat client for the OpenAI `POST /chat/completions` endpoint.
pub struct OpenAIChat {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

impl OpenAIChat {
    pub fn new(
        api_key: String,
        base_url: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not in the environment.
    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        let Ok(api_key) = std::env::var("OPENAI_API_KEY") else {
            bail!("OPENAI_API_KEY environment variable not set");
        };
        Self::new(
            api_key,
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
            config.retry_policy(),
        )
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatClient for OpenAIChat {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<ChatResponse> {
        tracing::debug!("chat: {} messages to {}", messages.len(), model);

        let body = ChatRequest { model, messages };
        let url = format!("{}/chat/completions", self.base_url);
        let response = send_with_retry("openai", &self.retry, || {
            self.client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
        })
        .await?;

        let text = response.text().await.map_err(|source| ApiError::Http {
            provider: "openai",
            source,
        })?;
        let resp: OpenAiChatResponse =
            serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse {
                provider: "openai",
                detail: e.to_string(),
            })?;

        let content = resp
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or(ApiError::EmptyResponse { provider: "openai" })?;

        let response = ChatResponse {
            model: resp.model.unwrap_or_else(|| model.to_string()),
            message: ChatMessage {
                role: Role::Assistant,
                content,
            },
            usage: resp.usage,
        };
        log_usage(messages, &response);
        Ok(response)
    }
}

/// Log total tokens and the observed chars/token ratio.
fn log_usage(messages: &[ChatMessage], response: &ChatResponse) {
    if response.usage.total_tokens == 0 {
        return;
    }
    let total_bytes: usize =
        messages.iter().map(|m| m.content.len()).sum::<usize>() + response.content().len();
    let ratio = total_bytes as f64 / response.usage.total_tokens as f64;
    tracing::debug!(
        total_tokens = response.usage.total_tokens,
        "char/token ratio: {:.1}",
        ratio
    );
}
