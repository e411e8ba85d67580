//! OpenAI Chat Completions
//!
//! `LlmProvider` over `/v1/chat/completions`. `base_url` points it at any
//! server speaking the same protocol.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::provider::{require_api_key, LlmProvider};
use super::types::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, ProviderConfig, StopReason,
    UsageStats,
};
use crate::http_client::build_http_client;

const CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const MODELS_URL: &str = "https://api.openai.com/v1/models";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<&'a Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl From<ChatCompletion> for LlmResponse {
    fn from(completion: ChatCompletion) -> Self {
        let (content, stop_reason) = match completion.choices.into_iter().next() {
            Some(choice) => (
                choice.message.and_then(|m| m.content),
                choice
                    .finish_reason
                    .as_deref()
                    .map_or(StopReason::EndTurn, StopReason::from),
            ),
            None => (None, StopReason::EndTurn),
        };
        LlmResponse {
            content,
            stop_reason,
            usage: completion
                .usage
                .map(|u| UsageStats {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                })
                .unwrap_or_default(),
            model: completion.model,
        }
    }
}

pub struct OpenAIProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(CHAT_URL)
    }

    fn request<'a>(
        &'a self,
        system: Option<&'a Message>,
        messages: &'a [Message],
        options: &LlmRequestOptions,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: system.into_iter().chain(messages).collect(),
            temperature: options
                .temperature_override
                .unwrap_or(self.config.temperature),
            max_tokens: options.max_tokens_override.unwrap_or(self.config.max_tokens),
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout {
                seconds: self.config.timeout_secs,
            }
        } else {
            LlmError::NetworkError {
                message: err.to_string(),
            }
        }
    }
}

/// Map a non-success status and its body onto `LlmError`.
fn status_error(status: u16, body: String, model: &str) -> LlmError {
    match status {
        401 | 403 => LlmError::AuthenticationFailed { message: body },
        404 => LlmError::ModelNotFound {
            model: model.to_string(),
        },
        429 => LlmError::RateLimited {
            message: body,
            retry_after: None,
        },
        400..=499 => LlmError::InvalidRequest { message: body },
        _ => LlmError::ServerError {
            message: body,
            status: Some(status),
        },
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let api_key = require_api_key(&self.config, self.name())?;
        let system = system.map(Message::system);
        let body = self.request(system.as_ref(), &messages, &request_options);
        debug!(model = %self.config.model, messages = body.messages.len(), "chat completion request");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), text, &self.config.model));
        }

        let completion: ChatCompletion =
            response.json().await.map_err(|e| LlmError::ParseError {
                message: format!("invalid chat completion: {}", e),
            })?;
        Ok(completion.into())
    }

    async fn health_check(&self) -> LlmResult<()> {
        let api_key = require_api_key(&self.config, self.name())?;
        let response = self
            .client
            .get(MODELS_URL)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(status_error(status.as_u16(), text, &self.config.model))
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}
