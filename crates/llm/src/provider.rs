//! Chat Provider Trait

use async_trait::async_trait;

use super::types::{LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, ProviderConfig};

/// A conversational model that answers a full message list in one call.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn model(&self) -> &str;

    /// `messages` ends with the user turn; `system` is sent ahead of it.
    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse>;

    async fn health_check(&self) -> LlmResult<()>;

    fn config(&self) -> &ProviderConfig;
}

/// The configured key, or `AuthenticationFailed` naming the provider.
pub fn require_api_key<'a>(config: &'a ProviderConfig, provider: &str) -> LlmResult<&'a str> {
    config
        .api_key
        .as_deref()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| LlmError::AuthenticationFailed {
            message: format!("no API key configured for {}", provider),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_api_key() {
        let mut config = ProviderConfig::default();
        assert!(matches!(
            require_api_key(&config, "openai"),
            Err(LlmError::AuthenticationFailed { message }) if message.contains("openai")
        ));

        config.api_key = Some("  ".to_string());
        assert!(require_api_key(&config, "openai").is_err());

        config.api_key = Some("sk-test".to_string());
        assert_eq!(require_api_key(&config, "openai").unwrap(), "sk-test");
    }
}
