pub mod chat;
pub mod parse;
pub mod prompt;

pub use chat::ChatCompletionClient;

use grepr_core::{AppConfig, CoreError, PostAnalysis, PostRecord};
use tracing::info;

#[allow(async_fn_in_trait)]
pub trait LlmProvider {
    fn name(&self) -> &str;

    async fn analyze_post(&self, post: &PostRecord) -> Result<PostAnalysis, CoreError>;
}

/// Builds the client for the provider selected in the configuration.
pub fn provider_from_config(config: &AppConfig) -> Result<ChatCompletionClient, CoreError> {
    config.require_ai()?;
    let client = ChatCompletionClient::new(&config.ai, config.category_set())?;
    info!(
        "AI provider: {} (model {}, {})",
        config.ai.provider,
        client.model(),
        client.endpoint()
    );
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use grepr_core::{AiProviderKind, ConfigError};

    #[test]
    fn test_provider_from_config_requires_key() {
        let config = AppConfig::default();
        assert!(matches!(
            provider_from_config(&config),
            Err(CoreError::Config(ConfigError::MissingEnvironmentVariable { .. }))
        ));
    }

    #[test]
    fn test_local_provider_needs_no_key() {
        let mut config = AppConfig::default();
        config.ai.provider = AiProviderKind::Local;
        let client = provider_from_config(&config).unwrap();
        assert_eq!(client.name(), "local");
        assert_eq!(client.endpoint(), "http://localhost:1234/v1/chat/completions");
    }
}
