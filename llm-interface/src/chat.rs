use crate::parse::parse_analysis;
use crate::prompt::{system_prompt, user_prompt};
use crate::LlmProvider;
use grepr_core::{
    AiConfig, AiProviderKind, CategorySet, CoreError, LlmError, PostAnalysis, PostRecord,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

/// Client for any backend speaking the OpenAI chat-completions protocol
/// (Groq, DeepSeek, OpenAI, LM Studio).
#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    http_client: Client,
    kind: AiProviderKind,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    prompt_max_chars: usize,
    timeout_secs: u64,
    categories: CategorySet,
}

impl ChatCompletionClient {
    pub fn new(config: &AiConfig, categories: CategorySet) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            kind: config.provider,
            endpoint: format!("{}/chat/completions", config.base_url().trim_end_matches('/')),
            model: config.model().to_string(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            prompt_max_chars: config.prompt_max_chars,
            timeout_secs: config.timeout_secs,
            categories,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn complete(&self, system: String, user: String) -> Result<String, LlmError> {
        let provider = self.kind.to_string();
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut request = self.http_client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::RequestTimeout {
                    provider: provider.clone(),
                }
            } else {
                warn!("{} request failed after {}s budget: {}", provider, self.timeout_secs, e);
                LlmError::ServiceUnavailable {
                    provider: provider.clone(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = response.text().await.unwrap_or_else(|e| {
                debug!("Could not read {} error body: {}", self.kind.as_str(), e);
                String::new()
            });
            return Err(self.error_for_status(status, retry_after, text));
        }

        let parsed: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponseFormat {
                    provider: provider.clone(),
                    details: e.to_string(),
                })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::InvalidResponseFormat {
                provider,
                details: "empty completion".to_string(),
            })
    }

    fn error_for_status(
        &self,
        status: StatusCode,
        retry_after: Option<u64>,
        body: String,
    ) -> LlmError {
        let provider = self.kind.to_string();
        match status.as_u16() {
            401 | 403 => LlmError::InvalidApiKey { provider },
            404 => LlmError::ModelNotAvailable {
                model: self.model.clone(),
            },
            429 => LlmError::RateLimitExceeded {
                provider,
                retry_after: retry_after.unwrap_or(60),
            },
            _ if status.is_server_error() => LlmError::ServiceUnavailable { provider },
            code => LlmError::RequestFailed {
                provider,
                status_code: code,
                body: body.chars().take(300).collect(),
            },
        }
    }
}

impl LlmProvider for ChatCompletionClient {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    async fn analyze_post(&self, post: &PostRecord) -> Result<PostAnalysis, CoreError> {
        let system = system_prompt(&self.categories);
        let user = user_prompt(post, self.prompt_max_chars);

        debug!(
            "Analysing post {} with {} ({})",
            post.reddit_id, self.kind, self.model
        );
        let content = self.complete(system, user).await?;

        parse_analysis(&content, &self.categories).map_err(|details| {
            CoreError::Llm(LlmError::InvalidResponseFormat {
                provider: self.kind.to_string(),
                details,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grepr_core::RedditPost;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str, provider: AiProviderKind) -> AiConfig {
        AiConfig {
            provider,
            api_key: Some("sk-test".to_string()),
            base_url: Some(base_url.to_string()),
            ..AiConfig::default()
        }
    }

    fn record() -> PostRecord {
        PostRecord::from_reddit(
            RedditPost {
                id: "p1".to_string(),
                subreddit: "vosfinances".to_string(),
                title: "Premier 100k atteint".to_string(),
                selftext: "A 31 ans, grâce au DCA sur CW8.".to_string(),
                author: "a".to_string(),
                score: 300,
                num_comments: 80,
                upvote_ratio: 0.98,
                permalink: "/r/vosfinances/comments/p1/x/".to_string(),
                created_utc: 1_700_000_000,
            },
            None,
        )
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
    }

    #[test]
    fn test_endpoint_built_from_base_url() {
        let client = ChatCompletionClient::new(
            &config("http://localhost:1234/v1/", AiProviderKind::Local),
            CategorySet::default(),
        )
        .unwrap();
        assert_eq!(client.endpoint(), "http://localhost:1234/v1/chat/completions");
        assert_eq!(client.model(), "deepseek");
        assert_eq!(client.name(), "local");
    }

    #[tokio::test]
    async fn test_analyze_post_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "llama-3.3-70b-versatile"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                r#"{"category": "Milestone", "summary": "100k à 31 ans.", "key_advice": ["Continuer le DCA"], "tags": ["CW8"], "consensus": null}"#,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatCompletionClient::new(
            &config(&server.uri(), AiProviderKind::Groq),
            CategorySet::default(),
        )
        .unwrap();

        let analysis = client.analyze_post(&record()).await.unwrap();
        assert_eq!(analysis.category, "Milestone");
        assert_eq!(analysis.key_advice, vec!["Continuer le DCA"]);
        assert_eq!(analysis.tags, vec!["CW8"]);
    }

    #[tokio::test]
    async fn test_rate_limit_is_mapped() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let client = ChatCompletionClient::new(
            &config(&server.uri(), AiProviderKind::DeepSeek),
            CategorySet::default(),
        )
        .unwrap();

        match client.analyze_post(&record()).await {
            Err(CoreError::Llm(LlmError::RateLimitExceeded {
                provider,
                retry_after,
            })) => {
                assert_eq!(provider, "deepseek");
                assert_eq!(retry_after, 7);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_key_is_mapped() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let client = ChatCompletionClient::new(
            &config(&server.uri(), AiProviderKind::Groq),
            CategorySet::default(),
        )
        .unwrap();

        assert!(matches!(
            client.analyze_post(&record()).await,
            Err(CoreError::Llm(LlmError::InvalidApiKey { .. }))
        ));
    }

    #[tokio::test]
    async fn test_unparsable_answer_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Désolé, je ne peux pas.")))
            .mount(&server)
            .await;

        let client = ChatCompletionClient::new(
            &config(&server.uri(), AiProviderKind::OpenAi),
            CategorySet::default(),
        )
        .unwrap();

        assert!(matches!(
            client.analyze_post(&record()).await,
            Err(CoreError::Llm(LlmError::InvalidResponseFormat { .. }))
        ));
    }
}
