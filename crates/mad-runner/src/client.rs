//! External generation capability — trait, error taxonomy, HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

/// Per-call output constraints for one role-turn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallConstraints {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Ask the provider to constrain the completion to a JSON object.
    pub json_object: bool,
}

/// Failure classes of a generate call.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("rate limited by provider")]
    RateLimited,
    #[error("request timed out")]
    Timeout,
    #[error("server error {status}: {message}")]
    ServerError { status: u16, message: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("provider returned an empty completion")]
    EmptyCompletion,
}

impl GenerateError {
    /// Whether the failure is worth retrying with backoff. Only request
    /// validation (auth, malformed payload) fails a call immediately.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_))
    }
}

/// Opaque "generate text" collaborator. The orchestration layer never sees
/// HTTP details; tests substitute scripted implementations.
#[async_trait]
pub trait GenerateClient: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        constraints: &CallConstraints,
    ) -> Result<String, GenerateError>;
}

/// Explicit client configuration. No ambient/global credential lookup:
/// everything the client needs is passed in at construction.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// OpenAI-compatible API root, e.g. "https://openrouter.ai/api/v1".
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

/// reqwest-backed client for OpenAI-compatible chat-completions providers.
pub struct HttpGenerateClient {
    http: reqwest::Client,
    config: ClientConfig,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl HttpGenerateClient {
    pub fn new(config: ClientConfig) -> Result<Self, GenerateError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerateError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn request_body(&self, prompt: &str, constraints: &CallConstraints) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": constraints.max_tokens,
            "temperature": constraints.temperature,
        });
        if constraints.json_object {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }
}

#[async_trait]
impl GenerateClient for HttpGenerateClient {
    async fn generate(
        &self,
        prompt: &str,
        constraints: &CallConstraints,
    ) -> Result<String, GenerateError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(prompt, constraints))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerateError::Timeout
                } else {
                    GenerateError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(GenerateError::RateLimited);
        }
        if status.is_server_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerateError::ServerError {
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerateError::InvalidRequest(format!(
                "{}: {}",
                status.as_u16(),
                message
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerateError::Transport(format!("bad response body: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(GenerateError::EmptyCompletion);
        }
        debug!(model = %self.config.model, chars = content.len(), "completion received");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpGenerateClient {
        HttpGenerateClient::new(ClientConfig {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: "test-key".to_string(),
            model: "meta-llama/llama-3.3-70b-instruct".to_string(),
            timeout: Duration::from_secs(120),
        })
        .unwrap()
    }

    #[test]
    fn test_transient_classification() {
        assert!(GenerateError::RateLimited.is_transient());
        assert!(GenerateError::Timeout.is_transient());
        assert!(GenerateError::ServerError {
            status: 502,
            message: String::new()
        }
        .is_transient());
        assert!(GenerateError::Transport("reset".into()).is_transient());
        assert!(GenerateError::EmptyCompletion.is_transient());
        assert!(!GenerateError::InvalidRequest("bad auth".into()).is_transient());
    }

    #[test]
    fn test_request_body_shape() {
        let c = client();
        let body = c.request_body(
            "responda",
            &CallConstraints {
                max_tokens: 350,
                temperature: 0.7,
                json_object: true,
            },
        );
        assert_eq!(body["model"], "meta-llama/llama-3.3-70b-instruct");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], 350);
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_request_body_omits_response_format_for_free_text() {
        let c = client();
        let body = c.request_body(
            "responda",
            &CallConstraints {
                max_tokens: 2000,
                temperature: 0.7,
                json_object: false,
            },
        );
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_chat_response_parsing() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"olá"}}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("olá"));
    }
}
