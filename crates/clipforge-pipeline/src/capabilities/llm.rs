//! HTTP language model client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capabilities::{LlmClient, LlmKind};
use crate::error::{PipelineError, PipelineResult};

/// Language model client over a provider-neutral JSON endpoint.
///
/// The provider base URL and API key come from `LLM_PROVIDER` and
/// `LLM_API_KEY`; the prompt catalogue is the provider's concern, selected
/// by the kind name.
pub struct HttpLlmClient {
    base_url: String,
    api_key: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    input: &'a str,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    text: String,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: Client::new(),
        }
    }

    pub fn from_env() -> PipelineResult<Self> {
        let base_url = std::env::var("LLM_PROVIDER")
            .map_err(|_| PipelineError::unrecoverable("LLM_PROVIDER not set"))?;
        let api_key = std::env::var("LLM_API_KEY")
            .map_err(|_| PipelineError::unrecoverable("LLM_API_KEY not set"))?;
        Ok(Self::new(base_url, api_key))
    }

    fn classify_status(status: StatusCode, retry_after: Option<u64>, body: &str) -> PipelineError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return PipelineError::RateLimited { retry_after };
        }
        if status.is_server_error() {
            return PipelineError::transient(format!("llm returned {status}"));
        }
        PipelineError::unrecoverable(format!("llm returned {status}: {body}"))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn call(&self, kind: LlmKind, input: &str) -> PipelineResult<String> {
        let url = format!("{}/v1/completions", self.base_url.trim_end_matches('/'));
        debug!(kind = kind.as_str(), input_len = input.len(), "llm call");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest {
                prompt: kind.as_str(),
                input,
                response_format: "json",
            })
            .send()
            .await
            .map_err(|e| PipelineError::transient(format!("llm request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, retry_after, &body));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::transient(format!("llm response truncated: {e}")))?;

        Ok(completion.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let err = HttpLlmClient::classify_status(StatusCode::TOO_MANY_REQUESTS, Some(7), "");
        assert!(matches!(
            err,
            PipelineError::RateLimited {
                retry_after: Some(7)
            }
        ));

        assert!(HttpLlmClient::classify_status(StatusCode::SERVICE_UNAVAILABLE, None, "")
            .is_transient());
        assert!(!HttpLlmClient::classify_status(StatusCode::BAD_REQUEST, None, "nope")
            .is_transient());
    }

    #[tokio::test]
    async fn call_retries_surface_status() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/completions"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = HttpLlmClient::new(server.uri(), "test-key");
        let err = client.call(LlmKind::Outline, "chunk").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn call_returns_text() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "{\"items\":[]}"
            })))
            .mount(&server)
            .await;

        let client = HttpLlmClient::new(server.uri(), "test-key");
        let text = client.call(LlmKind::Outline, "chunk").await.unwrap();
        assert_eq!(text, "{\"items\":[]}");
    }
}
