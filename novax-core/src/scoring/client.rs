//! HTTP completion client for the scoring LLM.

use crate::config::{LlmConfig, LlmProvider};
use crate::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::json;
use std::time::Duration;

const MAX_TOKENS: u32 = 600;

/// LLM completion interface used by scoring.
pub trait LlmCompletionClient: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String>;

    /// Model name recorded in logs
    fn model(&self) -> &str;
}

/// Provider-aware HTTP client.
///
/// Calls block on a private current-thread runtime, so this must not be
/// used from inside an async executor thread.
pub struct HttpCompletionClient {
    model: String,
    provider: LlmProvider,
    endpoint: String,
    api_key: Option<String>,
    temperature: f32,
    system_prompt: String,
    runtime: tokio::runtime::Runtime,
    http: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(config: &LlmConfig, system_prompt: impl Into<String>) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| config.provider.default_endpoint().to_string());
        let api_key = config.api_key.clone().or_else(|| {
            config
                .provider
                .api_key_env()
                .and_then(|var| std::env::var(var).ok())
        });

        if config.provider.api_key_env().is_some() && api_key.is_none() {
            return Err(Error::Config(
                "llm.api_key (or provider env var) is required".to_string(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Config(format!("failed to build tokio runtime: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            model: config.model.clone(),
            provider: config.provider,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            temperature: config.temperature,
            system_prompt: system_prompt.into(),
            runtime,
            http,
        })
    }

    fn request(&self, prompt: &str) -> Result<(String, HeaderMap, serde_json::Value)> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let key = self.api_key.as_deref().unwrap_or_default();

        let request = match self.provider {
            LlmProvider::Ollama => (
                format!("{}/api/generate", self.endpoint),
                headers,
                json!({
                    "model": self.model,
                    "system": self.system_prompt,
                    "prompt": prompt,
                    "stream": false,
                    "options": { "temperature": self.temperature },
                }),
            ),
            LlmProvider::Claude => {
                headers.insert(
                    "x-api-key",
                    HeaderValue::from_str(key)
                        .map_err(|e| Error::Config(format!("invalid claude api key header: {e}")))?,
                );
                headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
                (
                    format!("{}/v1/messages", self.endpoint),
                    headers,
                    json!({
                        "model": self.model,
                        "max_tokens": MAX_TOKENS,
                        "temperature": self.temperature,
                        "system": self.system_prompt,
                        "messages": [{ "role": "user", "content": prompt }],
                    }),
                )
            }
            LlmProvider::OpenAI => {
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {key}"))
                        .map_err(|e| Error::Config(format!("invalid auth header: {e}")))?,
                );
                (
                    format!("{}/v1/chat/completions", self.endpoint),
                    headers,
                    json!({
                        "model": self.model,
                        "temperature": self.temperature,
                        "messages": [
                            { "role": "system", "content": self.system_prompt },
                            { "role": "user", "content": prompt }
                        ]
                    }),
                )
            }
        };
        Ok(request)
    }
}

/// Pull the completion text out of a provider response body.
fn extract_completion(provider: LlmProvider, body: &serde_json::Value) -> Option<String> {
    let text = match provider {
        LlmProvider::Ollama => body.get("response"),
        LlmProvider::Claude => body
            .get("content")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.get("text")),
        LlmProvider::OpenAI => body
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.get("message"))
            .and_then(|v| v.get("content")),
    };
    text.and_then(|v| v.as_str()).map(ToString::to_string)
}

fn provider_name(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::Ollama => "ollama",
        LlmProvider::Claude => "claude",
        LlmProvider::OpenAI => "openai",
    }
}

impl LlmCompletionClient for HttpCompletionClient {
    fn complete(&self, prompt: &str) -> Result<String> {
        let name = provider_name(self.provider);
        let (url, headers, payload) = self.request(prompt)?;

        self.runtime.block_on(async {
            let resp = self
                .http
                .post(url)
                .headers(headers)
                .json(&payload)
                .send()
                .await
                .map_err(|e| Error::Assessment(format!("{name} request failed: {e}")))?;
            let status = resp.status();
            let body = resp
                .text()
                .await
                .map_err(|e| Error::Assessment(format!("{name} read body failed: {e}")))?;
            if !status.is_success() {
                return Err(Error::Assessment(format!(
                    "{name} returned {}: {}",
                    status.as_u16(),
                    body
                )));
            }
            let json: serde_json::Value = serde_json::from_str(&body)
                .map_err(|e| Error::Assessment(format!("{name} returned invalid JSON: {e}")))?;
            extract_completion(self.provider, &json)
                .ok_or_else(|| Error::Assessment(format!("{name} response missing completion text")))
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm_config(provider: LlmProvider, api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider,
            model: "test-model".to_string(),
            endpoint: Some("http://localhost:11434/".to_string()),
            api_key: api_key.map(ToString::to_string),
            timeout_secs: 30,
            temperature: 0.2,
        }
    }

    #[test]
    fn extracts_provider_completion_text() {
        let ollama = json!({ "response": "[]" });
        assert_eq!(
            extract_completion(LlmProvider::Ollama, &ollama).as_deref(),
            Some("[]")
        );

        let claude = json!({ "content": [{ "type": "text", "text": "{}" }] });
        assert_eq!(
            extract_completion(LlmProvider::Claude, &claude).as_deref(),
            Some("{}")
        );

        let openai = json!({ "choices": [{ "message": { "content": "ok" } }] });
        assert_eq!(
            extract_completion(LlmProvider::OpenAI, &openai).as_deref(),
            Some("ok")
        );

        assert!(extract_completion(LlmProvider::OpenAI, &json!({})).is_none());
    }

    #[test]
    fn builds_provider_requests() {
        let client =
            HttpCompletionClient::new(&llm_config(LlmProvider::Ollama, None), "system").unwrap();
        let (url, _, payload) = client.request("score this").unwrap();
        assert_eq!(url, "http://localhost:11434/api/generate");
        assert_eq!(payload["prompt"], "score this");
        assert_eq!(client.model(), "test-model");

        let client =
            HttpCompletionClient::new(&llm_config(LlmProvider::Claude, Some("k")), "system")
                .unwrap();
        let (url, headers, payload) = client.request("score this").unwrap();
        assert!(url.ends_with("/v1/messages"));
        assert_eq!(headers["x-api-key"], "k");
        assert_eq!(payload["system"], "system");
    }
}
