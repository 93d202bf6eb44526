//! OpenAI-compatible chat backend
//!
//! One HTTP backend serves both configured model instances; the model
//! name, temperature and token ceiling ride on each request. Transient
//! failures retry with exponential backoff. Streaming parses SSE lines
//! and forwards tokens as they arrive; a dropped receiver cancels the
//! generation.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use wiki_agent_core::{
    text::estimate_tokens, ChatMessage, ChatModel, ChatRequest, ChatResponse, Error, FinishReason,
    Result, TokenUsage,
};

use crate::LlmError;

/// Backend connection configuration
#[derive(Debug, Clone)]
pub struct OpenAiBackendConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for OpenAiBackendConfig {
    fn default() -> Self {
        Self {
            endpoint: wiki_agent_config::constants::endpoints::LLM_DEFAULT.to_string(),
            api_key: None,
            model: "main-large".to_string(),
            timeout: Duration::from_secs(120),
            max_retries: 3,
            initial_backoff: Duration::from_millis(250),
        }
    }
}

/// OpenAI-compatible chat model instance
pub struct OpenAiBackend {
    client: Client,
    config: OpenAiBackendConfig,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiBackendConfig) -> std::result::Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Network(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn chat_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        )
    }

    fn request_builder(&self) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(self.chat_url());
        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    fn wire_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: m.role.to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn prompt_token_estimate(messages: &[ChatMessage]) -> u32 {
        messages
            .iter()
            .map(|m| estimate_tokens(&m.content) as u32)
            .sum()
    }

    fn is_retryable(error: &LlmError) -> bool {
        matches!(error, LlmError::Network(_) | LlmError::RateLimited)
    }

    async fn execute(&self, body: &WireRequest) -> std::result::Result<WireResponse, LlmError> {
        let response = self.request_builder().json(body).send().await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(LlmError::Network(format!("server error {}: {}", status, text)));
            }
            return Err(LlmError::Api(format!("HTTP {}: {}", status, text)));
        }
        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ChatModel for OpenAiBackend {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = WireRequest {
            model: self.config.model.clone(),
            messages: Self::wire_messages(&request.messages),
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
            n: Some(1),
            stream: Some(false),
        };

        let mut backoff = self.config.initial_backoff;
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    model = %self.config.model,
                    "Chat request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.execute(&body).await {
                Ok(parsed) => {
                    let choice = parsed.choices.into_iter().next().ok_or_else(|| {
                        Error::LlmUnavailable("no choices in response".to_string())
                    })?;
                    let usage = parsed
                        .usage
                        .map(|u| TokenUsage {
                            prompt_tokens: u.prompt_tokens,
                            completion_tokens: u.completion_tokens,
                        })
                        .unwrap_or_else(|| TokenUsage {
                            prompt_tokens: Self::prompt_token_estimate(&request.messages),
                            completion_tokens: estimate_tokens(
                                choice.message.as_ref().map(|m| m.content.as_str()).unwrap_or(""),
                            ) as u32,
                        });
                    return Ok(ChatResponse {
                        text: choice.message.map(|m| m.content).unwrap_or_default(),
                        usage,
                        finish_reason: match choice.finish_reason.as_deref() {
                            Some("length") => FinishReason::Length,
                            _ => FinishReason::Stop,
                        },
                    });
                }
                Err(e) if Self::is_retryable(&e) => last_error = Some(e),
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_error
            .map(Into::into)
            .unwrap_or_else(|| Error::LlmUnavailable("max retries exceeded".into())))
    }

    async fn complete_streaming(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<ChatResponse> {
        let body = WireRequest {
            model: self.config.model.clone(),
            messages: Self::wire_messages(&request.messages),
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
            n: Some(1),
            stream: Some(true),
        };

        let response = self
            .request_builder()
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::LlmUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::LlmUnavailable(format!("HTTP {}: {}", status, text)));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full_text = String::new();
        let mut cancelled = false;

        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::LlmUnavailable(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer.drain(..=line_end);

                if line.is_empty() || line == "data: [DONE]" {
                    continue;
                }
                let Some(json) = line.strip_prefix("data: ") else {
                    continue;
                };
                let Ok(chunk) = serde_json::from_str::<WireStreamChunk>(json) else {
                    continue;
                };
                if let Some(content) = chunk
                    .choices
                    .first()
                    .and_then(|c| c.delta.as_ref())
                    .and_then(|d| d.content.as_ref())
                {
                    full_text.push_str(content);
                    if tx.send(content.clone()).await.is_err() {
                        // Receiver dropped: the client went away
                        cancelled = true;
                        break 'read;
                    }
                }
            }
        }

        let usage = TokenUsage {
            prompt_tokens: Self::prompt_token_estimate(&request.messages),
            completion_tokens: estimate_tokens(&full_text) as u32,
        };

        Ok(ChatResponse {
            text: full_text,
            usage,
            finish_reason: if cancelled {
                FinishReason::Cancelled
            } else {
                FinishReason::Stop
            },
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// Wire types for the OpenAI-compatible API

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: Option<WireMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireStreamChunk {
    choices: Vec<WireStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: Option<WireDelta>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiki_agent_core::ChatRole;

    #[test]
    fn request_serializes_single_choice() {
        let body = WireRequest {
            model: "main-large".into(),
            messages: vec![WireMessage {
                role: "user".into(),
                content: "hello".into(),
            }],
            max_tokens: Some(1500),
            temperature: Some(0.3),
            n: Some(1),
            stream: Some(true),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"n\":1"));
        assert!(json.contains("\"stream\":true"));
        assert!(json.contains("main-large"));
    }

    #[test]
    fn stream_chunk_parses_delta() {
        let json = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        let chunk: WireStreamChunk = serde_json::from_str(json).unwrap();
        assert_eq!(
            chunk.choices[0].delta.as_ref().unwrap().content.as_deref(),
            Some("Hel")
        );
    }

    #[test]
    fn prompt_estimate_counts_all_messages() {
        let messages = vec![
            ChatMessage {
                role: ChatRole::System,
                content: "x".repeat(400),
            },
            ChatMessage {
                role: ChatRole::User,
                content: "y".repeat(400),
            },
        ];
        assert_eq!(OpenAiBackend::prompt_token_estimate(&messages), 200);
    }
}
