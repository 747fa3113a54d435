use serde::{Deserialize, Serialize};

use super::provider::{ChatReply, LlmError, LlmProvider, LlmResult};
use crate::conversation::Message;
use crate::http::client::HttpClient;

const ERROR_BODY_MAX_CHARS: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingOptions {
    pub num_ctx: u32,
    pub top_p: f64,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            num_ctx: 8192,
            top_p: 0.95,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    http: HttpClient,
    base_url: String,
    model: String,
    options: SamplingOptions,
}

impl OllamaProvider {
    pub fn new(http: HttpClient, base_url: String, model: String, options: SamplingOptions) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            options,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn build_request<'a>(&'a self, messages: &'a [Message]) -> OllamaChatRequest<'a> {
        OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: OllamaOptions {
                num_ctx: self.options.num_ctx,
                top_p: self.options.top_p,
            },
        }
    }

    fn extract_text(resp: OllamaChatResponse) -> LlmResult<String> {
        let text = resp.message.content;
        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }
}

impl LlmProvider for OllamaProvider {
    async fn chat(&self, messages: &[Message]) -> LlmResult<ChatReply> {
        let payload = self.build_request(messages);
        let resp = self
            .http
            .post_json(&self.endpoint(), None, &payload)
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        if !(200..300).contains(&resp.status) {
            let body = resp.body.chars().take(ERROR_BODY_MAX_CHARS).collect::<String>();
            return Err(LlmError::HttpStatus {
                status: resp.status,
                body,
            });
        }

        let parsed = serde_json::from_str::<OllamaChatResponse>(&resp.body)
            .map_err(|err| LlmError::Parse(err.to_string()))?;
        let text = Self::extract_text(parsed)?;
        Ok(ChatReply { text })
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_ctx: u32,
    top_p: f64,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}
