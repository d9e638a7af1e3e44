//! OpenAI-compatible decision source.
//!
//! Works with any OpenAI-compatible chat completions API that supports
//! JSON mode, including vLLM, Ollama and the OpenAI API itself.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::*;

/// Instructions sent ahead of every input.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a code reviewer. Respond with a single JSON \
object with fields: risk_level (low|medium|high|critical), risk_score (0-100), confidence \
(0.0-1.0), escalate (bool), findings (array of {id, location {file, line}, severity \
(info|low|medium|high|critical), title, evidence}), required_actions (array of strings), \
summary, notes. Every finding must quote the input as evidence.";

/// OpenAI-compatible decision source.
pub struct OpenAiDecisionSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    system_prompt: String,
    max_tokens: Option<u32>,
}

impl OpenAiDecisionSource {
    /// Create a new OpenAI-compatible source.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: Some(2048),
        }
    }

    /// Create a source pointing to a local vLLM server.
    pub fn vllm(port: u16, model: &str) -> Self {
        Self::new(format!("http://localhost:{}/v1", port), model, None)
    }

    /// Create a source for the OpenAI API.
    pub fn openai(model: &str, api_key: impl Into<String>) -> Self {
        Self::new("https://api.openai.com/v1", model, Some(api_key.into()))
    }

    /// Replace the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Set max output tokens.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn auth_header(&self) -> Option<String> {
        self.api_key.as_ref().map(|k| format!("Bearer {}", k))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
    response_format: ResponseFormat,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<UsageResponse>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Map a non-success HTTP response to a source error.
fn classify_failure(status: StatusCode, retry_after: Option<u64>, body: &str) -> SourceError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return SourceError::RateLimited {
            retry_after_ms: retry_after.map(|secs| secs * 1000),
        };
    }
    if status == StatusCode::BAD_REQUEST && body.contains("context_length_exceeded") {
        return SourceError::ContextLengthExceeded(body.to_string());
    }
    if status == StatusCode::SERVICE_UNAVAILABLE {
        return SourceError::Unavailable(format!("HTTP {}", status));
    }
    SourceError::RequestFailed(format!("HTTP {}: {}", status, body))
}

#[async_trait]
impl DecisionSource for OpenAiDecisionSource {
    fn id(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        let mut request = self.client.get(&url);

        if let Some(auth) = self.auth_header() {
            request = request.header(header::AUTHORIZATION, auth);
        }

        request
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn decide(&self, input: &str) -> Result<CandidateDecision, SourceError> {
        let chat_request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: input,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: 0.0,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
            stream: false,
        };

        let mut http_request = self.client.post(self.chat_completions_url());

        if let Some(auth) = self.auth_header() {
            http_request = http_request.header(header::AUTHORIZATION, auth);
        }

        let response = http_request
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| SourceError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, retry_after, &body));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::Malformed("No choices in response".to_string()))?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(SourceError::ContentFiltered {
                reason: "finish_reason=content_filter".to_string(),
            });
        }

        let content = choice.message.content.unwrap_or_default();
        let record = parse_decision(&content)?;

        debug!(
            model = %self.model,
            risk_level = record.risk_level.as_str(),
            "Decision parsed"
        );

        Ok(CandidateDecision {
            record,
            usage: chat_response.usage.map(|u| Usage {
                input_units: u.prompt_tokens,
                output_units: u.completion_tokens,
            }),
        })
    }
}
