//! llama.cpp server provider
//!
//! Talks to a llama.cpp HTTP server (typically `llama-server` on
//! localhost) via its `/completion` endpoint. The server owns the model,
//! the context window, and the sampler chain; this client only ships the
//! prompt, the sampling parameters, and an optional GBNF grammar.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{CompletionRequest, InferenceError, InferenceProvider, Result};

/// Request timeout; on-device generation of a few hundred tokens can be slow
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Sampling parameters sent with every completion
#[derive(Debug, Clone)]
pub struct SamplingParams {
    /// Sampling temperature
    pub temperature: f32,

    /// Nucleus sampling cutoff
    pub top_p: f32,

    /// Maximum tokens to generate
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            top_p: 0.9,
            max_tokens: 256,
        }
    }
}

/// llama.cpp server provider
#[derive(Debug, Clone)]
pub struct LlamaServerProvider {
    /// Base URL for the server (typically http://localhost:8080)
    base_url: String,

    /// Sampling parameters
    params: SamplingParams,

    /// HTTP client for API requests
    client: Client,
}

impl LlamaServerProvider {
    /// Create a new provider
    ///
    /// # Arguments
    /// * `base_url` - Base URL for the server (e.g. "http://localhost:8080")
    /// * `params` - Sampling parameters applied to every request
    pub fn new(base_url: impl Into<String>, params: SamplingParams) -> Self {
        Self {
            base_url: base_url.into(),
            params,
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }
}

#[async_trait]
impl InferenceProvider for LlamaServerProvider {
    fn name(&self) -> &str {
        "llama_server"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = LlamaCompletionRequest {
            prompt: &request.prompt,
            grammar: request.grammar.as_deref(),
            temperature: self.params.temperature,
            top_p: self.params.top_p,
            n_predict: self.params.max_tokens,
            stream: false,
        };

        tracing::debug!(
            prompt_chars = request.prompt.len(),
            constrained = request.grammar.is_some(),
            "llama.cpp completion request"
        );

        let url = format!("{}/completion", self.base_url);
        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout
                } else if e.is_connect() {
                    InferenceError::ServerUnavailable(format!(
                        "Cannot connect to llama.cpp server at {}. Is it running?",
                        self.base_url
                    ))
                } else {
                    InferenceError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::RequestFailed(status.as_u16()));
        }

        let completion: LlamaCompletionResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::ParseError(format!("Bad completion response: {e}")))?;

        tracing::debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            completion_chars = completion.content.len(),
            "llama.cpp completion received"
        );

        Ok(completion.content)
    }

    async fn check_health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Wire format for the `/completion` endpoint
#[derive(Serialize)]
struct LlamaCompletionRequest<'a> {
    prompt: &'a str,

    #[serde(skip_serializing_if = "Option::is_none")]
    grammar: Option<&'a str>,

    temperature: f32,
    top_p: f32,
    n_predict: u32,
    stream: bool,
}

/// Wire format for the `/completion` response (only the field we use)
#[derive(Deserialize)]
struct LlamaCompletionResponse {
    content: String,
}
