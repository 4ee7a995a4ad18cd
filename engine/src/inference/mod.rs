//! Inference service abstraction
//!
//! The engine never runs model inference itself; it consumes a "complete
//! this prompt, optionally under a formal output grammar" service through
//! the [`InferenceProvider`] trait. The production implementation talks to a
//! llama.cpp server over HTTP; the scripted implementation replays canned
//! completions for tests and offline runs.

use async_trait::async_trait;
use sdk::EngineError;

pub mod llama_server;
pub mod scripted;

pub use llama_server::LlamaServerProvider;
pub use scripted::ScriptedProvider;

/// Result type for inference operations
pub type Result<T> = std::result::Result<T, InferenceError>;

/// Errors that can occur during inference operations
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Server unavailable: {0}")]
    ServerUnavailable(String),

    #[error("Request failed with status {0}")]
    RequestFailed(u16),

    #[error("Timeout")]
    Timeout,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("No completion available")]
    Exhausted,
}

impl From<InferenceError> for EngineError {
    fn from(e: InferenceError) -> Self {
        EngineError::Inference(e.to_string())
    }
}

/// A single completion request
///
/// When `grammar` is present and the server honors it, the completion is
/// constrained to the grammar (GBNF) and parses under the extractor's
/// direct or markdown strategies without repair.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Fully rendered prompt text
    pub prompt: String,

    /// Optional GBNF grammar constraining the output
    pub grammar: Option<String>,
}

impl CompletionRequest {
    /// Create an unconstrained request
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            grammar: None,
        }
    }

    /// Constrain the completion to a grammar
    pub fn with_grammar(mut self, grammar: impl Into<String>) -> Self {
        self.grammar = Some(grammar.into());
        self
    }
}

/// Trait all inference providers must implement
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Returns the provider name (e.g. "llama_server", "scripted")
    fn name(&self) -> &str;

    /// Produce a completion for the request
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Check if the provider is currently healthy and available.
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}
