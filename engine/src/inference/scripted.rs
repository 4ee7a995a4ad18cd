//! Scripted provider for tests and offline runs
//!
//! Replays a fixed queue of completions in order and records every request
//! it receives, so tests can assert both what the engine asked and how it
//! handled the answer. Running past the end of the script yields
//! [`InferenceError::Exhausted`], which exercises the same failure path a
//! dead server would.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CompletionRequest, InferenceError, InferenceProvider, Result};

/// Inference provider that replays canned completions
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    completions: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    /// Create a provider with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider preloaded with completions
    pub fn with_completions<I, S>(completions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let provider = Self::new();
        for completion in completions {
            provider.push_completion(completion);
        }
        provider
    }

    /// Append a completion to the script
    pub fn push_completion(&self, completion: impl Into<String>) {
        self.completions
            .lock()
            .expect("completion queue poisoned")
            .push_back(completion.into());
    }

    /// Requests received so far, in order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .expect("request log poisoned")
            .clone()
    }
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests
            .lock()
            .expect("request log poisoned")
            .push(request.clone());

        self.completions
            .lock()
            .expect("completion queue poisoned")
            .pop_front()
            .ok_or(InferenceError::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order() {
        let provider = ScriptedProvider::with_completions(["first", "second"]);

        let a = provider
            .complete(&CompletionRequest::new("p1"))
            .await
            .unwrap();
        let b = provider
            .complete(&CompletionRequest::new("p2"))
            .await
            .unwrap();

        assert_eq!(a, "first");
        assert_eq!(b, "second");
    }

    #[tokio::test]
    async fn test_exhausted_script_errors() {
        let provider = ScriptedProvider::new();
        let result = provider.complete(&CompletionRequest::new("p")).await;
        assert!(matches!(result, Err(InferenceError::Exhausted)));
    }

    #[tokio::test]
    async fn test_records_requests() {
        let provider = ScriptedProvider::with_completions(["ok"]);
        let request = CompletionRequest::new("classify this").with_grammar("root ::= \"{}\"");

        provider.complete(&request).await.unwrap();

        let seen = provider.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].prompt, "classify this");
        assert!(seen[0].grammar.is_some());
    }
}
