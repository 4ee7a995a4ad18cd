//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - run: Execute one conversation turn
//! - sessions list / clear: Inspect or reset the session store
//! - doctor: Validate configuration and check the inference server

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;

use crate::agent::{build_agent_graph, AgentRuntime, TurnOutcome};
use crate::capability::CapabilityRegistry;
use crate::config::Config;
use crate::inference::{InferenceProvider, LlamaServerProvider};
use crate::session::SessionStore;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Run one conversation turn
pub async fn handle_run(
    query: String,
    conversation: String,
    context_path: Option<PathBuf>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let screen_context = match context_path {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read context file {}", path.display()))?,
        None => String::new(),
    };

    let provider = Arc::new(LlamaServerProvider::new(
        config.inference.base_url.clone(),
        config.inference.sampling_params(),
    ));
    let grammar = config.inference.load_grammar()?;

    // The CLI host registers no device capabilities; capability turns come
    // back as visible failures the model can explain
    let registry = Arc::new(CapabilityRegistry::empty());

    let graph = build_agent_graph(provider, registry, grammar)?;
    let sessions = SessionStore::open(config.sessions_path());
    let runtime = AgentRuntime::new(graph, sessions, config.agent.max_iterations);

    let outcome = runtime.handle_turn(&conversation, &query, &screen_context).await;

    let result = match outcome {
        TurnOutcome::Completed(result) => result,
        // A single-turn CLI run has no competing turns
        TurnOutcome::Superseded => anyhow::bail!("turn superseded"),
    };

    match format {
        OutputFormat::Json => {
            let payload = json!({
                "conversation": result.conversation_id,
                "response": result.response,
                "action": result.final_action,
                "needs_user_input": result.needs_user_input,
                "error": result.error,
                "iterations": result.iterations,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        OutputFormat::Text => {
            if let Some(error) = &result.error {
                println!("error: {error}");
            } else {
                println!("{}", result.response);
                if let Some(action) = &result.final_action {
                    println!("action: {}", serde_json::to_string(action)?);
                }
                if result.needs_user_input {
                    println!("(waiting on user input)");
                }
            }
        }
    }

    Ok(())
}

/// List stored conversations, most recently active first
pub fn handle_sessions_list(config: &Config, format: OutputFormat) -> Result<()> {
    let store = SessionStore::open(config.sessions_path());
    let ids = store.conversation_ids();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({ "sessions": ids }))?);
        }
        OutputFormat::Text => {
            if ids.is_empty() {
                println!("No stored conversations.");
            } else {
                for id in ids {
                    println!("{id}");
                }
            }
        }
    }

    Ok(())
}

/// Delete all stored conversations
pub fn handle_sessions_clear(config: &Config) -> Result<()> {
    let mut store = SessionStore::open(config.sessions_path());
    let count = store.len();
    store.clear();
    println!("Cleared {count} conversation(s).");
    Ok(())
}

/// Validate configuration and check the inference server
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let provider = LlamaServerProvider::new(
        config.inference.base_url.clone(),
        config.inference.sampling_params(),
    );
    let server_healthy = provider.check_health().await;
    let grammar = config.inference.load_grammar();

    match format {
        OutputFormat::Json => {
            let payload = json!({
                "inference_server": config.inference.base_url,
                "server_healthy": server_healthy,
                "grammar_ok": grammar.is_ok(),
                "sessions_path": config.sessions_path(),
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        OutputFormat::Text => {
            println!("inference server: {}", config.inference.base_url);
            println!(
                "  status: {}",
                if server_healthy { "ok" } else { "unreachable" }
            );
            match &grammar {
                Ok(Some(_)) => println!("grammar: ok"),
                Ok(None) => println!("grammar: not configured"),
                Err(e) => println!("grammar: {e}"),
            }
            println!("sessions file: {}", config.sessions_path().display());
        }
    }

    if !server_healthy {
        anyhow::bail!("inference server is unreachable");
    }
    grammar?;

    Ok(())
}
