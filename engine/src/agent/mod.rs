//! Turn orchestration
//!
//! [`AgentRuntime`] owns the wiring for one engine instance: the frozen
//! reasoning graph, the session store, and the per-conversation request
//! counters. One turn is: sanitize the query, load (or create) the
//! conversation's state, drive it through the graph, and write the result
//! back, unless a newer turn for the same conversation was issued while
//! this one was in flight, in which case the result is dropped.
//!
//! Turns for different conversations may overlap freely; the steps of one
//! turn are strictly sequential. There is no timeout on a suspended node
//! here; a host that needs one imposes cancellation from outside.

pub mod nodes;
pub mod prompt;

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::graph::AgentGraph;
use crate::session::SessionStore;
use crate::state::{ChatMessage, DeviceAction};

pub use nodes::build_agent_graph;

/// Reply used when the injection screen rejects a query outright
const REFUSAL_RESPONSE: &str = "I can't help with that request.";

/// Outcome of one conversation turn
#[derive(Debug)]
pub enum TurnOutcome {
    /// The turn ran to completion and was persisted
    Completed(TurnResult),

    /// A newer turn for the same conversation was issued while this one was
    /// in flight; this result was discarded unpersisted
    Superseded,
}

/// What the host gets back from a completed turn
#[derive(Debug)]
pub struct TurnResult {
    /// Conversation the turn belongs to
    pub conversation_id: String,

    /// Reply text for the user
    pub response: String,

    /// Device action for the host to execute, if any
    pub final_action: Option<DeviceAction>,

    /// The turn paused waiting on a permission grant or confirmation
    pub needs_user_input: bool,

    /// Fatal error that halted the turn, if any
    pub error: Option<String>,

    /// Graph steps the turn took
    pub iterations: u32,
}

/// One engine instance: graph + sessions + request counters
pub struct AgentRuntime {
    graph: AgentGraph,
    sessions: Mutex<SessionStore>,
    tickets: StdMutex<HashMap<String, u64>>,
    max_iterations: u32,
}

impl AgentRuntime {
    /// Create a runtime around a built graph and an opened store
    pub fn new(graph: AgentGraph, sessions: SessionStore, max_iterations: u32) -> Self {
        Self {
            graph,
            sessions: Mutex::new(sessions),
            tickets: StdMutex::new(HashMap::new()),
            max_iterations,
        }
    }

    /// Run one conversation turn
    pub async fn handle_turn(
        &self,
        conversation_id: &str,
        query: &str,
        screen_context: &str,
    ) -> TurnOutcome {
        let ticket = self.issue_ticket(conversation_id);
        let query = prompt::sanitize(query, prompt::MAX_QUERY_CHARS);

        if prompt::contains_injection(&query) {
            warn!(conversation = %conversation_id, "query rejected by injection screen");
            return TurnOutcome::Completed(TurnResult {
                conversation_id: conversation_id.to_string(),
                response: REFUSAL_RESPONSE.to_string(),
                final_action: None,
                needs_user_input: false,
                error: None,
                iterations: 0,
            });
        }

        let base = {
            let mut sessions = self.sessions.lock().await;
            sessions.get_or_create(conversation_id)
        };

        let turn_id = uuid::Uuid::new_v4();
        info!(
            conversation = %conversation_id,
            turn = %turn_id,
            ticket,
            history_turns = base.history.len(),
            "starting turn"
        );

        let initial = base.begin_turn(&query, screen_context, self.max_iterations);
        let final_state = self.graph.invoke(initial).await;

        // A newer turn owns this conversation now; applying our result
        // would clobber it with stale state
        if !self.is_latest(conversation_id, ticket) {
            debug!(conversation = %conversation_id, ticket, "turn superseded, dropping result");
            return TurnOutcome::Superseded;
        }

        let mut persisted = final_state.clone();
        persisted.history.push(ChatMessage::user(&query));
        if !final_state.response.is_empty() {
            persisted.history.push(ChatMessage::assistant(&final_state.response));
        }

        {
            let mut sessions = self.sessions.lock().await;
            sessions.update(persisted);
        }

        info!(
            conversation = %conversation_id,
            turn = %turn_id,
            iterations = final_state.iteration,
            visited = ?final_state.visited,
            errored = final_state.has_error(),
            "turn finished"
        );

        TurnOutcome::Completed(TurnResult {
            conversation_id: conversation_id.to_string(),
            response: final_state.response,
            final_action: final_state.final_action,
            needs_user_input: final_state.needs_user_input,
            error: final_state.error,
            iterations: final_state.iteration,
        })
    }

    /// Issue the next request counter for a conversation
    ///
    /// Counters increase monotonically per conversation; a turn's result is
    /// applied only while its counter is still the latest issued.
    fn issue_ticket(&self, conversation_id: &str) -> u64 {
        let mut tickets = self.tickets.lock().expect("ticket map poisoned");
        let counter = tickets.entry(conversation_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// True while `ticket` is still the latest issued for the conversation
    fn is_latest(&self, conversation_id: &str, ticket: u64) -> bool {
        let tickets = self.tickets.lock().expect("ticket map poisoned");
        tickets.get(conversation_id).copied() == Some(ticket)
    }
}
