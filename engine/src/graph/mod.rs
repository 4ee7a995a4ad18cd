//! Directed reasoning graph executor
//!
//! A graph is a named set of processing nodes plus routing edges, built once
//! through [`GraphBuilder`] and then frozen. [`AgentGraph::invoke`] drives an
//! [`AgentState`] through the nodes until the terminal marker is reached or a
//! bound is hit. Termination is unconditional: the admission test
//! `should_continue()` is re-evaluated against a strictly increasing
//! iteration counter every step, so even a cyclic graph halts within
//! `max_iterations` steps.
//!
//! Every halt has exactly one cause: terminal marker, unresolvable node,
//! unresolvable edge, node fault, or the iteration bound. Node faults are
//! caught at the executor boundary and folded into the returned state's
//! `error` field; they never propagate out of `invoke`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sdk::EngineError;
use tracing::{debug, error, warn};

use crate::state::AgentState;

/// Reserved name for the implicit start marker
pub const START: &str = "__start__";

/// Reserved name for the terminal marker; routing here completes the turn
pub const END: &str = "__end__";

/// One unit of work in the graph: state in, state out
///
/// Nodes may suspend while awaiting external work (the inference service, a
/// capability provider). A node must not retain a state received in one call
/// across another call, and must produce its output through exactly one
/// `AgentState::apply` so the audit trail advances once per step. Nodes
/// signal failure by returning an error, which the executor converts into a
/// halted state.
#[async_trait]
pub trait GraphNode: Send + Sync {
    /// Unique node name used for registration and routing
    fn name(&self) -> &str;

    /// Execute one step
    async fn run(&self, state: AgentState) -> Result<AgentState, EngineError>;
}

/// Routing decision function for conditional edges
///
/// Must be pure for a given state: no side effects, no hidden randomness.
/// Resumed executions replay routing decisions, so an impure router makes
/// them non-reproducible.
pub type Router = dyn Fn(&AgentState) -> String + Send + Sync;

/// Outgoing edge, keyed by source node name
pub enum Edge {
    /// Always routes to the named target
    Direct(String),

    /// Routes to the target chosen by a pure function of the state
    Conditional(Box<Router>),
}

impl Edge {
    fn target(&self, state: &AgentState) -> String {
        match self {
            Edge::Direct(target) => target.clone(),
            Edge::Conditional(router) => router(state),
        }
    }
}

/// Builder accumulating nodes, edges, and the entry point
#[derive(Default)]
pub struct GraphBuilder {
    nodes: HashMap<String, Arc<dyn GraphNode>>,
    edges: HashMap<String, Edge>,
    entry_point: Option<String>,
}

impl GraphBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node under its own name
    pub fn add_node(mut self, node: Arc<dyn GraphNode>) -> Self {
        self.nodes.insert(node.name().to_string(), node);
        self
    }

    /// Add an unconditional edge
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.insert(from.into(), Edge::Direct(to.into()));
        self
    }

    /// Add a conditional edge
    pub fn add_conditional_edge<F>(mut self, from: impl Into<String>, router: F) -> Self
    where
        F: Fn(&AgentState) -> String + Send + Sync + 'static,
    {
        self.edges.insert(from.into(), Edge::Conditional(Box::new(router)));
        self
    }

    /// Designate the node execution starts from
    pub fn entry_point(mut self, name: impl Into<String>) -> Self {
        self.entry_point = Some(name.into());
        self
    }

    /// Freeze the builder into an executable graph
    ///
    /// Fails when no nodes are registered, no entry point was designated, or
    /// the entry point names a node that does not exist (the reserved
    /// markers are exempt).
    pub fn build(self) -> Result<AgentGraph, EngineError> {
        if self.nodes.is_empty() {
            return Err(EngineError::EmptyGraph);
        }

        let entry_point = self
            .entry_point
            .ok_or_else(|| EngineError::Config("graph entry point not set".to_string()))?;

        if entry_point != START && entry_point != END && !self.nodes.contains_key(&entry_point) {
            return Err(EngineError::UnknownEntryPoint(entry_point));
        }

        Ok(AgentGraph {
            nodes: self.nodes,
            edges: self.edges,
            entry_point,
        })
    }
}

/// Immutable, executable reasoning graph
pub struct AgentGraph {
    nodes: HashMap<String, Arc<dyn GraphNode>>,
    edges: HashMap<String, Edge>,
    entry_point: String,
}

impl AgentGraph {
    /// Drive a state through the graph until it halts
    ///
    /// Always returns a state; all failure modes are folded into the
    /// returned state's `error` field. Execution takes at most
    /// `max_iterations` node steps.
    pub async fn invoke(&self, initial: AgentState) -> AgentState {
        let mut state = initial;
        state.current_node = self.entry_point.clone();

        while state.should_continue() {
            let node_name = state.current_node.clone();

            // Reaching the terminal marker completes the turn
            if node_name == END {
                debug!(
                    conversation = %state.conversation_id,
                    iterations = state.iteration,
                    "graph reached terminal marker"
                );
                state.is_complete = true;
                break;
            }

            let Some(node) = self.nodes.get(&node_name) else {
                let err = EngineError::UnknownNode(node_name);
                error!(conversation = %state.conversation_id, %err, "routing failure");
                return state.halted(err.to_string());
            };

            debug!(
                conversation = %state.conversation_id,
                node = %node_name,
                iteration = state.iteration,
                "running node"
            );

            // Node faults are converted, never propagated
            state = match node.run(state.clone()).await {
                Ok(next) => next,
                Err(e) => {
                    let err = EngineError::NodeFailed {
                        node: node_name,
                        message: e.to_string(),
                    };
                    error!(conversation = %state.conversation_id, %err, "node fault");
                    return state.halted(err.to_string());
                }
            };

            // An error-carrying state halts here; routing it further would
            // let a later node mask the failure
            if state.has_error() {
                state.is_complete = true;
                break;
            }

            let Some(edge) = self.edges.get(&node_name) else {
                let err = EngineError::MissingEdge(node_name);
                error!(conversation = %state.conversation_id, %err, "routing failure");
                return state.halted(err.to_string());
            };

            state.current_node = edge.target(&state);
        }

        if state.iteration >= state.max_iterations && !state.is_complete {
            let err = EngineError::IterationLimit {
                max: state.max_iterations,
            };
            warn!(
                conversation = %state.conversation_id,
                visited = ?state.visited,
                %err,
                "invocation hit iteration bound"
            );
            return state.halted(err.to_string());
        }

        state
    }

    /// Name of the designated entry node
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}
