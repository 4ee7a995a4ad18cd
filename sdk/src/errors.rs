//! Error types and handling
//!
//! This module provides the error types used throughout the Sentinel engine.
//! All errors implement the `SentinelErrorExt` trait which provides
//! user-friendly hints and indicates whether errors are recoverable.
//!
//! Error messages are safe to surface in the assistant UI: they contain no
//! prompt text, no screen content, and no file paths.

use thiserror::Error;

/// Trait for Sentinel error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait SentinelErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain
    /// prompt text, screen content, or internal implementation details.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around within the same
    /// conversation. Non-recoverable errors typically require a
    /// configuration change or a rebuilt graph.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// This enum represents all possible errors that can occur in the Sentinel
/// engine. Each halt cause the graph executor can produce has its own
/// variant so callers can match on the kind rather than on message text.
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Graph construction**: Invalid node/edge wiring detected at build time
/// - **Graph routing**: Unresolvable node or edge hit during execution
/// - **Bounds**: Iteration cap reached
/// - **Node**: A node signalled failure instead of producing a state
/// - **Inference**: The completion service failed or was unreachable
/// - **Session**: Session persistence I/O failures
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Graph construction errors
    #[error("Graph has no nodes")]
    EmptyGraph,

    #[error("Entry point references unregistered node: {0}")]
    UnknownEntryPoint(String),

    // Graph routing errors
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("No outgoing edge from node: {0}")]
    MissingEdge(String),

    // Bound violations
    #[error("Iteration limit reached: {max} steps")]
    IterationLimit { max: u32 },

    // Node faults
    #[error("Node '{node}' failed: {message}")]
    NodeFailed { node: String, message: String },

    // Inference service errors
    #[error("Inference error: {0}")]
    Inference(String),

    // Capability errors
    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    // Session persistence errors
    #[error("Session store error: {0}")]
    Session(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SentinelErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            // Configuration errors
            Self::Config(_) => "Check your config.toml file for errors",

            // Graph construction errors
            Self::EmptyGraph => "The agent graph has no nodes registered",
            Self::UnknownEntryPoint(_) => "The graph entry point does not match a registered node",

            // Graph routing errors
            Self::UnknownNode(_) => "The agent reached a step that does not exist",
            Self::MissingEdge(_) => "The agent could not decide on a next step",

            // Bound violations
            Self::IterationLimit { .. } => {
                "The request was too complex. Try breaking it into smaller steps"
            }

            // Node faults
            Self::NodeFailed { .. } => "A reasoning step failed. Try rephrasing the request",

            // Inference service errors
            Self::Inference(_) => "The on-device model is unavailable. Check that it is running",

            // Capability errors
            Self::CapabilityNotFound(_) => "The requested device capability is not available",

            // Session persistence errors
            Self::Session(_) => "Conversation history could not be saved",

            // IO errors
            Self::Io(_) => "A file operation failed. Check permissions and disk space",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Wiring problems need a rebuilt graph or fixed config
            Self::Config(_) | Self::EmptyGraph | Self::UnknownEntryPoint(_) => false,
            Self::UnknownNode(_) | Self::MissingEdge(_) => false,

            // Per-turn failures: the next turn starts fresh
            Self::IterationLimit { .. } => true,
            Self::NodeFailed { .. } => true,
            Self::Inference(_) => true,
            Self::CapabilityNotFound(_) => true,

            // Best-effort persistence: the in-memory view stays usable
            Self::Session(_) => true,
            Self::Io(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_errors_are_fatal() {
        assert!(!EngineError::UnknownNode("classify".into()).is_recoverable());
        assert!(!EngineError::MissingEdge("respond".into()).is_recoverable());
        assert!(!EngineError::EmptyGraph.is_recoverable());
    }

    #[test]
    fn test_bound_violation_is_recoverable() {
        let err = EngineError::IterationLimit { max: 5 };
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "Iteration limit reached: 5 steps");
    }

    #[test]
    fn test_node_fault_carries_node_name() {
        let err = EngineError::NodeFailed {
            node: "classify_intent".into(),
            message: "no completion".into(),
        };
        assert!(err.to_string().contains("classify_intent"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_hints_are_nonempty() {
        let errors = [
            EngineError::Config("bad".into()),
            EngineError::EmptyGraph,
            EngineError::UnknownNode("x".into()),
            EngineError::IterationLimit { max: 10 },
            EngineError::Session("write failed".into()),
        ];
        for err in errors {
            assert!(!err.user_hint().is_empty());
        }
    }
}
