//! Capability contract types
//!
//! This module defines the contract between the engine and device capability
//! providers (calendar, contacts, messaging, UI control). The engine never
//! inspects a provider's internals: it hands over a request and receives one
//! of a closed set of response variants.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A request dispatched to a capability provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRequest {
    /// Identifier of the capability (e.g. "calendar", "contacts", "ui")
    pub capability_id: String,

    /// Operation within the capability (e.g. "create_event", "tap")
    pub operation_id: String,

    /// Operation parameters
    pub params: HashMap<String, serde_json::Value>,
}

impl CapabilityRequest {
    /// Create a new request with no parameters
    pub fn new(capability_id: impl Into<String>, operation_id: impl Into<String>) -> Self {
        Self {
            capability_id: capability_id.into(),
            operation_id: operation_id.into(),
            params: HashMap::new(),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// Get an i64 parameter
    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.params.get(key).and_then(|v| v.as_i64())
    }

    /// Get a bool parameter
    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(|v| v.as_bool())
    }
}

/// Outcome of a capability invocation
///
/// This is a closed set: every call site must handle all four variants.
/// `PermissionNeeded` and `ConfirmationNeeded` are not failures; they ask
/// the host to obtain something from the user before the operation can
/// be retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapabilityResponse {
    /// The operation completed
    Success {
        /// Human-readable summary of what happened
        message: String,
        /// Structured result payload
        data: serde_json::Value,
    },

    /// The operation failed
    Failure {
        /// Stable machine-readable code (e.g. "not_found", "unavailable")
        error_code: String,
        /// Human-readable description
        message: String,
    },

    /// The operation requires permissions the host has not granted
    PermissionNeeded {
        /// Platform permission identifiers to request
        permissions: Vec<String>,
    },

    /// The operation needs explicit user confirmation before proceeding
    ConfirmationNeeded {
        /// Prompt to show the user
        message: String,
        /// The action to re-dispatch once confirmed
        pending_action: serde_json::Value,
    },
}

impl CapabilityResponse {
    /// Create a success response
    pub fn success(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self::Success {
            message: message.into(),
            data,
        }
    }

    /// Create a failure response
    pub fn failure(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failure {
            error_code: error_code.into(),
            message: message.into(),
        }
    }

    /// Returns true if the operation completed successfully
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Trait that all capability providers must implement
///
/// Providers must not retain state handed to them across calls; each
/// request is self-contained. A provider signals problems through
/// `CapabilityResponse::Failure` rather than panicking.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Returns the capability identifier (e.g. "calendar")
    fn id(&self) -> &str;

    /// Returns a one-line description advertised to the model
    fn description(&self) -> &str;

    /// Handle an operation request
    async fn handle(&self, request: CapabilityRequest) -> CapabilityResponse;
}
