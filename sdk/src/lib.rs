//! Sentinel SDK
//!
//! Shared library providing traits and types for Sentinel components.
//! This crate is used by both the engine and external capability providers.

/// Capability contract trait and types
pub mod capability;

/// Error types and handling
pub mod errors;

// Re-export commonly used types
pub use capability::{Capability, CapabilityRequest, CapabilityResponse};
pub use errors::{EngineError, SentinelErrorExt};
