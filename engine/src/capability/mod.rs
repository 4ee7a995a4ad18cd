//! Registry of device capabilities available to the agent
//!
//! Capability providers (calendar, contacts, messaging, UI control) live
//! outside the engine and register themselves here. Dispatch never faults:
//! an unknown capability id comes back as a `Failure` response the
//! reasoning loop can see and recover from, the same way any other failed
//! operation would.

use std::collections::HashMap;
use std::sync::Arc;

use sdk::capability::{Capability, CapabilityRequest, CapabilityResponse};
use tracing::{debug, warn};

/// Registry of capability providers, keyed by capability id
#[derive(Default)]
pub struct CapabilityRegistry {
    providers: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    /// Create an empty registry with no capabilities registered
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register a provider under its own id
    pub fn register(&mut self, provider: Arc<dyn Capability>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    /// True when the id names a registered capability
    pub fn contains(&self, capability_id: &str) -> bool {
        self.providers.contains_key(capability_id)
    }

    /// Registered (id, description) pairs, sorted by id
    ///
    /// Advertised to the model so it only selects capabilities that exist.
    pub fn catalog(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .providers
            .values()
            .map(|p| (p.id().to_string(), p.description().to_string()))
            .collect();
        entries.sort();
        entries
    }

    /// Dispatch a request to its provider
    ///
    /// An unknown capability id yields a `Failure` response rather than an
    /// error, so the reasoning loop can observe it and self-correct.
    pub async fn dispatch(&self, request: CapabilityRequest) -> CapabilityResponse {
        debug!(
            capability = %request.capability_id,
            operation = %request.operation_id,
            "dispatching capability request"
        );

        let Some(provider) = self.providers.get(&request.capability_id) else {
            warn!(capability = %request.capability_id, "capability not registered");
            return CapabilityResponse::failure(
                "unknown_capability",
                format!("No capability registered with id '{}'", request.capability_id),
            );
        };

        provider.handle(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoCapability;

    #[async_trait]
    impl Capability for EchoCapability {
        fn id(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the operation id back"
        }

        async fn handle(&self, request: CapabilityRequest) -> CapabilityResponse {
            CapabilityResponse::success(
                format!("ran {}", request.operation_id),
                serde_json::json!({"operation": request.operation_id}),
            )
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_to_provider() {
        let mut registry = CapabilityRegistry::empty();
        registry.register(Arc::new(EchoCapability));

        let response = registry
            .dispatch(CapabilityRequest::new("echo", "ping"))
            .await;

        match response {
            CapabilityResponse::Success { message, data } => {
                assert_eq!(message, "ran ping");
                assert_eq!(data["operation"], "ping");
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_capability_is_a_failure_response() {
        let registry = CapabilityRegistry::empty();

        let response = registry
            .dispatch(CapabilityRequest::new("missing", "op"))
            .await;

        match response {
            CapabilityResponse::Failure { error_code, .. } => {
                assert_eq!(error_code, "unknown_capability");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_catalog_is_sorted() {
        let mut registry = CapabilityRegistry::empty();
        registry.register(Arc::new(EchoCapability));

        let catalog = registry.catalog();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].0, "echo");
        assert!(registry.contains("echo"));
        assert!(!registry.contains("calendar"));
    }
}
