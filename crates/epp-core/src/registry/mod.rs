//! Plugin-based transport registry
//!
//! RPC transports are registered by name at startup and instantiated from
//! [`TransportConfig`], so the core never hard-codes a binding to the
//! registry gateway.
//!
//! ## Registration
//!
//! Transport crates expose a `register` function:
//!
//! ```rust,ignore
//! // In epp-rpc-http
//! pub fn register(registry: &TransportRegistry) {
//!     registry.register_transport("http", Box::new(HttpTransportFactory));
//! }
//! ```

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::traits::{RpcTransport, RpcTransportFactory};
use std::collections::HashMap;
use std::sync::RwLock;

/// Registry of RPC transport factories
///
/// ## Thread Safety
///
/// Factories live behind an `RwLock`: registration takes `&self`, lookups
/// run concurrently.
#[derive(Default)]
pub struct TransportRegistry {
    transports: RwLock<HashMap<String, Box<dyn RpcTransportFactory>>>,
}

impl TransportRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport factory under a type name
    ///
    /// A later registration under the same name replaces the earlier one.
    pub fn register_transport(&self, name: impl Into<String>, factory: Box<dyn RpcTransportFactory>) {
        let name = name.into();
        let mut transports = self.transports.write().unwrap_or_else(|e| e.into_inner());
        transports.insert(name, factory);
    }

    /// Create a transport from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn RpcTransport>)`: Created transport
    /// - `Err(Error::Config)`: Type not registered, or the factory rejected the config
    pub fn create_transport(&self, config: &TransportConfig) -> Result<Box<dyn RpcTransport>> {
        config.validate()?;

        let transport_type = config.type_name();
        let transports = self.transports.read().unwrap_or_else(|e| e.into_inner());

        let factory = transports
            .get(transport_type)
            .ok_or_else(|| Error::config(format!("Unknown transport type: {}", transport_type)))?;

        factory.create(config)
    }

    /// List all registered transport types
    pub fn list_transports(&self) -> Vec<String> {
        let transports = self.transports.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = transports.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a transport type is registered
    pub fn has_transport(&self, name: &str) -> bool {
        let transports = self.transports.read().unwrap_or_else(|e| e.into_inner());
        transports.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoTransport;

    #[async_trait]
    impl RpcTransport for EchoTransport {
        async fn request(&self, payload: &str) -> Result<String> {
            Ok(payload.to_string())
        }

        fn transport_name(&self) -> &'static str {
            "echo"
        }
    }

    struct EchoFactory;

    impl RpcTransportFactory for EchoFactory {
        fn create(&self, _config: &TransportConfig) -> Result<Box<dyn RpcTransport>> {
            Ok(Box::new(EchoTransport))
        }
    }

    fn custom(factory: &str) -> TransportConfig {
        TransportConfig::Custom {
            factory: factory.to_string(),
            config: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = TransportRegistry::new();
        assert!(!registry.has_transport("echo"));

        registry.register_transport("echo", Box::new(EchoFactory));

        assert!(registry.has_transport("echo"));
        assert_eq!(registry.list_transports(), vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn test_create_registered_transport() {
        let registry = TransportRegistry::new();
        registry.register_transport("echo", Box::new(EchoFactory));

        let transport = registry.create_transport(&custom("echo")).unwrap();
        assert_eq!(transport.transport_name(), "echo");
        assert_eq!(transport.request("ping").await.unwrap(), "ping");
    }

    #[test]
    fn test_unknown_transport_is_config_error() {
        let registry = TransportRegistry::new();
        let err = registry.create_transport(&custom("queue")).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
