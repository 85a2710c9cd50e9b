// # RPC Transport Trait
//
// Defines the opaque request/reply channel between the EPP client and the
// registry gateway process.
//
// ## Implementations
//
// - HTTP: `epp-rpc-http` crate
// - Tests: scripted in-process registries
//
// ## Usage
//
// ```rust,ignore
// use epp_core::RpcTransport;
//
// let reply = transport
//     .request(r#"{"cmd":"domain_check","args":{"domains":["example.ai"]}}"#)
//     .await?;
// ```

use async_trait::async_trait;

/// Trait for RPC transport implementations
///
/// A transport publishes one serialized command and waits for the reply
/// correlated to it.
///
/// # Contract
///
/// - Return `Ok(body)` with the raw reply body (possibly empty)
/// - Return `Err(Error::Connectivity)` when the channel is closed, the
///   request times out or the gateway is unreachable
/// - Never retry: the fault signal and the single retry are owned by
///   [`EppClient`](crate::epp::EppClient)
/// - Never inspect the EPP result code
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Send one serialized command and wait for its correlated reply
    ///
    /// # Parameters
    ///
    /// - `payload`: JSON `{"cmd": "<verb>", "args": {...}}`
    ///
    /// # Returns
    ///
    /// - `Ok(String)`: The raw reply body
    /// - `Err(Error)`: Connectivity failure
    async fn request(&self, payload: &str) -> Result<String, crate::Error>;

    /// Get the transport name (for logging/debugging)
    fn transport_name(&self) -> &'static str;
}

/// Helper trait for constructing transports from configuration
pub trait RpcTransportFactory: Send + Sync {
    /// Create an RpcTransport instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Transport configuration
    ///
    /// # Returns
    ///
    /// A boxed RpcTransport trait object
    fn create(
        &self,
        config: &crate::config::TransportConfig,
    ) -> Result<Box<dyn RpcTransport>, crate::Error>;
}
