// # HTTP Gateway Transport
//
// Binds the EPP client to the registry gateway process over HTTP.
//
// ## Wire Format
//
// Each command is one `POST` of the serialized payload:
//
// ```http
// POST /rpc
// Content-Type: application/json
// Authorization: Bearer <token>
//
// {"cmd": "domain_check", "args": {"domains": ["example.ai"]}}
// ```
//
// The response body is the gateway's JSON rendering of the registry reply
// and is handed back untouched.
//
// ## Error Mapping
//
// | Condition                          | Error          |
// |------------------------------------|----------------|
// | connect failure, timeout           | `Connectivity` |
// | HTTP 502, 503, 504                 | `Connectivity` |
// | any other non-2xx status           | `BadResponse`  |
// | body cannot be read                | `Connectivity` |
//
// The transport never retries. The fault signal and the single retry live
// in `EppClient`.
//
// ## Security
//
// The bearer token never appears in logs or `Debug` output.

use async_trait::async_trait;
use epp_core::config::TransportConfig;
use epp_core::{Error, Result, RpcTransport, RpcTransportFactory, TransportRegistry};
use std::time::Duration;

/// HTTP transport to the registry gateway
pub struct HttpRpcTransport {
    url: String,
    /// ⚠️ NEVER log this value
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRpcTransport")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl HttpRpcTransport {
    /// Create a transport posting to `url`
    ///
    /// # Errors
    ///
    /// - `Error::Config`: the HTTP client cannot be built
    pub fn new(url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Cannot build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            token: token.filter(|token| !token.is_empty()),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RpcTransport for HttpRpcTransport {
    async fn request(&self, payload: &str) -> Result<String> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .body(payload.to_string());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::connectivity(format!("gateway did not answer in time: {}", e))
            } else {
                Error::connectivity(format!("gateway unreachable: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Gateway returned an error status");
            return match status.as_u16() {
                502..=504 => Err(Error::connectivity(format!("gateway unavailable: HTTP {}", status))),
                _ => Err(Error::bad_response(format!(
                    "gateway rejected the request: HTTP {} {}",
                    status,
                    detail.trim()
                ))),
            };
        }

        response
            .text()
            .await
            .map_err(|e| Error::connectivity(format!("reply body lost: {}", e)))
    }

    fn transport_name(&self) -> &'static str {
        "http"
    }
}

/// Factory building [`HttpRpcTransport`] from `TransportConfig::Http`
pub struct HttpTransportFactory;

impl RpcTransportFactory for HttpTransportFactory {
    fn create(&self, config: &TransportConfig) -> Result<Box<dyn RpcTransport>> {
        match config {
            TransportConfig::Http {
                url,
                token,
                timeout_secs,
            } => {
                if url.is_empty() {
                    return Err(Error::config("Gateway URL is required"));
                }
                let transport = HttpRpcTransport::new(url.clone(), token.clone(), Duration::from_secs(*timeout_secs))?;
                Ok(Box::new(transport))
            }
            _ => Err(Error::config("Invalid config for HTTP transport")),
        }
    }
}

/// Register the HTTP transport under `"http"`
///
/// # Example
///
/// ```rust
/// use epp_core::TransportRegistry;
///
/// let registry = TransportRegistry::new();
/// epp_rpc_http::register(&registry);
/// assert!(registry.has_transport("http"));
/// ```
pub fn register(registry: &TransportRegistry) {
    registry.register_transport("http", Box::new(HttpTransportFactory));
}
