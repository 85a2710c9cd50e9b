// # EPP Client
//
// Request/response layer between the state machines and the RPC transport.
//
// ## Request Flow
//
// 1. Serialize the command (`BadRequest` on failure)
// 2. Send it through the transport, bounded by the request timeout
// 3. On a transport fault: write the health signal, wait the restart
//    delay, send again exactly once
// 4. A second fault becomes `Connectivity`
// 5. Empty or undecodable replies become `BadResponse`
// 6. With `raise_for_result`, a non-success result code becomes a typed
//    registry error

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use super::command::{Command, ContactData, DomainCreate, DomainUpdate, Verb};
use super::health::HealthSignal;
use super::response::Response;
use crate::config::EppConfig;
use crate::error::{Error, ErrorKind, Result, ResultCode};
use crate::traits::RpcTransport;

/// Default bound on one correlated request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default delay between the fault signal and the retry
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(2);

/// Client for the registry gateway
///
/// Cloning is cheap: clones share the transport and the health signal.
#[derive(Clone)]
pub struct EppClient {
    transport: Arc<dyn RpcTransport>,
    health: Arc<HealthSignal>,
    request_timeout: Duration,
    restart_delay: Duration,
}

impl std::fmt::Debug for EppClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EppClient")
            .field("transport", &self.transport.transport_name())
            .field("health", &self.health.path())
            .field("request_timeout", &self.request_timeout)
            .field("restart_delay", &self.restart_delay)
            .finish()
    }
}

impl EppClient {
    /// Client with default timeouts and no health file
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            health: Arc::new(HealthSignal::disabled()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            restart_delay: DEFAULT_RESTART_DELAY,
        }
    }

    /// Client configured from the health and registrar sections
    pub fn from_config(transport: Arc<dyn RpcTransport>, config: &EppConfig) -> Self {
        Self {
            transport,
            health: Arc::new(HealthSignal::from_path(config.health.path.clone())),
            request_timeout: config.registrar.request_timeout(),
            restart_delay: config.health.restart_delay(),
        }
    }

    pub fn with_health(mut self, health: HealthSignal) -> Self {
        self.health = Arc::new(health);
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Copy of this client with a different request bound
    pub fn with_request_timeout(&self, timeout: Duration) -> Self {
        Self {
            request_timeout: timeout,
            ..self.clone()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Send a command and decode the reply
    ///
    /// With `raise_for_result` a reply whose code is not 1000, 1300 or 1301
    /// is returned as [`Error::Command`].
    pub async fn request(&self, command: &Command, raise_for_result: bool) -> Result<Response> {
        let verb = command.verb();
        let payload = serde_json::to_string(command)
            .map_err(|e| Error::bad_request(format!("{} cannot be serialized: {}", verb, e)))?;

        debug!(%verb, "Sending EPP command");
        let body = self.send_with_retry(verb, &payload).await?;
        if body.trim().is_empty() {
            return Err(Error::bad_response(format!("Empty reply to {}", verb)));
        }

        let response = Response::decode(verb, &body)?;
        debug!(%verb, code = %response.code, "EPP reply received");

        if raise_for_result && !response.is_success() {
            warn!(%verb, code = %response.code, "EPP command failed: {}", response.message);
            return Err(response.error());
        }
        Ok(response)
    }

    async fn send_with_retry(&self, verb: Verb, payload: &str) -> Result<String> {
        let first = match self.send_once(payload).await {
            Ok(body) => return Ok(body),
            Err(e) if e.kind() == ErrorKind::Connectivity => e,
            Err(e) => return Err(e),
        };

        warn!(%verb, "Transport fault, restarting gateway: {}", first);
        self.health.signal(&first).await;
        tokio::time::sleep(self.restart_delay).await;

        self.send_once(payload).await.map_err(|second| {
            error!(%verb, "Request failed again after restart: {}", second);
            match second {
                Error::Connectivity(msg) => {
                    Error::connectivity(format!("{} failed after retry: {}", verb, msg))
                }
                other => other,
            }
        })
    }

    async fn send_once(&self, payload: &str) -> Result<String> {
        match tokio::time::timeout(self.request_timeout, self.transport.request(payload)).await {
            Ok(result) => result,
            Err(_) => Err(Error::connectivity(format!(
                "no reply within {:?}",
                self.request_timeout
            ))),
        }
    }

    // Verb shortcuts used by the state machines

    pub async fn domain_check(&self, domains: &[String]) -> Result<Response> {
        let command = Command::DomainCheck {
            domains: domains.to_vec(),
        };
        self.request(&command, true).await
    }

    pub async fn domain_info(&self, name: &str, auth_info: Option<&str>) -> Result<Response> {
        let command = Command::DomainInfo {
            name: name.to_string(),
            auth_info: auth_info.map(str::to_string),
        };
        self.request(&command, true).await
    }

    pub async fn domain_create(&self, create: DomainCreate) -> Result<Response> {
        self.request(&Command::DomainCreate(create), true).await
    }

    pub async fn domain_update(&self, update: DomainUpdate) -> Result<Response> {
        self.request(&Command::DomainUpdate(update), true).await
    }

    pub async fn domain_renew(
        &self,
        name: &str,
        current_expiry: DateTime<Utc>,
        years: u32,
    ) -> Result<Response> {
        self.request(&Command::domain_renew(name, current_expiry, years), true)
            .await
    }

    /// Request a transfer; `1000` and `1001` are both accepted
    pub async fn domain_transfer(&self, name: &str, auth_info: &str) -> Result<Response> {
        let command = Command::DomainTransfer {
            name: name.to_string(),
            op: "request",
            auth_info: auth_info.to_string(),
        };
        let response = self.request(&command, false).await?;
        match response.code {
            ResultCode::Success | ResultCode::SuccessActionPending => Ok(response),
            _ => Err(response.error()),
        }
    }

    pub async fn contact_check(&self, ids: &[String]) -> Result<Response> {
        let command = Command::ContactCheck {
            contacts: ids.to_vec(),
        };
        self.request(&command, true).await
    }

    pub async fn contact_info(&self, id: &str) -> Result<Response> {
        let command = Command::ContactInfo {
            contact: id.to_string(),
        };
        self.request(&command, true).await
    }

    pub async fn contact_create(&self, data: ContactData) -> Result<Response> {
        self.request(&Command::ContactCreate(data), true).await
    }

    pub async fn contact_update(&self, data: ContactData) -> Result<Response> {
        self.request(&Command::ContactUpdate(data), true).await
    }

    pub async fn contact_delete(&self, id: &str) -> Result<Response> {
        let command = Command::ContactDelete {
            contact: id.to_string(),
        };
        self.request(&command, true).await
    }

    pub async fn host_check(&self, hosts: &[String]) -> Result<Response> {
        let command = Command::HostCheck {
            hosts: hosts.to_vec(),
        };
        self.request(&command, true).await
    }

    pub async fn host_create(&self, host: &str) -> Result<Response> {
        let command = Command::HostCreate {
            name: host.to_string(),
            ip_list: Vec::new(),
        };
        self.request(&command, true).await
    }

    /// Read the head of the poll queue (`1300` means empty)
    pub async fn poll_req(&self) -> Result<Response> {
        self.request(&Command::PollReq {}, true).await
    }

    pub async fn poll_ack(&self, msg_id: &str) -> Result<Response> {
        let command = Command::PollAck {
            msg_id: msg_id.to_string(),
        };
        self.request(&command, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Transport replaying a fixed sequence of outcomes
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RpcTransport for ScriptedTransport {
        async fn request(&self, _payload: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::connectivity("script exhausted")))
        }

        fn transport_name(&self) -> &'static str {
            "scripted"
        }
    }

    fn ok_reply(code: u16) -> Result<String> {
        Ok(json!({"epp": {"response": {"result": {"@code": code.to_string(), "msg": "msg"}}}}).to_string())
    }

    fn client(transport: Arc<ScriptedTransport>) -> EppClient {
        EppClient::new(transport).with_restart_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_retry_once_after_fault() {
        let dir = TempDir::new().unwrap();
        let health_path = dir.path().join("health");
        let transport = ScriptedTransport::new(vec![
            Err(Error::connectivity("connection reset")),
            ok_reply(1000),
        ]);
        let client = client(transport.clone()).with_health(HealthSignal::new(&health_path));

        let response = client.contact_delete("abc").await.unwrap();
        assert_eq!(response.code, ResultCode::Success);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);

        let signal = std::fs::read_to_string(&health_path).unwrap();
        assert_eq!(signal.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_second_fault_is_connectivity() {
        let dir = TempDir::new().unwrap();
        let health_path = dir.path().join("health");
        let transport = ScriptedTransport::new(vec![
            Err(Error::connectivity("down")),
            Err(Error::connectivity("still down")),
            ok_reply(1000),
        ]);
        let client = client(transport.clone()).with_health(HealthSignal::new(&health_path));

        let err = client.poll_req().await.unwrap_err();
        assert!(matches!(err, Error::Connectivity(_)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert_eq!(std::fs::read_to_string(&health_path).unwrap().lines().count(), 1);
    }

    #[tokio::test]
    async fn test_empty_reply_is_bad_response() {
        let transport = ScriptedTransport::new(vec![Ok("  ".to_string())]);
        let err = client(transport).poll_req().await.unwrap_err();
        assert!(matches!(err, Error::BadResponse(_)));
    }

    #[tokio::test]
    async fn test_non_transport_errors_are_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(Error::bad_response("HTTP 400")), ok_reply(1000)]);
        let err = client(transport.clone()).poll_req().await.unwrap_err();
        assert!(matches!(err, Error::BadResponse(_)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_raise_for_result() {
        let transport = ScriptedTransport::new(vec![ok_reply(2303), ok_reply(2303)]);
        let client = client(transport);

        let err = client.contact_delete("abc").await.unwrap_err();
        assert_eq!(err.code(), 2303);

        let command = Command::ContactDelete {
            contact: "abc".to_string(),
        };
        let response = client.request(&command, false).await.unwrap();
        assert_eq!(response.code, ResultCode::ObjectDoesNotExist);
    }

    #[tokio::test]
    async fn test_transfer_accepts_pending_action() {
        let transport = ScriptedTransport::new(vec![ok_reply(1001), ok_reply(2201)]);
        let client = client(transport);

        let response = client.domain_transfer("example.ai", "Secret12").await.unwrap();
        assert_eq!(response.code, ResultCode::SuccessActionPending);

        let err = client.domain_transfer("example.ai", "Secret12").await.unwrap_err();
        assert_eq!(err.code(), 2201);
    }

    #[tokio::test]
    async fn test_request_timeout_counts_as_fault() {
        struct Silent;

        #[async_trait]
        impl RpcTransport for Silent {
            async fn request(&self, _payload: &str) -> Result<String> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(String::new())
            }

            fn transport_name(&self) -> &'static str {
                "silent"
            }
        }

        let client = EppClient::new(Arc::new(Silent))
            .with_restart_delay(Duration::from_millis(1))
            .with_request_timeout(Duration::from_millis(10));
        let err = client.poll_req().await.unwrap_err();
        assert!(matches!(err, Error::Connectivity(_)));
    }
}
