//! Contract Test: Transport Fault Handling
//!
//! Constraints verified:
//! - A transport fault writes exactly one line to the health file and the
//!   request is retried once after the restart delay
//! - A second fault is returned as a connectivity error without a second
//!   line
//! - Registry rejections are neither signalled nor retried

mod common;

use common::*;
use epp_core::{ErrorKind, HealthSignal};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

async fn fault_lines(path: &Path) -> Vec<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => content.lines().map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}

fn names() -> Vec<String> {
    vec!["example.ai".to_string()]
}

#[tokio::test]
async fn single_fault_is_retried() {
    let dir = TempDir::new().unwrap();
    let health = dir.path().join("gateway.health");
    let registry = ScriptedRegistry::new();
    registry
        .fault("connection refused")
        .reply(check(&[("example.ai", true, None)]));
    let client = client(&registry).with_health(HealthSignal::new(&health));

    let reply = client.domain_check(&names()).await.unwrap();

    assert!(reply.is_success());
    assert_eq!(registry.verbs().len(), 2);
    let lines = fault_lines(&health).await;
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("connection refused"));
    assert!(lines[0].contains(" at "));
}

#[tokio::test]
async fn second_fault_gives_up() {
    let dir = TempDir::new().unwrap();
    let health = dir.path().join("gateway.health");
    let registry = ScriptedRegistry::new();
    registry.fault("connection refused").fault("connection reset");
    let client = client(&registry).with_health(HealthSignal::new(&health));

    let err = client.domain_check(&names()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connectivity);
    assert_eq!(err.code(), -1);
    assert_eq!(registry.verbs().len(), 2);
    assert_eq!(fault_lines(&health).await.len(), 1);
}

#[tokio::test]
async fn rejection_is_not_a_fault() {
    let dir = TempDir::new().unwrap();
    let health = dir.path().join("gateway.health");
    let registry = ScriptedRegistry::new();
    registry.reply(result(2005));
    let client = client(&registry).with_health(HealthSignal::new(&health));

    let err = client.domain_check(&names()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Registry);
    assert_eq!(err.code(), 2005);
    assert_eq!(registry.verbs().len(), 1);
    assert!(fault_lines(&health).await.is_empty());
}

#[tokio::test]
async fn slow_gateway_counts_as_fault() {
    struct Silent;

    #[async_trait::async_trait]
    impl epp_core::RpcTransport for Silent {
        async fn request(&self, _payload: &str) -> epp_core::Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }

        fn transport_name(&self) -> &'static str {
            "silent"
        }
    }

    let dir = TempDir::new().unwrap();
    let health = dir.path().join("gateway.health");
    let client = epp_core::EppClient::new(std::sync::Arc::new(Silent))
        .with_health(HealthSignal::new(&health))
        .with_restart_delay(Duration::from_millis(1))
        .with_request_timeout(Duration::from_millis(20));

    let err = client.domain_check(&names()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connectivity);
    assert_eq!(fault_lines(&health).await.len(), 1);
}
