//! DomainTransferRequestor
//!
//! ```text
//! AT_STARTUP ─► DOMAIN_INFO ─► TRANSFER! ─► DONE
//!      └──── skip_info ───────────┘
//! ```
//!
//! Failures while reading the domain are reported as
//! [`Error::TransferInfo`], a rejected request as [`Error::TransferRequest`].

use async_trait::async_trait;
use tracing::info;

use super::{Context, Output};
use crate::automaton::{StateMachine, Transition, machine_states};
use crate::epp::{DomainInfo, Response};
use crate::error::{Error, Result};

machine_states! {
    pub enum TransferState {
        Startup => "AT_STARTUP",
        DomainInfo => "DOMAIN_INFO",
        Transfer => "TRANSFER!",
        Done => "DONE",
        Failed => "FAILED",
    }
    terminal: [Done, Failed]
}

#[derive(Debug)]
pub enum TransferEvent {
    Run { name: String, auth_info: String },
    InfoReply(Response),
    TransferReply(Response),
}

fn info_failed(err: Error) -> Error {
    Error::TransferInfo(Box::new(err))
}

fn request_failed(err: Error) -> Error {
    Error::TransferRequest(Box::new(err))
}

/// Statuses that make a transfer request pointless
fn blocking_status(info: &DomainInfo) -> Option<&str> {
    info.statuses
        .iter()
        .map(|status| status.name.as_str())
        .find(|name| *name == "pendingTransfer" || name.ends_with("TransferProhibited"))
}

pub struct DomainTransferRequestor {
    ctx: Context,
    skip_info: bool,
    name: String,
    auth_info: String,
}

impl DomainTransferRequestor {
    pub fn new(ctx: Context, skip_info: bool) -> Self {
        Self {
            ctx,
            skip_info,
            name: String::new(),
            auth_info: String::new(),
        }
    }

    async fn request_transfer(&self) -> Result<Transition<TransferState, TransferEvent>> {
        let reply = self
            .ctx
            .client
            .domain_transfer(&self.name, &self.auth_info)
            .await
            .map_err(request_failed)?;
        Ok(Transition::then(TransferState::Transfer, TransferEvent::TransferReply(reply)))
    }
}

#[async_trait]
impl StateMachine for DomainTransferRequestor {
    type State = TransferState;
    type Event = TransferEvent;
    type Output = Output;

    fn name(&self) -> &'static str {
        "domain_transfer_requestor"
    }

    async fn transition(
        &mut self,
        state: TransferState,
        event: TransferEvent,
        outputs: &mut Vec<Output>,
    ) -> Result<Transition<TransferState, TransferEvent>> {
        match (state, event) {
            (TransferState::Startup, TransferEvent::Run { name, auth_info }) => {
                self.name = name;
                self.auth_info = auth_info;
                if self.skip_info {
                    return self.request_transfer().await;
                }
                let reply = self
                    .ctx
                    .client
                    .domain_info(&self.name, Some(&self.auth_info))
                    .await
                    .map_err(info_failed)?;
                Ok(Transition::then(TransferState::DomainInfo, TransferEvent::InfoReply(reply)))
            }

            (TransferState::DomainInfo, TransferEvent::InfoReply(reply)) => {
                let domain_info = reply.domain_info().map_err(|e| info_failed(e.clone()))?;
                if let Some(status) = blocking_status(domain_info) {
                    return Err(info_failed(Error::InvalidStatus(format!(
                        "{} has status {}",
                        self.name, status
                    ))));
                }
                if domain_info.sponsor.as_deref() == Some(self.ctx.registrar_id.as_str()) {
                    return Err(info_failed(Error::InvalidStatus(format!(
                        "{} is already sponsored by {}",
                        self.name, self.ctx.registrar_id
                    ))));
                }
                outputs.push(reply.into());
                self.request_transfer().await
            }

            (TransferState::Transfer, TransferEvent::TransferReply(reply)) => {
                info!("Transfer of {} requested: {}", self.name, reply.code);
                outputs.push(reply.into());
                Ok(Transition::to(TransferState::Done))
            }

            (state, event) => Err(Error::automaton(format!(
                "domain_transfer_requestor cannot handle {:?} in {}",
                event, state
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{harness, result, with_data};
    use super::*;
    use serde_json::json;

    fn info_with_status(statuses: &[&str]) -> serde_json::Value {
        let status: Vec<_> = statuses.iter().map(|s| json!({"@s": s})).collect();
        with_data(
            1000,
            json!({"infData": {"name": "example.ai", "status": status, "clID": "other_registrar"}}),
        )
    }

    fn run_event() -> TransferEvent {
        TransferEvent::Run {
            name: "example.ai".to_string(),
            auth_info: "Secret123abc".to_string(),
        }
    }

    #[tokio::test]
    async fn test_pending_action_is_accepted() {
        let h = harness();
        h.stub.reply(info_with_status(&["ok"])).reply(result(1001));

        let finished = super::super::run(
            &h.ctx.registry,
            DomainTransferRequestor::new(h.ctx.clone(), false),
            h.ctx.options,
            run_event(),
        )
        .await
        .unwrap();

        assert_eq!(finished.state, TransferState::Done);
        assert_eq!(h.stub.sent_verbs(), vec!["domain_info", "domain_transfer"]);
        assert_eq!(h.stub.sent()[1]["args"]["op"], "request");
    }

    #[tokio::test]
    async fn test_skip_info() {
        let h = harness();
        h.stub.reply(result(1000));

        let finished = super::super::run(
            &h.ctx.registry,
            DomainTransferRequestor::new(h.ctx.clone(), true),
            h.ctx.options,
            run_event(),
        )
        .await
        .unwrap();

        assert_eq!(finished.state, TransferState::Done);
        assert_eq!(h.stub.sent_verbs(), vec!["domain_transfer"]);
    }

    #[tokio::test]
    async fn test_prohibited_status_fails_info_phase() {
        let h = harness();
        h.stub.reply(info_with_status(&["clientTransferProhibited"]));

        let finished = super::super::run(
            &h.ctx.registry,
            DomainTransferRequestor::new(h.ctx.clone(), false),
            h.ctx.options,
            run_event(),
        )
        .await
        .unwrap();

        assert!(finished.failed());
        let err = finished.outputs.last().unwrap().as_error().unwrap();
        assert!(matches!(err, Error::TransferInfo(inner) if matches!(**inner, Error::InvalidStatus(_))));
        assert_eq!(h.stub.sent_verbs(), vec!["domain_info"]);
    }

    #[tokio::test]
    async fn test_info_and_request_errors_are_distinguished() {
        let h = harness();
        h.stub.reply(result(2202));
        let finished = super::super::run(
            &h.ctx.registry,
            DomainTransferRequestor::new(h.ctx.clone(), false),
            h.ctx.options,
            run_event(),
        )
        .await
        .unwrap();
        let err = finished.outputs.last().unwrap().as_error().unwrap();
        assert!(matches!(err, Error::TransferInfo(_)));
        assert_eq!(err.code(), 2202);

        let h = harness();
        h.stub.reply(info_with_status(&["ok"])).reply(result(2106));
        let finished = super::super::run(
            &h.ctx.registry,
            DomainTransferRequestor::new(h.ctx.clone(), false),
            h.ctx.options,
            run_event(),
        )
        .await
        .unwrap();
        let err = finished.outputs.last().unwrap().as_error().unwrap();
        assert!(matches!(err, Error::TransferRequest(_)));
        assert_eq!(err.code(), 2106);
    }
}
