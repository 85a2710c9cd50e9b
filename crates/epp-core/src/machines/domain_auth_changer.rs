//! DomainAuthChanger
//!
//! `AT_STARTUP ─► AUTH_UPDATE ─► DONE`: sets a new transfer authorization
//! code at the registry and stores it on the domain record.

use async_trait::async_trait;
use tracing::info;

use super::{Context, Output};
use crate::automaton::{StateMachine, Transition, machine_states};
use crate::epp::{DomainUpdate, Response};
use crate::error::{Error, Result};
use crate::model::Domain;

machine_states! {
    pub enum AuthChangerState {
        Startup => "AT_STARTUP",
        AuthUpdate => "AUTH_UPDATE",
        Done => "DONE",
        Failed => "FAILED",
    }
    terminal: [Done, Failed]
}

#[derive(Debug)]
pub enum AuthChangerEvent {
    Run {
        domain: Box<Domain>,
        auth_info: String,
    },
    UpdateReply(Response),
}

pub struct DomainAuthChanger {
    ctx: Context,
    domain: Option<Domain>,
    auth_info: String,
}

impl DomainAuthChanger {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            domain: None,
            auth_info: String::new(),
        }
    }
}

#[async_trait]
impl StateMachine for DomainAuthChanger {
    type State = AuthChangerState;
    type Event = AuthChangerEvent;
    type Output = Output;

    fn name(&self) -> &'static str {
        "domain_auth_changer"
    }

    async fn transition(
        &mut self,
        state: AuthChangerState,
        event: AuthChangerEvent,
        outputs: &mut Vec<Output>,
    ) -> Result<Transition<AuthChangerState, AuthChangerEvent>> {
        match (state, event) {
            (AuthChangerState::Startup, AuthChangerEvent::Run { domain, auth_info }) => {
                if auth_info.is_empty() {
                    return Err(Error::command_invalid("empty auth code"));
                }
                let update = DomainUpdate::new(&domain.name).with_auth_info(&auth_info);
                self.domain = Some(*domain);
                self.auth_info = auth_info;
                let reply = self.ctx.client.domain_update(update).await?;
                Ok(Transition::then(AuthChangerState::AuthUpdate, AuthChangerEvent::UpdateReply(reply)))
            }

            (AuthChangerState::AuthUpdate, AuthChangerEvent::UpdateReply(reply)) => {
                outputs.push(reply.into());
                let mut domain = self
                    .domain
                    .take()
                    .ok_or_else(|| Error::automaton("domain_auth_changer has no domain"))?;
                domain.auth_key = Some(std::mem::take(&mut self.auth_info));
                self.ctx.store.domain_save(&domain).await?;
                info!("Auth code of {} changed", domain.name);
                Ok(Transition::to(AuthChangerState::Done))
            }

            (state, event) => Err(Error::automaton(format!(
                "domain_auth_changer cannot handle {:?} in {}",
                event, state
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{harness, result};
    use super::*;
    use crate::traits::Persistence;

    fn run_event(auth_info: &str) -> AuthChangerEvent {
        AuthChangerEvent::Run {
            domain: Box::new(Domain::new("example.ai", "owner@example.com")),
            auth_info: auth_info.to_string(),
        }
    }

    #[tokio::test]
    async fn test_changes_and_stores_auth_code() {
        let h = harness();
        h.stub.reply(result(1000));

        let finished = super::super::run(
            &h.ctx.registry,
            DomainAuthChanger::new(h.ctx.clone()),
            h.ctx.options,
            run_event("Secret123abc"),
        )
        .await
        .unwrap();

        assert_eq!(finished.state, AuthChangerState::Done);
        assert_eq!(h.stub.sent()[0]["args"]["auth_info"], "Secret123abc");
        let stored = h.store.domain_find("example.ai").await.unwrap().unwrap();
        assert_eq!(stored.auth_key.as_deref(), Some("Secret123abc"));
    }

    #[tokio::test]
    async fn test_rejected_change_keeps_old_code() {
        let h = harness();
        h.stub.reply(result(2304));

        let finished = super::super::run(
            &h.ctx.registry,
            DomainAuthChanger::new(h.ctx.clone()),
            h.ctx.options,
            run_event("Secret123abc"),
        )
        .await
        .unwrap();

        assert!(finished.failed());
        assert!(h.store.domain_find("example.ai").await.unwrap().is_none());
    }
}
