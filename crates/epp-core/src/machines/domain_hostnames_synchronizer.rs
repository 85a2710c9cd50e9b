//! DomainHostnamesSynchronizer
//!
//! ```text
//! AT_STARTUP ─► HOSTS_CHECK ─► HOSTS_CREATE* ─┬─────────────────────────────► DONE
//!                                             └─ update_domain ─► DOMAIN_INFO ─► DOMAIN_UPDATE ─► DONE
//! ```
//!
//! Makes sure every nameserver of a domain exists as a host object, then
//! optionally replaces the domain's nameserver set at the registry.

use std::collections::VecDeque;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::diff::{self, DiffScope};
use super::{Context, Output, check_item};
use crate::automaton::{StateMachine, Transition, machine_states};
use crate::epp::Response;
use crate::error::{Error, Result, ResultCode};
use crate::model::Domain;

machine_states! {
    pub enum HostnamesState {
        Startup => "AT_STARTUP",
        HostsCheck => "HOSTS_CHECK",
        HostsCreate => "HOSTS_CREATE",
        DomainInfo => "DOMAIN_INFO",
        DomainUpdate => "DOMAIN_UPDATE",
        Done => "DONE",
        Failed => "FAILED",
    }
    terminal: [Done, Failed]
}

#[derive(Debug)]
pub enum HostnamesEvent {
    Run(Box<Domain>),
    CheckReply(Response),
    NextHost,
    HostReply(Response),
    InfoReply(Response),
    UpdateReply(Response),
}

pub struct DomainHostnamesSynchronizer {
    ctx: Context,
    update_domain: bool,
    domain: Option<Domain>,
    missing: VecDeque<String>,
}

impl DomainHostnamesSynchronizer {
    /// With `update_domain` the domain's nameservers are replaced too
    pub fn new(ctx: Context, update_domain: bool) -> Self {
        Self {
            ctx,
            update_domain,
            domain: None,
            missing: VecDeque::new(),
        }
    }

    fn domain(&self) -> Result<&Domain> {
        self.domain
            .as_ref()
            .ok_or_else(|| Error::automaton("domain_hostnames_synchronizer has no domain"))
    }

    async fn create_next(&mut self) -> Result<Transition<HostnamesState, HostnamesEvent>> {
        while let Some(host) = self.missing.pop_front() {
            match self.ctx.client.host_create(&host).await {
                Ok(reply) => {
                    return Ok(Transition::then(
                        HostnamesState::HostsCreate,
                        HostnamesEvent::HostReply(reply),
                    ));
                }
                // Created concurrently since the check
                Err(err) if err.has_code(ResultCode::ObjectExists) => {
                    warn!("Host {} already exists", host);
                }
                Err(err) => return Err(err),
            }
        }

        if !self.update_domain {
            return Ok(Transition::to(HostnamesState::Done));
        }
        let name = self.domain()?.name.clone();
        let reply = self.ctx.client.domain_info(&name, None).await?;
        Ok(Transition::then(HostnamesState::DomainInfo, HostnamesEvent::InfoReply(reply)))
    }
}

#[async_trait]
impl StateMachine for DomainHostnamesSynchronizer {
    type State = HostnamesState;
    type Event = HostnamesEvent;
    type Output = Output;

    fn name(&self) -> &'static str {
        "domain_hostnames_synchronizer"
    }

    async fn transition(
        &mut self,
        state: HostnamesState,
        event: HostnamesEvent,
        outputs: &mut Vec<Output>,
    ) -> Result<Transition<HostnamesState, HostnamesEvent>> {
        match (state, event) {
            (HostnamesState::Startup, HostnamesEvent::Run(domain)) => {
                let hosts = domain.nameserver_list();
                self.domain = Some(*domain);
                if hosts.is_empty() {
                    return Ok(Transition::then(HostnamesState::HostsCreate, HostnamesEvent::NextHost));
                }
                let reply = self.ctx.client.host_check(&hosts).await?;
                Ok(Transition::then(HostnamesState::HostsCheck, HostnamesEvent::CheckReply(reply)))
            }

            (HostnamesState::HostsCheck, HostnamesEvent::CheckReply(reply)) => {
                let hosts = self.domain()?.nameserver_list();
                for host in hosts {
                    if !check_item(&reply, &host)?.exists() {
                        self.missing.push_back(host);
                    }
                }
                debug!("{} hosts to create", self.missing.len());
                outputs.push(reply.into());
                Ok(Transition::then(HostnamesState::HostsCreate, HostnamesEvent::NextHost))
            }

            (HostnamesState::HostsCreate, HostnamesEvent::NextHost) => self.create_next().await,

            (HostnamesState::HostsCreate, HostnamesEvent::HostReply(reply)) => {
                outputs.push(reply.into());
                Ok(Transition::then(HostnamesState::HostsCreate, HostnamesEvent::NextHost))
            }

            (HostnamesState::DomainInfo, HostnamesEvent::InfoReply(reply)) => {
                let update = diff::domain_update(reply.domain_info()?, self.domain()?, DiffScope::NAMESERVERS);
                outputs.push(reply.into());
                if update.is_empty() {
                    debug!("Nameservers of {} are in sync", update.name);
                    return Ok(Transition::to(HostnamesState::Done));
                }
                let reply = self.ctx.client.domain_update(update).await?;
                Ok(Transition::then(HostnamesState::DomainUpdate, HostnamesEvent::UpdateReply(reply)))
            }

            (HostnamesState::DomainUpdate, HostnamesEvent::UpdateReply(reply)) => {
                outputs.push(reply.into());
                Ok(Transition::to(HostnamesState::Done))
            }

            (state, event) => Err(Error::automaton(format!(
                "domain_hostnames_synchronizer cannot handle {:?} in {}",
                event, state
            ))),
        }
    }
}
