//! DomainReader
//!
//! ```text
//! AT_STARTUP ─► DOMAIN_INFO ─► CONTACTS_INFO* ─► REGISTRANT_INFO ─► DONE
//! ```
//!
//! Reads a domain, then every role contact it references and finally its
//! registrant, one `contact_info` at a time. The last output is a
//! [`DomainSnapshot`].

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;

use super::{Context, DomainSnapshot, Output};
use crate::automaton::{StateMachine, Transition, machine_states};
use crate::epp::{ContactInfo, DomainInfo, Response};
use crate::error::{Error, Result};
use crate::model::ContactRole;

machine_states! {
    pub enum ReaderState {
        Startup => "AT_STARTUP",
        DomainInfo => "DOMAIN_INFO",
        ContactsInfo => "CONTACTS_INFO",
        RegistrantInfo => "REGISTRANT_INFO",
        Done => "DONE",
        Failed => "FAILED",
    }
    terminal: [Done, Failed]
}

#[derive(Debug)]
pub enum ReaderEvent {
    Run {
        name: String,
        auth_info: Option<String>,
    },
    DomainReply(Response),
    NextContact,
    ContactReply {
        role: ContactRole,
        reply: Response,
    },
    RegistrantReply(Response),
}

pub struct DomainReader {
    ctx: Context,
    verify_registrant: bool,
    info: Option<DomainInfo>,
    pending: VecDeque<(ContactRole, String)>,
    contacts: BTreeMap<ContactRole, ContactInfo>,
}

impl DomainReader {
    pub fn new(ctx: Context, verify_registrant: bool) -> Self {
        Self {
            ctx,
            verify_registrant,
            info: None,
            pending: VecDeque::new(),
            contacts: BTreeMap::new(),
        }
    }

    async fn check_registrant(&self, info: &DomainInfo) -> Result<()> {
        let Some(domain) = self.ctx.store.domain_find(&info.name).await? else {
            return Ok(());
        };
        match (domain.registrant_epp_id(), info.registrant.as_deref()) {
            (Some(known), Some(reported)) if known != reported => Err(Error::registrant_auth_failed(
                format!("{} is registered to {}, expected {}", info.name, reported, known),
            )),
            _ => Ok(()),
        }
    }

    fn snapshot(&mut self, registrant: Option<ContactInfo>) -> Result<DomainSnapshot> {
        let info = self
            .info
            .take()
            .ok_or_else(|| Error::automaton("domain_reader finished without domain info"))?;
        Ok(DomainSnapshot {
            create_date: info.create_date.map(|date| date.to_rfc2822()),
            update_date: info.update_date.map(|date| date.to_rfc2822()),
            expiry_date: info.expiry_date.map(|date| date.to_rfc2822()),
            contacts: std::mem::take(&mut self.contacts),
            registrant,
            info,
        })
    }

    async fn read_registrant(&mut self, outputs: &mut Vec<Output>) -> Result<Transition<ReaderState, ReaderEvent>> {
        let registrant = self.info.as_ref().and_then(|info| info.registrant.clone());
        match registrant {
            Some(id) => {
                let reply = self.ctx.client.contact_info(&id).await?;
                Ok(Transition::then(ReaderState::RegistrantInfo, ReaderEvent::RegistrantReply(reply)))
            }
            None => {
                let snapshot = self.snapshot(None)?;
                outputs.push(Output::Snapshot(Box::new(snapshot)));
                Ok(Transition::to(ReaderState::Done))
            }
        }
    }
}

#[async_trait]
impl StateMachine for DomainReader {
    type State = ReaderState;
    type Event = ReaderEvent;
    type Output = Output;

    fn name(&self) -> &'static str {
        "domain_reader"
    }

    async fn transition(
        &mut self,
        state: ReaderState,
        event: ReaderEvent,
        outputs: &mut Vec<Output>,
    ) -> Result<Transition<ReaderState, ReaderEvent>> {
        match (state, event) {
            (ReaderState::Startup, ReaderEvent::Run { name, auth_info }) => {
                let reply = self.ctx.client.domain_info(&name, auth_info.as_deref()).await?;
                Ok(Transition::then(ReaderState::DomainInfo, ReaderEvent::DomainReply(reply)))
            }

            (ReaderState::DomainInfo, ReaderEvent::DomainReply(reply)) => {
                let info = reply.domain_info()?.clone();
                outputs.push(reply.into());
                if self.verify_registrant {
                    self.check_registrant(&info).await?;
                }
                self.pending = info.contacts.iter().map(|(role, id)| (*role, id.clone())).collect();
                self.info = Some(info);
                Ok(Transition::then(ReaderState::ContactsInfo, ReaderEvent::NextContact))
            }

            (ReaderState::ContactsInfo, ReaderEvent::NextContact) => match self.pending.pop_front() {
                Some((role, id)) => {
                    let reply = self.ctx.client.contact_info(&id).await?;
                    Ok(Transition::then(
                        ReaderState::ContactsInfo,
                        ReaderEvent::ContactReply { role, reply },
                    ))
                }
                None => self.read_registrant(outputs).await,
            },

            (ReaderState::ContactsInfo, ReaderEvent::ContactReply { role, reply }) => {
                self.contacts.insert(role, reply.contact_info()?.clone());
                outputs.push(reply.into());
                Ok(Transition::then(ReaderState::ContactsInfo, ReaderEvent::NextContact))
            }

            (ReaderState::RegistrantInfo, ReaderEvent::RegistrantReply(reply)) => {
                let registrant = reply.contact_info()?.clone();
                outputs.push(reply.into());
                let snapshot = self.snapshot(Some(registrant))?;
                outputs.push(Output::Snapshot(Box::new(snapshot)));
                Ok(Transition::to(ReaderState::Done))
            }

            (state, event) => Err(Error::automaton(format!(
                "domain_reader cannot handle {:?} in {}",
                event, state
            ))),
        }
    }
}
