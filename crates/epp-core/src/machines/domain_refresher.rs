//! DomainRefresher
//!
//! ```text
//! AT_STARTUP ─► EXISTS? ─► INFO? ─► CONTACTS?* ─► DONE
//!     └── skip_check ────────┘
//! ```
//!
//! Pulls the registry copy of a domain into the local record. The registry
//! is authoritative: a domain it no longer has is deleted locally, and a
//! domain sponsored by another registrar is either dropped (transferred
//! away) or refused.
//!
//! Registrant handling:
//!
//! - same registrant as stored: kept
//! - different registrant: only with `change_owner_allowed`
//! - registrant unknown locally: created from `contact_info` only with
//!   `create_new_owner_allowed`

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Context, Output, check_item, ensure_supported_zone};
use crate::automaton::{StateMachine, Transition, machine_states};
use crate::epp::{Command, ContactInfo, DomainInfo, EppClient, Response};
use crate::error::{Error, Result, ResultCode};
use crate::model::{Contact, ContactKind, ContactRole, Domain, DomainStatus, MAX_NAMESERVERS};

machine_states! {
    pub enum RefresherState {
        Startup => "AT_STARTUP",
        Exists => "EXISTS?",
        Info => "INFO?",
        Contacts => "CONTACTS?",
        Done => "DONE",
        Failed => "FAILED",
    }
    terminal: [Done, Failed]
}

#[derive(Debug)]
pub enum RefresherEvent {
    /// Refresh the domain with this name
    Run(String),
    CheckReply(Response),
    InfoReply(Response),
    NextContact,
    ContactReply {
        /// `None` for the registrant
        role: Option<ContactRole>,
        reply: Response,
    },
}

#[derive(Debug, Clone, Default)]
pub struct RefreshOptions {
    /// Go straight to `domain_info`
    pub skip_check: bool,
    /// Read role contacts and update their local records
    pub refresh_contacts: bool,
    /// Like `refresh_contacts`, and drop local roles the registry lacks
    pub rewrite_contacts: bool,
    pub change_owner_allowed: bool,
    pub create_new_owner_allowed: bool,
    /// Keep the local row when the domain is gone from the registry
    pub soft_delete: bool,
    /// A domain sponsored by another registrar was transferred away
    pub domain_transferred_away: bool,
    /// Bound on each request of this conversation
    pub request_time_limit: Option<Duration>,
}

pub struct DomainRefresher {
    ctx: Context,
    client: EppClient,
    options: RefreshOptions,
    name: String,
    domain: Option<Domain>,
    pending: VecDeque<(Option<ContactRole>, String)>,
}

impl DomainRefresher {
    pub fn new(ctx: Context, options: RefreshOptions) -> Self {
        let client = match options.request_time_limit {
            Some(limit) => ctx.client.with_request_timeout(limit),
            None => ctx.client.clone(),
        };
        Self {
            ctx,
            client,
            options,
            name: String::new(),
            domain: None,
            pending: VecDeque::new(),
        }
    }

    /// The local record as last written
    pub fn domain(&self) -> Option<&Domain> {
        self.domain.as_ref()
    }

    async fn request_info(&self) -> Result<Transition<RefresherState, RefresherEvent>> {
        let command = Command::DomainInfo {
            name: self.name.clone(),
            auth_info: None,
        };
        let reply = self.client.request(&command, false).await?;
        Ok(Transition::then(RefresherState::Info, RefresherEvent::InfoReply(reply)))
    }

    async fn remove_local(&self, reason: &str) -> Result<Transition<RefresherState, RefresherEvent>> {
        info!(
            "Removing {} locally ({}), soft={}",
            self.name, reason, self.options.soft_delete
        );
        self.ctx
            .store
            .domain_delete(&self.name, self.options.soft_delete)
            .await?;
        Ok(Transition::to(RefresherState::Done))
    }

    /// Apply the registrant rules, queueing a read if a new local registrant is needed
    async fn resolve_registrant(&mut self, domain: &mut Domain, reported: &str) -> Result<()> {
        if domain.registrant_epp_id() == Some(reported) {
            return Ok(());
        }
        if let Some(known) = domain.registrant_epp_id() {
            if !self.options.change_owner_allowed {
                return Err(Error::registrant_auth_failed(format!(
                    "{} is registered to {}, stored registrant is {}",
                    domain.name, reported, known
                )));
            }
            warn!("Owner of {} changes from {} to {}", domain.name, known, reported);
        }

        match self.ctx.store.registrant_find(reported).await? {
            Some(registrant) => {
                domain.owner = registrant.owner.clone();
                domain.registrant = Some(registrant);
                Ok(())
            }
            None if self.options.create_new_owner_allowed => {
                self.pending.push_front((None, reported.to_string()));
                Ok(())
            }
            None => Err(Error::RegistrantUnknown(format!(
                "{} is registered to {} which is not known locally",
                domain.name, reported
            ))),
        }
    }

    fn queue_contacts(&mut self, domain: &mut Domain, info: &DomainInfo) {
        if !(self.options.refresh_contacts || self.options.rewrite_contacts) {
            return;
        }
        for role in ContactRole::ALL {
            match info.contacts.get(&role) {
                Some(id) => self.pending.push_back((Some(role), id.clone())),
                None if self.options.rewrite_contacts => domain.contacts.set(role, None),
                None => {}
            }
        }
    }

    async fn store_contact(&mut self, role: Option<ContactRole>, contact_info: &ContactInfo) -> Result<()> {
        let domain = self
            .domain
            .as_mut()
            .ok_or_else(|| Error::automaton("domain_refresher has no domain"))?;

        let mut contact = match self.ctx.store.contact_find(&contact_info.id).await? {
            Some(contact) => contact,
            None => Contact {
                owner: domain.owner.clone(),
                ..Contact::default()
            },
        };
        apply_contact_info(&mut contact, contact_info);

        match role {
            None => {
                contact.kind = ContactKind::Registrant;
                if contact.owner.is_empty() {
                    contact.owner = contact.contact_email.clone();
                }
                let saved = self.ctx.store.contact_save(&contact).await?;
                domain.owner = saved.owner.clone();
                domain.registrant = Some(saved);
            }
            Some(role) => {
                let saved = self.ctx.store.contact_save(&contact).await?;
                domain.contacts.set(role, Some(saved));
            }
        }
        Ok(())
    }
}

/// Copy registry contact details into a local record
fn apply_contact_info(contact: &mut Contact, info: &ContactInfo) {
    contact.epp_id = Some(info.id.clone());
    contact.contact_email = info.email.clone();
    contact.contact_voice = info.voice.clone();
    contact.contact_fax = info.fax.clone();
    if let Some(postal) = &info.postal {
        contact.person_name = postal.name.clone();
        contact.organization_name = postal.org.clone();
        contact.address_street = postal.street.join("\n");
        contact.address_city = postal.city.clone();
        contact.address_province = postal.sp.clone();
        contact.address_postal_code = postal.pc.clone();
        contact.address_country = postal.cc.clone();
    }
}

/// Copy registry domain details into a local record
fn apply_domain_info(domain: &mut Domain, info: &DomainInfo) {
    domain.epp_id = Some(info.roid.clone().unwrap_or_else(|| info.name.clone()));
    domain.create_date = info.create_date.or(domain.create_date);
    domain.expiry_date = info.expiry_date.or(domain.expiry_date);
    domain.epp_statuses = info.status_map();
    domain.registrar = info.sponsor.clone();
    domain.nameservers = info.nameservers.iter().take(MAX_NAMESERVERS).cloned().collect();
    if info.auth_info.is_some() {
        domain.auth_key = info.auth_info.clone();
    }
    domain.status = if info.has_status("pendingDelete") {
        DomainStatus::ToBeDeleted
    } else if info.has_status("clientHold") || info.has_status("serverHold") {
        DomainStatus::Suspended
    } else {
        DomainStatus::Active
    };
}

#[async_trait]
impl StateMachine for DomainRefresher {
    type State = RefresherState;
    type Event = RefresherEvent;
    type Output = Output;

    fn name(&self) -> &'static str {
        "domain_refresher"
    }

    async fn transition(
        &mut self,
        state: RefresherState,
        event: RefresherEvent,
        outputs: &mut Vec<Output>,
    ) -> Result<Transition<RefresherState, RefresherEvent>> {
        match (state, event) {
            (RefresherState::Startup, RefresherEvent::Run(name)) => {
                self.name = name;
                if self.options.skip_check {
                    return self.request_info().await;
                }
                let reply = self.client.domain_check(std::slice::from_ref(&self.name)).await?;
                Ok(Transition::then(RefresherState::Exists, RefresherEvent::CheckReply(reply)))
            }

            (RefresherState::Exists, RefresherEvent::CheckReply(reply)) => {
                let item = check_item(&reply, &self.name)?;
                ensure_supported_zone(item)?;
                let exists = item.exists();
                outputs.push(reply.into());
                if !exists {
                    return self.remove_local("not registered").await;
                }
                self.request_info().await
            }

            (RefresherState::Info, RefresherEvent::InfoReply(reply))
                if reply.code == ResultCode::ObjectDoesNotExist =>
            {
                outputs.push(reply.into());
                self.remove_local("not registered").await
            }

            (RefresherState::Info, RefresherEvent::InfoReply(reply)) => {
                if !reply.is_success() {
                    return Err(reply.error());
                }
                let info = reply.domain_info()?.clone();
                outputs.push(reply.into());

                if let Some(sponsor) = info.sponsor.as_deref() {
                    if sponsor != self.ctx.registrar_id {
                        if self.options.domain_transferred_away {
                            return self.remove_local("transferred away").await;
                        }
                        return Err(Error::RegistrarAuthFailed(format!(
                            "{} is sponsored by {}",
                            self.name, sponsor
                        )));
                    }
                }

                let mut domain = match self.ctx.store.domain_find(&self.name).await? {
                    Some(domain) => domain,
                    None => Domain::new(&self.name, ""),
                };
                if let Some(reported) = info.registrant.as_deref() {
                    self.resolve_registrant(&mut domain, reported).await?;
                }
                self.queue_contacts(&mut domain, &info);
                apply_domain_info(&mut domain, &info);
                self.domain = Some(domain);
                Ok(Transition::then(RefresherState::Contacts, RefresherEvent::NextContact))
            }

            (RefresherState::Contacts, RefresherEvent::NextContact) => match self.pending.pop_front() {
                Some((role, id)) => {
                    let reply = self.client.contact_info(&id).await?;
                    Ok(Transition::then(
                        RefresherState::Contacts,
                        RefresherEvent::ContactReply { role, reply },
                    ))
                }
                None => {
                    let domain = self
                        .domain
                        .clone()
                        .ok_or_else(|| Error::automaton("domain_refresher has no domain"))?;
                    self.ctx.store.domain_save(&domain).await?;
                    info!("Domain {} refreshed from the registry", domain.name);
                    outputs.push(Output::Domain(Box::new(domain)));
                    Ok(Transition::to(RefresherState::Done))
                }
            },

            (RefresherState::Contacts, RefresherEvent::ContactReply { role, reply }) => {
                let contact_info = reply.contact_info()?.clone();
                outputs.push(reply.into());
                self.store_contact(role, &contact_info).await?;
                Ok(Transition::then(RefresherState::Contacts, RefresherEvent::NextContact))
            }

            (state, event) => Err(Error::automaton(format!(
                "domain_refresher cannot handle {:?} in {}",
                event, state
            ))),
        }
    }
}
