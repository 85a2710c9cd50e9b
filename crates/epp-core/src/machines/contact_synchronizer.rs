//! ContactSynchronizer
//!
//! ```text
//! AT_STARTUP ─► CONTACT_CREATE ─► DONE
//!     │              │ 2303
//!     │              └──────► CONTACT_RECREATE ─► DONE
//!     └───► CONTACT_UPDATE ─► DONE
//!                 │ 2303
//!                 └──────► CONTACT_CREATE
//! ```
//!
//! A contact without a registry id is created under a fresh id derived
//! from its email. If the registry answers the create with `2303`, the id
//! is mutated once (derived from `"a" + email`) and the create repeated.
//! A known contact is updated; if it has vanished at the registry it is
//! created again under a fresh id. New ids are persisted.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Context, Output};
use crate::automaton::{Transition, machine_states};
use crate::epp::{Command, ContactData, Response, ResponseData, make_epp_id};
use crate::error::{Error, ResultCode, Result};
use crate::model::Contact;

machine_states! {
    pub enum ContactState {
        Startup => "AT_STARTUP",
        ContactCreate => "CONTACT_CREATE",
        ContactRecreate => "CONTACT_RECREATE",
        ContactUpdate => "CONTACT_UPDATE",
        Done => "DONE",
        Failed => "FAILED",
    }
    terminal: [Done, Failed]
}

#[derive(Debug)]
pub enum ContactEvent {
    /// Synchronize this contact
    Run(Box<Contact>),
    Reply(Response),
}

pub struct ContactSynchronizer {
    ctx: Context,
    contact: Option<Contact>,
    /// Id sent with the last create or update
    pending_id: String,
}

impl ContactSynchronizer {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            contact: None,
            pending_id: String::new(),
        }
    }

    /// The contact as synchronized so far
    pub fn contact(&self) -> Option<&Contact> {
        self.contact.as_ref()
    }

    fn subject(&self) -> Result<&Contact> {
        self.contact
            .as_ref()
            .ok_or_else(|| Error::automaton("contact_synchronizer has no contact"))
    }

    async fn send_create(&mut self, id: String) -> Result<Response> {
        let data = ContactData::from_contact(self.subject()?, id.clone());
        self.pending_id = id;
        self.ctx.client.request(&Command::ContactCreate(data), false).await
    }

    async fn send_update(&mut self, id: String) -> Result<Response> {
        let data = ContactData::from_contact(self.subject()?, id.clone());
        self.pending_id = id;
        self.ctx.client.request(&Command::ContactUpdate(data), false).await
    }

    /// Store the id the registry now knows the contact under
    async fn write_contact(&mut self, epp_id: String) -> Result<()> {
        let mut contact = self.subject()?.clone();
        contact.epp_id = Some(epp_id);
        let saved = self.ctx.store.contact_save(&contact).await?;
        self.contact = Some(saved);
        Ok(())
    }

    fn created_id(&self, response: &Response) -> String {
        match &response.data {
            ResponseData::ContactCreated(created) if !created.id.is_empty() => created.id.clone(),
            _ => self.pending_id.clone(),
        }
    }
}

#[async_trait]
impl crate::automaton::StateMachine for ContactSynchronizer {
    type State = ContactState;
    type Event = ContactEvent;
    type Output = Output;

    fn name(&self) -> &'static str {
        "contact_synchronizer"
    }

    async fn transition(
        &mut self,
        state: ContactState,
        event: ContactEvent,
        outputs: &mut Vec<Output>,
    ) -> Result<Transition<ContactState, ContactEvent>> {
        match (state, event) {
            (ContactState::Startup, ContactEvent::Run(contact)) => {
                let known = contact.known_epp_id().map(str::to_string);
                let email = contact.contact_email.clone();
                self.contact = Some(*contact);

                match known {
                    Some(id) => {
                        let reply = self.send_update(id).await?;
                        Ok(Transition::then(ContactState::ContactUpdate, ContactEvent::Reply(reply)))
                    }
                    None => {
                        let reply = self.send_create(make_epp_id(&email)).await?;
                        Ok(Transition::then(ContactState::ContactCreate, ContactEvent::Reply(reply)))
                    }
                }
            }

            (ContactState::ContactCreate, ContactEvent::Reply(reply))
                if reply.code == ResultCode::ObjectDoesNotExist =>
            {
                warn!(
                    "Contact id {} rejected with {}, retrying with a new id",
                    self.pending_id, reply.code
                );
                let email = self.subject()?.contact_email.clone();
                outputs.push(reply.into());
                let reply = self.send_create(make_epp_id(&format!("a{}", email))).await?;
                Ok(Transition::then(ContactState::ContactRecreate, ContactEvent::Reply(reply)))
            }

            (ContactState::ContactCreate | ContactState::ContactRecreate, ContactEvent::Reply(reply)) => {
                if !reply.is_success() {
                    return Err(reply.error());
                }
                let epp_id = self.created_id(&reply);
                outputs.push(reply.into());
                self.write_contact(epp_id.clone()).await?;
                info!("Contact {} created", epp_id);
                Ok(Transition::to(ContactState::Done))
            }

            (ContactState::ContactUpdate, ContactEvent::Reply(reply))
                if reply.code == ResultCode::ObjectDoesNotExist =>
            {
                warn!("Contact {} does not exist at the registry, creating it", self.pending_id);
                let email = self.subject()?.contact_email.clone();
                outputs.push(reply.into());
                let reply = self.send_create(make_epp_id(&email)).await?;
                Ok(Transition::then(ContactState::ContactCreate, ContactEvent::Reply(reply)))
            }

            (ContactState::ContactUpdate, ContactEvent::Reply(reply)) => {
                if !reply.is_success() {
                    return Err(reply.error());
                }
                outputs.push(reply.into());
                let epp_id = self.pending_id.clone();
                self.write_contact(epp_id).await?;
                Ok(Transition::to(ContactState::Done))
            }

            (state, event) => Err(Error::automaton(format!(
                "contact_synchronizer cannot handle {:?} in {}",
                event, state
            ))),
        }
    }
}
