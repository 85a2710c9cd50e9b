//! DomainContactsSynchronizer
//!
//! ```text
//! AT_STARTUP ─► SYNC_CONTACTS ─► DOMAIN_INFO ─► DOMAIN_UPDATE ─► DONE
//! ```
//!
//! Brings the registrant and role contacts of a registered domain in line
//! with the local record: contacts are synchronized first, then the
//! registry's associations are diffed role by role and one `domain_update`
//! adds, removes or changes what differs.

use async_trait::async_trait;
use tracing::{debug, info};

use super::diff::{self, DiffScope};
use super::{Context, Output, sync_domain_contacts};
use crate::automaton::{StateMachine, Transition, machine_states};
use crate::epp::Response;
use crate::error::{Error, Result};
use crate::model::Domain;

machine_states! {
    pub enum DomainContactsState {
        Startup => "AT_STARTUP",
        SyncContacts => "SYNC_CONTACTS",
        DomainInfo => "DOMAIN_INFO",
        DomainUpdate => "DOMAIN_UPDATE",
        Done => "DONE",
        Failed => "FAILED",
    }
    terminal: [Done, Failed]
}

#[derive(Debug)]
pub enum DomainContactsEvent {
    Run(Box<Domain>),
    ContactsSynced,
    InfoReply(Response),
    UpdateReply(Response),
}

pub struct DomainContactsSynchronizer {
    ctx: Context,
    domain: Option<Domain>,
}

impl DomainContactsSynchronizer {
    pub fn new(ctx: Context) -> Self {
        Self { ctx, domain: None }
    }

    /// The domain with the registry ids its contacts ended up with
    pub fn domain(&self) -> Option<&Domain> {
        self.domain.as_ref()
    }

    fn subject(&self) -> Result<&Domain> {
        self.domain
            .as_ref()
            .ok_or_else(|| Error::automaton("domain_contacts_synchronizer has no domain"))
    }
}

#[async_trait]
impl StateMachine for DomainContactsSynchronizer {
    type State = DomainContactsState;
    type Event = DomainContactsEvent;
    type Output = Output;

    fn name(&self) -> &'static str {
        "domain_contacts_synchronizer"
    }

    async fn transition(
        &mut self,
        state: DomainContactsState,
        event: DomainContactsEvent,
        outputs: &mut Vec<Output>,
    ) -> Result<Transition<DomainContactsState, DomainContactsEvent>> {
        match (state, event) {
            (DomainContactsState::Startup, DomainContactsEvent::Run(domain)) => {
                let mut domain = *domain;
                sync_domain_contacts(&self.ctx, &mut domain).await?;
                self.domain = Some(domain);
                Ok(Transition::then(
                    DomainContactsState::SyncContacts,
                    DomainContactsEvent::ContactsSynced,
                ))
            }

            (DomainContactsState::SyncContacts, DomainContactsEvent::ContactsSynced) => {
                let name = self.subject()?.name.clone();
                let reply = self.ctx.client.domain_info(&name, None).await?;
                Ok(Transition::then(
                    DomainContactsState::DomainInfo,
                    DomainContactsEvent::InfoReply(reply),
                ))
            }

            (DomainContactsState::DomainInfo, DomainContactsEvent::InfoReply(reply)) => {
                let update = diff::domain_update(reply.domain_info()?, self.subject()?, DiffScope::CONTACTS);
                outputs.push(reply.into());
                if update.is_empty() {
                    debug!("Contacts of {} are in sync", update.name);
                    self.ctx.store.domain_save(self.subject()?).await?;
                    return Ok(Transition::to(DomainContactsState::Done));
                }
                info!(
                    "Updating contacts of {}: +{} -{} registrant {:?}",
                    update.name,
                    update.add_contacts.len(),
                    update.remove_contacts.len(),
                    update.change_registrant
                );
                let reply = self.ctx.client.domain_update(update).await?;
                Ok(Transition::then(
                    DomainContactsState::DomainUpdate,
                    DomainContactsEvent::UpdateReply(reply),
                ))
            }

            (DomainContactsState::DomainUpdate, DomainContactsEvent::UpdateReply(reply)) => {
                outputs.push(reply.into());
                // Only what the registry accepted is stored
                self.ctx.store.domain_save(self.subject()?).await?;
                Ok(Transition::to(DomainContactsState::Done))
            }

            (state, event) => Err(Error::automaton(format!(
                "domain_contacts_synchronizer cannot handle {:?} in {}",
                event, state
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{contact, domain_info, harness, result};
    use super::*;
    use crate::model::{ContactKind, ContactRole};
    use crate::traits::Persistence;

    fn domain() -> Box<Domain> {
        let mut domain = Domain::new("example.ai", "owner@example.com");
        let mut registrant = contact("owner@example.com", Some("reg1"));
        registrant.kind = ContactKind::Registrant;
        domain.registrant = Some(registrant);
        domain
            .contacts
            .set(ContactRole::Admin, Some(contact("admin@example.com", Some("adm2"))));
        Box::new(domain)
    }

    #[tokio::test]
    async fn test_replaces_changed_role_contact() {
        let h = harness();
        h.stub
            .reply(result(1000))
            .reply(result(1000))
            .reply(domain_info("example.ai", "reg1", &[("admin", "adm1"), ("tech", "tech1")], &[]))
            .reply(result(1000));

        let finished = super::super::run(
            &h.ctx.registry,
            DomainContactsSynchronizer::new(h.ctx.clone()),
            h.ctx.options,
            DomainContactsEvent::Run(domain()),
        )
        .await
        .unwrap();

        assert_eq!(finished.state, DomainContactsState::Done);
        assert_eq!(
            h.stub.sent_verbs(),
            vec!["contact_update", "contact_update", "domain_info", "domain_update"]
        );
        let sent = h.stub.sent();
        let update = &sent[3]["args"];
        assert_eq!(update["add_contacts"][0]["id"], "adm2");
        assert_eq!(update["add_contacts"][0]["type"], "admin");
        assert_eq!(update["remove_contacts"].as_array().unwrap().len(), 2);
        assert!(update.get("change_registrant").is_none());

        assert!(h.store.domain_find("example.ai").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_skips_update_without_differences() {
        let h = harness();
        h.stub
            .reply(result(1000))
            .reply(result(1000))
            .reply(domain_info("example.ai", "reg1", &[("admin", "adm2")], &[]));

        let finished = super::super::run(
            &h.ctx.registry,
            DomainContactsSynchronizer::new(h.ctx.clone()),
            h.ctx.options,
            DomainContactsEvent::Run(domain()),
        )
        .await
        .unwrap();

        assert_eq!(finished.state, DomainContactsState::Done);
        assert_eq!(h.stub.sent_verbs().last().unwrap(), "domain_info");
        assert!(h.store.domain_find("example.ai").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rejected_update_leaves_store_untouched() {
        let h = harness();
        h.stub
            .reply(result(1000))
            .reply(result(1000))
            .reply(domain_info("example.ai", "reg1", &[("admin", "adm1")], &[]))
            .reply(result(2304));

        let finished = super::super::run(
            &h.ctx.registry,
            DomainContactsSynchronizer::new(h.ctx.clone()),
            h.ctx.options,
            DomainContactsEvent::Run(domain()),
        )
        .await
        .unwrap();

        assert!(finished.failed());
        assert_eq!(finished.outputs.last().unwrap().as_error().unwrap().code(), 2304);
        assert_eq!(h.stub.sent_verbs().last().unwrap(), "domain_update");
        assert!(h.store.domain_find("example.ai").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_contact_failure_aborts() {
        let h = harness();
        h.stub.reply(result(2201));

        let finished = super::super::run(
            &h.ctx.registry,
            DomainContactsSynchronizer::new(h.ctx.clone()),
            h.ctx.options,
            DomainContactsEvent::Run(domain()),
        )
        .await
        .unwrap();

        assert!(finished.failed());
        assert_eq!(finished.outputs.last().unwrap().as_error().unwrap().code(), 2201);
        assert_eq!(h.stub.sent_verbs(), vec!["contact_update"]);
    }
}
