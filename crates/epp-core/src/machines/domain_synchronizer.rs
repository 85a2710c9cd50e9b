//! DomainSynchronizer
//!
//! ```text
//! AT_STARTUP ─► EXISTS? ─┬─ registered ─► OWNER? ─┐
//!                        └────────────────────────┴─► CONTACTS ─► NAMESERVERS ─┐
//!   ┌───────────────────────────────────────────────────────────────────────────┘
//!   ├─ not registered ─► CREATE! ─┐
//!   └─────────────────────────────┴─► READ ─► UPDATE! ─► RENEW ─► DONE
//! ```
//!
//! Reconciles a local domain record with the registry, creating the domain
//! when it is not registered yet. A registered domain is only touched after
//! its registry registrant matched the stored one. Contacts and host
//! objects are handled by nested ContactSynchronizer and
//! DomainHostnamesSynchronizer conversations; any nested failure fails the
//! whole synchronization with that error.
//!
//! The local record is written after CREATE!, READ and RENEW. The last
//! output of a successful run is the record as written.

use async_trait::async_trait;
use tracing::{debug, info};

use super::diff::{self, DiffScope};
use super::domain_hostnames_synchronizer::HostnamesEvent;
use super::{
    Context, DomainHostnamesSynchronizer, Output, check_item, ensure_supported_zone, failure, run,
    sync_domain_contacts,
};
use crate::automaton::{StateMachine, Transition, machine_states};
use crate::epp::{ContactRef, DomainCreate, Response, ResponseData, generate_auth_info};
use crate::error::{Error, Result};
use crate::model::{Domain, DomainStatus};

machine_states! {
    pub enum SyncState {
        Startup => "AT_STARTUP",
        Exists => "EXISTS?",
        Owner => "OWNER?",
        Contacts => "CONTACTS",
        Nameservers => "NAMESERVERS",
        Create => "CREATE!",
        Read => "READ",
        Update => "UPDATE!",
        Renew => "RENEW",
        Done => "DONE",
        Failed => "FAILED",
    }
    terminal: [Done, Failed]
}

#[derive(Debug)]
pub enum SyncEvent {
    Run(Box<Domain>),
    CheckReply(Response),
    OwnerReply(Response),
    ContactsSynced,
    NameserversSynced,
    CreateReply(Response),
    InfoReply(Response),
    UpdateReply(Response),
    RenewReply(Response),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Synchronize contacts of a registered domain too
    pub sync_contacts: bool,
    /// Synchronize nameservers of a registered domain too
    pub sync_nameservers: bool,
    /// Renew a registered domain, or the registration period of a new one
    pub renew_years: Option<u32>,
}

fn held(slot: &mut Option<Domain>) -> Result<&mut Domain> {
    slot.as_mut()
        .ok_or_else(|| Error::automaton("domain_synchronizer has no domain"))
}

pub struct DomainSynchronizer {
    ctx: Context,
    options: SyncOptions,
    domain: Option<Domain>,
    exists: bool,
    created: bool,
}

impl DomainSynchronizer {
    pub fn new(ctx: Context, options: SyncOptions) -> Self {
        Self {
            ctx,
            options,
            domain: None,
            exists: false,
            created: false,
        }
    }

    /// The domain as synchronized so far
    pub fn domain(&self) -> Option<&Domain> {
        self.domain.as_ref()
    }

    fn subject(&self) -> Result<&Domain> {
        self.domain
            .as_ref()
            .ok_or_else(|| Error::automaton("domain_synchronizer has no domain"))
    }

    async fn sync_contacts(&mut self) -> Result<Transition<SyncState, SyncEvent>> {
        if self.options.sync_contacts || !self.exists {
            let domain = held(&mut self.domain)?;
            sync_domain_contacts(&self.ctx, domain).await?;
        }
        Ok(Transition::then(SyncState::Contacts, SyncEvent::ContactsSynced))
    }

    async fn sync_nameservers(&mut self, outputs: &mut Vec<Output>) -> Result<Transition<SyncState, SyncEvent>> {
        let domain = self.subject()?;
        if (self.options.sync_nameservers || !self.exists) && !domain.nameserver_list().is_empty() {
            let finished = run(
                &self.ctx.registry,
                DomainHostnamesSynchronizer::new(self.ctx.clone(), false),
                self.ctx.sub_options(),
                HostnamesEvent::Run(Box::new(domain.clone())),
            )
            .await?;
            if finished.failed() {
                return Err(failure(&finished));
            }
            outputs.extend(finished.outputs);
        }
        Ok(Transition::then(SyncState::Nameservers, SyncEvent::NameserversSynced))
    }

    async fn create(&mut self) -> Result<Transition<SyncState, SyncEvent>> {
        let period = self
            .options
            .renew_years
            .filter(|years| *years > 0)
            .unwrap_or(self.ctx.default_period_years);
        let domain = held(&mut self.domain)?;
        let registrant = domain
            .registrant_epp_id()
            .ok_or_else(|| Error::command_invalid(format!("{} has no registrant", domain.name)))?
            .to_string();
        let auth_info = match domain.auth_key.clone().filter(|key| !key.is_empty()) {
            Some(key) => key,
            None => generate_auth_info(),
        };
        domain.auth_key = Some(auth_info.clone());

        let create = DomainCreate {
            name: domain.name.clone(),
            registrant,
            contacts: domain
                .contacts
                .epp_ids()
                .into_iter()
                .map(|(role, id)| ContactRef::new(role, id))
                .collect(),
            nameservers: domain.nameserver_list(),
            period,
            period_units: "y",
            auth_info: Some(auth_info),
        };
        let reply = self.ctx.client.domain_create(create).await?;
        Ok(Transition::then(SyncState::Create, SyncEvent::CreateReply(reply)))
    }

    async fn read(&self) -> Result<Transition<SyncState, SyncEvent>> {
        let reply = self.ctx.client.domain_info(&self.subject()?.name, None).await?;
        Ok(Transition::then(SyncState::Read, SyncEvent::InfoReply(reply)))
    }

    async fn renew_or_finish(&mut self, outputs: &mut Vec<Output>) -> Result<Transition<SyncState, SyncEvent>> {
        let years = self.options.renew_years.filter(|years| *years > 0);
        match years {
            Some(years) if !self.created => {
                let domain = self.subject()?;
                let expiry = domain.expiry_date.ok_or_else(|| {
                    Error::bad_response(format!("registry reported no expiry date for {}", domain.name))
                })?;
                let reply = self.ctx.client.domain_renew(&domain.name, expiry, years).await?;
                Ok(Transition::then(SyncState::Renew, SyncEvent::RenewReply(reply)))
            }
            _ => self.finish(outputs),
        }
    }

    fn finish(&mut self, outputs: &mut Vec<Output>) -> Result<Transition<SyncState, SyncEvent>> {
        let domain = self.subject()?.clone();
        info!("Domain {} synchronized", domain.name);
        outputs.push(Output::Domain(Box::new(domain)));
        Ok(Transition::to(SyncState::Done))
    }
}

#[async_trait]
impl StateMachine for DomainSynchronizer {
    type State = SyncState;
    type Event = SyncEvent;
    type Output = Output;

    fn name(&self) -> &'static str {
        "domain_synchronizer"
    }

    async fn transition(
        &mut self,
        state: SyncState,
        event: SyncEvent,
        outputs: &mut Vec<Output>,
    ) -> Result<Transition<SyncState, SyncEvent>> {
        match (state, event) {
            (SyncState::Startup, SyncEvent::Run(domain)) => {
                let names = vec![domain.name.clone()];
                self.domain = Some(*domain);
                let reply = self.ctx.client.domain_check(&names).await?;
                Ok(Transition::then(SyncState::Exists, SyncEvent::CheckReply(reply)))
            }

            (SyncState::Exists, SyncEvent::CheckReply(reply)) => {
                let item = check_item(&reply, &self.subject()?.name)?;
                ensure_supported_zone(item)?;
                self.exists = item.exists();
                outputs.push(reply.into());

                if self.exists {
                    let reply = self.ctx.client.domain_info(&self.subject()?.name, None).await?;
                    return Ok(Transition::then(SyncState::Owner, SyncEvent::OwnerReply(reply)));
                }
                self.sync_contacts().await
            }

            (SyncState::Owner, SyncEvent::OwnerReply(reply)) => {
                let info = reply.domain_info()?;
                let domain = self.subject()?;
                if let Some(sponsor) = info.sponsor.as_deref() {
                    if sponsor != self.ctx.registrar_id {
                        return Err(Error::RegistrarAuthFailed(format!(
                            "{} is sponsored by {}",
                            domain.name, sponsor
                        )));
                    }
                }
                let Some(known) = domain.registrant_epp_id() else {
                    return Err(Error::registrant_auth_failed(format!(
                        "{} is registered to {}, stored registrant has no registry id",
                        domain.name,
                        info.registrant.as_deref().unwrap_or("nobody")
                    )));
                };
                if info.registrant.as_deref() != Some(known) {
                    return Err(Error::registrant_auth_failed(format!(
                        "{} is registered to {}, stored registrant is {}",
                        domain.name,
                        info.registrant.as_deref().unwrap_or("nobody"),
                        known
                    )));
                }
                outputs.push(reply.into());
                self.sync_contacts().await
            }

            (SyncState::Contacts, SyncEvent::ContactsSynced) => self.sync_nameservers(outputs).await,

            (SyncState::Nameservers, SyncEvent::NameserversSynced) => {
                if self.exists {
                    self.read().await
                } else {
                    self.create().await
                }
            }

            (SyncState::Create, SyncEvent::CreateReply(reply)) => {
                let domain = held(&mut self.domain)?;
                if let ResponseData::DomainCreated(created) = &reply.data {
                    domain.create_date = created.create_date.or(domain.create_date);
                    domain.expiry_date = created.expiry_date.or(domain.expiry_date);
                }
                domain.epp_id = Some(domain.name.clone());
                domain.status = DomainStatus::Active;
                self.ctx.store.domain_save(domain).await?;
                info!("Domain {} created", domain.name);
                outputs.push(reply.into());
                self.created = true;
                self.read().await
            }

            (SyncState::Read, SyncEvent::InfoReply(reply)) => {
                let scope = DiffScope {
                    contacts: self.options.sync_contacts || self.created,
                    nameservers: self.options.sync_nameservers || self.created,
                };
                let info = reply.domain_info()?;
                let domain = held(&mut self.domain)?;
                domain.epp_id = Some(info.roid.clone().unwrap_or_else(|| info.name.clone()));
                domain.create_date = info.create_date.or(domain.create_date);
                domain.expiry_date = info.expiry_date.or(domain.expiry_date);
                domain.epp_statuses = info.status_map();
                domain.registrar = info.sponsor.clone();
                self.ctx.store.domain_save(domain).await?;

                let update = diff::domain_update(info, domain, scope);
                outputs.push(reply.into());
                if update.is_empty() {
                    debug!("{} needs no update", update.name);
                    return self.renew_or_finish(outputs).await;
                }
                let reply = self.ctx.client.domain_update(update).await?;
                Ok(Transition::then(SyncState::Update, SyncEvent::UpdateReply(reply)))
            }

            (SyncState::Update, SyncEvent::UpdateReply(reply)) => {
                outputs.push(reply.into());
                self.renew_or_finish(outputs).await
            }

            (SyncState::Renew, SyncEvent::RenewReply(reply)) => {
                let domain = held(&mut self.domain)?;
                if let ResponseData::DomainRenewed(renewed) = &reply.data {
                    domain.expiry_date = renewed.expiry_date.or(domain.expiry_date);
                }
                self.ctx.store.domain_save(domain).await?;
                info!("Domain {} renewed until {:?}", domain.name, domain.expiry_date);
                outputs.push(reply.into());
                self.finish(outputs)
            }

            (state, event) => Err(Error::automaton(format!(
                "domain_synchronizer cannot handle {:?} in {}",
                event, state
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{check, contact, domain_info, harness, result, with_data, Harness};
    use super::*;
    use crate::automaton::Finished;
    use crate::model::{ContactKind, ContactRole};
    use crate::traits::Persistence;
    use serde_json::json;

    fn local_domain(registrant_id: Option<&str>) -> Box<Domain> {
        let mut domain = Domain::new("example.ai", "owner@example.com");
        let mut registrant = contact("owner@example.com", registrant_id);
        registrant.kind = ContactKind::Registrant;
        domain.registrant = Some(registrant);
        domain
            .contacts
            .set(ContactRole::Admin, Some(contact("admin@example.com", Some("adm1"))));
        domain.nameservers = vec!["ns1.example.com".to_string()];
        Box::new(domain)
    }

    async fn synchronize(h: &Harness, domain: Box<Domain>, options: SyncOptions) -> Finished<SyncState, Output> {
        run(
            &h.ctx.registry,
            DomainSynchronizer::new(h.ctx.clone(), options),
            h.ctx.options,
            SyncEvent::Run(domain),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_path_skips_renew() {
        let h = harness();
        h.stub
            .reply(check(&[("example.ai", true, None)]))
            .reply(result(1000)) // registrant contact_update
            .reply(result(1000)) // admin contact_update
            .reply(check(&[("ns1.example.com", false, None)]))
            .reply(with_data(
                1000,
                json!({"creData": {"name": "example.ai", "crDate": "2024-01-01T00:00:00.0Z", "exDate": "2026-01-01T00:00:00.0Z"}}),
            ))
            .reply(domain_info("example.ai", "reg1", &[("admin", "adm1")], &["ns1.example.com"]));

        let finished = synchronize(
            &h,
            local_domain(Some("reg1")),
            SyncOptions {
                renew_years: Some(2),
                ..SyncOptions::default()
            },
        )
        .await;

        assert_eq!(finished.state, SyncState::Done);
        assert_eq!(
            h.stub.sent_verbs(),
            vec!["domain_check", "contact_update", "contact_update", "host_check", "domain_create", "domain_info"]
        );
        let sent = h.stub.sent();
        let create = &sent[4]["args"];
        assert_eq!(create["period"], 2);
        assert_eq!(create["registrant"], "reg1");
        assert_eq!(create["auth_info"].as_str().unwrap().len(), 12);

        let stored = h.store.domain_find("example.ai").await.unwrap().unwrap();
        assert_eq!(stored.epp_id.as_deref(), Some("EXAMPLE.AI-ROID"));
        assert!(stored.auth_key.is_some());
        assert!(matches!(finished.outputs.last(), Some(Output::Domain(_))));
    }

    #[tokio::test]
    async fn test_registered_domain_with_other_registrant_is_untouched() {
        let h = harness();
        h.stub
            .reply(check(&[("example.ai", false, None)]))
            .reply(domain_info("example.ai", "someone", &[], &[]));

        let finished = synchronize(&h, local_domain(Some("reg1")), SyncOptions::default()).await;

        assert!(finished.failed());
        assert!(matches!(
            finished.outputs.last(),
            Some(Output::Error(Error::RegistrantAuthFailed(_)))
        ));
        assert_eq!(h.stub.sent_verbs(), vec!["domain_check", "domain_info"]);
    }

    #[tokio::test]
    async fn test_registered_domain_without_known_registrant_is_untouched() {
        let h = harness();
        h.stub
            .reply(check(&[("example.ai", false, None)]))
            .reply(domain_info("example.ai", "someone", &[], &[]));

        let finished = synchronize(&h, local_domain(None), SyncOptions::default()).await;

        assert!(finished.failed());
        let err = finished.outputs.last().unwrap().as_error().unwrap();
        assert!(matches!(err, Error::RegistrantAuthFailed(_)));
        assert!(err.to_string().contains("no registry id"));
        assert_eq!(h.stub.sent_verbs(), vec!["domain_check", "domain_info"]);
        assert!(h.store.domain_find("example.ai").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_registered_domain_is_renewed() {
        let h = harness();
        h.stub
            .reply(check(&[("example.ai", false, None)]))
            .reply(domain_info("example.ai", "reg1", &[("admin", "adm1")], &["ns1.example.com"]))
            .reply(domain_info("example.ai", "reg1", &[("admin", "adm1")], &["ns1.example.com"]))
            .reply(with_data(
                1000,
                json!({"renData": {"name": "example.ai", "exDate": "2028-01-01T00:00:00.0Z"}}),
            ));

        let finished = synchronize(
            &h,
            local_domain(Some("reg1")),
            SyncOptions {
                renew_years: Some(1),
                ..SyncOptions::default()
            },
        )
        .await;

        assert_eq!(finished.state, SyncState::Done);
        assert_eq!(
            h.stub.sent_verbs(),
            vec!["domain_check", "domain_info", "domain_info", "domain_renew"]
        );
        assert_eq!(h.stub.sent()[3]["args"]["cur_exp_date"], "2027-01-01");
        let stored = h.store.domain_find("example.ai").await.unwrap().unwrap();
        assert_eq!(
            stored.expiry_date.unwrap().format("%Y-%m-%d").to_string(),
            "2028-01-01"
        );
    }

    #[tokio::test]
    async fn test_contact_failure_aborts_sync() {
        let h = harness();
        h.stub
            .reply(check(&[("example.ai", true, None)]))
            .reply(result(2306));

        let finished = synchronize(&h, local_domain(Some("reg1")), SyncOptions::default()).await;

        assert!(finished.failed());
        assert_eq!(finished.outputs.last().unwrap().as_error().unwrap().code(), 2306);
        assert_eq!(h.stub.sent_verbs(), vec!["domain_check", "contact_update"]);
    }

    #[tokio::test]
    async fn test_nameserver_diff_is_applied() {
        let h = harness();
        h.stub
            .reply(check(&[("example.ai", false, None)]))
            .reply(domain_info("example.ai", "reg1", &[("admin", "adm1")], &["ns9.example.com"]))
            .reply(check(&[("ns1.example.com", false, None)]))
            .reply(domain_info("example.ai", "reg1", &[("admin", "adm1")], &["ns9.example.com"]))
            .reply(result(1000));

        let finished = synchronize(
            &h,
            local_domain(Some("reg1")),
            SyncOptions {
                sync_nameservers: true,
                ..SyncOptions::default()
            },
        )
        .await;

        assert_eq!(finished.state, SyncState::Done);
        let sent = h.stub.sent();
        let update = &sent[4]["args"];
        assert_eq!(update["add_nameservers"][0], "ns1.example.com");
        assert_eq!(update["remove_nameservers"][0], "ns9.example.com");
    }
}
