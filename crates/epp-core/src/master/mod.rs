//! Orchestration façade
//!
//! [`Master`] is the only entry point callers outside this crate use. Each
//! method runs one registry conversation end to end and reduces its outputs
//! to a simple result.
//!
//! ## Architecture
//!
//! ```text
//!   caller ──► Master ──► DomainLocks ──► RetryPolicy ──► StateMachine ──► EppClient
//!                 │                                            │
//!                 ▼                                            ▼
//!            MasterEvent                                  Persistence
//! ```
//!
//! ## Failure Reporting
//!
//! Machines always run with `raise_errors` off; the façade decides. With
//! `raise_errors` the error of a failed conversation is returned as `Err`,
//! otherwise it is logged and the method returns `false` or `None`.
//!
//! Methods taking a domain serialize on its name, so two conversations
//! never interleave commands for the same domain.

pub mod locks;
pub mod retry;

pub use locks::DomainLocks;
pub use retry::RetryPolicy;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::automaton::{AutomatonRegistry, Finished, MachineState, StateMachine};
use crate::config::EppConfig;
use crate::epp::{EppClient, Response, ResponseData, generate_auth_info};
use crate::error::{Error, Result};
use crate::machines::contact_synchronizer::ContactEvent;
use crate::machines::domain_auth_changer::AuthChangerEvent;
use crate::machines::domain_contacts_synchronizer::DomainContactsEvent;
use crate::machines::domain_hostnames_synchronizer::HostnamesEvent;
use crate::machines::domain_refresher::RefresherEvent;
use crate::machines::domain_resurrector::ResurrectorEvent;
use crate::machines::domain_synchronizer::SyncEvent;
use crate::machines::domain_transfer_requestor::TransferEvent;
use crate::machines::domains_checker::CheckerEvent;
use crate::machines::{
    CheckOptions, ContactSynchronizer, Context, DomainAuthChanger, DomainContactsSynchronizer,
    DomainExistence, DomainHostnamesSynchronizer, DomainRefresher, DomainResurrector, DomainSynchronizer,
    DomainTransferRequestor, DomainsChecker, Output, RefreshOptions, SyncOptions, failure, run,
};
use crate::model::{Contact, Domain};
use crate::registry::TransportRegistry;
use crate::traits::{Persistence, RpcTransport};

/// Events emitted by the façade for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterEvent {
    /// A conversation started
    Started {
        operation: &'static str,
        subject: String,
    },

    /// A conversation reached `DONE`
    Succeeded {
        operation: &'static str,
        subject: String,
    },

    /// A conversation failed after all attempts
    Failed {
        operation: &'static str,
        subject: String,
        error: String,
    },
}

/// Result of [`Master::domains_check`]
#[derive(Debug, Clone, PartialEq)]
pub enum DomainsCheck {
    /// Registration state of every requested name
    Checked(BTreeMap<String, DomainExistence>),
    /// The registry does not serve the zone of a requested name
    NonSupportedZone,
}

/// Registry conversations behind a handful of calls
///
/// ## Threading
///
/// `Master` is `Send + Sync`; methods take `&self` and may run
/// concurrently. Conversations on the same domain name wait for each other.
pub struct Master {
    ctx: Context,
    retry: RetryPolicy,
    locks: DomainLocks,
    event_tx: Option<mpsc::Sender<MasterEvent>>,
}

impl std::fmt::Debug for Master {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Master")
            .field("ctx", &self.ctx)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Master {
    /// Create a façade around an existing client
    pub fn new(client: EppClient, store: Arc<dyn Persistence>, config: &EppConfig) -> Self {
        let mut ctx = Context::new(client, store, AutomatonRegistry::new())
            .with_registrar_id(config.registrar.registrar_id.clone())
            .with_options(config.automaton);
        ctx.default_period_years = config.registrar.default_period_years;

        Self {
            ctx,
            retry: RetryPolicy::from(&config.retry),
            locks: DomainLocks::new(),
            event_tx: None,
        }
    }

    /// Create a façade with the transport named in the configuration
    ///
    /// # Returns
    ///
    /// - `Err(Error::Config)`: invalid configuration or unknown transport type
    pub fn from_config(
        transports: &TransportRegistry,
        store: Arc<dyn Persistence>,
        config: &EppConfig,
    ) -> Result<Self> {
        config.validate()?;
        let transport: Arc<dyn RpcTransport> = Arc::from(transports.create_transport(&config.transport)?);
        info!(
            "EPP façade using {} transport as {}",
            transport.transport_name(),
            config.registrar.registrar_id
        );
        let client = EppClient::from_config(transport, config);
        Ok(Self::new(client, store, config))
    }

    /// Emit [`MasterEvent`]s into a bounded channel
    ///
    /// Events are dropped with a warning when the receiver falls behind.
    pub fn with_events(mut self, capacity: usize) -> (Self, mpsc::Receiver<MasterEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.event_tx = Some(tx);
        (self, rx)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Live automaton index shared by every conversation of this façade
    pub fn registry(&self) -> &AutomatonRegistry {
        &self.ctx.registry
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Stop state change notifications
    pub fn shutdown(&self) {
        self.ctx.registry.shutdown();
        info!("EPP façade shut down");
    }

    /// Create, update and renew a domain at the registry
    ///
    /// Runs DomainSynchronizer. Returns whether the conversation succeeded.
    pub async fn domain_check_create_update_renew(
        &self,
        domain: &Domain,
        sync_contacts: bool,
        sync_nameservers: bool,
        renew_years: Option<u32>,
        raise_errors: bool,
    ) -> Result<bool> {
        let _guard = self.locks.lock(&domain.name).await;
        let options = SyncOptions {
            sync_contacts,
            sync_nameservers,
            renew_years,
        };
        let result = self
            .converse("domain_check_create_update_renew", &domain.name, || {
                (
                    DomainSynchronizer::new(self.ctx.clone(), options),
                    SyncEvent::Run(Box::new(domain.clone())),
                )
            })
            .await;
        Ok(self
            .settle("domain_check_create_update_renew", &domain.name, result, raise_errors)?
            .is_some())
    }

    /// Pull the registry copy of a domain into the local record
    ///
    /// Runs DomainRefresher and hands back every output, ending with the
    /// error if the conversation failed. A run that lost the connection on
    /// every attempt still hands back what its last attempt collected.
    /// Never returns `Err`.
    pub async fn domain_synchronize_from_backend(&self, name: &str, options: RefreshOptions) -> Vec<Output> {
        let _guard = self.locks.lock(name).await;
        let result = self
            .converse("domain_synchronize_from_backend", name, || {
                (
                    DomainRefresher::new(self.ctx.clone(), options.clone()),
                    RefresherEvent::Run(name.to_string()),
                )
            })
            .await;
        match result {
            Ok(finished) => {
                self.report("domain_synchronize_from_backend", name, &finished);
                finished.outputs
            }
            Err(e) => {
                self.fail("domain_synchronize_from_backend", name, &e);
                vec![Output::Error(e)]
            }
        }
    }

    /// Create or update a contact at the registry
    pub async fn contact_create_update(&self, contact: &Contact, raise_errors: bool) -> Result<bool> {
        let subject = contact.contact_email.clone();
        let result = self
            .converse("contact_create_update", &subject, || {
                (
                    ContactSynchronizer::new(self.ctx.clone()),
                    ContactEvent::Run(Box::new(contact.clone())),
                )
            })
            .await;
        Ok(self
            .settle("contact_create_update", &subject, result, raise_errors)?
            .is_some())
    }

    /// Restore a domain from the redemption grace period
    pub async fn domain_restore(&self, domain: &Domain, raise_errors: bool) -> Result<bool> {
        let _guard = self.locks.lock(&domain.name).await;
        let result = self
            .converse("domain_restore", &domain.name, || {
                (
                    DomainResurrector::new(self.ctx.clone()),
                    ResurrectorEvent::Run(domain.name.clone()),
                )
            })
            .await;
        Ok(self
            .settle("domain_restore", &domain.name, result, raise_errors)?
            .is_some())
    }

    /// Set a new transfer authorization code, generating one if not given
    pub async fn domain_set_auth_info(&self, domain: &Domain, auth_info: Option<&str>) -> Result<bool> {
        let _guard = self.locks.lock(&domain.name).await;
        let auth_info = match auth_info {
            Some(auth_info) => auth_info.to_string(),
            None => generate_auth_info(),
        };
        let result = self
            .converse("domain_set_auth_info", &domain.name, || {
                (
                    DomainAuthChanger::new(self.ctx.clone()),
                    AuthChangerEvent::Run {
                        domain: Box::new(domain.clone()),
                        auth_info: auth_info.clone(),
                    },
                )
            })
            .await;
        Ok(self
            .settle("domain_set_auth_info", &domain.name, result, self.ctx.options.raise_errors)?
            .is_some())
    }

    /// Ask the registry to transfer a domain to us
    pub async fn domain_transfer_request(&self, name: &str, auth_info: &str, skip_info: bool) -> Result<bool> {
        let _guard = self.locks.lock(name).await;
        let result = self
            .converse("domain_transfer_request", name, || {
                (
                    DomainTransferRequestor::new(self.ctx.clone(), skip_info),
                    TransferEvent::Run {
                        name: name.to_string(),
                        auth_info: auth_info.to_string(),
                    },
                )
            })
            .await;
        Ok(self
            .settle("domain_transfer_request", name, result, self.ctx.options.raise_errors)?
            .is_some())
    }

    /// Read a domain without checking it first
    ///
    /// Returns the `domain_info` reply.
    pub async fn domain_read_info(
        &self,
        name: &str,
        auth_info: Option<&str>,
        raise_errors: bool,
    ) -> Result<Option<Response>> {
        let options = CheckOptions {
            skip_check: true,
            stop_on_error: true,
            auth_info: auth_info.map(str::to_string),
            ..CheckOptions::default()
        };
        let result = self
            .converse("domain_read_info", name, || {
                (
                    DomainsChecker::new(self.ctx.clone(), options.clone()),
                    CheckerEvent::Run(vec![name.to_string()]),
                )
            })
            .await;
        let Some(finished) = self.settle("domain_read_info", name, result, raise_errors)? else {
            return Ok(None);
        };
        Ok(finished.outputs.into_iter().rev().find_map(|output| match output {
            Output::Response(response) if matches!(response.data, ResponseData::DomainInfo(_)) => {
                Some(*response)
            }
            _ => None,
        }))
    }

    /// Registration state of several names
    ///
    /// With `verify_registrant` every registered name is also read and its
    /// registrant compared with the stored one. A name in a zone the
    /// registry does not serve yields [`DomainsCheck::NonSupportedZone`]
    /// whatever `raise_errors` says.
    pub async fn domains_check(
        &self,
        names: &[String],
        verify_registrant: bool,
        raise_errors: bool,
    ) -> Result<Option<DomainsCheck>> {
        let subject = names.join(",");
        let options = CheckOptions {
            skip_info: !verify_registrant,
            verify_registrant,
            ..CheckOptions::default()
        };
        let result = self
            .converse("domains_check", &subject, || {
                (
                    DomainsChecker::new(self.ctx.clone(), options.clone()),
                    CheckerEvent::Run(names.to_vec()),
                )
            })
            .await;

        let zone_refused = match &result {
            Ok(finished) if finished.failed() => matches!(failure(finished), Error::NonSupportedZone(_)),
            Err(e) => matches!(e, Error::NonSupportedZone(_)),
            _ => false,
        };
        if zone_refused {
            warn!("domains_check of {}: non-supported zone", subject);
            return Ok(Some(DomainsCheck::NonSupportedZone));
        }

        let Some(finished) = self.settle("domains_check", &subject, result, raise_errors)? else {
            return Ok(None);
        };
        Ok(finished.outputs.into_iter().rev().find_map(|output| match output {
            Output::Existence(map) => Some(DomainsCheck::Checked(map)),
            _ => None,
        }))
    }

    /// Bring the contacts of a registered domain in line with the record
    pub async fn domain_update_contacts(&self, domain: &Domain, raise_errors: bool) -> Result<bool> {
        let _guard = self.locks.lock(&domain.name).await;
        let result = self
            .converse("domain_update_contacts", &domain.name, || {
                (
                    DomainContactsSynchronizer::new(self.ctx.clone()),
                    DomainContactsEvent::Run(Box::new(domain.clone())),
                )
            })
            .await;
        Ok(self
            .settle("domain_update_contacts", &domain.name, result, raise_errors)?
            .is_some())
    }

    /// Create missing host objects and update the domain's nameservers
    pub async fn domain_update_nameservers(&self, domain: &Domain, raise_errors: bool) -> Result<bool> {
        let _guard = self.locks.lock(&domain.name).await;
        let result = self
            .converse("domain_update_nameservers", &domain.name, || {
                (
                    DomainHostnamesSynchronizer::new(self.ctx.clone(), true),
                    HostnamesEvent::Run(Box::new(domain.clone())),
                )
            })
            .await;
        Ok(self
            .settle("domain_update_nameservers", &domain.name, result, raise_errors)?
            .is_some())
    }

    /// Run fresh machines from `build` until one finishes for good
    ///
    /// A failed run is returned as `Ok` unless its error is worth a retry.
    /// When retries run out the last failed run is returned, so the
    /// replies it collected before failing are kept.
    async fn converse<M, B>(
        &self,
        operation: &'static str,
        subject: &str,
        build: B,
    ) -> Result<Finished<M::State, Output>>
    where
        M: StateMachine<Output = Output>,
        B: Fn() -> (M, M::Event),
    {
        self.emit(MasterEvent::Started {
            operation,
            subject: subject.to_string(),
        });
        let last_failed: Mutex<Option<Finished<M::State, Output>>> = Mutex::new(None);
        let result = self
            .retry
            .run(operation, || {
                let (machine, event) = build();
                let registry = &self.ctx.registry;
                let options = self.ctx.sub_options();
                let last_failed = &last_failed;
                async move {
                    last_failed.lock().unwrap_or_else(PoisonError::into_inner).take();
                    let finished = run(registry, machine, options, event).await?;
                    if finished.failed() {
                        let err = failure(&finished);
                        if err.is_retryable() {
                            *last_failed.lock().unwrap_or_else(PoisonError::into_inner) = Some(finished);
                            return Err(err);
                        }
                    }
                    Ok(finished)
                }
            })
            .await;

        match result {
            Err(e) if e.is_retryable() => last_failed
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner)
                .ok_or(e),
            other => other,
        }
    }

    /// Reduce a conversation to its finished run, or `None` if it failed
    fn settle<S: MachineState>(
        &self,
        operation: &'static str,
        subject: &str,
        result: Result<Finished<S, Output>>,
        raise_errors: bool,
    ) -> Result<Option<Finished<S, Output>>> {
        let err = match result {
            Ok(finished) if !finished.failed() => {
                self.report(operation, subject, &finished);
                return Ok(Some(finished));
            }
            Ok(finished) => failure(&finished),
            Err(e) => e,
        };
        self.fail(operation, subject, &err);
        if raise_errors { Err(err) } else { Ok(None) }
    }

    fn report<S: MachineState>(&self, operation: &'static str, subject: &str, finished: &Finished<S, Output>) {
        if finished.failed() {
            self.fail(operation, subject, &failure(finished));
            return;
        }
        debug!("{} of {} done in {}", operation, subject, finished.id);
        self.emit(MasterEvent::Succeeded {
            operation,
            subject: subject.to_string(),
        });
    }

    fn fail(&self, operation: &'static str, subject: &str, err: &Error) {
        error!("{} of {} failed: {}", operation, subject, err);
        self.emit(MasterEvent::Failed {
            operation,
            subject: subject.to_string(),
            error: err.to_string(),
        });
    }

    fn emit(&self, event: MasterEvent) {
        if let Some(tx) = &self.event_tx {
            if tx.try_send(event).is_err() {
                warn!("Event channel full, dropping event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Master>();
    }

    #[test]
    fn test_master_event_equality() {
        let event = MasterEvent::Failed {
            operation: "domain_restore",
            subject: "example.ai".to_string(),
            error: "Invalid domain status: ok".to_string(),
        };
        assert_eq!(event.clone(), event);
    }
}
