// # Protocol State Machines
//
// One machine per registry conversation. Each is a `match (state, event)`
// table: the action of a transition issues at most one EPP command and
// hands the reply back to the runtime as the follow-up event.
//
// ## Shared Pieces
//
// - [`Context`]: client, persistence and registry every machine runs with
// - [`Output`]: what a conversation leaves behind (replies, results, errors)
// - [`diff`]: contact and nameserver diff shared by the synchronizers
// - [`sync_domain_contacts`]: ContactSynchronizer sub-runs for a domain

pub mod contact_synchronizer;
pub mod diff;
pub mod domain_auth_changer;
pub mod domain_contacts_synchronizer;
pub mod domain_hostnames_synchronizer;
pub mod domain_reader;
pub mod domain_refresher;
pub mod domain_resurrector;
pub mod domain_synchronizer;
pub mod domain_transfer_requestor;
pub mod domains_checker;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::automaton::{Automaton, AutomatonRegistry, Finished, StateMachine};
use crate::config::AutomatonConfig;
use crate::epp::{CheckItem, ContactInfo, DomainInfo, EppClient, Response};
use crate::error::{Error, Result};
use crate::model::{Contact, ContactRole, Domain};
use crate::traits::Persistence;

pub use contact_synchronizer::ContactSynchronizer;
pub use domain_auth_changer::DomainAuthChanger;
pub use domain_contacts_synchronizer::DomainContactsSynchronizer;
pub use domain_hostnames_synchronizer::DomainHostnamesSynchronizer;
pub use domain_reader::DomainReader;
pub use domain_refresher::{DomainRefresher, RefreshOptions};
pub use domain_resurrector::DomainResurrector;
pub use domain_synchronizer::{DomainSynchronizer, SyncOptions};
pub use domain_transfer_requestor::DomainTransferRequestor;
pub use domains_checker::{CheckOptions, DomainsChecker};

/// Everything a machine needs to talk to the registry and the database
#[derive(Clone)]
pub struct Context {
    pub client: EppClient,
    pub store: Arc<dyn Persistence>,
    pub registry: AutomatonRegistry,
    pub options: AutomatonConfig,
    /// Our client id at the registry
    pub registrar_id: String,
    /// Registration period for creates without explicit renew years
    pub default_period_years: u32,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("client", &self.client)
            .field("registrar_id", &self.registrar_id)
            .field("options", &self.options)
            .finish()
    }
}

impl Context {
    pub fn new(client: EppClient, store: Arc<dyn Persistence>, registry: AutomatonRegistry) -> Self {
        Self {
            client,
            store,
            registry,
            options: AutomatonConfig::default(),
            registrar_id: "registrar".to_string(),
            default_period_years: 1,
        }
    }

    pub fn with_registrar_id(mut self, registrar_id: impl Into<String>) -> Self {
        self.registrar_id = registrar_id.into();
        self
    }

    pub fn with_options(mut self, options: AutomatonConfig) -> Self {
        self.options = options;
        self
    }

    /// Options for nested conversations: failures are read from outputs
    pub fn sub_options(&self) -> AutomatonConfig {
        AutomatonConfig {
            raise_errors: false,
            ..self.options
        }
    }
}

/// Registration state of one name in a DomainsChecker run
#[derive(Debug, Clone, PartialEq)]
pub enum DomainExistence {
    Exists,
    NotExists,
    /// Reading this name failed
    Error(Error),
}

impl DomainExistence {
    pub fn exists(&self) -> bool {
        matches!(self, DomainExistence::Exists)
    }
}

/// Domain as read from the registry by DomainReader
#[derive(Debug, Clone, PartialEq)]
pub struct DomainSnapshot {
    pub info: DomainInfo,
    pub registrant: Option<ContactInfo>,
    pub contacts: BTreeMap<ContactRole, ContactInfo>,
    /// Registry dates rendered RFC 2822 for comparison with stored values
    pub create_date: Option<String>,
    pub update_date: Option<String>,
    pub expiry_date: Option<String>,
}

/// Something a conversation left behind
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// A registry reply
    Response(Box<Response>),
    /// DomainsChecker result covering every requested name
    Existence(BTreeMap<String, DomainExistence>),
    /// DomainReader result
    Snapshot(Box<DomainSnapshot>),
    /// The domain record as written back to persistence
    Domain(Box<Domain>),
    /// Why the conversation failed
    Error(Error),
}

impl From<Error> for Output {
    fn from(err: Error) -> Self {
        Output::Error(err)
    }
}

impl From<Response> for Output {
    fn from(response: Response) -> Self {
        Output::Response(Box::new(response))
    }
}

impl Output {
    pub fn as_error(&self) -> Option<&Error> {
        match self {
            Output::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Output::Response(response) => Some(response),
            _ => None,
        }
    }
}

/// Error in the last output, if the conversation ended with one
pub fn last_error(outputs: &[Output]) -> Option<&Error> {
    outputs.last().and_then(Output::as_error)
}

/// The error a failed conversation reports
pub fn failure<S>(finished: &Finished<S, Output>) -> Error {
    last_error(&finished.outputs)
        .cloned()
        .unwrap_or_else(|| Error::automaton(format!("{} failed without an error output", finished.id)))
}

/// Create an automaton, deliver one event and hand back the result
pub async fn run<M>(
    registry: &AutomatonRegistry,
    machine: M,
    options: AutomatonConfig,
    event: M::Event,
) -> Result<Finished<M::State, M::Output>>
where
    M: StateMachine,
{
    let mut automaton = Automaton::create(registry, machine, options);
    automaton.event(event).await?;
    Ok(automaton.finish())
}

/// Check reply entry for a domain name
pub(crate) fn check_item<'a>(response: &'a Response, name: &str) -> Result<&'a CheckItem> {
    response
        .check_items()?
        .iter()
        .find(|item| item.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| Error::bad_response(format!("Check reply does not mention {}", name)))
}

/// Fail with `NonSupportedZone` if the registry refuses the zone of an entry
pub(crate) fn ensure_supported_zone(item: &CheckItem) -> Result<()> {
    if item.reason_lowercase().contains("non-supported zone") {
        return Err(Error::NonSupportedZone(item.name.clone()));
    }
    Ok(())
}

/// Make sure the registrant and every role contact of `domain` exist at
/// the registry, storing the registry ids they end up with
///
/// Any single contact failure aborts with that contact's error.
pub(crate) async fn sync_domain_contacts(ctx: &Context, domain: &mut Domain) -> Result<()> {
    if let Some(registrant) = domain.registrant.take() {
        domain.registrant = Some(sync_contact(ctx, registrant).await?);
    }
    for role in ContactRole::ALL {
        if let Some(contact) = domain.contacts.get(role).cloned() {
            let synced = sync_contact(ctx, contact).await?;
            domain.contacts.set(role, Some(synced));
        }
    }
    Ok(())
}

async fn sync_contact(ctx: &Context, contact: Contact) -> Result<Contact> {
    let mut automaton = Automaton::create(
        &ctx.registry,
        ContactSynchronizer::new(ctx.clone()),
        ctx.sub_options(),
    );
    automaton
        .event(contact_synchronizer::ContactEvent::Run(Box::new(contact)))
        .await?;

    let synced = automaton.machine().contact().cloned();
    let finished = automaton.finish();
    if finished.failed() {
        return Err(failure(&finished));
    }
    let synced = synced.ok_or_else(|| Error::automaton("Contact synchronizer finished without a contact"))?;
    debug!(
        "Contact {} synchronized as {}",
        synced.contact_email,
        synced.known_epp_id().unwrap_or_default()
    );
    Ok(synced)
}
