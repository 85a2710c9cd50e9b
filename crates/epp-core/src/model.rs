//! Local records the state machines read and mutate through [`Persistence`]
//!
//! These mirror the registrar database rows. The core never owns them: it
//! receives copies from the façade caller or from the persistence
//! collaborator and writes changes back through it.
//!
//! [`Persistence`]: crate::traits::Persistence

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of nameserver slots of a domain
pub const MAX_NAMESERVERS: usize = 4;

/// Contact role of a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactRole {
    Admin,
    Billing,
    Tech,
}

impl ContactRole {
    /// All roles in the order they are synchronized
    pub const ALL: [ContactRole; 3] = [ContactRole::Admin, ContactRole::Billing, ContactRole::Tech];

    /// EPP `type` attribute value
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactRole::Admin => "admin",
            ContactRole::Billing => "billing",
            ContactRole::Tech => "tech",
        }
    }

    /// Parse the EPP `type` attribute value
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(ContactRole::Admin),
            "billing" => Some(ContactRole::Billing),
            "tech" => Some(ContactRole::Tech),
            _ => None,
        }
    }
}

impl fmt::Display for ContactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a contact record is a registrant (owner of record) or a role contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactKind {
    Registrant,
    #[default]
    Contact,
}

/// Contact or registrant record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    /// Local primary key (0 until persisted)
    pub id: u64,
    /// Registry id, empty until the contact exists at the registry
    #[serde(default)]
    pub epp_id: Option<String>,
    /// Registrant or role contact
    #[serde(default)]
    pub kind: ContactKind,
    /// Account the record belongs to
    pub owner: String,
    pub person_name: String,
    #[serde(default)]
    pub organization_name: String,
    #[serde(default)]
    pub address_street: String,
    #[serde(default)]
    pub address_city: String,
    #[serde(default)]
    pub address_province: String,
    #[serde(default)]
    pub address_postal_code: String,
    #[serde(default)]
    pub address_country: String,
    #[serde(default)]
    pub contact_voice: String,
    #[serde(default)]
    pub contact_fax: String,
    pub contact_email: String,
}

impl Contact {
    /// Registry id if the contact already exists at the registry
    pub fn known_epp_id(&self) -> Option<&str> {
        self.epp_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Role contacts of a domain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainContacts {
    #[serde(default)]
    pub admin: Option<Contact>,
    #[serde(default)]
    pub billing: Option<Contact>,
    #[serde(default)]
    pub tech: Option<Contact>,
}

impl DomainContacts {
    /// Contact assigned to a role
    pub fn get(&self, role: ContactRole) -> Option<&Contact> {
        match role {
            ContactRole::Admin => self.admin.as_ref(),
            ContactRole::Billing => self.billing.as_ref(),
            ContactRole::Tech => self.tech.as_ref(),
        }
    }

    /// Replace the contact assigned to a role
    pub fn set(&mut self, role: ContactRole, contact: Option<Contact>) {
        match role {
            ContactRole::Admin => self.admin = contact,
            ContactRole::Billing => self.billing = contact,
            ContactRole::Tech => self.tech = contact,
        }
    }

    /// Non-empty role assignments in role order
    pub fn iter(&self) -> impl Iterator<Item = (ContactRole, &Contact)> {
        ContactRole::ALL
            .into_iter()
            .filter_map(move |role| self.get(role).map(|contact| (role, contact)))
    }

    /// Role → registry id for every contact that already has one
    pub fn epp_ids(&self) -> BTreeMap<ContactRole, String> {
        self.iter()
            .filter_map(|(role, contact)| contact.known_epp_id().map(|id| (role, id.to_string())))
            .collect()
    }
}

/// Local lifecycle status of a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    #[default]
    Inactive,
    ToBeDeleted,
    ToBeRestored,
    Active,
    Suspended,
    Blocked,
    Unknown,
}

/// Domain record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    /// Fully qualified domain name
    pub name: String,
    /// Registry object id (`roid`)
    #[serde(default)]
    pub epp_id: Option<String>,
    /// Transfer authorization code
    #[serde(default)]
    pub auth_key: Option<String>,
    #[serde(default)]
    pub create_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: DomainStatus,
    /// Raw registry statuses: status name → registry supplied text
    #[serde(default)]
    pub epp_statuses: BTreeMap<String, String>,
    pub zone: String,
    /// Sponsoring registrar id
    #[serde(default)]
    pub registrar: Option<String>,
    /// Account the domain belongs to
    pub owner: String,
    #[serde(default)]
    pub registrant: Option<Contact>,
    #[serde(default)]
    pub contacts: DomainContacts,
    /// Up to [`MAX_NAMESERVERS`] host names
    #[serde(default)]
    pub nameservers: Vec<String>,
}

impl Domain {
    /// Create a domain record for the given name, deriving the zone
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        let name = name.into();
        let zone = zone_of(&name).to_string();
        Self {
            name,
            zone,
            owner: owner.into(),
            ..Self::default()
        }
    }

    /// Registry id if the domain was already synchronized
    pub fn known_epp_id(&self) -> Option<&str> {
        self.epp_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Registry id of the registrant, if known
    pub fn registrant_epp_id(&self) -> Option<&str> {
        self.registrant.as_ref().and_then(|r| r.known_epp_id())
    }

    /// Non-empty nameserver slots, lowercased, at most [`MAX_NAMESERVERS`]
    pub fn nameserver_list(&self) -> Vec<String> {
        self.nameservers
            .iter()
            .map(|ns| ns.trim().to_lowercase())
            .filter(|ns| !ns.is_empty())
            .take(MAX_NAMESERVERS)
            .collect()
    }
}

/// Last label of a domain name
pub fn zone_of(domain_name: &str) -> &str {
    domain_name.rsplit('.').next().unwrap_or(domain_name)
}
