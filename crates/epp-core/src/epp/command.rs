//! EPP command payloads
//!
//! Every command serializes to the gateway wire shape
//! `{"cmd": "<verb>", "args": {...}}`.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::model::{Contact, ContactRole};

/// EPP verb of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    DomainCheck,
    DomainInfo,
    DomainCreate,
    DomainUpdate,
    DomainRenew,
    DomainTransfer,
    ContactCheck,
    ContactInfo,
    ContactCreate,
    ContactUpdate,
    ContactDelete,
    HostCheck,
    HostCreate,
    PollReq,
    PollAck,
}

impl Verb {
    /// Wire name of the verb
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::DomainCheck => "domain_check",
            Verb::DomainInfo => "domain_info",
            Verb::DomainCreate => "domain_create",
            Verb::DomainUpdate => "domain_update",
            Verb::DomainRenew => "domain_renew",
            Verb::DomainTransfer => "domain_transfer",
            Verb::ContactCheck => "contact_check",
            Verb::ContactInfo => "contact_info",
            Verb::ContactCreate => "contact_create",
            Verb::ContactUpdate => "contact_update",
            Verb::ContactDelete => "contact_delete",
            Verb::HostCheck => "host_check",
            Verb::HostCreate => "host_create",
            Verb::PollReq => "poll_req",
            Verb::PollAck => "poll_ack",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role assignment of a contact in domain commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactRef {
    #[serde(rename = "type")]
    pub role: ContactRole,
    pub id: String,
}

impl ContactRef {
    pub fn new(role: ContactRole, id: impl Into<String>) -> Self {
        Self {
            role,
            id: id.into(),
        }
    }
}

/// Arguments of `domain_create`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainCreate {
    pub name: String,
    pub registrant: String,
    pub contacts: Vec<ContactRef>,
    pub nameservers: Vec<String>,
    pub period: u32,
    pub period_units: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_info: Option<String>,
}

/// Registry Grace Period restore report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreReport {
    /// Registration data before the deletion
    pub pre_data: String,
    /// Registration data after the restore
    pub post_data: String,
    /// When the domain was deleted
    pub del_time: String,
    /// When the restore was requested
    pub res_time: String,
    pub res_reason: String,
    /// The two statements required by RFC 3915
    pub statements: Vec<String>,
    pub other: String,
}

/// Arguments of `domain_update`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DomainUpdate {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add_nameservers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove_nameservers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add_contacts: Vec<ContactRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove_contacts: Vec<ContactRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_registrant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_info: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub rgp_restore: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_report: Option<RestoreReport>,
}

impl DomainUpdate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Change the transfer authorization code
    pub fn with_auth_info(mut self, auth_info: impl Into<String>) -> Self {
        self.auth_info = Some(auth_info.into());
        self
    }

    /// Request an RGP restore with the given report
    pub fn with_restore(mut self, report: RestoreReport) -> Self {
        self.rgp_restore = true;
        self.restore_report = Some(report);
        self
    }

    /// True if the update would not change anything
    pub fn is_empty(&self) -> bool {
        self.add_nameservers.is_empty()
            && self.remove_nameservers.is_empty()
            && self.add_contacts.is_empty()
            && self.remove_contacts.is_empty()
            && self.change_registrant.is_none()
            && self.auth_info.is_none()
            && !self.rgp_restore
    }
}

/// Postal address block of a contact
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PostalInfo {
    /// `loc` or `int`
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub org: String,
    pub street: Vec<String>,
    pub city: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sp: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pc: String,
    pub cc: String,
}

/// Arguments of `contact_create` and `contact_update`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactData {
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub voice: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fax: String,
    pub email: String,
    pub contacts: Vec<PostalInfo>,
}

impl ContactData {
    /// Build the registry representation of a local contact under `id`
    pub fn from_contact(contact: &Contact, id: impl Into<String>) -> Self {
        let street = contact
            .address_street
            .split('\n')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            id: id.into(),
            voice: contact.contact_voice.clone(),
            fax: contact.contact_fax.clone(),
            email: contact.contact_email.clone(),
            contacts: vec![PostalInfo {
                kind: "int",
                name: contact.person_name.clone(),
                org: contact.organization_name.clone(),
                street,
                city: contact.address_city.clone(),
                sp: contact.address_province.clone(),
                pc: contact.address_postal_code.clone(),
                cc: contact.address_country.clone(),
            }],
        }
    }
}

/// A command sent to the registry gateway
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "cmd", content = "args", rename_all = "snake_case")]
pub enum Command {
    DomainCheck {
        domains: Vec<String>,
    },
    DomainInfo {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        auth_info: Option<String>,
    },
    DomainCreate(DomainCreate),
    DomainUpdate(DomainUpdate),
    DomainRenew {
        name: String,
        cur_exp_date: String,
        period: u32,
        period_units: &'static str,
    },
    DomainTransfer {
        name: String,
        op: &'static str,
        auth_info: String,
    },
    ContactCheck {
        contacts: Vec<String>,
    },
    ContactInfo {
        contact: String,
    },
    ContactCreate(ContactData),
    ContactUpdate(ContactData),
    ContactDelete {
        contact: String,
    },
    HostCheck {
        hosts: Vec<String>,
    },
    HostCreate {
        name: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        ip_list: Vec<String>,
    },
    PollReq {},
    PollAck {
        msg_id: String,
    },
}

impl Command {
    /// Verb of the command
    pub fn verb(&self) -> Verb {
        match self {
            Command::DomainCheck { .. } => Verb::DomainCheck,
            Command::DomainInfo { .. } => Verb::DomainInfo,
            Command::DomainCreate(_) => Verb::DomainCreate,
            Command::DomainUpdate(_) => Verb::DomainUpdate,
            Command::DomainRenew { .. } => Verb::DomainRenew,
            Command::DomainTransfer { .. } => Verb::DomainTransfer,
            Command::ContactCheck { .. } => Verb::ContactCheck,
            Command::ContactInfo { .. } => Verb::ContactInfo,
            Command::ContactCreate(_) => Verb::ContactCreate,
            Command::ContactUpdate(_) => Verb::ContactUpdate,
            Command::ContactDelete { .. } => Verb::ContactDelete,
            Command::HostCheck { .. } => Verb::HostCheck,
            Command::HostCreate { .. } => Verb::HostCreate,
            Command::PollReq {} => Verb::PollReq,
            Command::PollAck { .. } => Verb::PollAck,
        }
    }

    /// `domain_renew` for `years` starting at the current expiry date
    pub fn domain_renew(name: impl Into<String>, current_expiry: DateTime<Utc>, years: u32) -> Self {
        Command::DomainRenew {
            name: name.into(),
            cur_exp_date: format_date(current_expiry.date_naive()),
            period: years,
            period_units: "y",
        }
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let command = Command::DomainCheck {
            domains: vec!["example.ai".to_string(), "other.ai".to_string()],
        };
        assert_eq!(
            serde_json::to_value(&command).unwrap(),
            json!({"cmd": "domain_check", "args": {"domains": ["example.ai", "other.ai"]}})
        );
        assert_eq!(command.verb(), Verb::DomainCheck);
    }

    #[test]
    fn test_poll_req_has_empty_args() {
        assert_eq!(
            serde_json::to_value(Command::PollReq {}).unwrap(),
            json!({"cmd": "poll_req", "args": {}})
        );
    }

    #[test]
    fn test_domain_update_skips_unchanged_parts() {
        let mut update = DomainUpdate::new("example.ai");
        assert!(update.is_empty());

        update.add_contacts.push(ContactRef::new(ContactRole::Admin, "adm1"));
        update.remove_nameservers.push("ns9.example.com".to_string());
        assert!(!update.is_empty());

        assert_eq!(
            serde_json::to_value(Command::DomainUpdate(update)).unwrap(),
            json!({
                "cmd": "domain_update",
                "args": {
                    "name": "example.ai",
                    "remove_nameservers": ["ns9.example.com"],
                    "add_contacts": [{"type": "admin", "id": "adm1"}],
                }
            })
        );
    }

    #[test]
    fn test_domain_renew_formats_expiry_date() {
        let expiry = Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap();
        let command = Command::domain_renew("example.ai", expiry, 2);
        assert_eq!(
            serde_json::to_value(command).unwrap()["args"],
            json!({"name": "example.ai", "cur_exp_date": "2026-03-04", "period": 2, "period_units": "y"})
        );
    }

    #[test]
    fn test_contact_data_splits_street_lines() {
        let contact = Contact {
            person_name: "Alice".to_string(),
            address_street: "1 Main st\n\nApt 2".to_string(),
            address_city: "Town".to_string(),
            address_country: "AI".to_string(),
            contact_email: "alice@example.com".to_string(),
            ..Contact::default()
        };
        let data = ContactData::from_contact(&contact, "alice12345");
        assert_eq!(data.contacts[0].street, vec!["1 Main st", "Apt 2"]);
        assert_eq!(data.contacts[0].kind, "int");
        assert_eq!(data.id, "alice12345");
    }
}
