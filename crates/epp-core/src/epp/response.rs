//! Decoding of registry replies
//!
//! The gateway converts EPP XML into JSON with the usual attribute
//! conventions: attributes become `@name` keys, element text next to
//! attributes becomes `#text`, and repeated elements become arrays while a
//! single element stays an object. A reply is decoded once into a
//! [`Response`] whose typed [`ResponseData`] the state machines read.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::command::Verb;
use crate::error::{Error, Result, ResultCode};
use crate::model::ContactRole;

/// Decoded registry reply
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Verb of the command this reply answers
    pub verb: Verb,
    /// Result code of the first `<result>` element
    pub code: ResultCode,
    /// Result message of the first `<result>` element
    pub message: String,
    /// Typed `resData` / `msgQ` content
    pub data: ResponseData,
    /// The reply as received
    pub raw: Value,
}

/// Typed payload of a reply
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseData {
    Empty,
    DomainCheck(Vec<CheckItem>),
    DomainInfo(DomainInfo),
    DomainCreated(DomainCreated),
    DomainRenewed(DomainRenewed),
    DomainTransferred(DomainTransferred),
    ContactCheck(Vec<CheckItem>),
    ContactInfo(ContactInfo),
    ContactCreated(ContactCreated),
    HostCheck(Vec<CheckItem>),
    Poll(PollMessage),
}

/// One `<cd>` entry of a check reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckItem {
    pub name: String,
    pub available: bool,
    pub reason: Option<String>,
}

impl CheckItem {
    /// The object is registered (not available for creation)
    pub fn exists(&self) -> bool {
        !self.available
    }

    /// Reason text, lowercased, empty when absent
    pub fn reason_lowercase(&self) -> String {
        self.reason.as_deref().unwrap_or_default().to_lowercase()
    }
}

/// Registry status flag with its optional explanatory text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EppStatus {
    pub name: String,
    pub text: Option<String>,
}

/// `domain:infData`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainInfo {
    pub name: String,
    pub roid: Option<String>,
    pub statuses: Vec<EppStatus>,
    pub registrant: Option<String>,
    pub contacts: BTreeMap<ContactRole, String>,
    pub nameservers: Vec<String>,
    /// Sponsoring registrar (`clID`)
    pub sponsor: Option<String>,
    pub create_date: Option<DateTime<Utc>>,
    pub update_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub auth_info: Option<String>,
}

impl DomainInfo {
    /// Look up a status flag by name
    pub fn status(&self, name: &str) -> Option<&EppStatus> {
        self.statuses.iter().find(|status| status.name == name)
    }

    pub fn has_status(&self, name: &str) -> bool {
        self.status(name).is_some()
    }

    /// Status name → text, as stored on the domain record
    pub fn status_map(&self) -> BTreeMap<String, String> {
        self.statuses
            .iter()
            .map(|status| (status.name.clone(), status.text.clone().unwrap_or_default()))
            .collect()
    }
}

/// Postal block of a contact
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostalAddress {
    /// `loc` or `int`
    pub kind: String,
    pub name: String,
    pub org: String,
    pub street: Vec<String>,
    pub city: String,
    pub sp: String,
    pub pc: String,
    pub cc: String,
}

/// `contact:infData`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactInfo {
    pub id: String,
    pub roid: Option<String>,
    pub statuses: Vec<EppStatus>,
    pub email: String,
    pub voice: String,
    pub fax: String,
    /// Preferred postal block: `loc` when present, else `int`
    pub postal: Option<PostalAddress>,
    pub create_date: Option<DateTime<Utc>>,
}

/// `domain:creData`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainCreated {
    pub name: String,
    pub create_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
}

/// `domain:renData`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRenewed {
    pub name: String,
    pub expiry_date: Option<DateTime<Utc>>,
}

/// `domain:trnData`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainTransferred {
    pub name: String,
    pub status: Option<String>,
    pub requested_by: Option<String>,
    pub action_by: Option<String>,
    pub expiry_date: Option<DateTime<Utc>>,
}

/// `contact:creData`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactCreated {
    pub id: String,
    pub create_date: Option<DateTime<Utc>>,
}

/// Head of the poll message queue
#[derive(Debug, Clone, PartialEq)]
pub struct PollMessage {
    pub id: String,
    pub count: u32,
    pub date: Option<DateTime<Utc>>,
    pub message: String,
    /// Raw `resData` attached to the message
    pub data: Option<Value>,
}

impl Response {
    /// Decode a reply body for the given verb
    ///
    /// Typed data is only extracted from success replies (including `1001`);
    /// failure replies decode to [`ResponseData::Empty`].
    pub fn decode(verb: Verb, body: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(body)
            .map_err(|e| Error::bad_response(format!("{} reply is not JSON: {}", verb, e)))?;
        let envelope: WireEnvelope = serde_json::from_value(raw.clone())
            .map_err(|e| Error::bad_response(format!("{} reply has no EPP result: {}", verb, e)))?;

        let reply = envelope.epp.response;
        let result = reply
            .result
            .into_vec()
            .into_iter()
            .next()
            .ok_or_else(|| Error::bad_response(format!("{} reply has an empty result", verb)))?;
        let code = ResultCode::from_u16(result.code.value(verb)?);
        let message = result.msg.map(Text::into_string).unwrap_or_default();

        let data = if code.is_success() || code == ResultCode::SuccessActionPending {
            decode_data(verb, reply.res_data.as_ref(), reply.msg_q)?
        } else {
            ResponseData::Empty
        };

        Ok(Self {
            verb,
            code,
            message,
            data,
            raw,
        })
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Typed error for this reply's result
    pub fn error(&self) -> Error {
        Error::from_result(self.code.as_u16(), self.message.clone())
    }

    /// Entries of a domain, contact or host check reply
    pub fn check_items(&self) -> Result<&[CheckItem]> {
        match &self.data {
            ResponseData::DomainCheck(items)
            | ResponseData::ContactCheck(items)
            | ResponseData::HostCheck(items) => Ok(items),
            _ => Err(self.missing("chkData")),
        }
    }

    pub fn domain_info(&self) -> Result<&DomainInfo> {
        match &self.data {
            ResponseData::DomainInfo(info) => Ok(info),
            _ => Err(self.missing("domain infData")),
        }
    }

    pub fn contact_info(&self) -> Result<&ContactInfo> {
        match &self.data {
            ResponseData::ContactInfo(info) => Ok(info),
            _ => Err(self.missing("contact infData")),
        }
    }

    /// Poll message, `None` when the queue is empty
    pub fn poll_message(&self) -> Option<&PollMessage> {
        match &self.data {
            ResponseData::Poll(message) => Some(message),
            _ => None,
        }
    }

    fn missing(&self, what: &str) -> Error {
        Error::bad_response(format!("{} reply ({}) carries no {}", self.verb, self.code, what))
    }
}

/// Parse a registry timestamp
///
/// Accepts RFC 3339 as well as the `%Y-%m-%dT%H:%M:%S%.fZ` and
/// `%Y-%m-%d %H:%M:%S` shapes some registries emit.
pub fn parse_epp_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.fZ", "%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

fn decode_data(verb: Verb, res_data: Option<&Value>, msg_q: Option<WireMsgQ>) -> Result<ResponseData> {
    let data = match verb {
        Verb::DomainCheck => ResponseData::DomainCheck(check_items(verb, res_data)?),
        Verb::ContactCheck => ResponseData::ContactCheck(check_items(verb, res_data)?),
        Verb::HostCheck => ResponseData::HostCheck(check_items(verb, res_data)?),
        Verb::DomainInfo => {
            let wire: WireDomainInfo = section(verb, res_data, "infData")?;
            ResponseData::DomainInfo(wire.into())
        }
        Verb::ContactInfo => {
            let wire: WireContactInfo = section(verb, res_data, "infData")?;
            ResponseData::ContactInfo(wire.into())
        }
        Verb::DomainCreate => match optional_section::<WireDomainCreated>(verb, res_data, "creData")? {
            Some(wire) => ResponseData::DomainCreated(DomainCreated {
                name: wire.name,
                create_date: wire.cr_date.as_deref().and_then(parse_epp_date),
                expiry_date: wire.ex_date.as_deref().and_then(parse_epp_date),
            }),
            None => ResponseData::Empty,
        },
        Verb::DomainRenew => match optional_section::<WireDomainRenewed>(verb, res_data, "renData")? {
            Some(wire) => ResponseData::DomainRenewed(DomainRenewed {
                name: wire.name,
                expiry_date: wire.ex_date.as_deref().and_then(parse_epp_date),
            }),
            None => ResponseData::Empty,
        },
        Verb::DomainTransfer => {
            match optional_section::<WireDomainTransferred>(verb, res_data, "trnData")? {
                Some(wire) => ResponseData::DomainTransferred(DomainTransferred {
                    name: wire.name,
                    status: wire.tr_status,
                    requested_by: wire.re_id,
                    action_by: wire.ac_id,
                    expiry_date: wire.ex_date.as_deref().and_then(parse_epp_date),
                }),
                None => ResponseData::Empty,
            }
        }
        Verb::ContactCreate => match optional_section::<WireContactCreated>(verb, res_data, "creData")? {
            Some(wire) => ResponseData::ContactCreated(ContactCreated {
                id: wire.id,
                create_date: wire.cr_date.as_deref().and_then(parse_epp_date),
            }),
            None => ResponseData::Empty,
        },
        Verb::PollReq => match msg_q {
            Some(queue) => ResponseData::Poll(PollMessage {
                id: queue.id.unwrap_or_default(),
                count: queue
                    .count
                    .map(|count| count.value(verb))
                    .transpose()?
                    .map(u32::from)
                    .unwrap_or_default(),
                date: queue.q_date.as_deref().and_then(parse_epp_date),
                message: queue.msg.map(Text::into_string).unwrap_or_default(),
                data: res_data.cloned(),
            }),
            None => ResponseData::Empty,
        },
        _ => ResponseData::Empty,
    };
    Ok(data)
}

fn check_items(verb: Verb, res_data: Option<&Value>) -> Result<Vec<CheckItem>> {
    let wire: WireCheckData = section(verb, res_data, "chkData")?;
    Ok(wire
        .cd
        .into_vec()
        .into_iter()
        .map(|item| CheckItem {
            name: item.name.text,
            available: item.name.avail.is_true(),
            reason: item.reason.map(Text::into_string),
        })
        .collect())
}

fn section<T: DeserializeOwned>(verb: Verb, res_data: Option<&Value>, key: &str) -> Result<T> {
    optional_section(verb, res_data, key)?
        .ok_or_else(|| Error::bad_response(format!("{} reply carries no {}", verb, key)))
}

fn optional_section<T: DeserializeOwned>(
    verb: Verb,
    res_data: Option<&Value>,
    key: &str,
) -> Result<Option<T>> {
    match res_data.and_then(|data| data.get(key)) {
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| Error::bad_response(format!("{} reply has a malformed {}: {}", verb, key, e))),
        None => Ok(None),
    }
}

// Wire shapes

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

fn flatten<T>(value: Option<OneOrMany<T>>) -> Vec<T> {
    value.map(OneOrMany::into_vec).unwrap_or_default()
}

/// Element text, either bare or next to attributes
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Text {
    Plain(String),
    Node {
        #[serde(rename = "#text", default)]
        text: Option<String>,
    },
}

impl Text {
    fn into_string(self) -> String {
        match self {
            Text::Plain(text) => text,
            Text::Node { text } => text.unwrap_or_default(),
        }
    }
}

fn text(value: Option<Text>) -> String {
    value.map(Text::into_string).unwrap_or_default()
}

/// Numeric attribute that may arrive as a number or a string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Number {
    Int(u16),
    Str(String),
}

impl Number {
    fn value(&self, verb: Verb) -> Result<u16> {
        match self {
            Number::Int(value) => Ok(*value),
            Number::Str(raw) => raw
                .trim()
                .parse()
                .map_err(|_| Error::bad_response(format!("{} reply has a bad number: {}", verb, raw))),
        }
    }
}

/// `avail` attribute: `0`/`1`, `true`/`false`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(u8),
    Str(String),
}

impl Flag {
    fn is_true(&self) -> bool {
        match self {
            Flag::Bool(value) => *value,
            Flag::Int(value) => *value != 0,
            Flag::Str(value) => matches!(value.trim(), "1" | "true"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    epp: WireEpp,
}

#[derive(Debug, Deserialize)]
struct WireEpp {
    response: WireResponse,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    result: OneOrMany<WireResult>,
    #[serde(rename = "msgQ", default)]
    msg_q: Option<WireMsgQ>,
    #[serde(rename = "resData", default)]
    res_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireResult {
    #[serde(rename = "@code")]
    code: Number,
    #[serde(default)]
    msg: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct WireMsgQ {
    #[serde(rename = "@count", default)]
    count: Option<Number>,
    #[serde(rename = "@id", default)]
    id: Option<String>,
    #[serde(rename = "qDate", default)]
    q_date: Option<String>,
    #[serde(default)]
    msg: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct WireCheckData {
    cd: OneOrMany<WireCheckItem>,
}

#[derive(Debug, Deserialize)]
struct WireCheckItem {
    #[serde(alias = "id")]
    name: WireAvail,
    #[serde(default)]
    reason: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct WireAvail {
    #[serde(rename = "#text")]
    text: String,
    #[serde(rename = "@avail")]
    avail: Flag,
}

#[derive(Debug, Deserialize)]
struct WireStatus {
    #[serde(rename = "@s")]
    s: String,
    #[serde(rename = "#text", default)]
    text: Option<String>,
}

impl From<WireStatus> for EppStatus {
    fn from(wire: WireStatus) -> Self {
        Self {
            name: wire.s,
            text: wire.text,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireContactRef {
    #[serde(rename = "@type")]
    role: String,
    #[serde(rename = "#text")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireNameservers {
    #[serde(rename = "hostObj", default)]
    host_obj: Option<OneOrMany<String>>,
}

#[derive(Debug, Deserialize)]
struct WireAuthInfo {
    #[serde(default)]
    pw: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct WireDomainInfo {
    name: String,
    #[serde(default)]
    roid: Option<String>,
    #[serde(default)]
    status: Option<OneOrMany<WireStatus>>,
    #[serde(default)]
    registrant: Option<Text>,
    #[serde(default)]
    contact: Option<OneOrMany<WireContactRef>>,
    #[serde(default)]
    ns: Option<WireNameservers>,
    #[serde(rename = "clID", default)]
    cl_id: Option<String>,
    #[serde(rename = "crDate", default)]
    cr_date: Option<String>,
    #[serde(rename = "upDate", default)]
    up_date: Option<String>,
    #[serde(rename = "exDate", default)]
    ex_date: Option<String>,
    #[serde(rename = "authInfo", default)]
    auth_info: Option<WireAuthInfo>,
}

impl From<WireDomainInfo> for DomainInfo {
    fn from(wire: WireDomainInfo) -> Self {
        let contacts = flatten(wire.contact)
            .into_iter()
            .filter_map(|contact| ContactRole::parse(&contact.role).map(|role| (role, contact.id)))
            .collect();
        let nameservers = wire
            .ns
            .map(|ns| flatten(ns.host_obj))
            .unwrap_or_default()
            .into_iter()
            .map(|host| host.to_lowercase())
            .collect();

        Self {
            name: wire.name,
            roid: wire.roid,
            statuses: flatten(wire.status).into_iter().map(EppStatus::from).collect(),
            registrant: wire.registrant.map(Text::into_string).filter(|r| !r.is_empty()),
            contacts,
            nameservers,
            sponsor: wire.cl_id,
            create_date: wire.cr_date.as_deref().and_then(parse_epp_date),
            update_date: wire.up_date.as_deref().and_then(parse_epp_date),
            expiry_date: wire.ex_date.as_deref().and_then(parse_epp_date),
            auth_info: wire
                .auth_info
                .and_then(|auth| auth.pw)
                .map(Text::into_string)
                .filter(|pw| !pw.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireAddress {
    #[serde(default)]
    street: Option<OneOrMany<String>>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    sp: Option<String>,
    #[serde(default)]
    pc: Option<String>,
    #[serde(default)]
    cc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePostalInfo {
    #[serde(rename = "@type")]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    org: Option<String>,
    #[serde(default)]
    addr: Option<WireAddress>,
}

impl From<WirePostalInfo> for PostalAddress {
    fn from(wire: WirePostalInfo) -> Self {
        let (street, city, sp, pc, cc) = match wire.addr {
            Some(addr) => (
                flatten(addr.street),
                addr.city.unwrap_or_default(),
                addr.sp.unwrap_or_default(),
                addr.pc.unwrap_or_default(),
                addr.cc.unwrap_or_default(),
            ),
            None => Default::default(),
        };
        Self {
            kind: wire.kind,
            name: wire.name.unwrap_or_default(),
            org: wire.org.unwrap_or_default(),
            street,
            city,
            sp,
            pc,
            cc,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireContactInfo {
    id: String,
    #[serde(default)]
    roid: Option<String>,
    #[serde(default)]
    status: Option<OneOrMany<WireStatus>>,
    #[serde(rename = "postalInfo", default)]
    postal_info: Option<OneOrMany<WirePostalInfo>>,
    #[serde(default)]
    voice: Option<Text>,
    #[serde(default)]
    fax: Option<Text>,
    #[serde(default)]
    email: Option<String>,
    #[serde(rename = "crDate", default)]
    cr_date: Option<String>,
}

impl From<WireContactInfo> for ContactInfo {
    fn from(wire: WireContactInfo) -> Self {
        let mut postal: Vec<PostalAddress> = flatten(wire.postal_info)
            .into_iter()
            .map(PostalAddress::from)
            .collect();
        let preferred = postal
            .iter()
            .position(|block| block.kind == "loc")
            .unwrap_or(0);
        let postal = (!postal.is_empty()).then(|| postal.swap_remove(preferred));

        Self {
            id: wire.id,
            roid: wire.roid,
            statuses: flatten(wire.status).into_iter().map(EppStatus::from).collect(),
            email: wire.email.unwrap_or_default(),
            voice: text(wire.voice),
            fax: text(wire.fax),
            postal,
            create_date: wire.cr_date.as_deref().and_then(parse_epp_date),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireDomainCreated {
    name: String,
    #[serde(rename = "crDate", default)]
    cr_date: Option<String>,
    #[serde(rename = "exDate", default)]
    ex_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDomainRenewed {
    name: String,
    #[serde(rename = "exDate", default)]
    ex_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDomainTransferred {
    name: String,
    #[serde(rename = "trStatus", default)]
    tr_status: Option<String>,
    #[serde(rename = "reID", default)]
    re_id: Option<String>,
    #[serde(rename = "acID", default)]
    ac_id: Option<String>,
    #[serde(rename = "exDate", default)]
    ex_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireContactCreated {
    id: String,
    #[serde(rename = "crDate", default)]
    cr_date: Option<String>,
}
