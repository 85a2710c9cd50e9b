//! Test doubles and common utilities for contract tests
//!
//! [`ScriptedRegistry`] stands in for the registry gateway: it answers
//! commands from a queue of canned replies or faults and records every
//! payload it receives.

#![allow(dead_code)]

use epp_core::{
    AutomatonRegistry, Contact, ContactKind, Domain, EppClient, EppConfig, Error, Master, MemoryStore,
    Result, RpcTransport, TransportConfig,
};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

enum Scripted {
    Reply(Value),
    Fault(&'static str),
}

/// A registry gateway answering from a script
#[derive(Default)]
pub struct ScriptedRegistry {
    script: Mutex<VecDeque<Scripted>>,
    sent: Mutex<Vec<Value>>,
}

impl ScriptedRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a reply body
    pub fn reply(&self, body: Value) -> &Self {
        self.script.lock().unwrap().push_back(Scripted::Reply(body));
        self
    }

    /// Queue a transport fault
    pub fn fault(&self, reason: &'static str) -> &Self {
        self.script.lock().unwrap().push_back(Scripted::Fault(reason));
        self
    }

    /// Every payload received, in order
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    /// The `cmd` of every payload received
    pub fn verbs(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|payload| payload["cmd"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl RpcTransport for ScriptedRegistry {
    async fn request(&self, payload: &str) -> Result<String> {
        self.sent
            .lock()
            .unwrap()
            .push(serde_json::from_str(payload).unwrap());
        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Reply(body)) => Ok(body.to_string()),
            Some(Scripted::Fault(reason)) => Err(Error::connectivity(reason)),
            None => Err(Error::connectivity("script exhausted")),
        }
    }

    fn transport_name(&self) -> &'static str {
        "scripted"
    }
}

/// Route log output through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Configuration with a short restart delay
pub fn config() -> EppConfig {
    let mut config = EppConfig::new(TransportConfig::Http {
        url: "http://gateway.test/rpc".to_string(),
        token: None,
        timeout_secs: 5,
    });
    config.health.restart_delay_ms = 1;
    config
}

pub fn client(registry: &Arc<ScriptedRegistry>) -> EppClient {
    EppClient::new(registry.clone()).with_restart_delay(Duration::from_millis(1))
}

/// A façade over the scripted registry and a fresh memory store
pub fn master(registry: &Arc<ScriptedRegistry>) -> (Master, MemoryStore) {
    let store = MemoryStore::new();
    let master = Master::new(client(registry), Arc::new(store.clone()), &config());
    (master, store)
}

/// Record `(old, new)` state pairs of every automaton
pub fn record_states(registry: &AutomatonRegistry) -> Arc<Mutex<Vec<(String, String)>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    registry.subscribe(move |change| {
        sink.lock()
            .unwrap()
            .push((change.old_state.clone(), change.new_state.clone()));
    });
    seen
}

// Reply builders, shaped like the gateway's conversion of registry XML

pub fn result(code: u16) -> Value {
    json!({"epp": {"response": {"result": {"@code": code.to_string(), "msg": format!("result {}", code)}}}})
}

pub fn with_data(code: u16, res_data: Value) -> Value {
    let mut body = result(code);
    body["epp"]["response"]["resData"] = res_data;
    body
}

pub fn check(entries: &[(&str, bool, Option<&str>)]) -> Value {
    let cd: Vec<Value> = entries
        .iter()
        .map(|(name, avail, reason)| {
            let mut item = json!({"name": {"#text": name, "@avail": if *avail { "1" } else { "0" }}});
            match (*avail, reason) {
                (_, Some(reason)) => item["reason"] = json!(reason),
                (false, None) => item["reason"] = json!("The domain exists"),
                (true, None) => {}
            }
            item
        })
        .collect();
    with_data(1000, json!({"chkData": {"cd": cd}}))
}

pub fn domain_info(name: &str, registrant: &str, contacts: &[(&str, &str)], ns: &[&str]) -> Value {
    let contact: Vec<Value> = contacts
        .iter()
        .map(|(role, id)| json!({"@type": role, "#text": id}))
        .collect();
    with_data(
        1000,
        json!({"infData": {
            "name": name,
            "roid": format!("{}-ROID", name.to_uppercase()),
            "status": {"@s": "ok"},
            "registrant": registrant,
            "contact": contact,
            "ns": {"hostObj": ns},
            "clID": "registrar",
            "crDate": "2020-01-01T00:00:00.0Z",
            "exDate": "2027-01-01T00:00:00.0Z",
        }}),
    )
}

pub fn contact(email: &str, epp_id: Option<&str>) -> Contact {
    Contact {
        epp_id: epp_id.map(str::to_string),
        owner: "owner@example.com".to_string(),
        person_name: "Person".to_string(),
        address_street: "1 Main st".to_string(),
        address_city: "Town".to_string(),
        address_country: "AI".to_string(),
        contact_email: email.to_string(),
        ..Contact::default()
    }
}

/// A domain with a registrant and one nameserver
pub fn domain(name: &str, registrant_id: Option<&str>) -> Domain {
    let mut domain = Domain::new(name, "owner@example.com");
    let mut registrant = contact("owner@example.com", registrant_id);
    registrant.kind = ContactKind::Registrant;
    domain.registrant = Some(registrant);
    domain.nameservers = vec!["ns1.example.com".to_string()];
    domain
}
