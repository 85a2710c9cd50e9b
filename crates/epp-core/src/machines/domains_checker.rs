//! DomainsChecker
//!
//! ```text
//! AT_STARTUP ─► CHECK_MANY ─┬─ none exist ─────────────► DONE
//!                           └─ some exist ─► INFO_ONE* ─► DONE
//! ```
//!
//! One `domain_check` covers every requested name, then each registered
//! name is read with `domain_info`, last discovered first. The final
//! output maps every requested name to its [`DomainExistence`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Context, DomainExistence, Output, check_item, ensure_supported_zone};
use crate::automaton::{StateMachine, Transition, machine_states};
use crate::epp::{CheckItem, Response};
use crate::error::{Error, Result, ResultCode};

machine_states! {
    pub enum CheckerState {
        Startup => "AT_STARTUP",
        CheckMany => "CHECK_MANY",
        InfoOne => "INFO_ONE",
        Done => "DONE",
        Failed => "FAILED",
    }
    terminal: [Done, Failed]
}

#[derive(Debug)]
pub enum CheckerEvent {
    /// Check these names
    Run(Vec<String>),
    CheckReply(Response),
    /// `skip_check`: every name is assumed registered
    CheckSkipped,
    NextInfo,
    InfoReply {
        name: String,
        reply: Result<Response>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    /// Do not send `domain_check`; treat every name as registered
    pub skip_check: bool,
    /// Do not read registered names
    pub skip_info: bool,
    /// Fail if the registry registrant differs from the stored one
    pub verify_registrant: bool,
    /// Fail on the first `domain_info` error instead of recording it
    pub stop_on_error: bool,
    /// Auth code sent with every `domain_info`
    pub auth_info: Option<String>,
}

/// True if any entry of a check reply is registered
pub fn is_any_exist(items: &[CheckItem]) -> bool {
    items.iter().any(is_registered)
}

/// Unavailable because it is registered, not because it is reserved or
/// blocked
fn is_registered(item: &CheckItem) -> bool {
    item.exists() && item.reason_lowercase().contains("the domain exists")
}

pub struct DomainsChecker {
    ctx: Context,
    options: CheckOptions,
    names: Vec<String>,
    pending: Vec<String>,
    existence: BTreeMap<String, DomainExistence>,
}

impl DomainsChecker {
    pub fn new(ctx: Context, options: CheckOptions) -> Self {
        Self {
            ctx,
            options,
            names: Vec::new(),
            pending: Vec::new(),
            existence: BTreeMap::new(),
        }
    }

    /// Results collected so far
    pub fn existence(&self) -> &BTreeMap<String, DomainExistence> {
        &self.existence
    }

    fn finish(&mut self, outputs: &mut Vec<Output>) -> Transition<CheckerState, CheckerEvent> {
        debug!("Checked {} domains", self.existence.len());
        outputs.push(Output::Existence(self.existence.clone()));
        Transition::to(CheckerState::Done)
    }

    fn read_next(&mut self, outputs: &mut Vec<Output>) -> Transition<CheckerState, CheckerEvent> {
        if self.options.skip_info || self.pending.is_empty() {
            return self.finish(outputs);
        }
        Transition::then(CheckerState::InfoOne, CheckerEvent::NextInfo)
    }

    async fn verify_registrant(&self, name: &str, reply: &Response) -> Result<()> {
        let known = match self.ctx.store.domain_find(name).await? {
            Some(domain) => domain.registrant_epp_id().map(str::to_string),
            None => None,
        };
        let Some(known) = known else {
            return Ok(());
        };

        let reported = reply.domain_info()?.registrant.as_deref();
        if reported != Some(known.as_str()) {
            return Err(Error::registrant_auth_failed(format!(
                "{} is registered to {} but known locally as {}",
                name,
                reported.unwrap_or("nobody"),
                known
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StateMachine for DomainsChecker {
    type State = CheckerState;
    type Event = CheckerEvent;
    type Output = Output;

    fn name(&self) -> &'static str {
        "domains_checker"
    }

    async fn transition(
        &mut self,
        state: CheckerState,
        event: CheckerEvent,
        outputs: &mut Vec<Output>,
    ) -> Result<Transition<CheckerState, CheckerEvent>> {
        match (state, event) {
            (CheckerState::Startup, CheckerEvent::Run(names)) => {
                if names.is_empty() {
                    return Err(Error::command_invalid("no domain names to check"));
                }
                for name in names {
                    if !self.names.contains(&name) {
                        self.names.push(name);
                    }
                }

                if self.options.skip_check {
                    return Ok(Transition::then(CheckerState::CheckMany, CheckerEvent::CheckSkipped));
                }
                let reply = self.ctx.client.domain_check(&self.names).await?;
                Ok(Transition::then(CheckerState::CheckMany, CheckerEvent::CheckReply(reply)))
            }

            (CheckerState::CheckMany, CheckerEvent::CheckReply(reply)) => {
                for name in &self.names {
                    let item = check_item(&reply, name)?;
                    ensure_supported_zone(item)?;
                    let existence = if is_registered(item) {
                        self.pending.push(name.clone());
                        DomainExistence::Exists
                    } else if item.exists() {
                        warn!("{} is unavailable but not registered: {:?}", name, item.reason);
                        DomainExistence::Error(Error::bad_response(format!(
                            "{} is unavailable: {}",
                            name,
                            item.reason.as_deref().unwrap_or("no reason given")
                        )))
                    } else {
                        DomainExistence::NotExists
                    };
                    self.existence.insert(name.clone(), existence);
                }
                let any_exist = is_any_exist(reply.check_items()?);
                outputs.push(reply.into());

                if !any_exist {
                    debug!("None of {} domains exist", self.names.len());
                    return Ok(self.finish(outputs));
                }
                Ok(self.read_next(outputs))
            }

            (CheckerState::CheckMany, CheckerEvent::CheckSkipped) => {
                for name in &self.names {
                    self.existence.insert(name.clone(), DomainExistence::Exists);
                }
                self.pending = self.names.clone();
                Ok(self.read_next(outputs))
            }

            (CheckerState::InfoOne, CheckerEvent::NextInfo) => match self.pending.pop() {
                Some(name) => {
                    let reply = self
                        .ctx
                        .client
                        .domain_info(&name, self.options.auth_info.as_deref())
                        .await;
                    Ok(Transition::then(
                        CheckerState::InfoOne,
                        CheckerEvent::InfoReply { name, reply },
                    ))
                }
                None => Ok(self.finish(outputs)),
            },

            (CheckerState::InfoOne, CheckerEvent::InfoReply { name, reply: Ok(reply) }) => {
                if self.options.verify_registrant {
                    let verified = self.verify_registrant(&name, &reply).await;
                    outputs.push(reply.into());
                    verified?;
                } else {
                    outputs.push(reply.into());
                }
                self.existence.insert(name, DomainExistence::Exists);
                Ok(Transition::then(CheckerState::InfoOne, CheckerEvent::NextInfo))
            }

            (CheckerState::InfoOne, CheckerEvent::InfoReply { name, reply: Err(err) }) => {
                if self.options.stop_on_error {
                    return Err(err);
                }
                warn!("Reading {} failed: {}", name, err);
                outputs.push(Output::Error(err.clone()));
                let existence = if err.has_code(ResultCode::ObjectDoesNotExist) {
                    DomainExistence::NotExists
                } else {
                    DomainExistence::Error(err)
                };
                self.existence.insert(name, existence);
                Ok(Transition::then(CheckerState::InfoOne, CheckerEvent::NextInfo))
            }

            (state, event) => Err(Error::automaton(format!(
                "domains_checker cannot handle {:?} in {}",
                event, state
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{check, contact, domain_info, harness, result};
    use super::*;
    use crate::automaton::Automaton;
    use crate::epp::Verb;
    use crate::error::ErrorKind;
    use crate::model::Domain;
    use crate::traits::Persistence;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    fn decode_check(entries: &[(&str, bool, Option<&str>)]) -> Response {
        Response::decode(Verb::DomainCheck, &check(entries).to_string()).unwrap()
    }

    #[test]
    fn test_is_any_exist_guard() {
        let reply = decode_check(&[
            ("taken.ai", false, Some("the domain exists")),
            ("free.ai", true, None),
        ]);
        assert!(is_any_exist(reply.check_items().unwrap()));

        let reply = decode_check(&[("free1.ai", true, None), ("free2.ai", true, None)]);
        assert!(!is_any_exist(reply.check_items().unwrap()));

        let reply = decode_check(&[("reserved.ai", false, Some("Reserved by registry"))]);
        assert!(!is_any_exist(reply.check_items().unwrap()));
    }

    #[tokio::test]
    async fn test_reserved_name_is_not_read() {
        let h = harness();
        h.stub.reply(check(&[
            ("reserved.ai", false, Some("Reserved by registry")),
            ("free.ai", true, None),
        ]));

        let finished = super::super::run(
            &h.ctx.registry,
            DomainsChecker::new(h.ctx.clone(), CheckOptions::default()),
            h.ctx.options,
            CheckerEvent::Run(names(&["reserved.ai", "free.ai"])),
        )
        .await
        .unwrap();

        assert_eq!(finished.state, CheckerState::Done);
        assert_eq!(h.stub.sent_verbs(), vec!["domain_check"]);
        let Some(Output::Existence(map)) = finished.outputs.last() else {
            panic!("expected existence map");
        };
        assert!(matches!(&map["reserved.ai"], DomainExistence::Error(err) if err.kind() == ErrorKind::BadResponse));
        assert_eq!(map["free.ai"], DomainExistence::NotExists);
    }

    #[tokio::test]
    async fn test_outputs_cover_every_name() {
        let h = harness();
        h.stub
            .reply(check(&[
                ("a.ai", false, Some("the domain exists")),
                ("b.ai", true, None),
                ("c.ai", false, Some("the domain exists")),
            ]))
            .reply(domain_info("c.ai", "r1", &[], &[]))
            .reply(domain_info("a.ai", "r1", &[], &[]));

        let mut automaton = Automaton::create(
            &h.ctx.registry,
            DomainsChecker::new(h.ctx.clone(), CheckOptions::default()),
            h.ctx.options,
        );
        automaton
            .event(CheckerEvent::Run(names(&["a.ai", "b.ai", "c.ai"])))
            .await
            .unwrap();

        assert_eq!(automaton.state(), CheckerState::Done);
        let outputs = automaton.outputs();
        assert_eq!(outputs.len(), 4);
        assert_eq!(outputs[0].as_response().unwrap().verb, Verb::DomainCheck);
        // Last discovered name is read first
        assert_eq!(outputs[1].as_response().unwrap().domain_info().unwrap().name, "c.ai");
        assert_eq!(outputs[2].as_response().unwrap().domain_info().unwrap().name, "a.ai");

        let Output::Existence(map) = &outputs[3] else {
            panic!("expected existence map, got {:?}", outputs[3]);
        };
        assert_eq!(map.len(), 3);
        assert!(map["a.ai"].exists());
        assert_eq!(map["b.ai"], DomainExistence::NotExists);
        assert!(map["c.ai"].exists());
    }

    #[tokio::test]
    async fn test_all_free_finishes_after_check() {
        let h = harness();
        h.stub.reply(check(&[("a.ai", true, None), ("b.ai", true, None)]));

        let finished = super::super::run(
            &h.ctx.registry,
            DomainsChecker::new(h.ctx.clone(), CheckOptions::default()),
            h.ctx.options,
            CheckerEvent::Run(names(&["a.ai", "b.ai"])),
        )
        .await
        .unwrap();

        assert_eq!(finished.state, CheckerState::Done);
        assert_eq!(finished.outputs.len(), 2);
        assert_eq!(h.stub.sent_verbs(), vec!["domain_check"]);
    }

    #[tokio::test]
    async fn test_empty_list_is_invalid() {
        let h = harness();
        let finished = super::super::run(
            &h.ctx.registry,
            DomainsChecker::new(h.ctx.clone(), CheckOptions::default()),
            h.ctx.options,
            CheckerEvent::Run(Vec::new()),
        )
        .await
        .unwrap();

        assert!(finished.failed());
        assert!(matches!(finished.outputs[0], Output::Error(Error::CommandInvalid(_))));
        assert!(h.stub.sent().is_empty());
    }

    #[tokio::test]
    async fn test_non_supported_zone() {
        let h = harness();
        h.stub
            .reply(check(&[("example.zz", false, Some("Non-supported zone"))]));

        let finished = super::super::run(
            &h.ctx.registry,
            DomainsChecker::new(h.ctx.clone(), CheckOptions::default()),
            h.ctx.options,
            CheckerEvent::Run(names(&["example.zz"])),
        )
        .await
        .unwrap();

        assert!(finished.failed());
        assert!(matches!(
            finished.outputs.last(),
            Some(Output::Error(Error::NonSupportedZone(_)))
        ));
    }

    #[tokio::test]
    async fn test_info_error_is_recorded_per_name() {
        let h = harness();
        h.stub
            .reply(check(&[("a.ai", false, None), ("b.ai", false, None)]))
            .reply(result(2400))
            .reply(domain_info("a.ai", "r1", &[], &[]));

        let finished = super::super::run(
            &h.ctx.registry,
            DomainsChecker::new(h.ctx.clone(), CheckOptions::default()),
            h.ctx.options,
            CheckerEvent::Run(names(&["a.ai", "b.ai"])),
        )
        .await
        .unwrap();

        assert_eq!(finished.state, CheckerState::Done);
        assert_eq!(finished.outputs.len(), 4);
        assert_eq!(finished.outputs[1].as_error().unwrap().code(), 2400);
        assert_eq!(finished.outputs[2].as_response().unwrap().domain_info().unwrap().name, "a.ai");
        let Some(Output::Existence(map)) = finished.outputs.last() else {
            panic!("expected existence map");
        };
        assert!(map["a.ai"].exists());
        assert!(matches!(&map["b.ai"], DomainExistence::Error(err) if err.code() == 2400));
    }

    #[tokio::test]
    async fn test_registrant_mismatch_stops_conversation() {
        let h = harness();
        let mut domain = Domain::new("a.ai", "owner@example.com");
        domain.registrant = Some(contact("owner@example.com", Some("R1")));
        h.store.domain_save(&domain).await.unwrap();

        h.stub
            .reply(check(&[("a.ai", false, None), ("b.ai", false, None)]))
            .reply(domain_info("a.ai", "R2", &[], &[]));

        let options = CheckOptions {
            verify_registrant: true,
            ..CheckOptions::default()
        };
        let finished = super::super::run(
            &h.ctx.registry,
            DomainsChecker::new(h.ctx.clone(), options),
            h.ctx.options,
            CheckerEvent::Run(names(&["b.ai", "a.ai"])),
        )
        .await
        .unwrap();

        assert!(finished.failed());
        assert!(matches!(
            finished.outputs.last(),
            Some(Output::Error(Error::RegistrantAuthFailed(_)))
        ));
        assert_eq!(h.stub.sent_verbs(), vec!["domain_check", "domain_info"]);
    }
}
