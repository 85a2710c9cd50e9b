//! DomainResurrector
//!
//! ```text
//! AT_STARTUP ─► VERIFY? ─► RESTORE! ─► REFRESH ─► DONE
//! ```
//!
//! Restores a domain from the redemption grace period (RFC 3915). The
//! domain must be registered and in `pendingDelete`; the restore request
//! carries a report with the deletion time taken from the status text.
//! Outputs of the nested DomainsChecker and DomainRefresher runs are
//! forwarded.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, warn};

use super::domain_refresher::RefresherEvent;
use super::domains_checker::CheckerEvent;
use super::{CheckOptions, Context, DomainRefresher, DomainsChecker, Output, RefreshOptions, failure, run};
use crate::automaton::{StateMachine, Transition, machine_states};
use crate::epp::{DomainInfo, DomainUpdate, Response, RestoreReport, parse_epp_date};
use crate::error::{Error, Result};

const STATEMENTS: [&str; 2] = [
    "This registrar has not restored the Registered Name in order to assume the rights to use or sell the Registered Name for itself or for any third party.",
    "The information in this report is true to best of this registrar's knowledge, and this registrar acknowledges that intentionally supplying false information in this report shall constitute an incurable material breach of the Registry-Registrar Agreement.",
];

machine_states! {
    pub enum ResurrectorState {
        Startup => "AT_STARTUP",
        Verify => "VERIFY?",
        Restore => "RESTORE!",
        Refresh => "REFRESH",
        Done => "DONE",
        Failed => "FAILED",
    }
    terminal: [Done, Failed]
}

#[derive(Debug)]
pub enum ResurrectorEvent {
    /// Restore the domain with this name
    Run(String),
    InfoReply(Response),
    RestoreReply(Response),
    Refreshed,
}

pub struct DomainResurrector {
    ctx: Context,
    name: String,
}

/// When the registry deleted the domain
///
/// The first timestamp found in the status texts wins, `pendingDelete`
/// first, then the last update of the domain.
fn deletion_time(info: &DomainInfo) -> Option<DateTime<Utc>> {
    let texts = info
        .status("pendingDelete")
        .into_iter()
        .chain(info.statuses.iter())
        .filter_map(|status| status.text.as_deref());
    texts
        .flat_map(|text| text.split_whitespace())
        .find_map(parse_epp_date)
        .or(info.update_date)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn registration_data(info: &DomainInfo) -> String {
    format!(
        "Domain: {}\nRegistrant: {}\nSponsor: {}\nExpires: {}",
        info.name,
        info.registrant.as_deref().unwrap_or_default(),
        info.sponsor.as_deref().unwrap_or_default(),
        info.expiry_date.map(timestamp).unwrap_or_default()
    )
}

fn restore_report(info: &DomainInfo, deleted: DateTime<Utc>) -> RestoreReport {
    let data = registration_data(info);
    RestoreReport {
        pre_data: data.clone(),
        post_data: data,
        del_time: timestamp(deleted),
        res_time: timestamp(Utc::now()),
        res_reason: "Registrant requested restore".to_string(),
        statements: STATEMENTS.iter().map(|s| s.to_string()).collect(),
        other: String::new(),
    }
}

impl DomainResurrector {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            name: String::new(),
        }
    }

    async fn verify_registered(&self, outputs: &mut Vec<Output>) -> Result<()> {
        let options = CheckOptions {
            skip_info: true,
            ..CheckOptions::default()
        };
        let finished = run(
            &self.ctx.registry,
            DomainsChecker::new(self.ctx.clone(), options),
            self.ctx.sub_options(),
            CheckerEvent::Run(vec![self.name.clone()]),
        )
        .await?;
        if finished.failed() {
            return Err(failure(&finished));
        }

        let registered = finished.outputs.iter().any(|output| match output {
            Output::Existence(map) => map.get(&self.name).is_some_and(|e| e.exists()),
            _ => false,
        });
        outputs.extend(finished.outputs);
        if !registered {
            return Err(Error::DomainNotExist(self.name.clone()));
        }
        Ok(())
    }

    async fn refresh(&self, outputs: &mut Vec<Output>) -> Result<()> {
        let options = RefreshOptions {
            skip_check: true,
            ..RefreshOptions::default()
        };
        let finished = run(
            &self.ctx.registry,
            DomainRefresher::new(self.ctx.clone(), options),
            self.ctx.sub_options(),
            RefresherEvent::Run(self.name.clone()),
        )
        .await?;
        if finished.failed() {
            return Err(failure(&finished));
        }
        outputs.extend(finished.outputs);
        Ok(())
    }
}

#[async_trait]
impl StateMachine for DomainResurrector {
    type State = ResurrectorState;
    type Event = ResurrectorEvent;
    type Output = Output;

    fn name(&self) -> &'static str {
        "domain_resurrector"
    }

    async fn transition(
        &mut self,
        state: ResurrectorState,
        event: ResurrectorEvent,
        outputs: &mut Vec<Output>,
    ) -> Result<Transition<ResurrectorState, ResurrectorEvent>> {
        match (state, event) {
            (ResurrectorState::Startup, ResurrectorEvent::Run(name)) => {
                self.name = name.to_lowercase();
                self.verify_registered(outputs).await?;
                let reply = self.ctx.client.domain_info(&self.name, None).await?;
                Ok(Transition::then(ResurrectorState::Verify, ResurrectorEvent::InfoReply(reply)))
            }

            (ResurrectorState::Verify, ResurrectorEvent::InfoReply(reply)) => {
                let info = reply.domain_info()?;
                if !info.has_status("pendingDelete") {
                    let statuses: Vec<&str> = info.statuses.iter().map(|s| s.name.as_str()).collect();
                    return Err(Error::InvalidStatus(format!(
                        "{} is not pending delete: {}",
                        self.name,
                        statuses.join(", ")
                    )));
                }
                let deleted = deletion_time(info).unwrap_or_else(|| {
                    warn!("No deletion time reported for {}, using now", self.name);
                    Utc::now()
                });
                let update = DomainUpdate::new(&self.name).with_restore(restore_report(info, deleted));
                outputs.push(reply.into());

                let reply = self.ctx.client.domain_update(update).await?;
                Ok(Transition::then(ResurrectorState::Restore, ResurrectorEvent::RestoreReply(reply)))
            }

            (ResurrectorState::Restore, ResurrectorEvent::RestoreReply(reply)) => {
                info!("Restore of {} accepted: {}", self.name, reply.code);
                outputs.push(reply.into());
                self.refresh(outputs).await?;
                Ok(Transition::then(ResurrectorState::Refresh, ResurrectorEvent::Refreshed))
            }

            (ResurrectorState::Refresh, ResurrectorEvent::Refreshed) => Ok(Transition::to(ResurrectorState::Done)),

            (state, event) => Err(Error::automaton(format!(
                "domain_resurrector cannot handle {:?} in {}",
                event, state
            ))),
        }
    }
}
