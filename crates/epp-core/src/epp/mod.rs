// # EPP Layer
//
// Command payloads, reply decoding and the request/retry client that the
// state machines talk to. The transport itself is pluggable through
// [`RpcTransport`](crate::traits::RpcTransport).

pub mod client;
pub mod command;
pub mod health;
pub mod ids;
pub mod response;

pub use client::EppClient;
pub use command::{Command, ContactData, ContactRef, DomainCreate, DomainUpdate, RestoreReport, Verb};
pub use health::HealthSignal;
pub use ids::{generate_auth_info, make_epp_id};
pub use response::{
    CheckItem, ContactInfo, DomainInfo, EppStatus, PollMessage, Response, ResponseData,
    parse_epp_date,
};
