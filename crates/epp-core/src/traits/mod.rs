//! Core traits for the EPP synchronization core
//!
//! This module defines the abstract interfaces to the collaborators the
//! state machines depend on but do not own.
//!
//! - [`RpcTransport`]: Correlated request/reply channel to the registry gateway
//! - [`Persistence`]: Domain, contact and registrant records

pub mod persistence;
pub mod transport;

pub use persistence::Persistence;
pub use transport::{RpcTransport, RpcTransportFactory};
