// # epp-core
//
// Registry synchronization core of a registrar back-office: keeps local
// domain and contact records and the registry's copy in step over EPP.
//
// ## Architecture Overview
//
// - **RpcTransport**: Correlated request/reply channel to the registry gateway
// - **EppClient**: Command codec, reply decoding, fault signal and single retry
// - **Automaton**: Runtime driving one state machine per registry conversation
// - **machines**: The protocol conversations (synchronize, refresh, check, ...)
// - **Master**: Façade that runs a conversation and reduces it to a result
// - **Persistence**: Injected domain/contact/registrant storage
//
// ## Design Principles
//
// 1. **Leaf-first layering**: transport, codec, runtime, machines, façade
// 2. **Typed replies**: the codec decodes every verb's payload once
// 3. **Plugin-based transports**: bindings register by name, never hard-coded
// 4. **Explicit failure**: every conversation ends in `DONE` or `FAILED`

pub mod automaton;
pub mod config;
pub mod epp;
pub mod error;
pub mod machines;
pub mod master;
pub mod model;
pub mod registry;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use automaton::{Automaton, AutomatonRegistry, Finished, StateChange};
pub use config::{AutomatonConfig, EppConfig, HealthConfig, RegistrarConfig, RetryConfig, TransportConfig};
pub use epp::{Command, EppClient, HealthSignal, Response, ResponseData};
pub use error::{Error, ErrorKind, Result, ResultCode};
pub use machines::{DomainExistence, Output};
pub use master::{DomainLocks, DomainsCheck, Master, MasterEvent, RetryPolicy};
pub use model::{Contact, ContactKind, ContactRole, Domain, DomainContacts, DomainStatus};
pub use registry::TransportRegistry;
pub use store::MemoryStore;
pub use traits::{Persistence, RpcTransport, RpcTransportFactory};
