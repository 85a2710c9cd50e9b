// # Persistence Implementations
//
// This module provides implementations of the Persistence trait that ship
// with the core.

pub mod memory;

pub use memory::MemoryStore;
