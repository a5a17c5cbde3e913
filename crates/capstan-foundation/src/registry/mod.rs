//! Service registry: client protocol and the in-memory backend.

pub mod client;
pub mod memory;

pub use client::{
    Registration, RegistryClient, RegistryEvent, RegistryEventStream, SERVICES_PREFIX,
};
pub use memory::MemoryRegistry;
