//! Capability registry and invoker.
//!
//! The registry reads descriptors from disk; the invoker pairs a resolved
//! descriptor with an implementation from the [`invoker::CapabilityTable`].

pub mod descriptor;
pub mod invoker;
pub mod store;

pub use descriptor::Descriptor;
pub use invoker::{Capability, CapabilityTable, InvokeError, Invoker};
pub use store::{Registry, RegistryError, ValidationResult};
