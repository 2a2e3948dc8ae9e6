//! Declarative source/sink/transform modules
//!
//! New sources and sinks are added by dropping a YAML descriptor into the
//! module config directory; no code changes. The registry is read-only after
//! load and only reloaded on explicit operator command.

pub mod registry;

pub use registry::{
    CredentialField, ModuleCapabilities, ModuleDescriptor, ModuleInfo, ModuleRegistry,
    ReadinessProbe,
};
