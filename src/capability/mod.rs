//! Capability model shared by both sides of an MCP session
//!
//! A server accumulates its capabilities in a [`CapabilityRegistry`] and freezes
//! them into an immutable [`CapabilitySet`] when the session is negotiated.

pub mod descriptor;
pub mod registry;

pub use descriptor::{
    Capability, CapabilityDescriptor, CapabilitySet, ExperimentalFeature, ListChangedOptions,
    Marker, ResourcesOptions,
};
pub use registry::{CapabilityRegistry, RegistryError};
