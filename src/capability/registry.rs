//! Pre-negotiation capability builder
//!
//! The registry is an owned value: once [`CapabilityRegistry::freeze`] consumes it
//! there is nothing left to mutate.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use super::descriptor::{Capability, CapabilityDescriptor, CapabilitySet};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("capabilities are locked once the session is negotiated")]
    RegistrationAfterLock,
    #[error("unknown capability: {0}")]
    UnknownCapability(String),
    #[error("invalid experimental feature name: {0}")]
    InvalidFeatureName(String),
}

#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    pending: CapabilityDescriptor,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`CapabilityRegistry::declare`].
    pub fn with(mut self, capability: Capability) -> Result<Self, RegistryError> {
        self.declare(capability)?;
        Ok(self)
    }

    pub fn declare(&mut self, capability: Capability) -> Result<(), RegistryError> {
        if let Capability::Experimental { name, .. } = &capability {
            if !feature_name_pattern().is_match(name) {
                return Err(RegistryError::InvalidFeatureName(name.clone()));
            }
        }

        self.pending.merge(capability);
        Ok(())
    }

    /// Declares every capability in `descriptor`. Nothing is applied when the
    /// descriptor carries a capability this implementation cannot serve.
    pub fn declare_descriptor(
        &mut self,
        descriptor: CapabilityDescriptor,
    ) -> Result<(), RegistryError> {
        let (capabilities, unknown) = descriptor.into_capabilities();
        if let Some(name) = unknown.into_iter().next() {
            return Err(RegistryError::UnknownCapability(name));
        }

        let mut staged = self.pending.clone();
        for capability in capabilities {
            if let Capability::Experimental { name, .. } = &capability {
                if !feature_name_pattern().is_match(name) {
                    return Err(RegistryError::InvalidFeatureName(name.clone()));
                }
            }
            staged.merge(capability);
        }

        self.pending = staged;
        Ok(())
    }

    pub fn pending(&self) -> &CapabilityDescriptor {
        &self.pending
    }

    pub fn freeze(self, protocol_version: impl Into<String>) -> CapabilitySet {
        CapabilitySet::new(protocol_version, self.pending)
    }
}

// Feature names become the tail of `experimental/{feature}` method names.
fn feature_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("feature name pattern is valid")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{ExperimentalFeature, ResourcesOptions};
    use serde_json::json;

    #[test]
    fn last_declaration_wins_before_freeze() {
        let mut registry = CapabilityRegistry::new();
        registry
            .declare(Capability::resources(false, false))
            .expect("declare");
        registry
            .declare(Capability::Resources(ResourcesOptions {
                subscribe: Some(true),
                list_changed: None,
            }))
            .expect("declare");

        let set = registry.freeze("2025-06-18");
        assert!(set.descriptor().resources_subscribe());
        assert!(!set.descriptor().resources_list_changed());
        assert_eq!(set.protocol_version(), "2025-06-18");
    }

    #[test]
    fn declaration_order_is_insignificant() {
        let forward = CapabilityRegistry::new()
            .with(Capability::tools(true))
            .and_then(|registry| registry.with(Capability::Logging))
            .expect("declare");
        let backward = CapabilityRegistry::new()
            .with(Capability::Logging)
            .and_then(|registry| registry.with(Capability::tools(true)))
            .expect("declare");

        assert_eq!(forward.pending(), backward.pending());
    }

    #[test]
    fn rejects_feature_names_that_cannot_form_a_method() {
        let error = CapabilityRegistry::new()
            .with(Capability::experimental(
                "bad/name",
                ExperimentalFeature::new("1"),
            ))
            .expect_err("slash in feature name");

        assert_eq!(error, RegistryError::InvalidFeatureName("bad/name".to_string()));
    }

    #[test]
    fn declare_descriptor_rejects_unknown_capabilities_atomically() {
        let mut registry = CapabilityRegistry::new();
        let descriptor: CapabilityDescriptor = serde_json::from_value(json!({
            "tools": { "listChanged": true },
            "teleport": {}
        }))
        .expect("descriptor");

        let error = registry
            .declare_descriptor(descriptor)
            .expect_err("unknown capability");
        assert_eq!(error, RegistryError::UnknownCapability("teleport".to_string()));
        assert!(!registry.pending().supports_tools());
    }
}
