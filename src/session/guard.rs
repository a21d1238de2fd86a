//! Method authorization against negotiated capabilities
//!
//! The requirement table is a compile-time constant. Lookups are a linear scan
//! over a handful of entries and never allocate unless the call is rejected.

use crate::capability::CapabilityDescriptor;
use crate::errors::ProtocolError;

pub const EXPERIMENTAL_PREFIX: &str = "experimental/";

/// A predicate over a capability descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Resources,
    ResourcesSubscribe,
    ResourcesListChanged,
    Tools,
    ToolsListChanged,
    Prompts,
    PromptsListChanged,
    Logging,
    Completions,
    Roots,
    RootsListChanged,
    Sampling,
    Elicitation,
}

impl Requirement {
    pub fn is_satisfied_by(self, descriptor: &CapabilityDescriptor) -> bool {
        match self {
            Self::Resources => descriptor.supports_resources(),
            Self::ResourcesSubscribe => descriptor.resources_subscribe(),
            Self::ResourcesListChanged => descriptor.resources_list_changed(),
            Self::Tools => descriptor.supports_tools(),
            Self::ToolsListChanged => descriptor.tools_list_changed(),
            Self::Prompts => descriptor.supports_prompts(),
            Self::PromptsListChanged => descriptor.prompts_list_changed(),
            Self::Logging => descriptor.supports_logging(),
            Self::Completions => descriptor.supports_completions(),
            Self::Roots => descriptor.supports_roots(),
            Self::RootsListChanged => descriptor.roots_list_changed(),
            Self::Sampling => descriptor.supports_sampling(),
            Self::Elicitation => descriptor.supports_elicitation(),
        }
    }
}

/// Whose capabilities a method is checked against: the side that must
/// implement it, never the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// This server; methods the client calls on us.
    Local,
    /// The connected client; methods we call on it.
    Remote,
}

/// Which way a message travels relative to this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by the client to us.
    Inbound,
    /// Sent by us to the client.
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodRequirement {
    pub method: &'static str,
    pub requirement: Requirement,
    pub side: Side,
    pub direction: Direction,
}

const fn local(method: &'static str, requirement: Requirement) -> MethodRequirement {
    MethodRequirement {
        method,
        requirement,
        side: Side::Local,
        direction: Direction::Inbound,
    }
}

const fn remote(method: &'static str, requirement: Requirement) -> MethodRequirement {
    MethodRequirement {
        method,
        requirement,
        side: Side::Remote,
        direction: Direction::Outbound,
    }
}

// The client announcing a change to a capability it declared itself.
const fn remote_notification(method: &'static str, requirement: Requirement) -> MethodRequirement {
    MethodRequirement {
        method,
        requirement,
        side: Side::Remote,
        direction: Direction::Inbound,
    }
}

pub const METHOD_REQUIREMENTS: &[MethodRequirement] = &[
    local("resources/list", Requirement::Resources),
    local("resources/templates/list", Requirement::Resources),
    local("resources/read", Requirement::Resources),
    local("resources/subscribe", Requirement::ResourcesSubscribe),
    local("resources/unsubscribe", Requirement::ResourcesSubscribe),
    local("tools/list", Requirement::Tools),
    local("tools/call", Requirement::Tools),
    local("prompts/list", Requirement::Prompts),
    local("prompts/get", Requirement::Prompts),
    local("logging/setLevel", Requirement::Logging),
    local("completion/complete", Requirement::Completions),
    remote("roots/list", Requirement::Roots),
    remote_notification("notifications/roots/list_changed", Requirement::RootsListChanged),
    remote("sampling/createMessage", Requirement::Sampling),
    remote("elicitation/create", Requirement::Elicitation),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodGate<'a> {
    /// No entry and no experimental prefix: authorized unconditionally.
    Free,
    Required(&'static MethodRequirement),
    /// `experimental/{feature}`, resolved against the receiving side's experimental map.
    Experimental(&'a str),
}

pub fn lookup(method: &str) -> MethodGate<'_> {
    if let Some(entry) = METHOD_REQUIREMENTS
        .iter()
        .find(|entry| entry.method == method)
    {
        return MethodGate::Required(entry);
    }

    match method.strip_prefix(EXPERIMENTAL_PREFIX) {
        Some(feature) => MethodGate::Experimental(feature),
        None => MethodGate::Free,
    }
}

/// Authorizes `method` travelling in `direction`, given this side's
/// capabilities and, once negotiated, the peer's.
///
/// A method sent the wrong way is never supported: a client cannot ask us to
/// sample and we cannot call the client's tools. Without a peer set, remote
/// requirements are left undecided and pass.
pub fn authorize(
    method: &str,
    direction: Direction,
    local: &CapabilityDescriptor,
    remote: Option<&CapabilityDescriptor>,
) -> Result<(), ProtocolError> {
    let allowed = match lookup(method) {
        MethodGate::Free => true,
        MethodGate::Required(entry) if entry.direction != direction => false,
        MethodGate::Required(entry) => match entry.side {
            Side::Local => entry.requirement.is_satisfied_by(local),
            Side::Remote => {
                remote.map_or(true, |remote| entry.requirement.is_satisfied_by(remote))
            }
        },
        MethodGate::Experimental(feature) => match direction {
            Direction::Inbound => local.experimental_enabled(feature),
            Direction::Outbound => {
                remote.map_or(true, |remote| remote.experimental_enabled(feature))
            }
        },
    };

    if allowed {
        Ok(())
    } else {
        Err(ProtocolError::capability_not_supported(method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{
        Capability, CapabilityRegistry, ExperimentalFeature, ListChangedOptions,
    };

    fn descriptor(capabilities: Vec<Capability>) -> CapabilityDescriptor {
        let mut registry = CapabilityRegistry::new();
        for capability in capabilities {
            registry.declare(capability).expect("declare");
        }
        registry.pending().clone()
    }

    fn assert_not_supported(result: Result<(), ProtocolError>, expected_method: &str) {
        match result {
            Err(ProtocolError::CapabilityNotSupported { method }) => {
                assert_eq!(method, expected_method)
            }
            other => panic!("expected CapabilityNotSupported, got {other:?}"),
        }
    }

    #[test]
    fn methods_without_requirements_are_free() {
        let empty = CapabilityDescriptor::default();
        for method in ["initialize", "ping", "notifications/initialized", "custom/thing"] {
            assert!(authorize(method, Direction::Inbound, &empty, None).is_ok(), "{method}");
            assert!(authorize(method, Direction::Outbound, &empty, Some(&empty)).is_ok());
        }
    }

    #[test]
    fn undeclared_capabilities_reject_every_gated_method() {
        let empty = CapabilityDescriptor::default();
        for entry in METHOD_REQUIREMENTS {
            assert_not_supported(
                authorize(entry.method, entry.direction, &empty, Some(&empty)),
                entry.method,
            );
        }
    }

    #[test]
    fn subscribe_follows_the_subscribe_flag() {
        let off = descriptor(vec![Capability::resources(false, true)]);
        assert!(authorize("resources/list", Direction::Inbound, &off, None).is_ok());
        assert_not_supported(
            authorize("resources/subscribe", Direction::Inbound, &off, None),
            "resources/subscribe",
        );

        let on = descriptor(vec![Capability::resources(true, false)]);
        assert!(authorize("resources/subscribe", Direction::Inbound, &on, None).is_ok());
        assert!(authorize("resources/unsubscribe", Direction::Inbound, &on, None).is_ok());
    }

    #[test]
    fn logging_set_level_requires_logging() {
        let tools_only = descriptor(vec![Capability::tools(true)]);
        assert!(authorize("tools/call", Direction::Inbound, &tools_only, None).is_ok());
        assert_not_supported(
            authorize("logging/setLevel", Direction::Inbound, &tools_only, None),
            "logging/setLevel",
        );
    }

    #[test]
    fn remote_methods_check_the_peer_not_ourselves() {
        let server = descriptor(vec![Capability::Sampling, Capability::tools(false)]);
        let client = descriptor(vec![Capability::Roots(Default::default())]);

        assert!(authorize("roots/list", Direction::Outbound, &server, Some(&client)).is_ok());
        assert_not_supported(
            authorize("sampling/createMessage", Direction::Outbound, &server, Some(&client)),
            "sampling/createMessage",
        );
        assert!(authorize("roots/list", Direction::Outbound, &server, None).is_ok());
    }

    #[test]
    fn methods_sent_the_wrong_way_are_not_supported() {
        let server = descriptor(vec![Capability::tools(false)]);
        let client = descriptor(vec![Capability::Sampling, Capability::tools(false)]);

        assert_not_supported(
            authorize("sampling/createMessage", Direction::Inbound, &server, Some(&client)),
            "sampling/createMessage",
        );
        assert_not_supported(
            authorize("tools/call", Direction::Outbound, &server, Some(&client)),
            "tools/call",
        );
    }

    #[test]
    fn roots_list_changed_is_checked_against_the_client() {
        let server = CapabilityDescriptor::default();
        let client = descriptor(vec![Capability::Roots(ListChangedOptions::list_changed(true))]);

        assert!(authorize(
            "notifications/roots/list_changed",
            Direction::Inbound,
            &server,
            Some(&client)
        )
        .is_ok());
        assert_not_supported(
            authorize(
                "notifications/roots/list_changed",
                Direction::Inbound,
                &server,
                Some(&server),
            ),
            "notifications/roots/list_changed",
        );
    }

    #[test]
    fn experimental_methods_resolve_the_feature_name() {
        let local = descriptor(vec![
            Capability::experimental("streaming", ExperimentalFeature::new("0.1")),
            Capability::experimental("batching", ExperimentalFeature::disabled("0.1")),
        ]);
        let peer = CapabilityDescriptor::default();

        assert!(authorize("experimental/streaming", Direction::Inbound, &local, None).is_ok());
        assert_not_supported(
            authorize("experimental/batching", Direction::Inbound, &local, None),
            "experimental/batching",
        );
        assert_not_supported(
            authorize("experimental/unknown", Direction::Inbound, &local, None),
            "experimental/unknown",
        );
        assert_not_supported(
            authorize("experimental/streaming", Direction::Outbound, &local, Some(&peer)),
            "experimental/streaming",
        );
    }

    #[test]
    fn lookup_prefers_exact_entries() {
        assert!(matches!(
            lookup("tools/call"),
            MethodGate::Required(entry) if entry.requirement == Requirement::Tools
        ));
        assert_eq!(lookup("experimental/x"), MethodGate::Experimental("x"));
        assert_eq!(lookup("ping"), MethodGate::Free);
    }
}
