//! Wire representation of MCP capabilities
//!
//! Known capabilities are typed fields; experimental features live in an open
//! map and any other key a peer advertises is retained verbatim in `other`.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

impl ResourcesOptions {
    fn merge(&mut self, other: Self) {
        self.subscribe = other.subscribe.or(self.subscribe);
        self.list_changed = other.list_changed.or(self.list_changed);
    }
}

/// Options for capabilities whose only sub-option is `listChanged`
/// (`tools`, `prompts` and the client-side `roots`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChangedOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

impl ListChangedOptions {
    pub fn list_changed(value: bool) -> Self {
        Self {
            list_changed: Some(value),
        }
    }

    fn merge(&mut self, other: Self) {
        self.list_changed = other.list_changed.or(self.list_changed);
    }
}

/// Presence-only capability such as `logging` or `completions`; serializes as `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentalFeature {
    #[serde(default = "feature_enabled_by_default")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecation_date: Option<NaiveDate>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// A peer listing a feature without `enabled` advertises it.
fn feature_enabled_by_default() -> bool {
    true
}

impl ExperimentalFeature {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            enabled: true,
            version: Some(version.into()),
            description: None,
            deprecation_date: None,
            extra: Map::new(),
        }
    }

    pub fn disabled(version: impl Into<String>) -> Self {
        Self {
            enabled: false,
            ..Self::new(version)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_deprecation_date(mut self, date: NaiveDate) -> Self {
        self.deprecation_date = Some(date);
        self
    }

    pub fn is_deprecated_on(&self, today: NaiveDate) -> bool {
        self.deprecation_date.is_some_and(|date| date <= today)
    }

    /// Reads a feature as advertised by a peer. Fields of the wrong type are
    /// treated as absent; apart from `enabled` they stay in `extra` as sent.
    pub fn from_peer(value: Value) -> Self {
        let mut extra = match value {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        let enabled = extra
            .remove("enabled")
            .and_then(|enabled| enabled.as_bool())
            .unwrap_or(true);
        let version = take_string(&mut extra, "version");
        let description = take_string(&mut extra, "description");
        let deprecation_date = extra
            .get("deprecationDate")
            .and_then(Value::as_str)
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok());
        if deprecation_date.is_some() {
            extra.remove("deprecationDate");
        }

        Self {
            enabled,
            version,
            description,
            deprecation_date,
            extra,
        }
    }
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    if !fields.get(key).is_some_and(Value::is_string) {
        return None;
    }
    match fields.remove(key) {
        Some(Value::String(value)) => Some(value),
        _ => None,
    }
}

/// One capability declaration, as accepted by the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Capability {
    Resources(ResourcesOptions),
    Tools(ListChangedOptions),
    Prompts(ListChangedOptions),
    Logging,
    Completions,
    Roots(ListChangedOptions),
    Sampling,
    Elicitation,
    Experimental {
        name: String,
        feature: ExperimentalFeature,
    },
}

impl Capability {
    pub fn resources(subscribe: bool, list_changed: bool) -> Self {
        Self::Resources(ResourcesOptions {
            subscribe: Some(subscribe),
            list_changed: Some(list_changed),
        })
    }

    pub fn tools(list_changed: bool) -> Self {
        Self::Tools(ListChangedOptions::list_changed(list_changed))
    }

    pub fn prompts(list_changed: bool) -> Self {
        Self::Prompts(ListChangedOptions::list_changed(list_changed))
    }

    pub fn experimental(name: impl Into<String>, feature: ExperimentalFeature) -> Self {
        Self::Experimental {
            name: name.into(),
            feature,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Resources(_) => "resources",
            Self::Tools(_) => "tools",
            Self::Prompts(_) => "prompts",
            Self::Logging => "logging",
            Self::Completions => "completions",
            Self::Roots(_) => "roots",
            Self::Sampling => "sampling",
            Self::Elicitation => "elicitation",
            Self::Experimental { .. } => "experimental",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListChangedOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ListChangedOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Marker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completions: Option<Marker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<ListChangedOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Marker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elicitation: Option<Marker>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub experimental: BTreeMap<String, ExperimentalFeature>,
    /// Capabilities this implementation does not model, kept as sent.
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

impl CapabilityDescriptor {
    /// Reads the capabilities a peer advertised without ever rejecting them.
    ///
    /// Known capabilities keep whichever sub-options are well typed. Anything
    /// that is not an object map yields an empty descriptor.
    pub fn from_peer(value: Value) -> Self {
        let mut descriptor = Self::default();
        let Value::Object(fields) = value else {
            return descriptor;
        };

        for (name, value) in fields {
            if value.is_null() {
                continue;
            }
            match name.as_str() {
                "resources" => {
                    descriptor.resources = Some(ResourcesOptions {
                        subscribe: peer_bool(&value, "subscribe"),
                        list_changed: peer_bool(&value, "listChanged"),
                    })
                }
                "tools" => descriptor.tools = Some(peer_list_changed(&value)),
                "prompts" => descriptor.prompts = Some(peer_list_changed(&value)),
                "roots" => descriptor.roots = Some(peer_list_changed(&value)),
                "logging" => descriptor.logging = Some(Marker {}),
                "completions" => descriptor.completions = Some(Marker {}),
                "sampling" => descriptor.sampling = Some(Marker {}),
                "elicitation" => descriptor.elicitation = Some(Marker {}),
                "experimental" => {
                    if let Value::Object(features) = value {
                        descriptor.experimental = features
                            .into_iter()
                            .map(|(feature_name, feature)| {
                                (feature_name, ExperimentalFeature::from_peer(feature))
                            })
                            .collect();
                    }
                }
                _ => {
                    descriptor.other.insert(name, value);
                }
            }
        }
        descriptor
    }

    /// Shallow merge of a single declaration: sub-options present in
    /// `capability` overwrite, absent ones keep their previous value.
    pub fn merge(&mut self, capability: Capability) {
        match capability {
            Capability::Resources(options) => {
                self.resources.get_or_insert_with(Default::default).merge(options)
            }
            Capability::Tools(options) => {
                self.tools.get_or_insert_with(Default::default).merge(options)
            }
            Capability::Prompts(options) => {
                self.prompts.get_or_insert_with(Default::default).merge(options)
            }
            Capability::Roots(options) => {
                self.roots.get_or_insert_with(Default::default).merge(options)
            }
            Capability::Logging => self.logging = Some(Marker {}),
            Capability::Completions => self.completions = Some(Marker {}),
            Capability::Sampling => self.sampling = Some(Marker {}),
            Capability::Elicitation => self.elicitation = Some(Marker {}),
            Capability::Experimental { name, feature } => {
                self.experimental.insert(name, feature);
            }
        }
    }

    /// Splits the descriptor back into individual declarations. Entries in
    /// `other` have no typed form and are returned by name instead.
    pub fn into_capabilities(self) -> (Vec<Capability>, Vec<String>) {
        let mut capabilities = Vec::new();
        if let Some(options) = self.resources {
            capabilities.push(Capability::Resources(options));
        }
        if let Some(options) = self.tools {
            capabilities.push(Capability::Tools(options));
        }
        if let Some(options) = self.prompts {
            capabilities.push(Capability::Prompts(options));
        }
        if self.logging.is_some() {
            capabilities.push(Capability::Logging);
        }
        if self.completions.is_some() {
            capabilities.push(Capability::Completions);
        }
        if let Some(options) = self.roots {
            capabilities.push(Capability::Roots(options));
        }
        if self.sampling.is_some() {
            capabilities.push(Capability::Sampling);
        }
        if self.elicitation.is_some() {
            capabilities.push(Capability::Elicitation);
        }
        capabilities.extend(
            self.experimental
                .into_iter()
                .map(|(name, feature)| Capability::Experimental { name, feature }),
        );

        (capabilities, self.other.into_keys().collect())
    }

    pub fn supports_resources(&self) -> bool {
        self.resources.is_some()
    }

    pub fn resources_subscribe(&self) -> bool {
        self.resources
            .and_then(|options| options.subscribe)
            .unwrap_or(false)
    }

    pub fn resources_list_changed(&self) -> bool {
        self.resources
            .and_then(|options| options.list_changed)
            .unwrap_or(false)
    }

    pub fn supports_tools(&self) -> bool {
        self.tools.is_some()
    }

    pub fn tools_list_changed(&self) -> bool {
        list_changed(self.tools)
    }

    pub fn supports_prompts(&self) -> bool {
        self.prompts.is_some()
    }

    pub fn prompts_list_changed(&self) -> bool {
        list_changed(self.prompts)
    }

    pub fn supports_logging(&self) -> bool {
        self.logging.is_some()
    }

    pub fn supports_completions(&self) -> bool {
        self.completions.is_some()
    }

    pub fn supports_roots(&self) -> bool {
        self.roots.is_some()
    }

    pub fn roots_list_changed(&self) -> bool {
        list_changed(self.roots)
    }

    pub fn supports_sampling(&self) -> bool {
        self.sampling.is_some()
    }

    pub fn supports_elicitation(&self) -> bool {
        self.elicitation.is_some()
    }

    pub fn experimental_feature(&self, name: &str) -> Option<&ExperimentalFeature> {
        self.experimental.get(name)
    }

    pub fn experimental_enabled(&self, name: &str) -> bool {
        self.experimental_feature(name)
            .is_some_and(|feature| feature.enabled)
    }
}

fn peer_bool(value: &Value, key: &str) -> Option<bool> {
    value.get(key).and_then(Value::as_bool)
}

fn peer_list_changed(value: &Value) -> ListChangedOptions {
    ListChangedOptions {
        list_changed: peer_bool(value, "listChanged"),
    }
}

fn list_changed(options: Option<ListChangedOptions>) -> bool {
    options
        .and_then(|options| options.list_changed)
        .unwrap_or(false)
}

/// The capabilities of one peer, fixed for the lifetime of a negotiated session.
///
/// There is no mutable access to the descriptor once a set is built.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilitySet {
    protocol_version: String,
    descriptor: CapabilityDescriptor,
}

impl CapabilitySet {
    pub fn new(protocol_version: impl Into<String>, descriptor: CapabilityDescriptor) -> Self {
        Self {
            protocol_version: protocol_version.into(),
            descriptor,
        }
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }
}
