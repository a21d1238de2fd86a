//! `initialize` handshake payloads and protocol version selection

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::capability::CapabilityDescriptor;
use crate::errors::ProtocolError;

pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2024-11-05", "2025-03-26", "2025-06-18"];
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

const VERSION_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub name: String,
    pub version: String,
}

/// Identity returned to the client in the handshake response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
    pub instructions: Option<String>,
}

impl ServerIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default, deserialize_with = "peer_capabilities")]
    pub capabilities: CapabilityDescriptor,
    pub client_info: PeerInfo,
}

fn peer_capabilities<'de, D>(deserializer: D) -> Result<CapabilityDescriptor, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(CapabilityDescriptor::from_peer)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: CapabilityDescriptor,
    pub server_info: PeerInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

pub fn parse_initialize_params(params: Option<Value>) -> Result<InitializeParams, ProtocolError> {
    let Some(params) = params else {
        return Err(ProtocolError::InvalidParams(
            "initialize params are required".to_string(),
        ));
    };

    let parsed: InitializeParams = serde_json::from_value(params).map_err(|err| {
        ProtocolError::InvalidParams(format!("malformed initialize params: {err}"))
    })?;

    if parsed.protocol_version.trim().is_empty() {
        return Err(ProtocolError::InvalidParams(
            "initialize params.protocolVersion is required".to_string(),
        ));
    }

    Ok(parsed)
}

pub fn check_protocol_version(requested: &str) -> Result<&'static str, ProtocolError> {
    let requested = requested.trim();
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .copied()
        .find(|version| *version == requested)
        .ok_or_else(|| ProtocolError::UnsupportedProtocolVersion {
            requested: requested.to_string(),
            closest: closest_supported_version(requested),
        })
}

/// Supported version nearest to `requested` by calendar distance. Ties go to
/// the newer version; anything that is not a date maps to the latest.
pub fn closest_supported_version(requested: &str) -> &'static str {
    let Ok(requested_date) = NaiveDate::parse_from_str(requested.trim(), VERSION_DATE_FORMAT)
    else {
        return LATEST_PROTOCOL_VERSION;
    };

    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .copied()
        .filter_map(|version| {
            NaiveDate::parse_from_str(version, VERSION_DATE_FORMAT)
                .ok()
                .map(|date| (version, date))
        })
        .min_by_key(|(_, date)| {
            (
                (*date - requested_date).num_days().abs(),
                std::cmp::Reverse(*date),
            )
        })
        .map(|(version, _)| version)
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_every_supported_version() {
        for version in SUPPORTED_PROTOCOL_VERSIONS {
            assert_eq!(check_protocol_version(version).expect("supported"), version);
        }
    }

    #[test]
    fn rejects_unsupported_version_naming_the_closest() {
        let error = check_protocol_version("2025-04-01").expect_err("unsupported version");
        match error {
            ProtocolError::UnsupportedProtocolVersion { requested, closest } => {
                assert_eq!(requested, "2025-04-01");
                assert_eq!(closest, "2025-03-26");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn closest_version_handles_far_future_and_garbage() {
        assert_eq!(closest_supported_version("2030-01-01"), "2025-06-18");
        assert_eq!(closest_supported_version("2020-01-01"), "2024-11-05");
        assert_eq!(closest_supported_version("v1"), LATEST_PROTOCOL_VERSION);
    }

    #[test]
    fn parses_initialize_params_with_unknown_capabilities() {
        let params = parse_initialize_params(Some(json!({
            "protocolVersion": "2025-06-18",
            "capabilities": { "roots": { "listChanged": true }, "holography": {} },
            "clientInfo": { "name": "test-client", "version": "1.0.0" }
        })))
        .expect("valid params");

        assert_eq!(params.client_info.name, "test-client");
        assert!(params.capabilities.roots_list_changed());
        assert!(params.capabilities.other.contains_key("holography"));
    }

    #[test]
    fn malformed_experimental_fields_do_not_fail_the_handshake() {
        let params = parse_initialize_params(Some(json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {
                "experimental": {
                    "streaming": { "version": 2, "deprecationDate": "next-tuesday" }
                }
            },
            "clientInfo": { "name": "test-client", "version": "1.0.0" }
        })))
        .expect("lenient peer capabilities");

        let streaming = params
            .capabilities
            .experimental_feature("streaming")
            .expect("feature kept");
        assert!(params.capabilities.experimental_enabled("streaming"));
        assert_eq!(streaming.version, None);
        assert_eq!(streaming.extra["version"], json!(2));
        assert_eq!(streaming.deprecation_date, None);
    }

    #[test]
    fn missing_client_info_is_invalid_params() {
        let error = parse_initialize_params(Some(json!({ "protocolVersion": "2025-06-18" })))
            .expect_err("missing clientInfo");
        assert!(matches!(error, ProtocolError::InvalidParams(_)));

        let error = parse_initialize_params(None).expect_err("missing params");
        assert!(matches!(error, ProtocolError::InvalidParams(_)));
    }

    #[test]
    fn initialize_result_omits_absent_instructions() {
        let result = InitializeResult {
            protocol_version: "2025-06-18".to_string(),
            capabilities: CapabilityDescriptor::default(),
            server_info: ServerIdentity::new("server", "0.1.0").info(),
            instructions: None,
        };

        let value = serde_json::to_value(result).expect("serialization");
        assert_eq!(value["serverInfo"]["name"], "server");
        assert!(value.get("instructions").is_none());
        assert_eq!(value["capabilities"], json!({}));
    }
}
