//! Outbound notification gating
//!
//! Uses the same [`Requirement`] predicates as the inbound guard, so a
//! notification is allowed exactly when the matching capability was declared.
//! A denied notification is dropped, never reported to the peer.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::guard::Requirement;
use super::subscriptions::SubscriptionTable;
use crate::capability::CapabilityDescriptor;

/// Syslog severities used by `logging/setLevel` and `notifications/message`,
/// ordered from least to most severe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    #[default]
    Info = 1,
    Notice = 2,
    Warning = 3,
    Error = 4,
    Critical = 5,
    Alert = 6,
    Emergency = 7,
}

impl LogLevel {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Debug,
            1 => Self::Info,
            2 => Self::Notice,
            3 => Self::Warning,
            4 => Self::Error,
            5 => Self::Critical,
            6 => Self::Alert,
            _ => Self::Emergency,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind<'a> {
    ResourceUpdated { uri: &'a str },
    ResourceListChanged,
    ToolListChanged,
    PromptListChanged,
    LogMessage { level: LogLevel },
}

impl NotificationKind<'_> {
    pub fn method(&self) -> &'static str {
        match self {
            Self::ResourceUpdated { .. } => "notifications/resources/updated",
            Self::ResourceListChanged => "notifications/resources/list_changed",
            Self::ToolListChanged => "notifications/tools/list_changed",
            Self::PromptListChanged => "notifications/prompts/list_changed",
            Self::LogMessage { .. } => "notifications/message",
        }
    }

    pub fn requirement(&self) -> Requirement {
        match self {
            Self::ResourceUpdated { .. } => Requirement::ResourcesSubscribe,
            Self::ResourceListChanged => Requirement::ResourcesListChanged,
            Self::ToolListChanged => Requirement::ToolsListChanged,
            Self::PromptListChanged => Requirement::PromptsListChanged,
            Self::LogMessage { .. } => Requirement::Logging,
        }
    }
}

/// A server-initiated notification together with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerNotification {
    ResourceUpdated {
        uri: String,
    },
    ResourceListChanged,
    ToolListChanged,
    PromptListChanged,
    LogMessage {
        level: LogLevel,
        logger: Option<String>,
        data: Value,
    },
}

impl ServerNotification {
    pub fn log(level: LogLevel, logger: Option<&str>, data: Value) -> Self {
        Self::LogMessage {
            level,
            logger: logger.map(str::to_string),
            data,
        }
    }

    pub fn kind(&self) -> NotificationKind<'_> {
        match self {
            Self::ResourceUpdated { uri } => NotificationKind::ResourceUpdated { uri },
            Self::ResourceListChanged => NotificationKind::ResourceListChanged,
            Self::ToolListChanged => NotificationKind::ToolListChanged,
            Self::PromptListChanged => NotificationKind::PromptListChanged,
            Self::LogMessage { level, .. } => NotificationKind::LogMessage { level: *level },
        }
    }

    pub fn method(&self) -> &'static str {
        self.kind().method()
    }

    pub fn params(&self) -> Option<Value> {
        match self {
            Self::ResourceUpdated { uri } => Some(json!({ "uri": uri })),
            Self::LogMessage {
                level,
                logger,
                data,
            } => {
                let mut params = json!({ "level": level, "data": data });
                if let Some(logger) = logger {
                    params["logger"] = json!(logger);
                }
                Some(params)
            }
            Self::ResourceListChanged | Self::ToolListChanged | Self::PromptListChanged => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct NotificationGate {
    subscriptions: SubscriptionTable,
    denied: AtomicU64,
}

impl NotificationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    /// Number of notifications dropped because the capability was never declared.
    pub fn denied_count(&self) -> u64 {
        self.denied.load(Ordering::Relaxed)
    }

    /// Whether `kind` may be sent. `local` is `None` until the session is negotiated.
    pub fn guard_notify(
        &self,
        kind: &NotificationKind<'_>,
        local: Option<&CapabilityDescriptor>,
        min_level: LogLevel,
    ) -> bool {
        let Some(local) = local else {
            debug!(method = kind.method(), "notification dropped before negotiation");
            return false;
        };

        if !kind.requirement().is_satisfied_by(local) {
            let denied = self.denied.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                method = kind.method(),
                denied_total = denied,
                "notification dropped: capability was not declared by this server"
            );
            return false;
        }

        match kind {
            NotificationKind::ResourceUpdated { uri } => self.subscriptions.has_subscribers(uri),
            NotificationKind::LogMessage { level } => *level >= min_level,
            _ => true,
        }
    }
}
