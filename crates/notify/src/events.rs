//! Notification event types for provisioning runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity levels for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - normal operations
    Info,
    /// Warning - something needs attention
    Warning,
}

impl Severity {
    /// Get the Slack attachment color for this severity.
    #[must_use]
    pub const fn color(&self) -> &'static str {
        match self {
            Self::Info => "#3498db",    // Blue
            Self::Warning => "#f39c12", // Orange
        }
    }

    /// Get display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
        }
    }
}

/// Events that can trigger notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifyEvent {
    /// A node went through the provisioning steps against a master.
    NodeProvisioned {
        node: String,
        master: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// A discovered node already had a signed certificate and was skipped.
    NodeAlreadyProvisioned {
        node: String,
        master: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

impl NotifyEvent {
    /// Build a [`NotifyEvent::NodeProvisioned`] stamped with the current time.
    #[must_use]
    pub fn node_provisioned(node: impl Into<String>, master: impl Into<String>) -> Self {
        Self::NodeProvisioned {
            node: node.into(),
            master: master.into(),
            timestamp: Utc::now(),
        }
    }

    /// Build a [`NotifyEvent::NodeAlreadyProvisioned`] stamped with the current time.
    #[must_use]
    pub fn node_already_provisioned(node: impl Into<String>, master: impl Into<String>) -> Self {
        Self::NodeAlreadyProvisioned {
            node: node.into(),
            master: master.into(),
            timestamp: Utc::now(),
        }
    }

    /// Short subject line for this event.
    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Self::NodeProvisioned { .. } => "New Node".to_string(),
            Self::NodeAlreadyProvisioned { .. } => "Node Already Provisioned".to_string(),
        }
    }

    /// Human-readable message body.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::NodeProvisioned { node, master, .. } => {
                format!("Provisioned {node} against {master}")
            }
            Self::NodeAlreadyProvisioned { node, master, .. } => {
                format!("{node} already has a certificate, skipped (master {master})")
            }
        }
    }

    /// Get the severity for this event.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::NodeProvisioned { .. } => Severity::Info,
            Self::NodeAlreadyProvisioned { .. } => Severity::Warning,
        }
    }

    /// Node hostname the event is about.
    #[must_use]
    pub fn node(&self) -> &str {
        match self {
            Self::NodeProvisioned { node, .. } | Self::NodeAlreadyProvisioned { node, .. } => node,
        }
    }

    /// Master the node was matched against.
    #[must_use]
    pub fn master(&self) -> &str {
        match self {
            Self::NodeProvisioned { master, .. }
            | Self::NodeAlreadyProvisioned { master, .. } => master,
        }
    }

    /// Get the timestamp for this event.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::NodeProvisioned { timestamp, .. }
            | Self::NodeAlreadyProvisioned { timestamp, .. } => *timestamp,
        }
    }
}
