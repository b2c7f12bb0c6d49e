//! Errors surfaced by the provisioning control loop.

use thiserror::Error;

use crate::remote::RemoteError;
use crate::steps::Step;

/// Why a single node's provisioning attempt failed.
///
/// These never escape the supervisor's per-node boundary.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// A required address fact was missing. The message stays generic; the
    /// host and fact are kept for debug logging.
    #[error("Node didn't reply in time")]
    AddressResolution { host: String, fact: String },

    /// No master could be chosen.
    #[error("No masters available")]
    Selection,

    /// The master directory could not be queried.
    #[error("Master directory query failed: {0}")]
    Directory(#[source] RemoteError),

    /// Reading the node's or a master's inventory failed.
    #[error("Inventory of {host} unavailable: {source}")]
    Inventory {
        host: String,
        #[source]
        source: RemoteError,
    },

    /// The node's certificate state could not be read.
    #[error("Certificate state of {host} unavailable: {source}")]
    TrustCheck {
        host: String,
        #[source]
        source: RemoteError,
    },

    /// A remote action failed; remaining steps were not run.
    #[error("Step {step} failed on {host}: {source}")]
    RemoteAction {
        step: Step,
        host: String,
        #[source]
        source: RemoteError,
    },
}

impl ProvisionError {
    /// Stable label for log lines.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AddressResolution { .. } => "AddressResolutionError",
            Self::Selection => "SelectionError",
            Self::Directory(_) => "DirectoryError",
            Self::Inventory { .. } | Self::TrustCheck { .. } | Self::RemoteAction { .. } => {
                "RemoteActionError"
            }
        }
    }
}

/// Failure of a whole polling cycle. The supervisor backs off and retries.
#[derive(Error, Debug)]
pub enum CycleError {
    /// Candidate nodes could not be discovered.
    #[error("Node discovery failed: {0}")]
    Discovery(#[source] RemoteError),
}

impl CycleError {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "CycleError",
        }
    }
}

/// Render an error and its sources, outermost first.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str("\n\tcaused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
