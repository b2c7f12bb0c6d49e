//! Capabilities the provisioner consumes from the fleet.
//!
//! The control loop only talks to nodes and masters through these traits.
//! [`mco`] implements them on top of the `mco` command-line client.

pub mod mco;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::inventory::Inventory;

/// Errors raised by remote capability calls.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The command could not be started.
    #[error("Failed to execute {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran but exited unsuccessfully.
    #[error("{command} exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    /// The call did not finish in time.
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// The target answered with a failure.
    #[error("{action} on {host} failed: {message}")]
    Reply {
        host: String,
        action: String,
        message: String,
    },

    /// The target did not answer at all.
    #[error("No reply from {host} for {action}")]
    NoReply { host: String, action: String },

    /// The answer could not be understood.
    #[error("Unexpected response: {0}")]
    Parse(String),
}

/// A machine that can be provisioned.
#[async_trait]
pub trait RemoteNode: Send + Sync {
    /// Identity used to address the node.
    fn hostname(&self) -> &str;

    /// Current inventory facts.
    async fn inventory(&self) -> Result<Inventory, RemoteError>;

    /// Whether the node already holds a signed certificate.
    async fn has_cert(&self) -> Result<bool, RemoteError>;

    /// Acquire the advisory provisioning lock.
    async fn lock(&self) -> Result<(), RemoteError>;

    /// Release the advisory provisioning lock.
    async fn unlock(&self) -> Result<(), RemoteError>;

    /// Stop the configuration agent service.
    async fn stop_service(&self) -> Result<(), RemoteError>;

    /// Start the configuration agent service.
    async fn start_service(&self) -> Result<(), RemoteError>;

    /// Register `ip` as the canonical controller hostname.
    async fn set_controller_host(&self, ip: &str) -> Result<(), RemoteError>;

    /// Remove any local certificate material.
    async fn clean_local_cert(&self) -> Result<(), RemoteError>;

    /// Generate and submit a certificate signing request.
    async fn submit_csr(&self) -> Result<(), RemoteError>;

    /// Retrieve the signed certificate.
    async fn fetch_cert(&self) -> Result<(), RemoteError>;

    /// Trigger a throwaway configuration run.
    async fn trigger_cycle_run(&self) -> Result<(), RemoteError>;

    /// Trigger a bootstrap-profile configuration run.
    async fn trigger_bootstrap_run(&self) -> Result<(), RemoteError>;

    /// Run the full configuration and wait for it to finish.
    async fn trigger_final_run(&self) -> Result<(), RemoteError>;

    /// Set a custom fact on the node.
    async fn tag_fact(&self, name: &str, value: &str) -> Result<(), RemoteError>;
}

/// A configuration-management master.
#[async_trait]
pub trait RemoteMaster: Send + Sync {
    /// Identity used to address the master.
    fn hostname(&self) -> &str;

    /// Current inventory facts.
    async fn inventory(&self) -> Result<Inventory, RemoteError>;

    /// Drop any certificate held for `identity`.
    async fn clean_cert(&self, identity: &str) -> Result<(), RemoteError>;

    /// Sign the pending request for `identity`.
    async fn sign_cert(&self, identity: &str) -> Result<(), RemoteError>;
}

/// Finds nodes waiting to be provisioned.
#[async_trait]
pub trait NodeDiscovery: Send + Sync {
    /// Nodes running `agent` and matching `filter`. Empty when nothing matches.
    async fn find(&self, agent: &str, filter: &str)
        -> Result<Vec<Arc<dyn RemoteNode>>, RemoteError>;
}

/// Lists the masters nodes can be provisioned against.
#[async_trait]
pub trait MasterDirectory: Send + Sync {
    /// Every known master, in a stable enumeration order.
    async fn find_all(&self) -> Result<Vec<Arc<dyn RemoteMaster>>, RemoteError>;
}
