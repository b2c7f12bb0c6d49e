//! Remote capabilities backed by the `mco` command-line client.
//!
//! Discovery uses `mco find`; every other call is an `mco rpc` invocation
//! against a single identity with JSON output. Node actions go to the
//! provisioning agent, certificate actions to the CA agent on the masters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use super::{MasterDirectory, NodeDiscovery, RemoteError, RemoteMaster, RemoteNode};
use crate::config::McoSettings;
use crate::inventory::{Facts, Inventory};

/// Agent answering inventory requests on every host.
const INVENTORY_AGENT: &str = "rpcutil";

/// One entry of `mco rpc --json` output.
#[derive(Debug, Deserialize)]
struct RpcReply {
    sender: String,
    #[serde(default)]
    statuscode: i64,
    #[serde(default)]
    statusmsg: String,
    #[serde(default)]
    data: Value,
}

/// Runs `mco` commands.
#[derive(Debug, Clone)]
pub struct McoClient {
    settings: McoSettings,
}

impl McoClient {
    #[must_use]
    pub fn new(settings: McoSettings) -> Self {
        Self { settings }
    }

    fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_secs)
    }

    fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.run_timeout_secs)
    }

    /// Arguments for `mco find`.
    fn find_args(&self, agent: &str, filter: &str) -> Vec<String> {
        let mut args = vec!["find".to_string(), "--with-agent".to_string(), agent.to_string()];
        if !filter.trim().is_empty() {
            args.push("--with".to_string());
            args.push(filter.to_string());
        }
        self.push_config(&mut args);
        args
    }

    /// Arguments for a single-identity `mco rpc` call.
    fn rpc_args(
        &self,
        agent: &str,
        action: &str,
        identity: &str,
        params: &[(&str, &str)],
    ) -> Vec<String> {
        let mut args = vec!["rpc".to_string(), agent.to_string(), action.to_string()];
        args.extend(params.iter().map(|(k, v)| format!("{k}={v}")));
        args.extend([
            "-I".to_string(),
            identity.to_string(),
            "-j".to_string(),
        ]);
        self.push_config(&mut args);
        args
    }

    fn push_config(&self, args: &mut Vec<String>) {
        if let Some(config) = &self.settings.config {
            args.push("--config".to_string());
            args.push(config.display().to_string());
        }
    }

    /// Run the binary and return stdout.
    async fn execute(&self, args: &[String], timeout: Duration) -> Result<String, RemoteError> {
        let command_line = format!("{} {}", self.settings.binary, args.join(" "));
        debug!(command = %command_line, "Executing mco command");

        let mut command = Command::new(&self.settings.binary);
        command.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| RemoteError::Timeout(timeout.as_secs()))?
            .map_err(|source| RemoteError::Spawn {
                command: self.settings.binary.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(RemoteError::Command {
                command: command_line,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    /// Identities running `agent` and matching `filter`.
    pub async fn find(&self, agent: &str, filter: &str) -> Result<Vec<String>, RemoteError> {
        let stdout = self
            .execute(&self.find_args(agent, filter), self.action_timeout())
            .await?;
        Ok(parse_identities(&stdout))
    }

    /// Call one action on one identity and return the reply's `data`.
    pub async fn rpc(
        &self,
        agent: &str,
        action: &str,
        identity: &str,
        params: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Value, RemoteError> {
        let stdout = self
            .execute(&self.rpc_args(agent, action, identity, params), timeout)
            .await?;
        parse_reply(identity, action, &stdout)
    }

    /// Inventory facts for one identity.
    pub async fn inventory(&self, identity: &str) -> Result<Inventory, RemoteError> {
        let data = self
            .rpc(INVENTORY_AGENT, "inventory", identity, &[], self.action_timeout())
            .await?;
        Ok(Inventory::new(facts_from_data(&data)?))
    }

    async fn node_action(
        &self,
        identity: &str,
        action: &str,
        params: &[(&str, &str)],
    ) -> Result<Value, RemoteError> {
        self.rpc(
            &self.settings.node_agent,
            action,
            identity,
            params,
            self.action_timeout(),
        )
        .await
    }

    async fn master_action(
        &self,
        master: &str,
        action: &str,
        certname: &str,
    ) -> Result<(), RemoteError> {
        self.rpc(
            &self.settings.master_agent,
            action,
            master,
            &[("certname", certname)],
            self.action_timeout(),
        )
        .await
        .map(drop)
    }
}

/// One line per identity; blank lines ignored.
fn parse_identities(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Pick the reply from `identity` out of `mco rpc --json` output.
fn parse_reply(identity: &str, action: &str, stdout: &str) -> Result<Value, RemoteError> {
    let replies: Vec<RpcReply> = serde_json::from_str(stdout)
        .map_err(|e| RemoteError::Parse(format!("{action} reply from {identity}: {e}")))?;

    let reply = replies
        .into_iter()
        .find(|r| r.sender == identity)
        .ok_or_else(|| RemoteError::NoReply {
            host: identity.to_string(),
            action: action.to_string(),
        })?;

    if reply.statuscode != 0 {
        return Err(RemoteError::Reply {
            host: identity.to_string(),
            action: action.to_string(),
            message: reply.statusmsg,
        });
    }

    Ok(reply.data)
}

/// Flatten the `facts` object of an inventory reply to strings.
fn facts_from_data(data: &Value) -> Result<Facts, RemoteError> {
    let facts = data
        .get("facts")
        .and_then(Value::as_object)
        .ok_or_else(|| RemoteError::Parse("inventory reply has no facts".to_string()))?;

    Ok(facts
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (name.clone(), value)
        })
        .collect())
}

/// A node reached through `mco`.
pub struct McoNode {
    client: Arc<McoClient>,
    identity: String,
}

impl McoNode {
    #[must_use]
    pub fn new(client: Arc<McoClient>, identity: String) -> Self {
        Self { client, identity }
    }

    async fn call(&self, action: &str, params: &[(&str, &str)]) -> Result<(), RemoteError> {
        self.client
            .node_action(&self.identity, action, params)
            .await
            .map(drop)
    }
}

#[async_trait]
impl RemoteNode for McoNode {
    fn hostname(&self) -> &str {
        &self.identity
    }

    async fn inventory(&self) -> Result<Inventory, RemoteError> {
        self.client.inventory(&self.identity).await
    }

    async fn has_cert(&self) -> Result<bool, RemoteError> {
        let data = self.client.node_action(&self.identity, "has_cert", &[]).await?;
        data.get("has_cert")
            .and_then(Value::as_bool)
            .ok_or_else(|| RemoteError::Parse(format!("has_cert reply from {}", self.identity)))
    }

    async fn lock(&self) -> Result<(), RemoteError> {
        self.call("lock_deploy", &[]).await
    }

    async fn unlock(&self) -> Result<(), RemoteError> {
        self.call("unlock_deploy", &[]).await
    }

    async fn stop_service(&self) -> Result<(), RemoteError> {
        self.call("stop_puppet", &[]).await
    }

    async fn start_service(&self) -> Result<(), RemoteError> {
        self.call("start_puppet", &[]).await
    }

    async fn set_controller_host(&self, ip: &str) -> Result<(), RemoteError> {
        self.call("set_puppet_host", &[("ipaddress", ip)]).await
    }

    async fn clean_local_cert(&self) -> Result<(), RemoteError> {
        self.call("clean_cert", &[]).await
    }

    async fn submit_csr(&self) -> Result<(), RemoteError> {
        self.call("request_certificate", &[]).await
    }

    async fn fetch_cert(&self) -> Result<(), RemoteError> {
        self.call("get_cert", &[]).await
    }

    async fn trigger_cycle_run(&self) -> Result<(), RemoteError> {
        self.call("cycle_puppet_run", &[]).await
    }

    async fn trigger_bootstrap_run(&self) -> Result<(), RemoteError> {
        self.call("bootstrap_puppet", &[]).await
    }

    async fn trigger_final_run(&self) -> Result<(), RemoteError> {
        self.client
            .rpc(
                &self.client.settings.node_agent,
                "run_puppet",
                &self.identity,
                &[],
                self.client.run_timeout(),
            )
            .await
            .map(drop)
    }

    async fn tag_fact(&self, name: &str, value: &str) -> Result<(), RemoteError> {
        self.call("fact_mod", &[("fact", name), ("value", value)])
            .await
    }
}

/// A master reached through `mco`.
pub struct McoMaster {
    client: Arc<McoClient>,
    identity: String,
}

impl McoMaster {
    #[must_use]
    pub fn new(client: Arc<McoClient>, identity: String) -> Self {
        Self { client, identity }
    }
}

#[async_trait]
impl RemoteMaster for McoMaster {
    fn hostname(&self) -> &str {
        &self.identity
    }

    async fn inventory(&self) -> Result<Inventory, RemoteError> {
        self.client.inventory(&self.identity).await
    }

    async fn clean_cert(&self, identity: &str) -> Result<(), RemoteError> {
        self.client.master_action(&self.identity, "clean", identity).await
    }

    async fn sign_cert(&self, identity: &str) -> Result<(), RemoteError> {
        self.client.master_action(&self.identity, "sign", identity).await
    }
}

/// Node discovery and master directory over `mco find`.
#[derive(Clone)]
pub struct McoFleet {
    client: Arc<McoClient>,
}

impl McoFleet {
    #[must_use]
    pub fn new(settings: McoSettings) -> Self {
        Self {
            client: Arc::new(McoClient::new(settings)),
        }
    }
}

#[async_trait]
impl NodeDiscovery for McoFleet {
    async fn find(
        &self,
        agent: &str,
        filter: &str,
    ) -> Result<Vec<Arc<dyn RemoteNode>>, RemoteError> {
        let identities = self.client.find(agent, filter).await?;
        debug!(count = identities.len(), "Discovered candidate nodes");

        Ok(identities
            .into_iter()
            .map(|identity| {
                Arc::new(McoNode::new(Arc::clone(&self.client), identity)) as Arc<dyn RemoteNode>
            })
            .collect())
    }
}

#[async_trait]
impl MasterDirectory for McoFleet {
    async fn find_all(&self) -> Result<Vec<Arc<dyn RemoteMaster>>, RemoteError> {
        let settings = &self.client.settings;
        let identities = self
            .client
            .find(&settings.master_agent, &settings.master_filter)
            .await?;

        Ok(identities
            .into_iter()
            .map(|identity| {
                Arc::new(McoMaster::new(Arc::clone(&self.client), identity))
                    as Arc<dyn RemoteMaster>
            })
            .collect())
    }
}
