//! Per-node provisioning pipeline.
//!
//! An attempt resolves the node's address, picks a master, and reads the
//! node's certificate state exactly once. A node that already holds a
//! certificate is left alone. Otherwise every enabled step runs in
//! [`Step::CANONICAL_ORDER`]; the first failure aborts the attempt.
//!
//! A lock taken before a failure stays held unless
//! `policy.unlockOnFailure` is set.

use notify::NotifyEvent;
use tracing::{debug, info, warn};

use crate::context::ProvisionContext;
use crate::error::ProvisionError;
use crate::inventory::Facts;
use crate::remote::{RemoteError, RemoteNode};
use crate::selector::{select_master, MasterCandidate};
use crate::steps::Step;

/// Fact set on the node by the `setRoleProvisioned` step.
pub const PROVISION_STATUS_FACT: &str = "provision-status";

/// Value of [`PROVISION_STATUS_FACT`] once provisioning has finished.
pub const PROVISIONED: &str = "provisioned";

/// Fact used as the certificate subject.
const IDENTITY_FACT: &str = "fqdn";

/// Result of a successful attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The node already had a certificate; nothing ran.
    AlreadyProvisioned { master: String },
    /// The enabled steps ran, in order.
    Provisioned { master: String, steps: Vec<Step> },
}

impl Outcome {
    /// Master the node was matched against.
    #[must_use]
    pub fn master(&self) -> &str {
        match self {
            Self::AlreadyProvisioned { master } | Self::Provisioned { master, .. } => master,
        }
    }
}

/// Everything the steps need to know about the chosen master.
struct Target<'a> {
    candidate: &'a MasterCandidate,
    master_ip: &'a str,
    identity: &'a str,
}

/// Drives one node through the provisioning steps.
pub struct Pipeline<'a> {
    ctx: &'a ProvisionContext,
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new(ctx: &'a ProvisionContext) -> Self {
        Self { ctx }
    }

    /// Provision one node.
    pub async fn provision(&self, node: &dyn RemoteNode) -> Result<Outcome, ProvisionError> {
        let settings = &self.ctx.settings;
        let hostname = node.hostname();

        let node_inventory = node
            .inventory()
            .await
            .map_err(|source| ProvisionError::Inventory {
                host: hostname.to_string(),
                source,
            })?;
        let node_facts = &node_inventory.facts;
        let node_ip = resolve_address(hostname, node_facts, &settings.target.ipaddress_fact)?;

        let candidates = self.master_candidates().await?;
        let chosen = select_master(&settings.master.criteria, node_facts, &candidates)?;
        let master_ip = resolve_address(
            chosen.hostname(),
            chosen.facts(),
            &settings.master.ipaddress_fact,
        )?;
        let master = chosen.hostname().to_string();

        info!(node = %hostname, "Potential provisioning");

        let has_cert = node
            .has_cert()
            .await
            .map_err(|source| ProvisionError::TrustCheck {
                host: hostname.to_string(),
                source,
            })?;

        if has_cert {
            info!(node = %hostname, "Node is already provisioned");
            if settings.steps.notify && settings.policy.notify_already_provisioned {
                self.ctx
                    .events
                    .publish(NotifyEvent::node_already_provisioned(hostname, &master));
            }
            return Ok(Outcome::AlreadyProvisioned { master });
        }

        let identity = node_facts.get(IDENTITY_FACT).unwrap_or(hostname);
        let target = Target {
            candidate: chosen,
            master_ip,
            identity,
        };

        let planned: Vec<&str> = settings.steps.enabled_steps().map(|s| s.name()).collect();
        info!(
            node = %hostname,
            ip = %node_ip,
            steps = %planned.join(" "),
            "Provisioning node"
        );
        info!(
            node = %hostname,
            master = %master,
            master_ip = %master_ip,
            "Provisioning node against master"
        );

        let mut executed = Vec::new();
        for step in settings.steps.enabled_steps() {
            debug!(node = %hostname, step = %step, "{}", step.description());

            if let Err(source) = self.run_step(step, node, &target).await {
                if settings.policy.unlock_on_failure
                    && executed.contains(&Step::Lock)
                    && !executed.contains(&Step::Unlock)
                {
                    release_lock(node).await;
                }
                return Err(ProvisionError::RemoteAction {
                    step,
                    host: hostname.to_string(),
                    source,
                });
            }
            executed.push(step);
        }

        info!(node = %hostname, "Node provisioned");
        Ok(Outcome::Provisioned {
            master,
            steps: executed,
        })
    }

    /// Fetch the master directory and each master's inventory.
    async fn master_candidates(&self) -> Result<Vec<MasterCandidate>, ProvisionError> {
        let masters = self
            .ctx
            .masters
            .find_all()
            .await
            .map_err(ProvisionError::Directory)?;

        let mut candidates = Vec::with_capacity(masters.len());
        for master in masters {
            let inventory = master
                .inventory()
                .await
                .map_err(|source| ProvisionError::Inventory {
                    host: master.hostname().to_string(),
                    source,
                })?;
            candidates.push(MasterCandidate::new(master, inventory));
        }
        Ok(candidates)
    }

    async fn run_step(
        &self,
        step: Step,
        node: &dyn RemoteNode,
        target: &Target<'_>,
    ) -> Result<(), RemoteError> {
        let master = &target.candidate.master;

        match step {
            Step::Lock => node.lock().await,
            Step::StopPuppet => node.stop_service().await,
            Step::SetPuppetHostname => node.set_controller_host(target.master_ip).await,
            Step::CleanNodeCertname => {
                node.clean_local_cert().await?;
                master.clean_cert(target.identity).await
            }
            Step::SendNodeCsr => node.submit_csr().await,
            Step::SignNodeCsr => master.sign_cert(target.identity).await,
            Step::GetNodeCert => node.fetch_cert().await,
            Step::CycleRun => node.trigger_cycle_run().await,
            Step::BootstrapStage => node.trigger_bootstrap_run().await,
            Step::FinalRun => node.trigger_final_run().await,
            Step::StartPuppet => node.start_service().await,
            Step::SetRoleProvisioned => node.tag_fact(PROVISION_STATUS_FACT, PROVISIONED).await,
            Step::Unlock => node.unlock().await,
            Step::Notify => {
                self.ctx.events.publish(NotifyEvent::node_provisioned(
                    node.hostname(),
                    target.candidate.hostname(),
                ));
                Ok(())
            }
        }
    }
}

/// Read the configured address fact or fail the attempt.
fn resolve_address<'f>(
    host: &str,
    facts: &'f Facts,
    fact: &str,
) -> Result<&'f str, ProvisionError> {
    facts.get(fact).ok_or_else(|| {
        debug!(host = %host, fact = %fact, "Could not determine ip address from fact");
        ProvisionError::AddressResolution {
            host: host.to_string(),
            fact: fact.to_string(),
        }
    })
}

async fn release_lock(node: &dyn RemoteNode) {
    match node.unlock().await {
        Ok(()) => info!(node = %node.hostname(), "Released provisioning lock after failure"),
        Err(e) => warn!(
            node = %node.hostname(),
            error = %e,
            "Could not release provisioning lock after failure"
        ),
    }
}
