//! The polling loop.
//!
//! Each cycle discovers candidate nodes and provisions them one at a time.
//! A failing node is logged and skipped; a failing cycle is logged, followed
//! by a short pause, and the loop starts over. Nothing here ends the process.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::context::ProvisionContext;
use crate::error::{error_chain, CycleError};
use crate::pipeline::{Outcome, Pipeline};
use crate::remote::NodeDiscovery;

/// Pause before restarting after a failed cycle.
pub const CYCLE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// What happened to each node in one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Nodes that went through the steps.
    pub provisioned: Vec<String>,
    /// Nodes skipped because they already hold a certificate.
    pub already_provisioned: Vec<String>,
    /// Nodes whose attempt failed.
    pub failed: Vec<String>,
}

impl CycleReport {
    /// Number of nodes attempted.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.provisioned.len() + self.already_provisioned.len() + self.failed.len()
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Runs provisioning cycles forever.
pub struct Supervisor {
    ctx: Arc<ProvisionContext>,
    discovery: Arc<dyn NodeDiscovery>,
}

impl Supervisor {
    #[must_use]
    pub fn new(ctx: Arc<ProvisionContext>, discovery: Arc<dyn NodeDiscovery>) -> Self {
        Self { ctx, discovery }
    }

    /// Loop until the process is stopped.
    pub async fn run(&self) -> Infallible {
        info!("Starting runner");

        loop {
            match self.run_cycle().await {
                Ok(report) => {
                    debug!(
                        attempted = report.attempted(),
                        provisioned = report.provisioned.len(),
                        failed = report.failed.len(),
                        "Cycle finished"
                    );
                    tokio::time::sleep(self.ctx.settings.sleep_interval()).await;
                }
                Err(e) => {
                    warn!(kind = e.kind(), error = %e, "Runner failed");
                    debug!("{}", error_chain(&e));
                    tokio::time::sleep(CYCLE_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Run a single discovery and provisioning cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let target = &self.ctx.settings.target;

        info!("Looking for machines to provision");
        let nodes = self
            .discovery
            .find(&target.agent, &target.filter)
            .await
            .map_err(CycleError::Discovery)?;

        let mut report = CycleReport::default();

        for node in nodes {
            let hostname = node.hostname().to_string();

            // Own task per node so a panicking backend only fails that node.
            let ctx = Arc::clone(&self.ctx);
            let attempt =
                tokio::spawn(async move { Pipeline::new(&ctx).provision(node.as_ref()).await });

            match attempt.await {
                Ok(Ok(Outcome::Provisioned { .. })) => report.provisioned.push(hostname),
                Ok(Ok(Outcome::AlreadyProvisioned { .. })) => {
                    report.already_provisioned.push(hostname);
                }
                Err(e) => {
                    warn!(node = %hostname, error = %e, "Provisioning attempt aborted");
                    report.failed.push(hostname);
                }
                Ok(Err(e)) => {
                    warn!(
                        node = %hostname,
                        kind = e.kind(),
                        error = %e,
                        "Could not provision node"
                    );
                    debug!(node = %hostname, "{}", error_chain(&e));
                    report.failed.push(hostname);
                }
            }
        }

        Ok(report)
    }
}
