//! Provisioning steps and their canonical order.
//!
//! Every attempt on an untrusted node walks [`Step::CANONICAL_ORDER`] once
//! and runs the steps whose flag is enabled in [`StepFlags`].

use serde::{Deserialize, Serialize};

/// One remote action in the provisioning sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    /// Take the provisioning lock on the node.
    Lock,
    /// Stop the configuration agent service.
    StopPuppet,
    /// Point the node's controller hostname at the chosen master.
    SetPuppetHostname,
    /// Clean stale certificates on the node and on the master.
    CleanNodeCertname,
    /// Generate and submit a certificate signing request.
    SendNodeCsr,
    /// Sign the pending request on the master.
    SignNodeCsr,
    /// Retrieve the signed certificate on the node.
    GetNodeCert,
    /// Throwaway configuration run.
    CycleRun,
    /// Bootstrap-profile configuration run.
    BootstrapStage,
    /// Full configuration run; blocks until it completes.
    FinalRun,
    /// Start the configuration agent service.
    StartPuppet,
    /// Tag the node with the provisioned marker fact.
    SetRoleProvisioned,
    /// Release the provisioning lock.
    Unlock,
    /// Tell operators the node was provisioned.
    Notify,
}

impl Step {
    /// The only order in which steps ever run.
    pub const CANONICAL_ORDER: [Step; 14] = [
        Step::Lock,
        Step::StopPuppet,
        Step::SetPuppetHostname,
        Step::CleanNodeCertname,
        Step::SendNodeCsr,
        Step::SignNodeCsr,
        Step::GetNodeCert,
        Step::CycleRun,
        Step::BootstrapStage,
        Step::FinalRun,
        Step::StartPuppet,
        Step::SetRoleProvisioned,
        Step::Unlock,
        Step::Notify,
    ];

    /// Configuration key for this step.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::StopPuppet => "stopPuppet",
            Self::SetPuppetHostname => "setPuppetHostname",
            Self::CleanNodeCertname => "cleanNodeCertname",
            Self::SendNodeCsr => "sendNodeCsr",
            Self::SignNodeCsr => "signNodeCsr",
            Self::GetNodeCert => "getNodeCert",
            Self::CycleRun => "cycleRun",
            Self::BootstrapStage => "bootstrapStage",
            Self::FinalRun => "finalRun",
            Self::StartPuppet => "startPuppet",
            Self::SetRoleProvisioned => "setRoleProvisioned",
            Self::Unlock => "unlock",
            Self::Notify => "notify",
        }
    }

    /// Get a human-readable description of the step.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Lock => "Locking node",
            Self::StopPuppet => "Stopping configuration agent",
            Self::SetPuppetHostname => "Setting controller hostname",
            Self::CleanNodeCertname => "Cleaning node certificate",
            Self::SendNodeCsr => "Submitting certificate request",
            Self::SignNodeCsr => "Signing certificate on master",
            Self::GetNodeCert => "Fetching signed certificate",
            Self::CycleRun => "Cycling configuration run",
            Self::BootstrapStage => "Running bootstrap stage",
            Self::FinalRun => "Running final configuration run",
            Self::StartPuppet => "Starting configuration agent",
            Self::SetRoleProvisioned => "Tagging node as provisioned",
            Self::Unlock => "Unlocking node",
            Self::Notify => "Sending notification",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Per-step enable flags. Steps not mentioned in the configuration are off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StepFlags {
    pub lock: bool,
    #[serde(alias = "stop_puppet")]
    pub stop_puppet: bool,
    #[serde(alias = "set_puppet_hostname")]
    pub set_puppet_hostname: bool,
    #[serde(alias = "clean_node_certname")]
    pub clean_node_certname: bool,
    #[serde(alias = "send_node_csr")]
    pub send_node_csr: bool,
    #[serde(alias = "sign_node_csr")]
    pub sign_node_csr: bool,
    #[serde(alias = "get_node_cert")]
    pub get_node_cert: bool,
    #[serde(alias = "cycle_puppet_run")]
    pub cycle_run: bool,
    #[serde(alias = "puppet_bootstrap_stage")]
    pub bootstrap_stage: bool,
    #[serde(alias = "puppet_final_run")]
    pub final_run: bool,
    #[serde(alias = "start_puppet")]
    pub start_puppet: bool,
    #[serde(alias = "set_role_provisioned")]
    pub set_role_provisioned: bool,
    pub unlock: bool,
    pub notify: bool,
}

impl StepFlags {
    /// Flags with every step turned on.
    #[must_use]
    pub fn all() -> Self {
        Self::from_steps(&Step::CANONICAL_ORDER)
    }

    /// Flags with exactly the given steps turned on.
    #[must_use]
    pub fn from_steps(steps: &[Step]) -> Self {
        let mut flags = Self::default();
        for step in steps {
            *flags.flag_mut(*step) = true;
        }
        flags
    }

    /// Whether the step should run.
    #[must_use]
    pub const fn enabled(&self, step: Step) -> bool {
        match step {
            Step::Lock => self.lock,
            Step::StopPuppet => self.stop_puppet,
            Step::SetPuppetHostname => self.set_puppet_hostname,
            Step::CleanNodeCertname => self.clean_node_certname,
            Step::SendNodeCsr => self.send_node_csr,
            Step::SignNodeCsr => self.sign_node_csr,
            Step::GetNodeCert => self.get_node_cert,
            Step::CycleRun => self.cycle_run,
            Step::BootstrapStage => self.bootstrap_stage,
            Step::FinalRun => self.final_run,
            Step::StartPuppet => self.start_puppet,
            Step::SetRoleProvisioned => self.set_role_provisioned,
            Step::Unlock => self.unlock,
            Step::Notify => self.notify,
        }
    }

    /// Enabled steps in canonical order.
    pub fn enabled_steps(&self) -> impl Iterator<Item = Step> + '_ {
        Step::CANONICAL_ORDER
            .into_iter()
            .filter(|step| self.enabled(*step))
    }

    fn flag_mut(&mut self, step: Step) -> &mut bool {
        match step {
            Step::Lock => &mut self.lock,
            Step::StopPuppet => &mut self.stop_puppet,
            Step::SetPuppetHostname => &mut self.set_puppet_hostname,
            Step::CleanNodeCertname => &mut self.clean_node_certname,
            Step::SendNodeCsr => &mut self.send_node_csr,
            Step::SignNodeCsr => &mut self.sign_node_csr,
            Step::GetNodeCert => &mut self.get_node_cert,
            Step::CycleRun => &mut self.cycle_run,
            Step::BootstrapStage => &mut self.bootstrap_stage,
            Step::FinalRun => &mut self.final_run,
            Step::StartPuppet => &mut self.start_puppet,
            Step::SetRoleProvisioned => &mut self.set_role_provisioned,
            Step::Unlock => &mut self.unlock,
            Step::Notify => &mut self.notify,
        }
    }
}
