//! In-memory fleet used by the integration tests.
//!
//! Every remote action is appended to a shared call log as `host:action`,
//! so tests can assert on the exact order of side effects across nodes and
//! masters.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use notify::NotifyEvent;
use provisioner::{
    EventSink, Facts, Inventory, MasterDirectory, NodeDiscovery, ProvisionContext, RemoteError,
    RemoteMaster, RemoteNode, Settings, StepFlags,
};

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn facts(pairs: &[(&str, &str)]) -> Facts {
    pairs.iter().copied().collect()
}

// =============================================================================
// Nodes
// =============================================================================

pub struct FakeNode {
    hostname: String,
    facts: Facts,
    has_cert: bool,
    fail_on: Option<&'static str>,
    panic_on: Option<&'static str>,
    final_run_delay: Duration,
    final_run_completed: AtomicBool,
    log: CallLog,
}

impl FakeNode {
    /// A cert-less node with `fqdn` and `ipaddress` facts.
    pub fn new(hostname: &str, log: &CallLog) -> Self {
        Self {
            hostname: hostname.to_string(),
            facts: facts(&[("fqdn", hostname), ("ipaddress", "10.0.0.5")]),
            has_cert: false,
            fail_on: None,
            panic_on: None,
            final_run_delay: Duration::ZERO,
            final_run_completed: AtomicBool::new(false),
            log: Arc::clone(log),
        }
    }

    pub fn with_facts(mut self, pairs: &[(&str, &str)]) -> Self {
        self.facts = facts(pairs);
        self
    }

    pub fn with_cert(mut self) -> Self {
        self.has_cert = true;
        self
    }

    pub fn failing_on(mut self, action: &'static str) -> Self {
        self.fail_on = Some(action);
        self
    }

    pub fn panicking_on(mut self, action: &'static str) -> Self {
        self.panic_on = Some(action);
        self
    }

    pub fn with_final_run_delay(mut self, delay: Duration) -> Self {
        self.final_run_delay = delay;
        self
    }

    pub fn final_run_completed(&self) -> bool {
        self.final_run_completed.load(Ordering::SeqCst)
    }

    fn record(&self, action: &str) -> Result<(), RemoteError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{action}", self.hostname));

        let name = action.split('(').next().unwrap_or(action);
        if self.panic_on == Some(name) {
            panic!("{} crashed during {name}", self.hostname);
        }
        if self.fail_on == Some(name) {
            return Err(RemoteError::Reply {
                host: self.hostname.clone(),
                action: name.to_string(),
                message: "simulated failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteNode for FakeNode {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn inventory(&self) -> Result<Inventory, RemoteError> {
        if self.fail_on == Some("inventory") {
            return Err(RemoteError::Timeout(1));
        }
        Ok(Inventory::new(self.facts.clone()))
    }

    async fn has_cert(&self) -> Result<bool, RemoteError> {
        Ok(self.has_cert)
    }

    async fn lock(&self) -> Result<(), RemoteError> {
        self.record("lock")
    }

    async fn unlock(&self) -> Result<(), RemoteError> {
        self.record("unlock")
    }

    async fn stop_service(&self) -> Result<(), RemoteError> {
        self.record("stop_service")
    }

    async fn start_service(&self) -> Result<(), RemoteError> {
        self.record("start_service")
    }

    async fn set_controller_host(&self, ip: &str) -> Result<(), RemoteError> {
        self.record(&format!("set_controller_host({ip})"))
    }

    async fn clean_local_cert(&self) -> Result<(), RemoteError> {
        self.record("clean_local_cert")
    }

    async fn submit_csr(&self) -> Result<(), RemoteError> {
        self.record("submit_csr")
    }

    async fn fetch_cert(&self) -> Result<(), RemoteError> {
        self.record("fetch_cert")
    }

    async fn trigger_cycle_run(&self) -> Result<(), RemoteError> {
        self.record("trigger_cycle_run")
    }

    async fn trigger_bootstrap_run(&self) -> Result<(), RemoteError> {
        self.record("trigger_bootstrap_run")
    }

    async fn trigger_final_run(&self) -> Result<(), RemoteError> {
        self.record("trigger_final_run")?;
        if !self.final_run_delay.is_zero() {
            tokio::time::sleep(self.final_run_delay).await;
        }
        self.final_run_completed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn tag_fact(&self, name: &str, value: &str) -> Result<(), RemoteError> {
        self.record(&format!("tag_fact({name}={value})"))
    }
}

// =============================================================================
// Masters
// =============================================================================

pub struct FakeMaster {
    hostname: String,
    facts: Facts,
    log: CallLog,
}

impl FakeMaster {
    pub fn new(hostname: &str, pairs: &[(&str, &str)], log: &CallLog) -> Self {
        Self {
            hostname: hostname.to_string(),
            facts: facts(pairs),
            log: Arc::clone(log),
        }
    }

    fn record(&self, action: String) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{action}", self.hostname));
    }
}

#[async_trait]
impl RemoteMaster for FakeMaster {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn inventory(&self) -> Result<Inventory, RemoteError> {
        Ok(Inventory::new(self.facts.clone()))
    }

    async fn clean_cert(&self, identity: &str) -> Result<(), RemoteError> {
        self.record(format!("clean_cert({identity})"));
        Ok(())
    }

    async fn sign_cert(&self, identity: &str) -> Result<(), RemoteError> {
        self.record(format!("sign_cert({identity})"));
        Ok(())
    }
}

pub struct FakeDirectory {
    masters: Vec<Arc<dyn RemoteMaster>>,
    fail: bool,
}

impl FakeDirectory {
    pub fn new(masters: Vec<FakeMaster>) -> Self {
        Self {
            masters: masters
                .into_iter()
                .map(|m| Arc::new(m) as Arc<dyn RemoteMaster>)
                .collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            masters: vec![],
            fail: true,
        }
    }
}

#[async_trait]
impl MasterDirectory for FakeDirectory {
    async fn find_all(&self) -> Result<Vec<Arc<dyn RemoteMaster>>, RemoteError> {
        if self.fail {
            return Err(RemoteError::Parse("directory unavailable".to_string()));
        }
        Ok(self.masters.clone())
    }
}

// =============================================================================
// Discovery
// =============================================================================

type Batch = Result<Vec<Arc<dyn RemoteNode>>, ()>;

/// Hands out one scripted batch per call; empty once the script runs out.
pub struct ScriptedDiscovery {
    batches: Mutex<VecDeque<Batch>>,
    calls: AtomicUsize,
}

impl ScriptedDiscovery {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeDiscovery for ScriptedDiscovery {
    async fn find(
        &self,
        _agent: &str,
        _filter: &str,
    ) -> Result<Vec<Arc<dyn RemoteNode>>, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.batches.lock().unwrap().pop_front() {
            Some(Ok(nodes)) => Ok(nodes),
            Some(Err(())) => Err(RemoteError::Command {
                command: "find".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "no response from middleware".to_string(),
            }),
            None => Ok(vec![]),
        }
    }
}

// =============================================================================
// Events
// =============================================================================

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<NotifyEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<NotifyEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: NotifyEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// =============================================================================
// Context
// =============================================================================

pub fn settings(steps: StepFlags) -> Settings {
    let mut settings = Settings::from_yaml("target:\n  agent: provision\n").unwrap();
    settings.steps = steps;
    settings
}

pub fn context(
    settings: Settings,
    directory: FakeDirectory,
) -> (Arc<ProvisionContext>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let ctx = Arc::new(ProvisionContext::new(
        settings,
        Arc::new(directory),
        sink.clone(),
    ));
    (ctx, sink)
}
