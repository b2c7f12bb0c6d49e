//! Provisioning pipeline tests against an in-memory fleet.

mod support;

use std::time::Duration;

use notify::NotifyEvent;
use provisioner::{Outcome, Pipeline, ProvisionError, Step, StepFlags};

use support::{call_log, calls, context, settings, CallLog, FakeDirectory, FakeMaster, FakeNode};

fn single_master(log: &CallLog) -> FakeDirectory {
    FakeDirectory::new(vec![FakeMaster::new("m1", &[("ipaddress", "10.0.0.1")], log)])
}

/// Log lines a step produces for node `n1` against master `m1`.
fn expected_calls(step: Step) -> Vec<&'static str> {
    match step {
        Step::Lock => vec!["n1:lock"],
        Step::StopPuppet => vec!["n1:stop_service"],
        Step::SetPuppetHostname => vec!["n1:set_controller_host(10.0.0.1)"],
        Step::CleanNodeCertname => vec!["n1:clean_local_cert", "m1:clean_cert(n1)"],
        Step::SendNodeCsr => vec!["n1:submit_csr"],
        Step::SignNodeCsr => vec!["m1:sign_cert(n1)"],
        Step::GetNodeCert => vec!["n1:fetch_cert"],
        Step::CycleRun => vec!["n1:trigger_cycle_run"],
        Step::BootstrapStage => vec!["n1:trigger_bootstrap_run"],
        Step::FinalRun => vec!["n1:trigger_final_run"],
        Step::StartPuppet => vec!["n1:start_service"],
        Step::SetRoleProvisioned => vec!["n1:tag_fact(provision-status=provisioned)"],
        Step::Unlock => vec!["n1:unlock"],
        Step::Notify => vec![],
    }
}

#[tokio::test]
async fn test_example_scenario_runs_only_enabled_steps() {
    let log = call_log();
    let steps = StepFlags::from_steps(&[
        Step::Lock,
        Step::SendNodeCsr,
        Step::SignNodeCsr,
        Step::GetNodeCert,
        Step::FinalRun,
    ]);
    let (ctx, sink) = context(settings(steps), single_master(&log));
    let node = FakeNode::new("n1", &log);

    let outcome = Pipeline::new(&ctx).provision(&node).await.unwrap();

    assert_eq!(
        calls(&log),
        vec![
            "n1:lock",
            "n1:submit_csr",
            "m1:sign_cert(n1)",
            "n1:fetch_cert",
            "n1:trigger_final_run"
        ]
    );
    assert_eq!(
        outcome,
        Outcome::Provisioned {
            master: "m1".to_string(),
            steps: vec![
                Step::Lock,
                Step::SendNodeCsr,
                Step::SignNodeCsr,
                Step::GetNodeCert,
                Step::FinalRun
            ],
        }
    );
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_every_flag_combination_follows_canonical_order() {
    let all = Step::CANONICAL_ORDER;

    for mask in 0u32..(1 << all.len()) {
        let enabled: Vec<Step> = all
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, step)| *step)
            .collect();

        let log = call_log();
        let (ctx, sink) = context(
            settings(StepFlags::from_steps(&enabled)),
            single_master(&log),
        );
        let node = FakeNode::new("n1", &log);

        let outcome = Pipeline::new(&ctx).provision(&node).await.unwrap();

        let expected: Vec<&str> = enabled.iter().flat_map(|s| expected_calls(*s)).collect();
        assert_eq!(calls(&log), expected, "flags: {enabled:?}");
        assert_eq!(
            outcome,
            Outcome::Provisioned {
                master: "m1".to_string(),
                steps: enabled.clone(),
            }
        );
        assert_eq!(
            sink.events().len(),
            usize::from(enabled.contains(&Step::Notify)),
            "flags: {enabled:?}"
        );
    }
}

#[tokio::test]
async fn test_node_with_cert_is_skipped() {
    let log = call_log();
    let (ctx, sink) = context(settings(StepFlags::all()), single_master(&log));
    let node = FakeNode::new("n1", &log).with_cert();

    let outcome = Pipeline::new(&ctx).provision(&node).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::AlreadyProvisioned {
            master: "m1".to_string()
        }
    );
    assert!(calls(&log).is_empty());
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_skipped_node_notifies_only_under_policy() {
    let log = call_log();
    let mut settings = settings(StepFlags::all());
    settings.policy.notify_already_provisioned = true;
    let (ctx, sink) = context(settings, single_master(&log));
    let node = FakeNode::new("n1", &log).with_cert();

    Pipeline::new(&ctx).provision(&node).await.unwrap();

    assert!(calls(&log).is_empty());
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        NotifyEvent::NodeAlreadyProvisioned { node, master, .. } if node == "n1" && master == "m1"
    ));
}

#[tokio::test]
async fn test_notification_names_node_and_master() {
    let log = call_log();
    let (ctx, sink) = context(
        settings(StepFlags::from_steps(&[Step::Notify])),
        single_master(&log),
    );
    let node = FakeNode::new("n1", &log);

    Pipeline::new(&ctx).provision(&node).await.unwrap();

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].title(), "New Node");
    assert_eq!(events[0].message(), "Provisioned n1 against m1");
}

#[tokio::test]
async fn test_missing_node_address_runs_nothing() {
    let log = call_log();
    let (ctx, sink) = context(settings(StepFlags::all()), single_master(&log));
    let node = FakeNode::new("n1", &log).with_facts(&[("fqdn", "n1")]);

    let err = Pipeline::new(&ctx).provision(&node).await.unwrap_err();

    assert!(matches!(
        &err,
        ProvisionError::AddressResolution { host, fact } if host == "n1" && fact == "ipaddress"
    ));
    assert_eq!(err.to_string(), "Node didn't reply in time");
    assert!(calls(&log).is_empty());
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_custom_address_fact_is_used() {
    let log = call_log();
    let mut settings = settings(StepFlags::from_steps(&[Step::SetPuppetHostname]));
    settings.target.ipaddress_fact = "ipaddress_eth1".to_string();
    settings.master.ipaddress_fact = "ipaddress_eth0".to_string();
    let directory = FakeDirectory::new(vec![FakeMaster::new(
        "m1",
        &[("ipaddress", "10.0.0.1"), ("ipaddress_eth0", "192.168.1.1")],
        &log,
    )]);
    let (ctx, _sink) = context(settings, directory);

    // Node only has the default fact, so resolution fails.
    let node = FakeNode::new("n1", &log);
    assert!(matches!(
        Pipeline::new(&ctx).provision(&node).await,
        Err(ProvisionError::AddressResolution { .. })
    ));

    let node = FakeNode::new("n2", &log).with_facts(&[("ipaddress_eth1", "10.1.0.5")]);
    Pipeline::new(&ctx).provision(&node).await.unwrap();
    assert_eq!(calls(&log), vec!["n2:set_controller_host(192.168.1.1)"]);
}

#[tokio::test]
async fn test_missing_master_address_runs_nothing() {
    let log = call_log();
    let directory = FakeDirectory::new(vec![FakeMaster::new("m1", &[("datacenter", "ams1")], &log)]);
    let (ctx, _sink) = context(settings(StepFlags::all()), directory);
    let node = FakeNode::new("n1", &log);

    let err = Pipeline::new(&ctx).provision(&node).await.unwrap_err();

    assert!(matches!(
        &err,
        ProvisionError::AddressResolution { host, .. } if host == "m1"
    ));
    assert!(calls(&log).is_empty());
}

#[tokio::test]
async fn test_empty_directory_is_selection_error() {
    let log = call_log();
    let (ctx, _sink) = context(settings(StepFlags::all()), FakeDirectory::new(vec![]));
    let node = FakeNode::new("n1", &log);

    let err = Pipeline::new(&ctx).provision(&node).await.unwrap_err();

    assert!(matches!(err, ProvisionError::Selection));
    assert_eq!(err.to_string(), "No masters available");
    assert!(calls(&log).is_empty());
}

#[tokio::test]
async fn test_directory_failure_aborts_attempt() {
    let log = call_log();
    let (ctx, _sink) = context(settings(StepFlags::all()), FakeDirectory::failing());
    let node = FakeNode::new("n1", &log);

    let err = Pipeline::new(&ctx).provision(&node).await.unwrap_err();

    assert!(matches!(err, ProvisionError::Directory(_)));
    assert_eq!(err.kind(), "DirectoryError");
    assert!(calls(&log).is_empty());
}

#[tokio::test]
async fn test_criteria_pick_master_and_its_address() {
    let log = call_log();
    let mut settings = settings(StepFlags::from_steps(&[
        Step::SetPuppetHostname,
        Step::SignNodeCsr,
    ]));
    settings.master.criteria = vec!["datacenter".to_string()];
    let directory = FakeDirectory::new(vec![
        FakeMaster::new("m1", &[("ipaddress", "10.0.0.1"), ("datacenter", "fra1")], &log),
        FakeMaster::new("m2", &[("ipaddress", "10.0.0.2"), ("datacenter", "ams1")], &log),
    ]);
    let (ctx, _sink) = context(settings, directory);
    let node = FakeNode::new("n1", &log).with_facts(&[
        ("fqdn", "n1.example.net"),
        ("ipaddress", "10.0.0.5"),
        ("datacenter", "ams1"),
    ]);

    let outcome = Pipeline::new(&ctx).provision(&node).await.unwrap();

    assert_eq!(outcome.master(), "m2");
    assert_eq!(
        calls(&log),
        vec![
            "n1:set_controller_host(10.0.0.2)",
            "m2:sign_cert(n1.example.net)"
        ]
    );
}

#[tokio::test]
async fn test_identity_falls_back_to_hostname() {
    let log = call_log();
    let (ctx, _sink) = context(
        settings(StepFlags::from_steps(&[Step::SignNodeCsr])),
        single_master(&log),
    );
    let node = FakeNode::new("n1", &log).with_facts(&[("ipaddress", "10.0.0.5")]);

    Pipeline::new(&ctx).provision(&node).await.unwrap();

    assert_eq!(calls(&log), vec!["m1:sign_cert(n1)"]);
}

#[tokio::test]
async fn test_failure_aborts_remaining_steps_and_keeps_lock() {
    let log = call_log();
    let (ctx, sink) = context(settings(StepFlags::all()), single_master(&log));
    let node = FakeNode::new("n1", &log).failing_on("submit_csr");

    let err = Pipeline::new(&ctx).provision(&node).await.unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::RemoteAction {
            step: Step::SendNodeCsr,
            ..
        }
    ));
    assert_eq!(
        calls(&log),
        vec![
            "n1:lock",
            "n1:stop_service",
            "n1:set_controller_host(10.0.0.1)",
            "n1:clean_local_cert",
            "m1:clean_cert(n1)",
            "n1:submit_csr"
        ]
    );
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_unlock_on_failure_policy_releases_lock() {
    let log = call_log();
    let mut settings = settings(StepFlags::from_steps(&[
        Step::Lock,
        Step::StopPuppet,
        Step::Unlock,
    ]));
    settings.policy.unlock_on_failure = true;
    let (ctx, _sink) = context(settings, single_master(&log));
    let node = FakeNode::new("n1", &log).failing_on("stop_service");

    let err = Pipeline::new(&ctx).provision(&node).await.unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::RemoteAction {
            step: Step::StopPuppet,
            ..
        }
    ));
    assert_eq!(
        calls(&log),
        vec!["n1:lock", "n1:stop_service", "n1:unlock"]
    );
}

#[tokio::test]
async fn test_unlock_on_failure_skips_when_lock_failed() {
    let log = call_log();
    let mut settings = settings(StepFlags::from_steps(&[Step::Lock, Step::Unlock]));
    settings.policy.unlock_on_failure = true;
    let (ctx, _sink) = context(settings, single_master(&log));
    let node = FakeNode::new("n1", &log).failing_on("lock");

    Pipeline::new(&ctx).provision(&node).await.unwrap_err();

    assert_eq!(calls(&log), vec!["n1:lock"]);
}

#[tokio::test(start_paused = true)]
async fn test_final_run_blocks_until_complete() {
    let log = call_log();
    let (ctx, _sink) = context(
        settings(StepFlags::from_steps(&[Step::FinalRun, Step::StartPuppet])),
        single_master(&log),
    );
    let node = FakeNode::new("n1", &log).with_final_run_delay(Duration::from_secs(300));

    let started = tokio::time::Instant::now();
    Pipeline::new(&ctx).provision(&node).await.unwrap();

    assert!(node.final_run_completed());
    assert!(started.elapsed() >= Duration::from_secs(300));
    assert_eq!(
        calls(&log),
        vec!["n1:trigger_final_run", "n1:start_service"]
    );
}

#[tokio::test]
async fn test_node_inventory_failure_is_reported() {
    let log = call_log();
    let (ctx, _sink) = context(settings(StepFlags::all()), single_master(&log));
    let node = FakeNode::new("n1", &log).failing_on("inventory");

    let err = Pipeline::new(&ctx).provision(&node).await.unwrap_err();

    assert!(matches!(err, ProvisionError::Inventory { ref host, .. } if host == "n1"));
    assert!(calls(&log).is_empty());
}
