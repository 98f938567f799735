//! End-to-end lifecycle scenarios against the in-memory adapter: apply,
//! idempotent re-apply, content changes, validation failures, and LKG
//! corruption recovery (the scenarios walked through in the project's own
//! design notes on reconciliation and fail-open startup).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use portcullis::adapter::InMemoryAdapter;
use portcullis::config::{DaemonConfig, Layout};
use portcullis::lifecycle::DaemonState;
use portcullis::policy::{Action, Direction, EndpointFilter, Policy, Protocol, Rule};

struct TestContext {
    state: DaemonState,
    _dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.ensure_dirs().unwrap();
        let state = DaemonState::new(
            DaemonConfig::default(),
            layout,
            Arc::new(InMemoryAdapter::new()),
        );
        Self { state, _dir: dir }
    }
}

fn policy(version: &str, rule_ids: &[&str]) -> Policy {
    Policy {
        version: version.to_string(),
        default_action: Action::Allow,
        updated_at: Utc::now(),
        rules: rule_ids
            .iter()
            .map(|id| Rule {
                id: id.to_string(),
                direction: Direction::Outbound,
                protocol: Protocol::Tcp,
                action: Action::Allow,
                remote: EndpointFilter {
                    network: "10.0.0.0/8".to_string(),
                    ports: vec![],
                },
                local: None,
                process_path: None,
                priority: 0,
                enabled: true,
                comment: None,
            })
            .collect(),
    }
}

#[tokio::test]
async fn apply_then_reapply_identical_policy_is_a_no_op() {
    let ctx = TestContext::new();
    let p = policy("1.0.0", &["r1", "r2"]);

    let first = ctx
        .state
        .apply(p.clone(), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(first.filters_created, 2);

    let second = ctx.state.apply(p, Duration::from_secs(1)).await.unwrap();
    assert_eq!(second.filters_created, 0);
    assert_eq!(second.filters_removed, 0);
}

#[tokio::test]
async fn changing_rule_content_replaces_the_compiled_filter() {
    let ctx = TestContext::new();
    ctx.state
        .apply(policy("1.0.0", &["r1"]), Duration::from_secs(1))
        .await
        .unwrap();

    let mut changed = policy("2.0.0", &["r1"]);
    changed.rules[0].remote.network = "192.168.0.0/16".to_string();

    let outcome = ctx
        .state
        .apply(changed, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(outcome.filters_created, 1);
    assert_eq!(outcome.filters_removed, 1);
}

#[tokio::test]
async fn invalid_policy_is_rejected_and_does_not_change_current_policy() {
    let ctx = TestContext::new();
    ctx.state
        .apply(policy("1.0.0", &["r1"]), Duration::from_secs(1))
        .await
        .unwrap();

    let mut bad = policy("2.0.0", &["r1"]);
    bad.rules[0].remote.network = "not-a-cidr".to_string();

    let result = ctx.state.apply(bad, Duration::from_secs(1)).await;
    assert!(result.is_err());
    assert_eq!(ctx.state.current_policy().unwrap().version, "1.0.0");
}

#[tokio::test]
async fn rollback_restores_prior_policy_after_a_bad_apply_is_rejected() {
    let ctx = TestContext::new();
    ctx.state
        .apply(policy("1.0.0", &["r1"]), Duration::from_secs(1))
        .await
        .unwrap();
    ctx.state
        .apply(policy("2.0.0", &["r1", "r2"]), Duration::from_secs(1))
        .await
        .unwrap();

    ctx.state.rollback(Duration::from_secs(1)).await.unwrap();
    assert_eq!(ctx.state.current_policy().unwrap().version, "1.0.0");
}

#[tokio::test]
async fn startup_with_corrupt_lkg_fails_open_with_no_filters() {
    let dir = tempfile::tempdir().unwrap();
    let layout = Layout::new(dir.path());
    layout.ensure_dirs().unwrap();
    std::fs::write(layout.lkg_path(), b"{ not json").unwrap();

    let state = DaemonState::new(
        DaemonConfig::default(),
        layout,
        Arc::new(InMemoryAdapter::new()),
    );
    let report = state.startup();
    assert!(!report.installed_from_lkg);
    assert!(report.reason.is_some());
    assert!(state.current_policy().is_none());
}

#[tokio::test]
async fn teardown_is_never_implicit_on_drop() {
    let ctx = TestContext::new();
    ctx.state
        .apply(policy("1.0.0", &["r1"]), Duration::from_secs(1))
        .await
        .unwrap();
    let version_before = ctx.state.current_policy().unwrap().version;
    drop(ctx);
    assert_eq!(version_before, "1.0.0");
}
