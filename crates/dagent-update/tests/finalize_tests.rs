//! Finalization gate tests
//!
//! `finalize` consumes the armed deadline exactly once:
//! - in time: the old container is force-removed and the session cleared
//! - expired: the old container is kept and the session cleared
//! - unarmed: nothing happens
//! - failures keep the deadline armed for the caller
//! - a confirmation racing a re-trigger is deferred, not dropped

use dagent_test_utils::{agent_scenario, Op, RuntimeCall, Scenario, SCENARIO_START};
use dagent_update::prelude::*;
use dagent_update::{ImageId, OutstandingUpdatePolicy, RuntimeError, UpdateStep};
use pretty_assertions::assert_eq;
use tracing_subscriber::EnvFilter;

/// Route handover logs to the test output; `RUST_LOG=debug` shows them
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn updater(scenario: &Scenario) -> SelfUpdater {
    updater_with(scenario, UpdateConfig::new())
}

fn updater_with(scenario: &Scenario, config: UpdateConfig) -> SelfUpdater {
    SelfUpdater::with_clock(
        scenario.runtime.clone(),
        scenario.identity.clone(),
        config,
        scenario.clock.clone(),
    )
    .unwrap()
}

/// Full handover: `agent` on v1 updates to v2, confirmation arrives in time.
#[tokio::test]
async fn handover_scenario_end_to_end() {
    init_tracing();
    let scenario = agent_scenario();
    let updater = updater(&scenario);

    updater.self_update("v2", 300).await.unwrap();
    assert!(scenario.runtime.container_named("agent-update").is_some());

    scenario.clock.advance(120);
    let outcome = updater.finalize().await.unwrap();

    assert_eq!(
        outcome,
        FinalizeOutcome::Removed {
            container_id: scenario.own_id.clone()
        }
    );
    assert!(scenario.runtime.container_named("agent-update").is_none());
    let survivor = scenario.runtime.container_named("agent").unwrap();
    assert_eq!(survivor.image_id, ImageId::from("sha256:v2"));
    assert!(survivor.running);
    assert_eq!(scenario.runtime.containers().len(), 1);
    assert_eq!(updater.status(), UpdateStatus::Idle);
}

#[tokio::test]
async fn removal_is_forced() {
    let scenario = agent_scenario();
    let updater = updater(&scenario);
    updater.self_update("v2", 300).await.unwrap();

    updater.finalize().await.unwrap();

    assert_eq!(
        scenario.runtime.calls_of(Op::Remove),
        vec![RuntimeCall::Remove {
            id: scenario.own_id.clone(),
            force: true
        }]
    );
}

#[tokio::test]
async fn finalize_at_deadline_still_removes() {
    let scenario = agent_scenario();
    let updater = updater(&scenario);
    updater.self_update("v2", 300).await.unwrap();

    scenario.clock.advance(300);
    let outcome = updater.finalize().await.unwrap();
    assert!(matches!(outcome, FinalizeOutcome::Removed { .. }));
}

#[tokio::test]
async fn expired_deadline_abandons_and_keeps_old_container() {
    init_tracing();
    let scenario = agent_scenario();
    let updater = updater(&scenario);
    updater.self_update("v2", 300).await.unwrap();
    scenario.runtime.clear_calls();

    scenario.clock.advance(301);
    let outcome = updater.finalize().await.unwrap();

    assert_eq!(
        outcome,
        FinalizeOutcome::Abandoned {
            deadline: SCENARIO_START + 300
        }
    );
    assert!(scenario.runtime.calls().is_empty());
    let old = scenario.runtime.container(&scenario.own_id).unwrap();
    assert!(old.running);
    assert_eq!(updater.status(), UpdateStatus::Idle);

    // cleared: a second call has nothing to do
    assert_eq!(updater.finalize().await.unwrap(), FinalizeOutcome::Noop);
}

#[tokio::test]
async fn unarmed_finalize_is_pure_noop() {
    let scenario = agent_scenario();
    let updater = updater(&scenario);

    assert_eq!(updater.finalize().await.unwrap(), FinalizeOutcome::Noop);
    assert!(scenario.runtime.calls().is_empty());
    assert_eq!(scenario.runtime.containers().len(), 1);
}

#[tokio::test]
async fn finalize_after_failed_update_is_noop() {
    let scenario = agent_scenario();
    let updater = updater(&scenario);
    assert!(updater.self_update("v9", 300).await.is_err());
    scenario.runtime.clear_calls();

    assert_eq!(updater.finalize().await.unwrap(), FinalizeOutcome::Noop);
    assert!(scenario.runtime.calls().is_empty());
}

#[tokio::test]
async fn missing_own_id_keeps_deadline() {
    let scenario = agent_scenario();
    let updater = updater(&scenario);
    updater.self_update("v2", 300).await.unwrap();
    scenario.identity.forget_id();

    let err = updater.finalize().await.unwrap_err();

    assert!(matches!(err, UpdateError::OwnIdUnavailable));
    assert_eq!(err.to_string(), "unable to get own container ID");
    assert_eq!(updater.deadline(), Some(SCENARIO_START + 300));
    assert!(scenario.runtime.calls_of(Op::Remove).is_empty());
}

#[tokio::test]
async fn removal_failure_propagates_and_keeps_deadline() {
    let scenario = agent_scenario();
    let updater = updater(&scenario);
    updater.self_update("v2", 300).await.unwrap();
    scenario.runtime.fail_call(
        Op::Remove,
        1,
        RuntimeError::Request("device busy".to_string()),
    );

    let err = updater.finalize().await.unwrap_err();
    assert!(matches!(
        err,
        UpdateError::Step {
            step: UpdateStep::Remove,
            ..
        }
    ));
    assert_eq!(
        updater.status(),
        UpdateStatus::Armed {
            deadline: SCENARIO_START + 300,
            expired: false
        }
    );

    // the caller may retry while the deadline holds
    let outcome = updater.finalize().await.unwrap();
    assert!(matches!(outcome, FinalizeOutcome::Removed { .. }));
}

#[tokio::test]
async fn new_update_allowed_after_finalize() {
    let scenario = agent_scenario();
    let updater = updater(&scenario);
    updater.self_update("v2", 300).await.unwrap();
    scenario.clock.advance(301);
    updater.finalize().await.unwrap();

    // old container survived the abandoned handover and may try again
    scenario.runtime.publish_image("registry/agent:v3", "sha256:v3");
    let report = updater.self_update("v3", 300).await.unwrap();
    assert_eq!(report.deadline, SCENARIO_START + 301 + 300);
}

#[tokio::test]
async fn confirmation_during_retrigger_is_deferred() {
    let scenario = agent_scenario();
    scenario.runtime.publish_image("registry/agent:v3", "sha256:v3");
    let updater = updater_with(
        &scenario,
        UpdateConfig::new().with_outstanding_policy(OutstandingUpdatePolicy::RejectExpired),
    );
    updater.self_update("v2", 300).await.unwrap();
    let gate = scenario.runtime.gate(Op::Create);

    let retrigger = updater.self_update("v3", 300);
    let confirm = async {
        gate.entered().await;
        let pending = updater.deadline();
        let deferred = updater.finalize().await;
        gate.release();
        (pending, deferred)
    };
    let (retrigger, (pending, deferred)) = tokio::join!(retrigger, confirm);

    assert!(retrigger.is_ok());
    assert_eq!(pending, Some(SCENARIO_START + 300));
    let err = deferred.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        UpdateError::FinalizeDeferred { deadline } if deadline == SCENARIO_START + 300
    ));
    assert!(scenario.runtime.calls_of(Op::Remove).is_empty());

    // retried once the re-trigger has returned
    let outcome = updater.finalize().await.unwrap();
    assert_eq!(
        outcome,
        FinalizeOutcome::Removed {
            container_id: scenario.own_id.clone()
        }
    );
}
