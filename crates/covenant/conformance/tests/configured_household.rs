//! A household wired from a TOML config picks up its audit backend,
//! envelope freshness window and approval rules.

use std::sync::Arc;

use chrono::Duration;
use covenant_audit::{AuditLedger, FileChainStore};
use covenant_conformance::{alice, bob, epoch, Household, CALENDAR_READ};
use covenant_envelope::{ExecutionEnvelope, Violation};
use covenant_loop::{CovenantConfig, LoopStatus, LoopStep, ThresholdRule};
use covenant_types::{ManualClock, RunMode, TraceId};

fn config_for(dir: &std::path::Path) -> CovenantConfig {
    CovenantConfig::from_toml_str(&format!(
        r#"
        [envelope]
        max_age_seconds = 60

        [approvals]
        low = "all"

        [audit]
        backend = "file"
        dir = '{}'
        "#,
        dir.display()
    ))
    .unwrap()
}

#[tokio::test]
async fn household_runs_over_the_configured_backend_and_policies() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    let h = Household::from_config(&config).unwrap();
    assert_eq!(h.orchestrator.approvals().low, ThresholdRule::All);

    let envelope = ExecutionEnvelope::builder(TraceId::new("t-cfg"), alice(), h.intersection.clone())
        .mode(RunMode::Simulate)
        .scope(CALENDAR_READ)
        .issued_at(epoch());
    let validator = h.authority.validator();
    assert!(validator
        .validate_freshness(&envelope, epoch() + Duration::seconds(60))
        .is_ok());
    let err = validator
        .validate_freshness(&envelope, epoch() + Duration::seconds(61))
        .unwrap_err();
    assert!(matches!(
        err.violations()[0],
        Violation::Stale {
            max_age_seconds: 60,
            ..
        }
    ));

    let paused = h.orchestrator.start_loop(h.dinner(RunMode::Simulate)).await.unwrap();
    h.engine.accept(&paused.proposal.unwrap(), &bob()).unwrap();
    let done = h
        .orchestrator
        .resume_loop(&paused.context.loop_id, LoopStep::AuthorityNegotiation)
        .await
        .unwrap();
    assert_eq!(done.status, LoopStatus::Completed);

    let reopened = AuditLedger::new(
        Arc::new(FileChainStore::open(dir.path()).unwrap()),
        Arc::new(ManualClock::new(epoch())),
    );
    for owner in ["alice", "household"] {
        assert!(!reopened.entries(owner).unwrap().is_empty());
        assert!(reopened.verify(owner).unwrap().valid, "{owner}");
    }
}
