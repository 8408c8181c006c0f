//! Alice and Bob agree on a dinner event and carry it through a full loop.

use covenant_conformance::{alice, bob, Household, CALENDAR_WRITE};
use covenant_envelope::{ApprovalEvidence, ExecutionEnvelope, Violation};
use covenant_loop::{LoopStatus, LoopStep};
use covenant_types::{RunMode, Scope};

const BEFORE_SETTLEMENT: [&str; 5] = [
    "intent",
    "intersection_discovery",
    "authority_negotiation",
    "commitment",
    "action",
];

#[tokio::test]
async fn negotiated_commitment_executes_once_with_bobs_approval() {
    let h = Household::new().unwrap();

    let paused = h.orchestrator.start_loop(h.dinner(RunMode::Execute)).await.unwrap();
    let id = paused.context.loop_id;
    assert!(matches!(
        paused.status,
        LoopStatus::Paused {
            step: LoopStep::AuthorityNegotiation,
            ..
        }
    ));

    h.engine.accept(&paused.proposal.unwrap(), &bob()).unwrap();
    let waiting = h
        .orchestrator
        .resume_loop(&id, LoopStep::AuthorityNegotiation)
        .await
        .unwrap();

    let commitment = waiting.commitment.clone().unwrap();
    assert_eq!(commitment.parties.len(), 2);
    let plan = waiting.action.clone().unwrap();
    assert_eq!(plan.policy.threshold(), 1);
    assert!(plan.policy.required_approvers().contains(&bob()));
    assert!(matches!(
        waiting.status,
        LoopStatus::Paused {
            step: LoopStep::Action,
            ..
        }
    ));

    let artifact = h.bob_approves(&waiting).unwrap();
    let validator = h.authority.validator();
    let write_scope = Scope::new(CALENDAR_WRITE);
    let envelope = |mode| {
        ExecutionEnvelope::builder(waiting.context.trace_id.clone(), alice(), h.intersection.clone())
            .mode(mode)
            .contract_version(commitment.contract_version)
            .scope(CALENDAR_WRITE)
            .approval(ApprovalEvidence::approved(artifact.reference()))
            .issued_at(waiting.updated_at)
    };
    validator
        .validate_for_write(&envelope(RunMode::Execute), &write_scope)
        .unwrap();
    let err = validator
        .validate_for_write(&envelope(RunMode::Simulate), &write_scope)
        .unwrap_err();
    assert!(err
        .violations()
        .contains(&Violation::ModeNotExecute(RunMode::Simulate)));

    h.orchestrator.submit_approval(&id, artifact).unwrap();
    let done = h.orchestrator.resume_loop(&id, LoopStep::Action).await.unwrap();
    assert_eq!(done.status, LoopStatus::Completed);
    assert_eq!(h.executor.executed().len(), 1);
    assert_eq!(h.settlement.receipts().len(), 1);
    assert_eq!(h.memory.history(&alice()).unwrap().len(), 1);
    assert_eq!(h.memory.history(&bob()).unwrap().len(), 1);

    let entries = h.ledger.entries(alice().as_str()).unwrap();
    let completed: Vec<&str> = entries
        .iter()
        .filter(|e| e.event_type == "loop.step.completed")
        .map(|e| e.details["step"].as_str())
        .collect();
    assert_eq!(&completed[..5], &BEFORE_SETTLEMENT);
    assert_eq!(&completed[5..], &["settlement", "memory_update"]);

    let settlement_started = entries
        .iter()
        .position(|e| e.event_type == "loop.step.started" && e.details["step"] == "settlement")
        .unwrap();
    let last_action = entries
        .iter()
        .rposition(|e| e.event_type == "loop.step.completed" && e.details["step"] == "action")
        .unwrap();
    assert!(last_action < settlement_started);

    let trace = done.context.trace_id.clone();
    assert!(entries
        .iter()
        .filter(|e| e.event_type.starts_with("loop."))
        .all(|e| e.trace_id.as_ref() == Some(&trace)));
    assert!(h.ledger.verify(alice().as_str()).unwrap().valid);
}

#[tokio::test]
async fn simulate_loop_authorizes_reads_and_executes_nothing() {
    let h = Household::new().unwrap();

    let paused = h.orchestrator.start_loop(h.dinner(RunMode::Simulate)).await.unwrap();
    h.engine.accept(&paused.proposal.unwrap(), &bob()).unwrap();
    let done = h
        .orchestrator
        .resume_loop(&paused.context.loop_id, LoopStep::AuthorityNegotiation)
        .await
        .unwrap();

    assert_eq!(done.status, LoopStatus::Completed);
    assert!(h.executor.executed().is_empty());
    assert_eq!(done.grant.unwrap().mode, RunMode::Simulate);
    assert!(done.outcome.unwrap().summary.starts_with("simulate:"));

    let events = h.events("alice").unwrap();
    assert!(events.contains(&"authority.granted".to_string()));
    assert_eq!(events.last().map(String::as_str), Some("loop.completed"));
}
