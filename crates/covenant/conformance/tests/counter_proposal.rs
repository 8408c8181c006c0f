//! Bob counters Alice's proposal; only the counter can be finalized.

use chrono::Duration;
use covenant_conformance::{alice, bob, dinner_action, Household};
use covenant_negotiation::{
    CommitmentTerms, Finalized, NegotiationError, ProposalState, ProposalTerms,
};
use covenant_types::{Clock, ErrorKind};

fn dinner_at(h: &Household, starts_at: &str) -> ProposalTerms {
    ProposalTerms::Commitment(CommitmentTerms {
        action: dinner_action().with_parameter("starts_at", starts_at),
        expires_at: h.clock.now() + Duration::days(1),
    })
}

#[test]
fn countered_proposal_cannot_be_finalized_but_its_counter_can() {
    let h = Household::new().unwrap();

    let p1 = h
        .engine
        .submit_proposal(&alice(), &h.intersection, dinner_at(&h, "2026-05-02T19:00:00Z"))
        .unwrap();
    let p2 = h
        .engine
        .counter_proposal(&p1.id, &bob(), dinner_at(&h, "2026-05-02T20:00:00Z"))
        .unwrap();
    assert_eq!(p2.parent, Some(p1.id));

    let p1 = h.engine.proposal(&p1.id).unwrap();
    assert_eq!(p1.state, ProposalState::Countered);
    assert_eq!(p1.active_counter, Some(p2.id));

    let err = h.engine.finalize(&p1.id, &alice()).unwrap_err();
    assert!(matches!(err, NegotiationError::InvalidTransition { .. }));
    assert_eq!(err.kind(), ErrorKind::StateViolation);

    h.engine.accept(&p2.id, &alice()).unwrap();
    let accepted = h.engine.accept(&p2.id, &bob()).unwrap();
    assert_eq!(accepted.state, ProposalState::Accepted);

    let Finalized::Committed(commitment) = h.engine.finalize(&p2.id, &alice()).unwrap() else {
        panic!("a commitment proposal finalizes into a commitment");
    };
    assert_eq!(commitment.proposal_id, p2.id);
    assert_eq!(commitment.action.parameters["starts_at"], "2026-05-02T20:00:00Z");
    assert_eq!(h.engine.commitment(&commitment.id).unwrap(), Some(commitment));

    let lineage: Vec<_> = h
        .engine
        .lineage(&p2.id)
        .unwrap()
        .into_iter()
        .map(|p| (p.id, p.state))
        .collect();
    assert_eq!(
        lineage,
        vec![
            (p1.id, ProposalState::Superseded),
            (p2.id, ProposalState::Finalized)
        ]
    );

    let events = h.events(h.intersection.as_str()).unwrap();
    for expected in ["proposal.submitted", "proposal.countered", "proposal.finalized"] {
        assert!(events.iter().any(|e| e == expected), "missing {expected}");
    }
}

#[test]
fn counter_to_a_counter_replaces_the_live_proposal() {
    let h = Household::new().unwrap();
    let p1 = h
        .engine
        .submit_proposal(&alice(), &h.intersection, dinner_at(&h, "19:00"))
        .unwrap();
    let p2 = h
        .engine
        .counter_proposal(&p1.id, &bob(), dinner_at(&h, "20:00"))
        .unwrap();
    let p3 = h
        .engine
        .counter_proposal(&p2.id, &alice(), dinner_at(&h, "19:30"))
        .unwrap();

    assert_eq!(h.engine.proposal(&p2.id).unwrap().state, ProposalState::Countered);
    assert!(h.engine.finalize(&p2.id, &bob()).is_err());

    h.engine.accept(&p3.id, &bob()).unwrap();
    assert!(matches!(
        h.engine.finalize(&p3.id, &bob()).unwrap(),
        Finalized::Committed(_)
    ));
    assert_eq!(
        h.engine.lineage(&p3.id).unwrap().len(),
        3,
        "lineage runs root to leaf"
    );
}
