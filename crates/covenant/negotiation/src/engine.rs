//! Negotiation engine.
//!
//! All state for one intersection (its contract, proposals, commitments and
//! consumed invites) lives in one [`IntersectionRecord`]. Every mutation
//! takes the intersection's lock, works on a copy, appends exactly one audit
//! entry to the intersection's chain, then stores the copy. Different
//! intersections never contend.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use covenant_audit::{AuditEvent, AuditSink};
use covenant_authority::{PayloadSigner, SignatureVerifier};
use covenant_store::{MemoryOwnerStore, OwnerStore};
use covenant_types::{
    CircleId, Clock, CommitmentId, Contract, ContractVersion, Intersection, IntersectionId,
    InviteId, KeyedLocks, ProposalId, Scope,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{NegotiationError, Result};
use crate::invite::InviteToken;
use crate::proposal::{
    Commitment, Finalized, Proposal, ProposalKind, ProposalState, ProposalTerms,
};

/// Persisted state of one intersection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntersectionRecord {
    pub intersection: Intersection,
    pub proposals: BTreeMap<ProposalId, Proposal>,
    pub commitments: BTreeMap<CommitmentId, Commitment>,
    pub accepted_invites: BTreeSet<InviteId>,
}

impl IntersectionRecord {
    fn proposal_mut(&mut self, id: &ProposalId) -> Result<&mut Proposal> {
        self.proposals
            .get_mut(id)
            .ok_or(NegotiationError::UnknownProposal(*id))
    }

    fn require_party(&self, circle: &CircleId) -> Result<()> {
        if self.intersection.is_party(circle) {
            Ok(())
        } else {
            Err(NegotiationError::NotAParty {
                circle: circle.clone(),
                intersection: self.intersection.id.clone(),
            })
        }
    }

    /// Mark `id` and every open proposal on its active-counter chain superseded.
    fn supersede_chain(&mut self, id: ProposalId, now: DateTime<Utc>) -> usize {
        let mut next = Some(id);
        let mut superseded = 0;
        while let Some(current) = next {
            let Some(p) = self.proposals.get_mut(&current) else {
                break;
            };
            if p.state.is_terminal() {
                break;
            }
            p.state = ProposalState::Superseded;
            p.updated_at = now;
            superseded += 1;
            next = p.active_counter;
        }
        superseded
    }

    /// Mark every countered ancestor of `id` superseded.
    fn supersede_ancestors(&mut self, id: &ProposalId, now: DateTime<Utc>) -> usize {
        let mut parent = self.proposals.get(id).and_then(|p| p.parent);
        let mut superseded = 0;
        while let Some(pid) = parent {
            let Some(p) = self.proposals.get_mut(&pid) else {
                break;
            };
            if p.state == ProposalState::Countered {
                p.state = ProposalState::Superseded;
                p.updated_at = now;
                superseded += 1;
            }
            parent = p.parent;
        }
        superseded
    }
}

pub struct NegotiationEngine {
    store: Arc<dyn OwnerStore<IntersectionRecord>>,
    locks: KeyedLocks<IntersectionId>,
    // Owning intersection by id. Proposals and commitments are never removed
    // from `store`, so these hold at most one entry per stored record and can
    // be rebuilt from a scan after a restart.
    proposal_index: DashMap<ProposalId, IntersectionId>,
    commitment_index: DashMap<CommitmentId, IntersectionId>,
    signatures: Arc<dyn SignatureVerifier>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl NegotiationEngine {
    pub fn new(
        store: Arc<dyn OwnerStore<IntersectionRecord>>,
        signatures: Arc<dyn SignatureVerifier>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            proposal_index: DashMap::new(),
            commitment_index: DashMap::new(),
            signatures,
            audit,
            clock,
        }
    }

    pub fn in_memory(
        signatures: Arc<dyn SignatureVerifier>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(Arc::new(MemoryOwnerStore::new()), signatures, audit, clock)
    }

    // ---- reads ----

    pub fn intersection(&self, id: &IntersectionId) -> Result<Intersection> {
        Ok(self.load(id)?.intersection)
    }

    pub fn proposal(&self, id: &ProposalId) -> Result<Proposal> {
        let ix = self.locate(id)?;
        self.load(&ix)?
            .proposals
            .remove(id)
            .ok_or(NegotiationError::UnknownProposal(*id))
    }

    pub fn proposals(&self, intersection: &IntersectionId) -> Result<Vec<Proposal>> {
        Ok(self.load(intersection)?.proposals.into_values().collect())
    }

    pub fn commitment(&self, id: &CommitmentId) -> Result<Option<Commitment>> {
        if let Some(ix) = self.commitment_index.get(id).map(|e| e.value().clone()) {
            return Ok(self.load(&ix)?.commitments.remove(id));
        }
        for (_, mut record) in self.store.list()? {
            if let Some(c) = record.commitments.remove(id) {
                self.commitment_index
                    .insert(*id, record.intersection.id.clone());
                return Ok(Some(c));
            }
        }
        Ok(None)
    }

    /// Root-to-leaf chain of counters ending at `id`.
    pub fn lineage(&self, id: &ProposalId) -> Result<Vec<Proposal>> {
        let ix = self.locate(id)?;
        let record = self.load(&ix)?;
        let mut chain = Vec::new();
        let mut cursor = Some(*id);
        while let Some(pid) = cursor {
            let p = record
                .proposals
                .get(&pid)
                .ok_or(NegotiationError::UnknownProposal(pid))?;
            cursor = p.parent;
            chain.push(p.clone());
        }
        chain.reverse();
        Ok(chain)
    }

    // ---- invites ----

    /// Sign an invite for `invitee`. For an existing intersection the signer
    /// must already be a party and `contract` is ignored on acceptance.
    pub fn issue_invite(
        &self,
        signer: &dyn PayloadSigner,
        intersection_id: IntersectionId,
        invitee: CircleId,
        contract: Contract,
        ttl: Duration,
    ) -> Result<InviteToken> {
        if intersection_id.is_empty() {
            return Err(NegotiationError::InvalidTerms("intersection id is empty".into()));
        }
        if invitee.is_empty() || &invitee == signer.circle() {
            return Err(NegotiationError::InvalidTerms("invalid invitee".into()));
        }
        if let Some(record) = self.store.get(intersection_id.as_str())? {
            record.require_party(signer.circle())?;
        }
        let token = InviteToken::issue(
            signer,
            intersection_id,
            invitee,
            contract,
            self.clock.now(),
            ttl,
        );
        debug!(invite_id = %token.id, intersection = %token.intersection_id, "invite issued");
        Ok(token)
    }

    /// Verify `token` and bring `invitee` into its intersection, creating the
    /// intersection when it does not exist yet.
    pub fn accept_invite(&self, token: &InviteToken, invitee: &CircleId) -> Result<Intersection> {
        if &token.invitee != invitee {
            return Err(NegotiationError::WrongInvitee {
                expected: token.invitee.clone(),
                actual: invitee.clone(),
            });
        }
        let now = self.clock.now();
        if token.is_expired(now) {
            return Err(NegotiationError::InviteExpired(token.id));
        }
        token.verify(self.signatures.as_ref())?;

        let ix = &token.intersection_id;
        let _guard = self.locks.lock(ix);
        let (record, event_type) = match self.store.get(ix.as_str())? {
            None => {
                let mut contract = token.contract.clone();
                contract.version = ContractVersion::INITIAL;
                let intersection = Intersection::new(
                    ix.clone(),
                    [token.inviter.clone(), invitee.clone()],
                    contract,
                    now,
                );
                let record = IntersectionRecord {
                    intersection,
                    proposals: BTreeMap::new(),
                    commitments: BTreeMap::new(),
                    accepted_invites: BTreeSet::from([token.id]),
                };
                (record, "intersection.created")
            }
            Some(mut record) => {
                if record.accepted_invites.contains(&token.id) {
                    return Err(NegotiationError::InviteAlreadyUsed(token.id));
                }
                record.require_party(&token.inviter)?;
                if record.intersection.is_party(invitee) {
                    return Err(NegotiationError::AlreadyParty {
                        circle: invitee.clone(),
                        intersection: ix.clone(),
                    });
                }
                record.intersection.parties.insert(invitee.clone());
                record.intersection.updated_at = now;
                record.accepted_invites.insert(token.id);
                (record, "intersection.joined")
            }
        };

        self.audit.append(
            ix.as_str(),
            AuditEvent::new(event_type)
                .circle(invitee)
                .intersection(ix)
                .subject(token.id)
                .detail("inviter", token.inviter.as_str())
                .detail("contract_version", record.intersection.contract.version)
                .detail("parties", record.intersection.parties.len()),
        )?;
        self.store.put(ix.as_str(), record.clone())?;

        info!(
            intersection = %ix,
            circle = %invitee,
            parties = record.intersection.parties.len(),
            "{event_type}"
        );
        Ok(record.intersection)
    }

    // ---- proposals ----

    pub fn submit_proposal(
        &self,
        issuer: &CircleId,
        intersection: &IntersectionId,
        terms: ProposalTerms,
    ) -> Result<Proposal> {
        let proposal = self.mutate(intersection, |record, now| {
            record.require_party(issuer)?;
            validate_terms(&record.intersection.contract, &terms, now)?;

            let proposal = new_proposal(record, issuer, terms, None, now);
            record.proposals.insert(proposal.id, proposal.clone());

            let event = AuditEvent::new("proposal.submitted")
                .circle(issuer)
                .intersection(intersection)
                .subject(proposal.id)
                .detail("kind", proposal.kind())
                .detail("parties", proposal.acceptances.len());
            Ok((proposal, event))
        })?;

        self.proposal_index.insert(proposal.id, intersection.clone());
        info!(
            intersection = %intersection,
            proposal_id = %proposal.id,
            issuer = %issuer,
            kind = %proposal.kind(),
            "proposal submitted"
        );
        Ok(proposal)
    }

    /// Counter `parent` with new terms. The parent becomes `countered`; an
    /// earlier open counter (and anything countering it) is superseded.
    pub fn counter_proposal(
        &self,
        parent: &ProposalId,
        issuer: &CircleId,
        terms: ProposalTerms,
    ) -> Result<Proposal> {
        let ix = self.locate(parent)?;
        let counter = self.mutate(&ix, |record, now| {
            record.require_party(issuer)?;
            let parent_state = record.proposal_mut(parent)?;
            match parent_state.state {
                ProposalState::Pending | ProposalState::Accepted | ProposalState::Countered => {}
                state => {
                    return Err(NegotiationError::InvalidTransition {
                        proposal: *parent,
                        state,
                        action: "counter",
                    })
                }
            }
            if parent_state.kind() != terms.kind() {
                return Err(NegotiationError::InvalidTerms(format!(
                    "a {} proposal must be countered with {} terms",
                    parent_state.kind(),
                    parent_state.kind()
                )));
            }
            validate_terms(&record.intersection.contract, &terms, now)?;

            let replaced = record.proposal_mut(parent)?.active_counter;
            let superseded = replaced.map_or(0, |prev| record.supersede_chain(prev, now));

            let counter = new_proposal(record, issuer, terms, Some(*parent), now);
            record.proposals.insert(counter.id, counter.clone());

            let p = record.proposal_mut(parent)?;
            p.state = ProposalState::Countered;
            p.active_counter = Some(counter.id);
            p.counters.push(counter.id);
            p.updated_at = now;

            let event = AuditEvent::new("proposal.countered")
                .circle(issuer)
                .intersection(&ix)
                .subject(counter.id)
                .detail("parent", parent)
                .detail("superseded", superseded);
            Ok((counter, event))
        })?;

        self.proposal_index.insert(counter.id, ix.clone());
        info!(
            intersection = %ix,
            proposal_id = %counter.id,
            parent = %parent,
            issuer = %issuer,
            "proposal countered"
        );
        Ok(counter)
    }

    pub fn accept(&self, id: &ProposalId, circle: &CircleId) -> Result<Proposal> {
        let ix = self.locate(id)?;
        let _guard = self.locks.lock(&ix);
        let mut record = self.load(&ix)?;
        let now = self.clock.now();

        let p = record.proposal_mut(id)?;
        if !p.state.is_open() {
            return Err(NegotiationError::InvalidTransition {
                proposal: *id,
                state: p.state,
                action: "accept",
            });
        }
        let flag = p
            .acceptances
            .get_mut(circle)
            .ok_or_else(|| NegotiationError::NotTracked {
                circle: circle.clone(),
                proposal: *id,
            })?;
        if *flag {
            debug!(proposal_id = %id, circle = %circle, "acceptance already recorded");
            return Ok(p.clone());
        }
        *flag = true;
        if p.all_accepted() {
            p.state = ProposalState::Accepted;
        }
        p.updated_at = now;
        let proposal = p.clone();

        self.audit.append(
            ix.as_str(),
            AuditEvent::new("proposal.accepted")
                .circle(circle)
                .intersection(&ix)
                .subject(id)
                .detail("state", proposal.state)
                .detail("outstanding", proposal.outstanding().len()),
        )?;
        self.store.put(ix.as_str(), record)?;

        info!(
            intersection = %ix,
            proposal_id = %id,
            circle = %circle,
            state = %proposal.state,
            "proposal accepted"
        );
        Ok(proposal)
    }

    /// A single rejection is final.
    pub fn reject(
        &self,
        id: &ProposalId,
        circle: &CircleId,
        reason: impl Into<String>,
    ) -> Result<Proposal> {
        let reason = reason.into();
        let ix = self.locate(id)?;
        let proposal = self.mutate(&ix, |record, now| {
            let p = record.proposal_mut(id)?;
            if !p.state.is_open() {
                return Err(NegotiationError::InvalidTransition {
                    proposal: *id,
                    state: p.state,
                    action: "reject",
                });
            }
            if !p.acceptances.contains_key(circle) {
                return Err(NegotiationError::NotTracked {
                    circle: circle.clone(),
                    proposal: *id,
                });
            }
            p.state = ProposalState::Rejected;
            p.rejections.insert(circle.clone(), reason.clone());
            p.updated_at = now;

            let event = AuditEvent::new("proposal.rejected")
                .circle(circle)
                .intersection(&ix)
                .subject(id)
                .detail("reason", &reason);
            Ok((p.clone(), event))
        })?;

        info!(intersection = %ix, proposal_id = %id, circle = %circle, "proposal rejected");
        Ok(proposal)
    }

    /// Apply an accepted proposal: amend the contract or form a commitment.
    pub fn finalize(&self, id: &ProposalId, by: &CircleId) -> Result<Finalized> {
        let ix = self.locate(id)?;
        let result = self.mutate(&ix, |record, now| {
            record.require_party(by)?;
            let p = record.proposal_mut(id)?;
            match p.state {
                ProposalState::Accepted if p.all_accepted() => {}
                ProposalState::Finalized => return Err(NegotiationError::AlreadyFinalized(*id)),
                state => {
                    return Err(NegotiationError::InvalidTransition {
                        proposal: *id,
                        state,
                        action: "finalize",
                    })
                }
            }
            let terms = p.terms.clone();
            let parties: BTreeSet<CircleId> = p.acceptances.keys().cloned().collect();
            let issuer = p.issuer.clone();

            let live = &record.intersection.contract;
            let (outcome, event) = match terms {
                ProposalTerms::Amendment(amendment) => {
                    if amendment.base_version != live.version {
                        return Err(NegotiationError::VersionConflict {
                            expected: amendment.base_version,
                            actual: live.version,
                        });
                    }
                    let next = amendment.apply(live);
                    let event = AuditEvent::new("proposal.finalized")
                        .detail("kind", ProposalKind::Amendment)
                        .detail("previous_version", live.version)
                        .detail("contract_version", next.version);
                    record.intersection.supersede_contract(next.clone(), now);
                    (Finalized::Amended(next), event)
                }
                ProposalTerms::Commitment(terms) => {
                    if terms.expires_at <= now {
                        return Err(NegotiationError::CommitmentExpired);
                    }
                    if let Some(missing) = terms.action.scopes.iter().find(|s| !live.grants(s)) {
                        return Err(NegotiationError::ScopeNotGranted(missing.clone()));
                    }
                    let commitment = Commitment {
                        id: CommitmentId::new(),
                        proposal_id: *id,
                        issuer,
                        intersection_id: ix.clone(),
                        contract_version: live.version,
                        action: terms.action,
                        parties,
                        expires_at: terms.expires_at,
                        created_at: now,
                    };
                    record.commitments.insert(commitment.id, commitment.clone());
                    let event = AuditEvent::new("proposal.finalized")
                        .detail("kind", ProposalKind::Commitment)
                        .detail("commitment_id", commitment.id)
                        .detail("contract_version", commitment.contract_version);
                    (Finalized::Committed(commitment), event)
                }
            };

            let p = record.proposal_mut(id)?;
            p.state = ProposalState::Finalized;
            p.updated_at = now;
            let superseded = record.supersede_ancestors(id, now);

            let event = event
                .circle(by)
                .intersection(&ix)
                .subject(id)
                .detail("superseded", superseded);
            Ok((outcome, event))
        });

        match &result {
            Ok(Finalized::Amended(contract)) => info!(
                intersection = %ix,
                proposal_id = %id,
                contract_version = %contract.version,
                "contract amended"
            ),
            Ok(Finalized::Committed(c)) => {
                self.commitment_index.insert(c.id, ix.clone());
                info!(
                    intersection = %ix,
                    proposal_id = %id,
                    commitment_id = %c.id,
                    "commitment formed"
                )
            }
            Err(err) => warn!(intersection = %ix, proposal_id = %id, "finalize refused: {err}"),
        }
        result
    }

    // ---- internals ----

    fn load(&self, id: &IntersectionId) -> Result<IntersectionRecord> {
        self.store
            .get(id.as_str())?
            .ok_or_else(|| NegotiationError::UnknownIntersection(id.clone()))
    }

    /// Intersection owning `proposal`, via the index or a one-time scan.
    fn locate(&self, proposal: &ProposalId) -> Result<IntersectionId> {
        if let Some(ix) = self.proposal_index.get(proposal) {
            return Ok(ix.value().clone());
        }
        for (_, record) in self.store.list()? {
            for pid in record.proposals.keys() {
                self.proposal_index
                    .insert(*pid, record.intersection.id.clone());
            }
        }
        self.proposal_index
            .get(proposal)
            .map(|ix| ix.value().clone())
            .ok_or(NegotiationError::UnknownProposal(*proposal))
    }

    fn mutate<R>(
        &self,
        intersection: &IntersectionId,
        f: impl FnOnce(&mut IntersectionRecord, DateTime<Utc>) -> Result<(R, AuditEvent)>,
    ) -> Result<R> {
        let _guard = self.locks.lock(intersection);
        let mut record = self.load(intersection)?;
        let (out, event) = f(&mut record, self.clock.now())?;
        self.audit.append(intersection.as_str(), event)?;
        self.store.put(intersection.as_str(), record)?;
        Ok(out)
    }
}

fn new_proposal(
    record: &IntersectionRecord,
    issuer: &CircleId,
    terms: ProposalTerms,
    parent: Option<ProposalId>,
    now: DateTime<Utc>,
) -> Proposal {
    let acceptances = record
        .intersection
        .parties
        .iter()
        .map(|party| (party.clone(), party == issuer))
        .collect();
    Proposal {
        id: ProposalId::new(),
        issuer: issuer.clone(),
        intersection_id: record.intersection.id.clone(),
        terms,
        state: ProposalState::Pending,
        acceptances,
        rejections: BTreeMap::new(),
        parent,
        active_counter: None,
        counters: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

fn validate_terms(live: &Contract, terms: &ProposalTerms, now: DateTime<Utc>) -> Result<()> {
    match terms {
        ProposalTerms::Amendment(a) => {
            if a.is_empty() {
                return Err(NegotiationError::InvalidTerms("amendment changes nothing".into()));
            }
            if a.add_scopes.iter().chain(&a.remove_scopes).any(Scope::is_empty) {
                return Err(NegotiationError::InvalidTerms("blank scope".into()));
            }
            if a.base_version != live.version {
                return Err(NegotiationError::VersionConflict {
                    expected: a.base_version,
                    actual: live.version,
                });
            }
            if !a.add_scopes.is_empty() && !live.amendment_policy.allow_scope_additions {
                return Err(NegotiationError::PolicyForbids("scope additions"));
            }
            if !a.ceiling_changes.is_empty() && !live.amendment_policy.allow_ceiling_changes {
                return Err(NegotiationError::PolicyForbids("ceiling changes"));
            }
        }
        ProposalTerms::Commitment(c) => {
            if c.action.action_type.trim().is_empty() {
                return Err(NegotiationError::InvalidTerms("action type is empty".into()));
            }
            if !c.action.scopes.contains(&c.action.required_scope) {
                return Err(NegotiationError::InvalidTerms(
                    "required scope is not among the action scopes".into(),
                ));
            }
            if c.expires_at <= now {
                return Err(NegotiationError::InvalidTerms("commitment already expired".into()));
            }
            if let Some(missing) = c.action.scopes.iter().find(|s| !live.grants(s)) {
                return Err(NegotiationError::ScopeNotGranted(missing.clone()));
            }
        }
    }
    Ok(())
}
