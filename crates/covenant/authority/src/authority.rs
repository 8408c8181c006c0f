//! Authorization service.
//!
//! `Authority` is the single gate between a negotiated commitment and an
//! executor. It binds the envelope to the action it claims to authorize,
//! validates the envelope for the run mode, checks approvals against the
//! threshold, consumes them, and audits the grant or the specific denial.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use covenant_audit::{AuditEvent, AuditOutcome, AuditSink};
use covenant_envelope::{EnvelopeValidator, ExecutionEnvelope};
use covenant_store::OwnerStore;
use covenant_types::{ApprovalId, CircleId, Clock, RunMode, Scope, TraceId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::action::{compute_action_hash, ActionFields, ActionHash};
use crate::approval::ApprovalArtifact;
use crate::error::{AuthorityError, Result};
use crate::registry::{Revocation, RevocationList, SpentApprovals, SpentSet};
use crate::signer::SignatureVerifier;
use crate::verify::{ApprovalVerifier, RejectedApproval, RejectionReason, ThresholdPolicy};

/// Everything needed to decide one call.
#[derive(Clone, Debug)]
pub struct AuthorizationRequest {
    pub envelope: ExecutionEnvelope,
    pub fields: ActionFields,
    /// Write scope the action's domain requires.
    pub required_scope: Scope,
    pub artifacts: Vec<ApprovalArtifact>,
    pub policy: ThresholdPolicy,
}

/// Proof that a call was authorized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationGrant {
    pub action_hash: ActionHash,
    pub trace_id: TraceId,
    pub mode: RunMode,
    /// Approvals consumed by this grant; empty outside execute mode.
    pub approvals: Vec<ApprovalId>,
    pub approvers: BTreeSet<CircleId>,
    pub granted_at: DateTime<Utc>,
}

pub struct Authority {
    validator: EnvelopeValidator,
    approvals: ApprovalVerifier,
    spent: SpentApprovals,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl Authority {
    pub fn new(
        validator: EnvelopeValidator,
        signatures: Arc<dyn SignatureVerifier>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            validator,
            approvals: ApprovalVerifier::new(signatures, Arc::new(RevocationList::new())),
            spent: SpentApprovals::in_memory(),
            audit,
            clock,
        }
    }

    /// Persist spent approvals in `store` instead of memory.
    pub fn with_spent_store(mut self, store: Arc<dyn OwnerStore<SpentSet>>) -> Self {
        self.spent = SpentApprovals::new(store);
        self
    }

    pub fn validator(&self) -> &EnvelopeValidator {
        &self.validator
    }

    pub fn approvals(&self) -> &ApprovalVerifier {
        &self.approvals
    }

    pub fn spent(&self) -> &SpentApprovals {
        &self.spent
    }

    /// Decide `request`. Every outcome is audited against the envelope's actor.
    ///
    /// Approvals are spent only if the grant is recorded; a failed audit write
    /// leaves them usable for a retry.
    pub fn authorize(&self, request: &AuthorizationRequest) -> Result<AuthorizationGrant> {
        let now = self.clock.now();
        let decided = self.decide(request, now).and_then(|grant| {
            self.spent.consume_with(
                &grant.action_hash,
                &grant.approvals,
                &grant.trace_id,
                now,
                || {
                    self.audit.append(
                        request.envelope.actor.as_str(),
                        self.event("authority.granted", request, &grant.action_hash)
                            .detail("approvals", grant.approvals.len())
                            .detail("approvers", join_circles(&grant.approvers)),
                    )?;
                    Ok(())
                },
            )?;
            Ok(grant)
        });

        match decided {
            Ok(grant) => {
                info!(
                    trace_id = %grant.trace_id,
                    action_hash = %grant.action_hash,
                    mode = %grant.mode,
                    approvers = grant.approvers.len(),
                    "action authorized"
                );
                Ok(grant)
            }
            Err(err @ AuthorityError::Audit(_)) => {
                warn!(
                    trace_id = %request.envelope.trace_id,
                    error = %err,
                    "authorization not recorded; approvals left unspent"
                );
                Err(err)
            }
            Err(err) => {
                let hash = compute_action_hash(&request.fields);
                warn!(
                    trace_id = %request.envelope.trace_id,
                    actor = %request.envelope.actor,
                    action_hash = %hash,
                    kind = %err.kind(),
                    "authorization denied: {err}"
                );
                let event = self
                    .event("authority.denied", request, &hash)
                    .outcome(AuditOutcome::Denied)
                    .detail("kind", err.kind())
                    .detail("reason", &err);
                if let Err(audit_err) = self.audit.append(request.envelope.actor.as_str(), event) {
                    warn!(error = %audit_err, "failed to audit authorization denial");
                }
                Err(err)
            }
        }
    }

    /// Withdraw `artifact` before it is used. Only its signer may do so.
    pub fn revoke(
        &self,
        artifact: &ApprovalArtifact,
        by: &CircleId,
        reason: impl Into<String>,
    ) -> Result<()> {
        if &artifact.approver != by {
            warn!(approval_id = %artifact.id, by = %by, "revocation by non-approver refused");
            return Err(AuthorityError::NotApprover {
                approval_id: artifact.id,
                approver: artifact.approver.clone(),
                by: by.clone(),
            });
        }
        self.approvals
            .verify_signature(artifact)
            .map_err(|reason| AuthorityError::ApprovalRejected {
                approval_id: artifact.id,
                reason,
            })?;

        let revocation = Revocation {
            revoked_by: by.clone(),
            reason: reason.into(),
            revoked_at: self.clock.now(),
        };
        self.approvals
            .revocations()
            .revoke(artifact.id, revocation.clone())?;
        self.audit.append(
            by.as_str(),
            AuditEvent::new("approval.revoked")
                .circle(by)
                .subject(artifact.id)
                .detail("action_hash", &artifact.action_hash)
                .detail("reason", &revocation.reason),
        )?;
        info!(approval_id = %artifact.id, by = %by, "approval revoked");
        Ok(())
    }

    fn event(&self, event_type: &str, request: &AuthorizationRequest, hash: &ActionHash) -> AuditEvent {
        AuditEvent::new(event_type)
            .circle(&request.envelope.actor)
            .intersection(&request.envelope.intersection_id)
            .subject(request.fields.action_id.as_str())
            .trace(&request.envelope.trace_id)
            .detail("action_hash", hash)
            .detail("action_type", &request.fields.action_type)
            .detail("mode", request.envelope.mode)
    }

    fn decide(&self, request: &AuthorizationRequest, now: DateTime<Utc>) -> Result<AuthorizationGrant> {
        let AuthorizationRequest {
            envelope,
            fields,
            required_scope,
            artifacts,
            policy,
        } = request;

        fields.validate()?;
        bind(envelope, fields)?;
        self.validator.validate_freshness(envelope, now)?;
        let action_hash = compute_action_hash(fields);

        if !envelope.mode.is_execute() {
            self.validator.validate_for_read(envelope)?;
            return Ok(AuthorizationGrant {
                action_hash,
                trace_id: envelope.trace_id.clone(),
                mode: envelope.mode,
                approvals: Vec::new(),
                approvers: BTreeSet::new(),
                granted_at: now,
            });
        }

        if !fields.scopes.contains(required_scope) {
            return Err(AuthorityError::InvalidFields(format!(
                "action does not carry required scope {required_scope}"
            )));
        }
        self.validator.validate_for_write(envelope, required_scope)?;
        if let Some(undeclared) = fields.scopes.iter().find(|s| !envelope.declares(s)) {
            return Err(AuthorityError::BindingMismatch(format!(
                "scope {undeclared} is not declared by the envelope"
            )));
        }

        // The envelope's own artifact must be among the presented ones and valid.
        let reference = envelope.approval.artifact_ref.as_deref().unwrap_or_default();
        let referenced = artifacts
            .iter()
            .find(|a| a.reference() == reference)
            .ok_or_else(|| AuthorityError::UnknownArtifactRef(reference.to_string()))?;
        self.approvals
            .verify_approval(referenced, &action_hash, now)
            .map_err(|reason| AuthorityError::ApprovalRejected {
                approval_id: referenced.id,
                reason,
            })?;

        let (covering, uncovered): (Vec<_>, Vec<_>) = artifacts
            .iter()
            .cloned()
            .partition(|a| a.covers(&fields.scopes));
        let mut report = self
            .approvals
            .verify_threshold(&covering, policy, &action_hash, now);
        report
            .invalid
            .extend(uncovered.into_iter().map(|a| RejectedApproval {
                approval_id: a.id,
                approver: a.approver,
                reason: RejectionReason::ScopesNotCovered,
            }));

        if !report.satisfied {
            return Err(AuthorityError::ThresholdNotMet {
                approvers: report.approvers.len(),
                threshold: report.threshold,
                rejected: report.invalid,
            });
        }

        Ok(AuthorizationGrant {
            action_hash,
            trace_id: envelope.trace_id.clone(),
            mode: envelope.mode,
            approvals: report.valid,
            approvers: report.approvers,
            granted_at: now,
        })
    }
}

fn bind(envelope: &ExecutionEnvelope, fields: &ActionFields) -> Result<()> {
    if envelope.mode != fields.mode {
        return Err(AuthorityError::BindingMismatch(format!(
            "envelope mode {} differs from action mode {}",
            envelope.mode, fields.mode
        )));
    }
    if envelope.intersection_id != fields.intersection_id {
        return Err(AuthorityError::BindingMismatch(format!(
            "envelope intersection {} differs from action intersection {}",
            envelope.intersection_id, fields.intersection_id
        )));
    }
    if envelope.contract_version != fields.contract_version {
        return Err(AuthorityError::BindingMismatch(format!(
            "envelope contract {} differs from action contract {}",
            envelope.contract_version, fields.contract_version
        )));
    }
    Ok(())
}

fn join_circles(circles: &BTreeSet<CircleId>) -> String {
    circles
        .iter()
        .map(CircleId::as_str)
        .collect::<Vec<_>>()
        .join(",")
}
