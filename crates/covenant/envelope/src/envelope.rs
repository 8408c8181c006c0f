use chrono::{DateTime, Utc};
use covenant_types::{CircleId, ContractVersion, IntersectionId, RunMode, Scope, TraceId};
use serde::{Deserialize, Serialize};

/// Evidence that a human approved this call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalEvidence {
    pub human_approved: bool,
    /// Id of the approval artifact backing the flag.
    pub artifact_ref: Option<String>,
}

impl ApprovalEvidence {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn approved(artifact_ref: impl Into<String>) -> Self {
        Self {
            human_approved: true,
            artifact_ref: Some(artifact_ref.into()),
        }
    }

    pub fn has_artifact(&self) -> bool {
        self.artifact_ref
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty())
    }
}

/// Per-call value object gating every operation that may touch the outside
/// world. Reconstructed for each call; never stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEnvelope {
    pub trace_id: TraceId,
    pub mode: RunMode,
    pub actor: CircleId,
    pub intersection_id: IntersectionId,
    pub contract_version: ContractVersion,
    pub scopes_used: Vec<Scope>,
    pub approval: ApprovalEvidence,
    pub issued_at: DateTime<Utc>,
}

impl ExecutionEnvelope {
    pub fn builder(
        trace_id: TraceId,
        actor: CircleId,
        intersection_id: IntersectionId,
    ) -> EnvelopeBuilder {
        EnvelopeBuilder {
            trace_id,
            actor,
            intersection_id,
            mode: RunMode::SuggestOnly,
            contract_version: ContractVersion::INITIAL,
            scopes_used: Vec::new(),
            approval: ApprovalEvidence::none(),
        }
    }

    pub fn declares(&self, scope: &Scope) -> bool {
        self.scopes_used.contains(scope)
    }
}

/// Builder for [`ExecutionEnvelope`]. Defaults to `suggest_only`, no scopes,
/// no approval.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    trace_id: TraceId,
    actor: CircleId,
    intersection_id: IntersectionId,
    mode: RunMode,
    contract_version: ContractVersion,
    scopes_used: Vec<Scope>,
    approval: ApprovalEvidence,
}

impl EnvelopeBuilder {
    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn contract_version(mut self, version: ContractVersion) -> Self {
        self.contract_version = version;
        self
    }

    pub fn scope(mut self, scope: impl Into<Scope>) -> Self {
        self.scopes_used.push(scope.into());
        self
    }

    pub fn scopes(mut self, scopes: impl IntoIterator<Item = Scope>) -> Self {
        self.scopes_used.extend(scopes);
        self
    }

    pub fn approval(mut self, approval: ApprovalEvidence) -> Self {
        self.approval = approval;
        self
    }

    /// Stamp the envelope with its issuance time (supplied by the caller's clock).
    pub fn issued_at(self, issued_at: DateTime<Utc>) -> ExecutionEnvelope {
        ExecutionEnvelope {
            trace_id: self.trace_id,
            mode: self.mode,
            actor: self.actor,
            intersection_id: self.intersection_id,
            contract_version: self.contract_version,
            scopes_used: self.scopes_used,
            approval: self.approval,
            issued_at,
        }
    }
}
