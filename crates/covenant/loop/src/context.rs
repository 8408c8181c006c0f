//! Loop steps, per-loop context and the observable loop state.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use covenant_authority::{
    ActionFields, ActionHash, ApprovalArtifact, AuthorizationGrant, ThresholdPolicy,
};
use covenant_negotiation::{ActionSpec, Commitment};
use covenant_types::{
    CircleId, ErrorKind, IntersectionId, LoopId, ProposalId, RiskClass, RunMode, Scope, TraceId,
};
use serde::{Deserialize, Serialize};

use crate::executor::ExecutionOutcome;
use crate::settlement::SettlementReceipt;

/// The seven ordered loop steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStep {
    Intent,
    IntersectionDiscovery,
    AuthorityNegotiation,
    Commitment,
    Action,
    Settlement,
    MemoryUpdate,
}

impl LoopStep {
    pub const ALL: [LoopStep; 7] = [
        LoopStep::Intent,
        LoopStep::IntersectionDiscovery,
        LoopStep::AuthorityNegotiation,
        LoopStep::Commitment,
        LoopStep::Action,
        LoopStep::Settlement,
        LoopStep::MemoryUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStep::Intent => "intent",
            LoopStep::IntersectionDiscovery => "intersection_discovery",
            LoopStep::AuthorityNegotiation => "authority_negotiation",
            LoopStep::Commitment => "commitment",
            LoopStep::Action => "action",
            LoopStep::Settlement => "settlement",
            LoopStep::MemoryUpdate => "memory_update",
        }
    }

    pub fn next(&self) -> Option<LoopStep> {
        let idx = Self::ALL.iter().position(|s| s == self)?;
        Self::ALL.get(idx + 1).copied()
    }
}

impl std::fmt::Display for LoopStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Completed { summary: String },
    Awaiting { reason: String },
    Failed { reason: String },
    Aborted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoopStatus {
    /// Opened but not yet driven.
    Ready,
    Running {
        step: LoopStep,
    },
    /// Waiting on parties, approvals or an explicit pause; resumable.
    Paused {
        step: LoopStep,
        reason: String,
    },
    Completed,
    Failed {
        step: LoopStep,
        reason: String,
        kind: ErrorKind,
    },
    Aborted {
        step: LoopStep,
        reason: String,
    },
}

impl LoopStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopStatus::Completed | LoopStatus::Failed { .. } | LoopStatus::Aborted { .. }
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStatus::Ready => "ready",
            LoopStatus::Running { .. } => "running",
            LoopStatus::Paused { .. } => "paused",
            LoopStatus::Completed => "completed",
            LoopStatus::Failed { .. } => "failed",
            LoopStatus::Aborted { .. } => "aborted",
        }
    }
}

impl std::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopStatus::Running { step } => write!(f, "running {step}"),
            LoopStatus::Paused { step, .. } => write!(f, "paused at {step}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// What the issuing circle wants done.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopIntent {
    pub issuer: CircleId,
    pub intersection_id: IntersectionId,
    pub action: ActionSpec,
    pub mode: RunMode,
    pub risk_class: RiskClass,
    /// How long the negotiated commitment stays valid.
    pub commitment_ttl_minutes: i64,
}

impl LoopIntent {
    /// A `suggest_only`, low-risk intent with a one-day commitment window.
    pub fn new(issuer: CircleId, intersection_id: IntersectionId, action: ActionSpec) -> Self {
        Self {
            issuer,
            intersection_id,
            action,
            mode: RunMode::SuggestOnly,
            risk_class: RiskClass::Low,
            commitment_ttl_minutes: 24 * 60,
        }
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn risk(mut self, risk_class: RiskClass) -> Self {
        self.risk_class = risk_class;
        self
    }

    pub fn commitment_ttl_minutes(mut self, minutes: i64) -> Self {
        self.commitment_ttl_minutes = minutes;
        self
    }

    pub fn commitment_ttl(&self) -> Duration {
        Duration::minutes(self.commitment_ttl_minutes)
    }
}

/// Per-step context. Never mutated in place; each transition derives a new
/// value with [`LoopContext::at`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopContext {
    pub loop_id: LoopId,
    pub trace_id: TraceId,
    pub issuer: CircleId,
    pub intersection_id: IntersectionId,
    pub risk_class: RiskClass,
    pub mode: RunMode,
    pub step: LoopStep,
}

impl LoopContext {
    pub fn at(&self, step: LoopStep) -> Self {
        Self {
            step,
            ..self.clone()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionLifecycle {
    Pending,
    Executing,
    Completed,
    Aborted,
}

/// The action derived from a commitment, fixed before any approval is asked for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub fields: ActionFields,
    pub action_hash: ActionHash,
    pub required_scope: Scope,
    pub policy: ThresholdPolicy,
    pub lifecycle: ActionLifecycle,
}

impl ActionPlan {
    pub fn has_started(&self) -> bool {
        self.lifecycle != ActionLifecycle::Pending
    }
}

/// Everything observable about one loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopState {
    pub context: LoopContext,
    pub intent: LoopIntent,
    pub status: LoopStatus,
    pub steps: BTreeMap<LoopStep, StepState>,
    pub proposal: Option<ProposalId>,
    pub commitment: Option<Commitment>,
    pub action: Option<ActionPlan>,
    pub approvals: Vec<ApprovalArtifact>,
    pub grant: Option<AuthorizationGrant>,
    pub outcome: Option<ExecutionOutcome>,
    pub receipt: Option<SettlementReceipt>,
    pub pause_requested: bool,
    pub abort_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LoopState {
    pub fn new(context: LoopContext, intent: LoopIntent, now: DateTime<Utc>) -> Self {
        Self {
            context,
            intent,
            status: LoopStatus::Ready,
            steps: LoopStep::ALL
                .iter()
                .map(|s| (*s, StepState::Pending))
                .collect(),
            proposal: None,
            commitment: None,
            action: None,
            approvals: Vec::new(),
            grant: None,
            outcome: None,
            receipt: None,
            pause_requested: false,
            abort_reason: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn step_state(&self, step: LoopStep) -> &StepState {
        self.steps.get(&step).unwrap_or(&StepState::Pending)
    }

    /// First step that has not completed, if any.
    pub fn next_step(&self) -> Option<LoopStep> {
        LoopStep::ALL
            .into_iter()
            .find(|s| !matches!(self.step_state(*s), StepState::Completed { .. }))
    }

    pub fn action_started(&self) -> bool {
        self.action.as_ref().is_some_and(ActionPlan::has_started)
    }

    pub(crate) fn set_step(&mut self, step: LoopStep, state: StepState, now: DateTime<Utc>) {
        self.steps.insert(step, state);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_are_ordered() {
        let mut step = Some(LoopStep::Intent);
        let mut seen = Vec::new();
        while let Some(s) = step {
            seen.push(s);
            step = s.next();
        }
        assert_eq!(seen, LoopStep::ALL);
        assert!(LoopStep::Action < LoopStep::Settlement);
    }

    #[test]
    fn context_transition_copies() {
        let ctx = LoopContext {
            loop_id: LoopId::new(),
            trace_id: TraceId::new("t-1"),
            issuer: CircleId::new("alice"),
            intersection_id: IntersectionId::new("ix"),
            risk_class: RiskClass::Low,
            mode: RunMode::Execute,
            step: LoopStep::Intent,
        };
        let next = ctx.at(LoopStep::Commitment);
        assert_eq!(ctx.step, LoopStep::Intent);
        assert_eq!(next.step, LoopStep::Commitment);
        assert_eq!(next.trace_id, ctx.trace_id);
    }

    #[test]
    fn status_serializes_with_tag() {
        let status = LoopStatus::Paused {
            step: LoopStep::Action,
            reason: "approvals outstanding".into(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "paused");
        assert_eq!(json["step"], "action");
    }
}
