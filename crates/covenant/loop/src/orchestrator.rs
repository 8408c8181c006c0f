//! Loop orchestrator.
//!
//! Runs the seven steps in order, emitting an audit entry at every
//! transition. A step either completes, pauses the loop while it awaits other
//! parties, or fails it for good. Nothing is retried. An abort is honored
//! between steps and during execution; an action that was started is never
//! started again.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use covenant_audit::{AuditEvent, AuditOutcome, AuditSink};
use covenant_authority::{
    compute_action_hash, ActionFields, ApprovalArtifact, AuthorizationRequest, Authority,
    ThresholdPolicy,
};
use covenant_envelope::{ApprovalEvidence, ExecutionEnvelope};
use covenant_negotiation::Commitment;
use covenant_types::{ActionId, CircleId, Clock, LoopId, Scope, TraceId};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ApprovalConfig;
use crate::context::{
    ActionLifecycle, ActionPlan, LoopContext, LoopIntent, LoopState, LoopStatus, LoopStep,
    StepState,
};
use crate::delegate::{NegotiationDelegate, StepOutcome};
use crate::error::{LoopError, Result};
use crate::executor::{ExecutionOutcome, ExecutionRequest, Executor};
use crate::memory::{MemoryDelegate, OutcomeRecord};
use crate::settlement::SettlementDelegate;

/// Collaborators a loop calls out to.
pub struct LoopServices {
    pub negotiation: Arc<dyn NegotiationDelegate>,
    pub authority: Arc<Authority>,
    pub executor: Arc<dyn Executor>,
    pub settlement: Arc<dyn SettlementDelegate>,
    pub memory: Arc<dyn MemoryDelegate>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
}

struct LoopSlot {
    state: Mutex<LoopState>,
    /// Flips to `true` once and stays there.
    abort: watch::Sender<bool>,
}

pub struct LoopOrchestrator {
    services: LoopServices,
    approvals: ApprovalConfig,
    loops: DashMap<LoopId, Arc<LoopSlot>>,
}

impl LoopOrchestrator {
    pub fn new(services: LoopServices, approvals: ApprovalConfig) -> Self {
        Self {
            services,
            approvals,
            loops: DashMap::new(),
        }
    }

    pub fn approvals(&self) -> &ApprovalConfig {
        &self.approvals
    }

    /// Register a loop without running it.
    pub fn open_loop(&self, intent: LoopIntent) -> Result<LoopId> {
        if intent.issuer.is_empty() {
            return Err(LoopError::InvalidIntent("issuer is empty".into()));
        }
        if intent.intersection_id.is_empty() {
            return Err(LoopError::InvalidIntent("intersection is empty".into()));
        }

        let context = LoopContext {
            loop_id: LoopId::new(),
            trace_id: TraceId::generate(),
            issuer: intent.issuer.clone(),
            intersection_id: intent.intersection_id.clone(),
            risk_class: intent.risk_class,
            mode: intent.mode,
            step: LoopStep::Intent,
        };
        let state = LoopState::new(context, intent, self.services.clock.now());
        self.emit(
            &state,
            AuditEvent::new("loop.started")
                .detail("mode", state.context.mode)
                .detail("risk_class", state.context.risk_class)
                .detail("action_type", &state.intent.action.action_type),
        )?;

        let id = state.context.loop_id;
        info!(
            loop_id = %id,
            trace_id = %state.context.trace_id,
            issuer = %state.context.issuer,
            mode = %state.context.mode,
            "loop opened"
        );
        let (abort, _) = watch::channel(false);
        self.loops.insert(
            id,
            Arc::new(LoopSlot {
                state: Mutex::new(state),
                abort,
            }),
        );
        Ok(id)
    }

    /// Open a loop and drive it until it completes, fails or pauses.
    pub async fn start_loop(&self, intent: LoopIntent) -> Result<LoopState> {
        let id = self.open_loop(intent)?;
        self.run_loop(&id).await
    }

    /// Drive an opened loop from its first step.
    pub async fn run_loop(&self, id: &LoopId) -> Result<LoopState> {
        let slot = self.slot(id)?;
        {
            let mut state = slot.state.lock();
            if state.status != LoopStatus::Ready {
                return Err(LoopError::InvalidTransition {
                    loop_id: *id,
                    status: state.status.clone(),
                    action: "run",
                });
            }
            state.status = LoopStatus::Running {
                step: LoopStep::Intent,
            };
        }
        self.drive(&slot, LoopStep::Intent).await
    }

    pub fn status(&self, id: &LoopId) -> Result<LoopState> {
        Ok(self.slot(id)?.state.lock().clone())
    }

    pub fn loops(&self) -> Vec<LoopId> {
        let mut ids: Vec<LoopId> = self.loops.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Attach an approval for the loop's planned action.
    pub fn submit_approval(&self, id: &LoopId, artifact: ApprovalArtifact) -> Result<LoopState> {
        let slot = self.slot(id)?;
        let mut state = slot.state.lock();
        if state.status.is_terminal() {
            return Err(LoopError::InvalidTransition {
                loop_id: *id,
                status: state.status.clone(),
                action: "accept approvals",
            });
        }
        match &state.action {
            Some(plan) if plan.has_started() => return Err(LoopError::ReExecutionRefused(*id)),
            Some(plan) if plan.action_hash == artifact.action_hash => {}
            _ => return Err(LoopError::ApprovalMismatch(*id)),
        }
        if state.approvals.iter().any(|a| a.id == artifact.id) {
            return Ok(state.clone());
        }

        self.emit(
            &state,
            AuditEvent::new("loop.approval.received")
                .detail("approval_id", artifact.id)
                .detail("approver", artifact.approver.as_str()),
        )?;
        info!(loop_id = %id, approver = %artifact.approver, "approval received");
        state.approvals.push(artifact);
        state.updated_at = self.services.clock.now();
        Ok(state.clone())
    }

    /// Ask the loop to pause at the next step boundary. A running execution
    /// is forwarded to the executor's `pause`.
    pub async fn pause_loop(&self, id: &LoopId, by: &CircleId) -> Result<LoopState> {
        let slot = self.slot(id)?;
        let executing = {
            let mut state = slot.state.lock();
            match state.status.clone() {
                LoopStatus::Paused { .. } => return Ok(state.clone()),
                LoopStatus::Ready => {
                    let reason = format!("paused by {by}");
                    self.emit(
                        &state,
                        AuditEvent::new("loop.paused")
                            .outcome(AuditOutcome::Awaiting)
                            .detail("step", LoopStep::Intent)
                            .detail("reason", &reason),
                    )?;
                    state.status = LoopStatus::Paused {
                        step: LoopStep::Intent,
                        reason,
                    };
                    return Ok(state.clone());
                }
                LoopStatus::Running { .. } => {}
                status => {
                    return Err(LoopError::InvalidTransition {
                        loop_id: *id,
                        status,
                        action: "pause",
                    })
                }
            }
            if state.pause_requested {
                return Ok(state.clone());
            }
            self.emit(
                &state,
                AuditEvent::new("loop.pause.requested").detail("by", by.as_str()),
            )?;
            state.pause_requested = true;
            executing_action(&state)
        };

        if let Some(action) = executing {
            debug!(loop_id = %id, action_id = %action, "forwarding pause to executor");
            self.services.executor.pause(&action).await?;
        }
        self.status(id)
    }

    /// Re-enter a paused loop at `step`.
    ///
    /// `step` may not lie beyond the step the loop paused at, and may not be
    /// at or before the action once the action has started. For a loop that
    /// is still running with a pause pending, the pause is withdrawn and
    /// `step` is ignored.
    pub async fn resume_loop(&self, id: &LoopId, step: LoopStep) -> Result<LoopState> {
        let slot = self.slot(id)?;
        let signal = {
            let mut state = slot.state.lock();
            match state.status.clone() {
                LoopStatus::Running { step: running } if state.pause_requested => {
                    self.emit(
                        &state,
                        AuditEvent::new("loop.resumed")
                            .detail("step", running)
                            .detail("in_flight", true),
                    )?;
                    state.pause_requested = false;
                    Some(executing_action(&state))
                }
                LoopStatus::Paused {
                    step: paused_at, ..
                } => {
                    if step > paused_at {
                        return Err(LoopError::CannotSkip {
                            loop_id: *id,
                            requested: step,
                            next: paused_at,
                        });
                    }
                    if step <= LoopStep::Action && state.action_started() {
                        return Err(LoopError::ReExecutionRefused(*id));
                    }
                    self.emit(&state, AuditEvent::new("loop.resumed").detail("step", step))?;
                    let now = self.services.clock.now();
                    for s in LoopStep::ALL.into_iter().filter(|s| *s >= step) {
                        state.set_step(s, StepState::Pending, now);
                    }
                    state.pause_requested = false;
                    state.status = LoopStatus::Running { step };
                    None
                }
                status => {
                    return Err(LoopError::InvalidTransition {
                        loop_id: *id,
                        status,
                        action: "resume",
                    })
                }
            }
        };

        match signal {
            None => {
                info!(loop_id = %id, step = %step, "loop resumed");
                self.drive(&slot, step).await
            }
            Some(executing) => {
                if let Some(action) = executing {
                    debug!(loop_id = %id, action_id = %action, "forwarding resume to executor");
                    self.services.executor.resume(&action).await?;
                }
                self.status(id)
            }
        }
    }

    /// Stop the loop. A paused loop ends immediately; a running loop stops at
    /// the next boundary, or halts its execution in flight.
    pub fn abort_loop(&self, id: &LoopId, by: &CircleId, reason: impl Into<String>) -> Result<LoopState> {
        let slot = self.slot(id)?;
        let mut state = slot.state.lock();
        if state.status.is_terminal() {
            return Err(LoopError::InvalidTransition {
                loop_id: *id,
                status: state.status.clone(),
                action: "abort",
            });
        }
        let reason = format!("{by}: {}", reason.into());
        warn!(loop_id = %id, by = %by, "abort requested: {reason}");
        state.abort_reason = Some(reason);
        slot.abort.send_replace(true);

        match state.status.clone() {
            LoopStatus::Ready => self.finish_aborted(&mut state, LoopStep::Intent)?,
            LoopStatus::Paused { step, .. } => self.finish_aborted(&mut state, step)?,
            _ => {}
        }
        Ok(state.clone())
    }

    // ---- driver ----

    async fn drive(&self, slot: &Arc<LoopSlot>, from: LoopStep) -> Result<LoopState> {
        let mut abort_rx = slot.abort.subscribe();
        let mut next = Some(from);

        while let Some(step) = next {
            {
                let mut state = slot.state.lock();
                if *slot.abort.borrow() {
                    self.finish_aborted(&mut state, step)?;
                    return Ok(state.clone());
                }
                if state.pause_requested {
                    let reason = "paused on request".to_string();
                    self.emit(
                        &state,
                        AuditEvent::new("loop.paused")
                            .outcome(AuditOutcome::Awaiting)
                            .detail("step", step)
                            .detail("reason", &reason),
                    )?;
                    state.pause_requested = false;
                    state.status = LoopStatus::Paused { step, reason };
                    info!(loop_id = %state.context.loop_id, step = %step, "loop paused");
                    return Ok(state.clone());
                }
                self.emit(&state, AuditEvent::new("loop.step.started").detail("step", step))?;
                state.context = state.context.at(step);
                state.status = LoopStatus::Running { step };
                state.set_step(step, StepState::Running, self.services.clock.now());
                debug!(loop_id = %state.context.loop_id, step = %step, "step started");
            }

            let result = self.run_step(slot, step, &mut abort_rx).await;

            let mut state = slot.state.lock();
            let now = self.services.clock.now();
            let loop_id = state.context.loop_id;
            match result {
                Ok(StepOutcome::Completed(summary)) => {
                    self.emit(
                        &state,
                        AuditEvent::new("loop.step.completed")
                            .detail("step", step)
                            .detail("summary", &summary),
                    )?;
                    info!(loop_id = %loop_id, step = %step, "{summary}");
                    state.set_step(step, StepState::Completed { summary }, now);
                    next = step.next();
                }
                Ok(StepOutcome::Awaiting(reason)) => {
                    self.emit(
                        &state,
                        AuditEvent::new("loop.step.awaiting")
                            .outcome(AuditOutcome::Awaiting)
                            .detail("step", step)
                            .detail("reason", &reason),
                    )?;
                    info!(loop_id = %loop_id, step = %step, "loop awaiting: {reason}");
                    state.set_step(
                        step,
                        StepState::Awaiting {
                            reason: reason.clone(),
                        },
                        now,
                    );
                    state.status = LoopStatus::Paused { step, reason };
                    return Ok(state.clone());
                }
                Err(LoopError::Aborted(_)) => {
                    self.finish_aborted(&mut state, step)?;
                    return Ok(state.clone());
                }
                Err(err) => {
                    let reason = err.to_string();
                    let kind = err.kind();
                    warn!(loop_id = %loop_id, step = %step, kind = %kind, "step failed: {reason}");
                    self.emit(
                        &state,
                        AuditEvent::new("loop.step.failed")
                            .outcome(AuditOutcome::Failed)
                            .detail("step", step)
                            .detail("kind", kind)
                            .detail("reason", &reason),
                    )?;
                    self.emit(
                        &state,
                        AuditEvent::new("loop.completed")
                            .outcome(AuditOutcome::Failed)
                            .detail("success", false),
                    )?;
                    state.set_step(
                        step,
                        StepState::Failed {
                            reason: reason.clone(),
                        },
                        now,
                    );
                    state.status = LoopStatus::Failed { step, reason, kind };
                    return Ok(state.clone());
                }
            }
        }

        let mut state = slot.state.lock();
        self.emit(&state, AuditEvent::new("loop.completed").detail("success", true))?;
        state.status = LoopStatus::Completed;
        state.updated_at = self.services.clock.now();
        info!(loop_id = %state.context.loop_id, "loop completed");
        Ok(state.clone())
    }

    async fn run_step(
        &self,
        slot: &Arc<LoopSlot>,
        step: LoopStep,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> Result<StepOutcome> {
        let negotiation = &self.services.negotiation;
        match step {
            LoopStep::Intent => {
                let intent = slot.state.lock().intent.clone();
                Ok(StepOutcome::Completed(negotiation.check_intent(&intent)?))
            }
            LoopStep::IntersectionDiscovery => {
                let (ctx, intent) = {
                    let state = slot.state.lock();
                    (state.context.clone(), state.intent.clone())
                };
                let intersection = negotiation.discover(&ctx, &intent)?;
                let counterparties = intersection
                    .counterparties(&ctx.issuer)
                    .iter()
                    .map(|c| c.as_str().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(StepOutcome::Completed(format!(
                    "{} at contract {} with {counterparties}",
                    intersection.id, intersection.contract.version
                )))
            }
            LoopStep::AuthorityNegotiation => {
                let (ctx, intent, current, committed) = {
                    let state = slot.state.lock();
                    (
                        state.context.clone(),
                        state.intent.clone(),
                        state.proposal,
                        state.commitment.as_ref().map(|c| c.id),
                    )
                };
                if let Some(commitment) = committed {
                    return Ok(StepOutcome::Completed(format!("{commitment} already formed")));
                }
                let negotiated = negotiation.negotiate(&ctx, &intent, current)?;
                slot.state.lock().proposal = Some(negotiated.proposal);
                Ok(negotiated.outcome)
            }
            LoopStep::Commitment => {
                let (ctx, proposal, existing) = {
                    let state = slot.state.lock();
                    (state.context.clone(), state.proposal, state.commitment.clone())
                };
                if let Some(commitment) = existing {
                    return Ok(StepOutcome::Completed(format!("{} already formed", commitment.id)));
                }
                let proposal = proposal.ok_or(LoopError::MissingPrerequisite {
                    loop_id: ctx.loop_id,
                    step,
                    what: "accepted proposal",
                })?;
                let commitment = negotiation.commit(&ctx, &proposal)?;
                let plan = self.plan_action(&ctx, &commitment)?;
                let summary = format!(
                    "{} formed; action hash {} needs {} of {} approvals",
                    commitment.id,
                    plan.action_hash,
                    plan.policy.threshold(),
                    plan.policy.required_approvers().len()
                );
                let mut state = slot.state.lock();
                state.commitment = Some(commitment);
                state.action = Some(plan);
                Ok(StepOutcome::Completed(summary))
            }
            LoopStep::Action => self.run_action(slot, abort_rx).await,
            LoopStep::Settlement => {
                let (ctx, commitment, outcome) = {
                    let state = slot.state.lock();
                    (
                        state.context.clone(),
                        state.commitment.clone(),
                        state.outcome.clone(),
                    )
                };
                let commitment = require(commitment, &ctx, step, "commitment")?;
                let outcome = require(outcome, &ctx, step, "execution outcome")?;
                let receipt = self
                    .services
                    .settlement
                    .settle(&ctx, &commitment, &outcome, self.services.clock.now())
                    .await?;
                let summary = format!("settled between {} parties", receipt.parties.len());
                slot.state.lock().receipt = Some(receipt);
                Ok(StepOutcome::Completed(summary))
            }
            LoopStep::MemoryUpdate => {
                let (ctx, commitment, outcome) = {
                    let state = slot.state.lock();
                    (
                        state.context.clone(),
                        state.commitment.clone(),
                        state.outcome.clone(),
                    )
                };
                let commitment = require(commitment, &ctx, step, "commitment")?;
                let outcome = require(outcome, &ctx, step, "execution outcome")?;
                let record = OutcomeRecord {
                    loop_id: ctx.loop_id,
                    trace_id: ctx.trace_id.clone(),
                    commitment_id: commitment.id,
                    action_type: commitment.action.action_type.clone(),
                    mode: ctx.mode,
                    summary: outcome.summary,
                    recorded_at: self.services.clock.now(),
                };
                for party in &commitment.parties {
                    self.services.memory.remember(party, &record).await?;
                }
                Ok(StepOutcome::Completed(format!(
                    "remembered by {} circles",
                    commitment.parties.len()
                )))
            }
        }
    }

    /// Authorize, then execute under the abort signal.
    async fn run_action(
        &self,
        slot: &Arc<LoopSlot>,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> Result<StepOutcome> {
        let (ctx, plan, commitment, approvals) = {
            let state = slot.state.lock();
            (
                state.context.clone(),
                state.action.clone(),
                state.commitment.clone(),
                state.approvals.clone(),
            )
        };
        let plan = require(plan, &ctx, LoopStep::Action, "action plan")?;
        let commitment = require(commitment, &ctx, LoopStep::Action, "commitment")?;
        if plan.has_started() {
            return Err(LoopError::ReExecutionRefused(ctx.loop_id));
        }

        if ctx.mode.is_execute() {
            let required = plan.policy.required_approvers();
            let signed: BTreeSet<&CircleId> = approvals
                .iter()
                .filter(|a| a.action_hash == plan.action_hash && required.contains(&a.approver))
                .map(|a| &a.approver)
                .collect();
            if signed.len() < plan.policy.threshold() {
                let outstanding = required
                    .iter()
                    .filter(|c| !signed.contains(c))
                    .map(|c| c.as_str().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Ok(StepOutcome::Awaiting(format!(
                    "{} of {} approvals for {}; outstanding: {outstanding}",
                    signed.len(),
                    plan.policy.threshold(),
                    plan.action_hash
                )));
            }
        }

        let now = self.services.clock.now();
        let request = AuthorizationRequest {
            envelope: envelope_for(&ctx, &plan, &approvals, now),
            fields: plan.fields.clone(),
            required_scope: plan.required_scope.clone(),
            artifacts: approvals,
            policy: plan.policy.clone(),
        };
        let grant = self.services.authority.authorize(&request)?;
        slot.state.lock().grant = Some(grant.clone());

        if !ctx.mode.is_execute() {
            let outcome = ExecutionOutcome::new(format!(
                "{}: {} not executed",
                ctx.mode, plan.fields.action_type
            ))
            .with_detail("action_hash", plan.action_hash.as_str());
            let summary = outcome.summary.clone();
            slot.state.lock().outcome = Some(outcome);
            return Ok(StepOutcome::Completed(summary));
        }

        let action_id = plan.fields.action_id.clone();
        let request = ExecutionRequest {
            action_id: action_id.clone(),
            action_hash: plan.action_hash.clone(),
            trace_id: ctx.trace_id.clone(),
            mode: ctx.mode,
            commitment,
            grant,
        };
        set_lifecycle(slot, ActionLifecycle::Executing);
        info!(
            loop_id = %ctx.loop_id,
            action_id = %action_id,
            action_hash = %plan.action_hash,
            "executing action"
        );

        let result = tokio::select! {
            biased;
            _ = abort_signalled(abort_rx) => None,
            result = self.services.executor.execute(&request) => Some(result),
        };

        match result {
            None => {
                warn!(loop_id = %ctx.loop_id, action_id = %action_id, "halting action in flight");
                if let Err(err) = self.services.executor.abort(&action_id).await {
                    warn!(action_id = %action_id, error = %err, "executor abort failed");
                }
                set_lifecycle(slot, ActionLifecycle::Aborted);
                Err(LoopError::Aborted(ctx.loop_id))
            }
            Some(Ok(outcome)) => {
                let summary = outcome.summary.clone();
                let mut state = slot.state.lock();
                if let Some(plan) = state.action.as_mut() {
                    plan.lifecycle = ActionLifecycle::Completed;
                }
                state.outcome = Some(outcome);
                Ok(StepOutcome::Completed(summary))
            }
            Some(Err(err)) => {
                set_lifecycle(slot, ActionLifecycle::Aborted);
                Err(err.into())
            }
        }
    }

    fn plan_action(&self, ctx: &LoopContext, commitment: &Commitment) -> Result<ActionPlan> {
        let fields = ActionFields {
            action_id: ActionId::for_commitment(&commitment.id),
            action_type: commitment.action.action_type.clone(),
            intersection_id: commitment.intersection_id.clone(),
            contract_version: commitment.contract_version,
            mode: ctx.mode,
            scopes: commitment.action.scopes.iter().cloned().collect(),
            parameters: commitment.action.parameters.clone(),
        };
        let mut approvers: Vec<CircleId> = commitment
            .parties
            .iter()
            .filter(|p| **p != ctx.issuer)
            .cloned()
            .collect();
        // A sole party approves its own actions.
        if approvers.is_empty() {
            approvers.push(ctx.issuer.clone());
        }
        let threshold = self.approvals.threshold(ctx.risk_class, approvers.len());
        let policy = ThresholdPolicy::new(approvers, threshold)?;
        Ok(ActionPlan {
            action_hash: compute_action_hash(&fields),
            fields,
            required_scope: commitment.action.required_scope.clone(),
            policy,
            lifecycle: ActionLifecycle::Pending,
        })
    }

    fn finish_aborted(&self, state: &mut LoopState, step: LoopStep) -> Result<()> {
        let reason = state
            .abort_reason
            .clone()
            .unwrap_or_else(|| "aborted".to_string());
        self.emit(
            state,
            AuditEvent::new("loop.aborted")
                .outcome(AuditOutcome::Failed)
                .detail("step", step)
                .detail("reason", &reason),
        )?;
        self.emit(
            state,
            AuditEvent::new("loop.completed")
                .outcome(AuditOutcome::Failed)
                .detail("success", false),
        )?;
        if let Some(plan) = state.action.as_mut() {
            if plan.lifecycle == ActionLifecycle::Executing {
                plan.lifecycle = ActionLifecycle::Aborted;
            }
        }
        state.set_step(step, StepState::Aborted, self.services.clock.now());
        state.status = LoopStatus::Aborted { step, reason };
        warn!(loop_id = %state.context.loop_id, step = %step, "loop aborted");
        Ok(())
    }

    /// Append to the issuer's chain.
    fn emit(&self, state: &LoopState, event: AuditEvent) -> Result<()> {
        let ctx = &state.context;
        self.services.audit.append(
            ctx.issuer.as_str(),
            event
                .circle(&ctx.issuer)
                .intersection(&ctx.intersection_id)
                .subject(ctx.loop_id)
                .trace(&ctx.trace_id),
        )?;
        Ok(())
    }

    fn slot(&self, id: &LoopId) -> Result<Arc<LoopSlot>> {
        self.loops
            .get(id)
            .map(|slot| slot.value().clone())
            .ok_or(LoopError::UnknownLoop(*id))
    }
}

fn envelope_for(
    ctx: &LoopContext,
    plan: &ActionPlan,
    approvals: &[ApprovalArtifact],
    now: DateTime<Utc>,
) -> ExecutionEnvelope {
    let builder = ExecutionEnvelope::builder(
        ctx.trace_id.clone(),
        ctx.issuer.clone(),
        plan.fields.intersection_id.clone(),
    )
    .mode(ctx.mode)
    .contract_version(plan.fields.contract_version);

    if ctx.mode.is_execute() {
        let evidence = approvals
            .iter()
            .find(|a| {
                a.action_hash == plan.action_hash
                    && plan.policy.required_approvers().contains(&a.approver)
            })
            .map(|a| ApprovalEvidence::approved(a.reference()))
            .unwrap_or_default();
        builder
            .scopes(plan.fields.scopes.iter().cloned())
            .approval(evidence)
            .issued_at(now)
    } else {
        // Read paths only ever declare read scopes.
        let reads: BTreeSet<Scope> = plan.fields.scopes.iter().map(Scope::read_projection).collect();
        builder.scopes(reads).issued_at(now)
    }
}

fn executing_action(state: &LoopState) -> Option<ActionId> {
    state
        .action
        .as_ref()
        .filter(|p| p.lifecycle == ActionLifecycle::Executing)
        .map(|p| p.fields.action_id.clone())
}

fn set_lifecycle(slot: &LoopSlot, lifecycle: ActionLifecycle) {
    if let Some(plan) = slot.state.lock().action.as_mut() {
        plan.lifecycle = lifecycle;
    }
}

fn require<T>(value: Option<T>, ctx: &LoopContext, step: LoopStep, what: &'static str) -> Result<T> {
    value.ok_or(LoopError::MissingPrerequisite {
        loop_id: ctx.loop_id,
        step,
        what,
    })
}

/// Resolves once abort has been signalled; never resolves otherwise.
async fn abort_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
