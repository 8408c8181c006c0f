//! Negotiation-side step delegates (intent through commitment).

use std::sync::Arc;

use covenant_negotiation::{
    Commitment, CommitmentTerms, Finalized, NegotiationEngine, NegotiationError, ProposalState,
    ProposalTerms,
};
use covenant_types::{Clock, Intersection, ProposalId};
use serde::{Deserialize, Serialize};

use crate::context::{LoopContext, LoopIntent};

/// How a step ended when it did not fail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "text", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed(String),
    /// Blocked on other parties; the loop pauses at this step.
    Awaiting(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Negotiated {
    /// The proposal the loop now follows (a counter replaces its parent).
    pub proposal: ProposalId,
    pub outcome: StepOutcome,
}

pub trait NegotiationDelegate: Send + Sync {
    fn check_intent(&self, intent: &LoopIntent) -> Result<String, NegotiationError>;

    fn discover(&self, ctx: &LoopContext, intent: &LoopIntent) -> Result<Intersection, NegotiationError>;

    /// Submit the intent as a commitment proposal, or report progress on the
    /// one already submitted.
    fn negotiate(
        &self,
        ctx: &LoopContext,
        intent: &LoopIntent,
        current: Option<ProposalId>,
    ) -> Result<Negotiated, NegotiationError>;

    fn commit(&self, ctx: &LoopContext, proposal: &ProposalId) -> Result<Commitment, NegotiationError>;
}

/// Drives steps 1 to 4 through a [`NegotiationEngine`].
pub struct GovernanceNegotiator {
    engine: Arc<NegotiationEngine>,
    clock: Arc<dyn Clock>,
}

impl GovernanceNegotiator {
    pub fn new(engine: Arc<NegotiationEngine>, clock: Arc<dyn Clock>) -> Self {
        Self { engine, clock }
    }

    pub fn engine(&self) -> &Arc<NegotiationEngine> {
        &self.engine
    }
}

impl NegotiationDelegate for GovernanceNegotiator {
    fn check_intent(&self, intent: &LoopIntent) -> Result<String, NegotiationError> {
        let action = &intent.action;
        if intent.issuer.is_empty() || intent.intersection_id.is_empty() {
            return Err(NegotiationError::InvalidTerms("issuer and intersection are required".into()));
        }
        if action.action_type.trim().is_empty() {
            return Err(NegotiationError::InvalidTerms("action type is empty".into()));
        }
        if !action.scopes.contains(&action.required_scope) {
            return Err(NegotiationError::InvalidTerms(
                "required scope is not among the action scopes".into(),
            ));
        }
        if intent.commitment_ttl_minutes <= 0 {
            return Err(NegotiationError::InvalidTerms("commitment window must be positive".into()));
        }
        Ok(format!(
            "{} {} ({} scopes)",
            intent.mode,
            action.action_type,
            action.scopes.len()
        ))
    }

    fn discover(&self, _ctx: &LoopContext, intent: &LoopIntent) -> Result<Intersection, NegotiationError> {
        let intersection = self.engine.intersection(&intent.intersection_id)?;
        if !intersection.is_party(&intent.issuer) {
            return Err(NegotiationError::NotAParty {
                circle: intent.issuer.clone(),
                intersection: intersection.id.clone(),
            });
        }
        if let Some(missing) = intent
            .action
            .scopes
            .iter()
            .find(|s| !intersection.contract.grants(s))
        {
            return Err(NegotiationError::ScopeNotGranted(missing.clone()));
        }
        Ok(intersection)
    }

    fn negotiate(
        &self,
        ctx: &LoopContext,
        intent: &LoopIntent,
        current: Option<ProposalId>,
    ) -> Result<Negotiated, NegotiationError> {
        let id = match current {
            Some(id) => id,
            None => {
                let terms = ProposalTerms::Commitment(CommitmentTerms {
                    action: intent.action.clone(),
                    expires_at: self.clock.now() + intent.commitment_ttl(),
                });
                self.engine
                    .submit_proposal(&ctx.issuer, &ctx.intersection_id, terms)?
                    .id
            }
        };

        // Follow counters down to the live proposal.
        let mut proposal = self.engine.proposal(&id)?;
        while proposal.state == ProposalState::Countered {
            let Some(counter) = proposal.active_counter else {
                break;
            };
            proposal = self.engine.proposal(&counter)?;
        }

        let outcome = match proposal.state {
            ProposalState::Accepted => StepOutcome::Completed(format!(
                "{} parties accepted {}",
                proposal.acceptances.len(),
                proposal.id
            )),
            ProposalState::Pending => {
                let waiting = proposal
                    .outstanding()
                    .iter()
                    .map(|c| c.as_str().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                StepOutcome::Awaiting(format!("awaiting acceptance of {} from {waiting}", proposal.id))
            }
            state => {
                return Err(NegotiationError::InvalidTransition {
                    proposal: proposal.id,
                    state,
                    action: "negotiate",
                })
            }
        };
        Ok(Negotiated {
            proposal: proposal.id,
            outcome,
        })
    }

    fn commit(&self, ctx: &LoopContext, proposal: &ProposalId) -> Result<Commitment, NegotiationError> {
        match self.engine.finalize(proposal, &ctx.issuer)? {
            Finalized::Committed(commitment) => Ok(commitment),
            Finalized::Amended(_) => Err(NegotiationError::InvalidTerms(
                "loop proposals must be commitments".into(),
            )),
        }
    }
}
