use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use covenant_types::{
    Ceiling, CeilingKind, CircleId, CommitmentId, Contract, ContractVersion, IntersectionId,
    ProposalId, Scope,
};
use serde::{Deserialize, Serialize};

/// What a commitment agrees to do.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub action_type: String,
    pub scopes: BTreeSet<Scope>,
    /// The write scope the action's domain requires at execution time.
    pub required_scope: Scope,
    pub parameters: BTreeMap<String, String>,
}

impl ActionSpec {
    pub fn new(action_type: impl Into<String>, required_scope: impl Into<Scope>) -> Self {
        let required_scope = required_scope.into();
        Self {
            action_type: action_type.into(),
            scopes: BTreeSet::from([required_scope.clone()]),
            required_scope,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<Scope>) -> Self {
        self.scopes.insert(scope.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentTerms {
    pub action: ActionSpec,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CeilingChange {
    Set { ceiling: Ceiling },
    Remove { kind: CeilingKind },
}

/// Delta against the live contract.
///
/// Applied removals first, then additions; ceiling changes in order, so the
/// last change to a ceiling kind wins.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendmentTerms {
    /// Contract version this delta was written against.
    pub base_version: ContractVersion,
    pub add_scopes: BTreeSet<Scope>,
    pub remove_scopes: BTreeSet<Scope>,
    pub ceiling_changes: Vec<CeilingChange>,
}

impl AmendmentTerms {
    pub fn against(base_version: ContractVersion) -> Self {
        Self {
            base_version,
            ..Self::default()
        }
    }

    pub fn add_scope(mut self, scope: impl Into<Scope>) -> Self {
        self.add_scopes.insert(scope.into());
        self
    }

    pub fn remove_scope(mut self, scope: impl Into<Scope>) -> Self {
        self.remove_scopes.insert(scope.into());
        self
    }

    pub fn set_ceiling(mut self, ceiling: Ceiling) -> Self {
        self.ceiling_changes.push(CeilingChange::Set { ceiling });
        self
    }

    pub fn remove_ceiling(mut self, kind: CeilingKind) -> Self {
        self.ceiling_changes.push(CeilingChange::Remove { kind });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.add_scopes.is_empty() && self.remove_scopes.is_empty() && self.ceiling_changes.is_empty()
    }

    /// The contract that results from applying this delta to `live`.
    pub fn apply(&self, live: &Contract) -> Contract {
        let mut next = live.clone();
        next.version = live.version.next_minor();
        for scope in &self.remove_scopes {
            next.scopes.remove(scope);
        }
        next.scopes.extend(self.add_scopes.iter().cloned());
        for change in &self.ceiling_changes {
            match change {
                CeilingChange::Set { ceiling } => {
                    next.ceilings.insert(ceiling.kind(), ceiling.clone());
                }
                CeilingChange::Remove { kind } => {
                    next.ceilings.remove(kind);
                }
            }
        }
        next
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProposalTerms {
    Amendment(AmendmentTerms),
    Commitment(CommitmentTerms),
}

impl ProposalTerms {
    pub fn kind(&self) -> ProposalKind {
        match self {
            ProposalTerms::Amendment(_) => ProposalKind::Amendment,
            ProposalTerms::Commitment(_) => ProposalKind::Commitment,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    Amendment,
    Commitment,
}

impl std::fmt::Display for ProposalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProposalKind::Amendment => f.write_str("amendment"),
            ProposalKind::Commitment => f.write_str("commitment"),
        }
    }
}

/// ```text
/// pending -> countered | accepted | rejected
/// countered -> superseded            (when a descendant is finalized)
/// accepted -> finalized | countered | rejected
/// ```
/// `finalized`, `rejected` and `superseded` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalState {
    Pending,
    Countered,
    Accepted,
    Rejected,
    Finalized,
    Superseded,
}

impl ProposalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalState::Pending => "pending",
            ProposalState::Countered => "countered",
            ProposalState::Accepted => "accepted",
            ProposalState::Rejected => "rejected",
            ProposalState::Finalized => "finalized",
            ProposalState::Superseded => "superseded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProposalState::Rejected | ProposalState::Finalized | ProposalState::Superseded
        )
    }

    /// Still open to acceptance, rejection or finalization.
    pub fn is_open(&self) -> bool {
        matches!(self, ProposalState::Pending | ProposalState::Accepted)
    }
}

impl std::fmt::Display for ProposalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub issuer: CircleId,
    pub intersection_id: IntersectionId,
    pub terms: ProposalTerms,
    pub state: ProposalState,
    /// One flag per party at submission time.
    pub acceptances: BTreeMap<CircleId, bool>,
    /// Reasons given by rejecting parties.
    pub rejections: BTreeMap<CircleId, String>,
    pub parent: Option<ProposalId>,
    pub active_counter: Option<ProposalId>,
    /// Every counter ever made to this proposal, oldest first.
    pub counters: Vec<ProposalId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    pub fn kind(&self) -> ProposalKind {
        self.terms.kind()
    }

    pub fn all_accepted(&self) -> bool {
        !self.acceptances.is_empty() && self.acceptances.values().all(|v| *v)
    }

    pub fn outstanding(&self) -> Vec<CircleId> {
        self.acceptances
            .iter()
            .filter(|(_, accepted)| !**accepted)
            .map(|(circle, _)| circle.clone())
            .collect()
    }
}

/// Immutable result of a finalized commitment proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub id: CommitmentId,
    pub proposal_id: ProposalId,
    pub issuer: CircleId,
    pub intersection_id: IntersectionId,
    /// Contract version in force when the commitment was formed.
    pub contract_version: ContractVersion,
    pub action: ActionSpec,
    pub parties: BTreeSet<CircleId>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// What a successful finalize produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Finalized {
    Amended(Contract),
    Committed(Commitment),
}
