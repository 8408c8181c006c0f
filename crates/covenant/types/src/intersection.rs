use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contract::Contract;
use crate::ids::{CircleId, IntersectionId};

/// A governed relationship between two or more circles.
///
/// Intersections are never deleted. A finalized amendment replaces the live
/// contract and pushes the previous one onto `superseded`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intersection {
    pub id: IntersectionId,
    pub parties: BTreeSet<CircleId>,
    pub contract: Contract,
    pub superseded: Vec<Contract>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Intersection {
    pub fn new(
        id: IntersectionId,
        parties: impl IntoIterator<Item = CircleId>,
        contract: Contract,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            parties: parties.into_iter().collect(),
            contract,
            superseded: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_party(&self, circle: &CircleId) -> bool {
        self.parties.contains(circle)
    }

    /// Every party except `circle`.
    pub fn counterparties(&self, circle: &CircleId) -> Vec<CircleId> {
        self.parties.iter().filter(|p| *p != circle).cloned().collect()
    }

    /// Install a new contract, retaining the old one.
    pub fn supersede_contract(&mut self, next: Contract, now: DateTime<Utc>) {
        let previous = std::mem::replace(&mut self.contract, next);
        self.superseded.push(previous);
        self.updated_at = now;
    }
}
