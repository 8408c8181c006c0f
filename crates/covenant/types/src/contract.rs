use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::scope::Scope;

/// Contract version. Amendments bump the minor component monotonically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContractVersion {
    pub major: u32,
    pub minor: u32,
}

impl ContractVersion {
    pub const INITIAL: ContractVersion = ContractVersion { major: 1, minor: 0 };

    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn next_minor(&self) -> Self {
        Self {
            major: self.major,
            minor: self.minor + 1,
        }
    }
}

impl Default for ContractVersion {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl std::fmt::Display for ContractVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The type of a ceiling; a contract holds at most one ceiling per kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CeilingKind {
    MaxDuration,
    TimeWindow,
    SpendCap,
}

/// A numeric or temporal limit on a contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ceiling {
    /// Longest single action, in minutes.
    MaxDuration { minutes: u32 },
    /// Allowed window within a day, minutes after midnight UTC.
    TimeWindow { start_minute: u16, end_minute: u16 },
    /// Spend cap in minor currency units.
    SpendCap { amount_minor: u64, currency: String },
}

impl Ceiling {
    pub fn kind(&self) -> CeilingKind {
        match self {
            Ceiling::MaxDuration { .. } => CeilingKind::MaxDuration,
            Ceiling::TimeWindow { .. } => CeilingKind::TimeWindow,
            Ceiling::SpendCap { .. } => CeilingKind::SpendCap,
        }
    }
}

/// What an amendment to this contract is allowed to touch.
///
/// Amendments always require unanimity; the policy only narrows which
/// deltas may be proposed at all.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendmentPolicy {
    pub allow_scope_additions: bool,
    pub allow_ceiling_changes: bool,
}

impl Default for AmendmentPolicy {
    fn default() -> Self {
        Self {
            allow_scope_additions: true,
            allow_ceiling_changes: true,
        }
    }
}

/// The versioned terms governing an intersection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub version: ContractVersion,
    pub scopes: BTreeSet<Scope>,
    pub ceilings: BTreeMap<CeilingKind, Ceiling>,
    pub amendment_policy: AmendmentPolicy,
}

impl Contract {
    /// A version 1.0 contract granting `scopes`.
    pub fn new(scopes: impl IntoIterator<Item = Scope>) -> Self {
        Self {
            version: ContractVersion::INITIAL,
            scopes: scopes.into_iter().collect(),
            ceilings: BTreeMap::new(),
            amendment_policy: AmendmentPolicy::default(),
        }
    }

    pub fn with_ceiling(mut self, ceiling: Ceiling) -> Self {
        self.ceilings.insert(ceiling.kind(), ceiling);
        self
    }

    pub fn with_amendment_policy(mut self, policy: AmendmentPolicy) -> Self {
        self.amendment_policy = policy;
        self
    }

    pub fn grants(&self, scope: &Scope) -> bool {
        self.scopes.contains(scope)
    }

    pub fn grants_all<'a>(&self, scopes: impl IntoIterator<Item = &'a Scope>) -> bool {
        scopes.into_iter().all(|s| self.grants(s))
    }

    pub fn ceiling(&self, kind: CeilingKind) -> Option<&Ceiling> {
        self.ceilings.get(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_bump_is_monotonic() {
        let v = ContractVersion::INITIAL;
        assert_eq!(v.next_minor(), ContractVersion::new(1, 1));
        assert!(v.next_minor() > v);
        assert_eq!(v.next_minor().to_string(), "1.1");
    }

    #[test]
    fn one_ceiling_per_kind() {
        let contract = Contract::new(vec![Scope::new("calendar:write")])
            .with_ceiling(Ceiling::MaxDuration { minutes: 30 })
            .with_ceiling(Ceiling::MaxDuration { minutes: 60 });
        assert_eq!(contract.ceilings.len(), 1);
        assert_eq!(
            contract.ceiling(CeilingKind::MaxDuration),
            Some(&Ceiling::MaxDuration { minutes: 60 })
        );
    }

    #[test]
    fn contract_serializes_with_ceiling_map() {
        let contract = Contract::new(vec![Scope::new("calendar:read")]).with_ceiling(
            Ceiling::SpendCap {
                amount_minor: 500,
                currency: "EUR".into(),
            },
        );
        let json = serde_json::to_string(&contract).unwrap();
        let restored: Contract = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, contract);
    }
}
