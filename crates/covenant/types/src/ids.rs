use serde::{Deserialize, Serialize};

/// Strong typed IDs used throughout Covenant.
///
/// Circle, intersection, action and trace ids are caller-chosen strings (they
/// cross process and organisational boundaries). Proposal, commitment,
/// approval, invite and loop ids are minted locally as UUIDv4.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Raw value, as used in canonical hash inputs.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub uuid::Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

string_id!(
    /// An identity boundary: a person, a household, or a delegated agent.
    CircleId,
    "circle"
);
string_id!(
    /// A governed relationship between two or more circles.
    IntersectionId,
    "ix"
);
string_id!(
    /// One attempt to realize a commitment.
    ActionId,
    "act"
);
string_id!(
    /// Correlates every envelope, audit entry and log line of one loop run.
    TraceId,
    "trace"
);

uuid_id!(ProposalId, "prop");
uuid_id!(CommitmentId, "cmt");
uuid_id!(ApprovalId, "apr");
uuid_id!(InviteId, "inv");
uuid_id!(LoopId, "loop");

impl TraceId {
    /// Mint a fresh random trace id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl ActionId {
    /// The action id used for the first attempt at a commitment.
    pub fn for_commitment(commitment: &CommitmentId) -> Self {
        Self(format!("{}", commitment.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_are_unique() {
        assert_ne!(ProposalId::new(), ProposalId::new());
        assert_ne!(LoopId::new(), LoopId::new());
    }

    #[test]
    fn display_is_prefixed_but_as_str_is_raw() {
        let circle = CircleId::new("alice");
        assert_eq!(circle.to_string(), "circle:alice");
        assert_eq!(circle.as_str(), "alice");
    }

    #[test]
    fn blank_string_ids_are_empty() {
        assert!(CircleId::new("  ").is_empty());
        assert!(!IntersectionId::new("ix-1").is_empty());
    }

    #[test]
    fn string_ids_serialize_transparently() {
        let json = serde_json::to_string(&CircleId::new("bob")).unwrap();
        assert_eq!(json, "\"bob\"");
    }
}
