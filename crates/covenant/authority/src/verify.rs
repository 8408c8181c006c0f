use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use covenant_types::{ApprovalId, CircleId};
use serde::{Deserialize, Serialize};

use crate::action::ActionHash;
use crate::approval::ApprovalArtifact;
use crate::error::{AuthorityError, Result};
use crate::registry::RevocationList;
use crate::signer::{SignatureError, SignatureVerifier};

/// Why one approval artifact did not count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    HashMismatch,
    Expired,
    NotYetValid,
    UnknownSigner,
    BadSignature,
    Revoked,
    NotRequiredApprover,
    ScopesNotCovered,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::HashMismatch => "hash_mismatch",
            RejectionReason::Expired => "expired",
            RejectionReason::NotYetValid => "not_yet_valid",
            RejectionReason::UnknownSigner => "unknown_signer",
            RejectionReason::BadSignature => "bad_signature",
            RejectionReason::Revoked => "revoked",
            RejectionReason::NotRequiredApprover => "not_required_approver",
            RejectionReason::ScopesNotCovered => "scopes_not_covered",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which circles must approve, and how many of them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    required_approvers: BTreeSet<CircleId>,
    threshold: usize,
}

impl ThresholdPolicy {
    pub fn new(
        required_approvers: impl IntoIterator<Item = CircleId>,
        threshold: usize,
    ) -> Result<Self> {
        let required_approvers: BTreeSet<CircleId> = required_approvers.into_iter().collect();
        if threshold == 0 {
            return Err(AuthorityError::InvalidPolicy("threshold must be at least 1".into()));
        }
        if threshold > required_approvers.len() {
            return Err(AuthorityError::InvalidPolicy(format!(
                "threshold {threshold} exceeds {} required approvers",
                required_approvers.len()
            )));
        }
        Ok(Self {
            required_approvers,
            threshold,
        })
    }

    /// Every required approver must sign.
    pub fn unanimous(required_approvers: impl IntoIterator<Item = CircleId>) -> Result<Self> {
        let required: BTreeSet<CircleId> = required_approvers.into_iter().collect();
        let n = required.len();
        Self::new(required, n)
    }

    pub fn required_approvers(&self) -> &BTreeSet<CircleId> {
        &self.required_approvers
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

/// One artifact that did not count toward the threshold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedApproval {
    pub approval_id: ApprovalId,
    pub approver: CircleId,
    pub reason: RejectionReason,
}

/// Partition of presented artifacts into valid and invalid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdReport {
    pub valid: Vec<ApprovalId>,
    pub invalid: Vec<RejectedApproval>,
    /// Distinct required approvers with at least one valid artifact.
    pub approvers: BTreeSet<CircleId>,
    pub threshold: usize,
    pub satisfied: bool,
}

/// Checks artifacts against a hash, a clock reading, signatures and revocations.
pub struct ApprovalVerifier {
    signatures: Arc<dyn SignatureVerifier>,
    revocations: Arc<RevocationList>,
}

impl ApprovalVerifier {
    pub fn new(signatures: Arc<dyn SignatureVerifier>, revocations: Arc<RevocationList>) -> Self {
        Self {
            signatures,
            revocations,
        }
    }

    pub fn revocations(&self) -> &Arc<RevocationList> {
        &self.revocations
    }

    /// Valid iff not revoked, bound to `action_hash`, `issued_at <= now <= expires_at`,
    /// and the approver's signature verifies.
    pub fn verify_approval(
        &self,
        artifact: &ApprovalArtifact,
        action_hash: &ActionHash,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), RejectionReason> {
        if self.revocations.is_revoked(&artifact.id) {
            return Err(RejectionReason::Revoked);
        }
        if &artifact.action_hash != action_hash {
            return Err(RejectionReason::HashMismatch);
        }
        if now < artifact.issued_at {
            return Err(RejectionReason::NotYetValid);
        }
        if now > artifact.expires_at {
            return Err(RejectionReason::Expired);
        }
        self.verify_signature(artifact)
    }

    /// The artifact was signed by the circle it names as approver.
    pub fn verify_signature(
        &self,
        artifact: &ApprovalArtifact,
    ) -> std::result::Result<(), RejectionReason> {
        self.signatures
            .verify(
                &artifact.approver,
                &artifact.signing_payload(),
                &artifact.signature,
            )
            .map_err(|err| match err {
                SignatureError::UnknownSigner(_) => RejectionReason::UnknownSigner,
                SignatureError::BadSignature | SignatureError::Malformed(_) => {
                    RejectionReason::BadSignature
                }
            })
    }

    /// Count distinct required approvers with a valid artifact.
    ///
    /// A second valid artifact from an approver already counted is kept in
    /// `valid` but adds nothing.
    pub fn verify_threshold(
        &self,
        artifacts: &[ApprovalArtifact],
        policy: &ThresholdPolicy,
        action_hash: &ActionHash,
        now: DateTime<Utc>,
    ) -> ThresholdReport {
        let mut report = ThresholdReport {
            valid: Vec::new(),
            invalid: Vec::new(),
            approvers: BTreeSet::new(),
            threshold: policy.threshold,
            satisfied: false,
        };

        for artifact in artifacts {
            let outcome = if policy.required_approvers.contains(&artifact.approver) {
                self.verify_approval(artifact, action_hash, now)
            } else {
                Err(RejectionReason::NotRequiredApprover)
            };
            match outcome {
                Ok(()) => {
                    report.valid.push(artifact.id);
                    report.approvers.insert(artifact.approver.clone());
                }
                Err(reason) => report.invalid.push(RejectedApproval {
                    approval_id: artifact.id,
                    approver: artifact.approver.clone(),
                    reason,
                }),
            }
        }

        report.satisfied = report.approvers.len() >= policy.threshold;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{Ed25519Keyring, Ed25519Signer};
    use chrono::{Duration, TimeZone};
    use covenant_types::Scope;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).unwrap()
    }

    struct Fixture {
        verifier: ApprovalVerifier,
        alice: Ed25519Signer,
        bob: Ed25519Signer,
        carol: Ed25519Signer,
        revocations: Arc<RevocationList>,
    }

    fn fixture() -> Fixture {
        let keyring = Arc::new(Ed25519Keyring::new());
        let alice = Ed25519Signer::from_secret(CircleId::new("alice"), &[1u8; 32]);
        let bob = Ed25519Signer::from_secret(CircleId::new("bob"), &[2u8; 32]);
        let carol = Ed25519Signer::from_secret(CircleId::new("carol"), &[3u8; 32]);
        keyring.register_signer(&alice);
        keyring.register_signer(&bob);
        let revocations = Arc::new(RevocationList::new());
        Fixture {
            verifier: ApprovalVerifier::new(keyring, revocations.clone()),
            alice,
            bob,
            carol,
            revocations,
        }
    }

    fn hash(tag: &str) -> ActionHash {
        ActionHash::from_hex(tag.repeat(32))
    }

    fn approve(signer: &Ed25519Signer, h: &ActionHash, now: DateTime<Utc>) -> ApprovalArtifact {
        ApprovalArtifact::issue(
            signer,
            h.clone(),
            vec![Scope::new("calendar:write")],
            now,
            Duration::minutes(10),
        )
    }

    #[test]
    fn approval_for_one_hash_fails_for_another() {
        let f = fixture();
        let now = t0();
        let artifact = approve(&f.bob, &hash("aa"), now);
        assert_eq!(f.verifier.verify_approval(&artifact, &hash("aa"), now), Ok(()));
        assert_eq!(
            f.verifier.verify_approval(&artifact, &hash("bb"), now),
            Err(RejectionReason::HashMismatch)
        );
    }

    #[test]
    fn approval_expires() {
        let f = fixture();
        let now = t0();
        let artifact = approve(&f.bob, &hash("aa"), now);
        assert_eq!(
            f.verifier
                .verify_approval(&artifact, &hash("aa"), now + Duration::minutes(10)),
            Ok(())
        );
        assert_eq!(
            f.verifier.verify_approval(
                &artifact,
                &hash("aa"),
                now + Duration::minutes(10) + Duration::nanoseconds(1)
            ),
            Err(RejectionReason::Expired)
        );
        assert_eq!(
            f.verifier
                .verify_approval(&artifact, &hash("aa"), now - Duration::seconds(1)),
            Err(RejectionReason::NotYetValid)
        );
    }

    #[test]
    fn unknown_signer_and_tampered_signature() {
        let f = fixture();
        let now = t0();
        let from_carol = approve(&f.carol, &hash("aa"), now);
        assert_eq!(
            f.verifier.verify_approval(&from_carol, &hash("aa"), now),
            Err(RejectionReason::UnknownSigner)
        );

        let mut forged = approve(&f.bob, &hash("aa"), now);
        forged.approver = CircleId::new("alice");
        assert_eq!(
            f.verifier.verify_approval(&forged, &hash("aa"), now),
            Err(RejectionReason::BadSignature)
        );
    }

    #[test]
    fn revoked_approval_is_rejected() {
        let f = fixture();
        let now = t0();
        let artifact = approve(&f.bob, &hash("aa"), now);
        f.revocations
            .revoke(
                artifact.id,
                crate::registry::Revocation {
                    revoked_by: CircleId::new("bob"),
                    reason: "no".into(),
                    revoked_at: now,
                },
            )
            .unwrap();
        assert_eq!(
            f.verifier.verify_approval(&artifact, &hash("aa"), now),
            Err(RejectionReason::Revoked)
        );
    }

    #[test]
    fn threshold_counts_distinct_required_approvers_only() {
        let f = fixture();
        let now = t0();
        let h = hash("aa");
        let policy =
            ThresholdPolicy::new(vec![CircleId::new("alice"), CircleId::new("bob")], 2).unwrap();

        let artifacts = vec![
            approve(&f.bob, &h, now),
            approve(&f.bob, &h, now),
            approve(&f.carol, &h, now),
            approve(&f.alice, &hash("cc"), now),
        ];
        let report = f.verifier.verify_threshold(&artifacts, &policy, &h, now);

        assert!(!report.satisfied);
        assert_eq!(report.valid.len(), 2);
        assert_eq!(report.approvers.len(), 1);
        let reasons: Vec<_> = report.invalid.iter().map(|r| r.reason.clone()).collect();
        assert_eq!(
            reasons,
            vec![RejectionReason::NotRequiredApprover, RejectionReason::HashMismatch]
        );

        let mut with_alice = artifacts;
        with_alice.push(approve(&f.alice, &h, now));
        assert!(f.verifier.verify_threshold(&with_alice, &policy, &h, now).satisfied);
    }

    #[test]
    fn policy_bounds() {
        let two = vec![CircleId::new("a"), CircleId::new("b")];
        assert!(ThresholdPolicy::new(two.clone(), 0).is_err());
        assert!(ThresholdPolicy::new(two.clone(), 3).is_err());
        assert_eq!(ThresholdPolicy::unanimous(two).unwrap().threshold(), 2);
    }
}
