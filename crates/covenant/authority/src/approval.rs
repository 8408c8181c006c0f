use std::collections::BTreeSet;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use covenant_types::{ApprovalId, CircleId, Scope};
use serde::{Deserialize, Serialize};

use crate::action::ActionHash;
use crate::signer::PayloadSigner;

/// One circle's signed consent to exactly one action hash.
///
/// Valid only for the named hash, only inside `[issued_at, expires_at]`,
/// and only once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalArtifact {
    pub id: ApprovalId,
    pub action_hash: ActionHash,
    pub approver: CircleId,
    pub approved_scopes: BTreeSet<Scope>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Hex ed25519 signature over [`ApprovalArtifact::signing_payload`].
    pub signature: String,
}

impl ApprovalArtifact {
    /// Issue and sign an approval valid for `ttl` from `issued_at`.
    pub fn issue(
        signer: &dyn PayloadSigner,
        action_hash: ActionHash,
        approved_scopes: impl IntoIterator<Item = Scope>,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let mut artifact = Self {
            id: ApprovalId::new(),
            action_hash,
            approver: signer.circle().clone(),
            approved_scopes: approved_scopes.into_iter().collect(),
            issued_at,
            expires_at: issued_at + ttl,
            signature: String::new(),
        };
        artifact.signature = signer.sign(&artifact.signing_payload());
        artifact
    }

    /// Bytes covered by the signature: every field except the signature itself.
    pub fn signing_payload(&self) -> Vec<u8> {
        let scopes = self
            .approved_scopes
            .iter()
            .map(Scope::as_str)
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "approval_id={}\naction_hash={}\napprover={}\nscopes={}\nissued_at={}\nexpires_at={}\n",
            self.id.0,
            self.action_hash,
            self.approver.as_str(),
            scopes,
            self.issued_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.expires_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
        )
        .into_bytes()
    }

    /// The reference an envelope carries for this artifact.
    pub fn reference(&self) -> String {
        self.id.0.to_string()
    }

    pub fn covers(&self, scopes: &[Scope]) -> bool {
        scopes.iter().all(|s| self.approved_scopes.contains(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::signer::{Ed25519Keyring, Ed25519Signer, SignatureVerifier};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).unwrap()
    }

    #[test]
    fn issued_artifact_verifies_and_any_edit_breaks_it() {
        let signer = Ed25519Signer::from_secret(CircleId::new("bob"), &[3u8; 32]);
        let keyring = Ed25519Keyring::new();
        keyring.register_signer(&signer);

        let artifact = ApprovalArtifact::issue(
            &signer,
            ActionHash::from_hex("ab".repeat(32)),
            vec![Scope::new("calendar:write")],
            t0(),
            Duration::minutes(15),
        );
        assert!(keyring
            .verify(&artifact.approver, &artifact.signing_payload(), &artifact.signature)
            .is_ok());

        let mut widened = artifact.clone();
        widened.expires_at += Duration::days(1);
        assert!(keyring
            .verify(&widened.approver, &widened.signing_payload(), &widened.signature)
            .is_err());
    }

    #[test]
    fn artifact_survives_json_transport() {
        let signer = Ed25519Signer::from_secret(CircleId::new("bob"), &[3u8; 32]);
        let keyring = Ed25519Keyring::new();
        keyring.register_signer(&signer);
        let artifact = ApprovalArtifact::issue(
            &signer,
            ActionHash::from_hex("cd".repeat(32)),
            vec![Scope::new("calendar:write")],
            t0(),
            Duration::minutes(5),
        );

        let wire = serde_json::to_string(&artifact).unwrap();
        let received: ApprovalArtifact = serde_json::from_str(&wire).unwrap();
        assert_eq!(received, artifact);
        assert!(keyring
            .verify(&received.approver, &received.signing_payload(), &received.signature)
            .is_ok());
    }

    #[test]
    fn covers_requires_every_scope() {
        let signer = Ed25519Signer::from_secret(CircleId::new("bob"), &[3u8; 32]);
        let artifact = ApprovalArtifact::issue(
            &signer,
            ActionHash::from_hex("00"),
            vec![Scope::new("calendar:write")],
            t0(),
            Duration::minutes(1),
        );
        assert!(artifact.covers(&[Scope::new("calendar:write")]));
        assert!(!artifact.covers(&[Scope::new("calendar:write"), Scope::new("mail:send")]));
    }
}
