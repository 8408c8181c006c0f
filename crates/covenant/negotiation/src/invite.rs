use chrono::{DateTime, Duration, SecondsFormat, Utc};
use covenant_authority::{PayloadSigner, SignatureError, SignatureVerifier};
use covenant_types::{Ceiling, CircleId, Contract, IntersectionId, InviteId, Scope};
use serde::{Deserialize, Serialize};

/// Signed, single-use invitation into an intersection.
///
/// When the intersection does not exist yet, accepting the invite creates it
/// with `contract` at version 1.0 and the inviter and invitee as parties.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteToken {
    pub id: InviteId,
    pub intersection_id: IntersectionId,
    pub inviter: CircleId,
    pub invitee: CircleId,
    pub contract: Contract,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub signature: String,
}

impl InviteToken {
    pub fn issue(
        signer: &dyn PayloadSigner,
        intersection_id: IntersectionId,
        invitee: CircleId,
        contract: Contract,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let mut token = Self {
            id: InviteId::new(),
            intersection_id,
            inviter: signer.circle().clone(),
            invitee,
            contract,
            issued_at,
            expires_at: issued_at + ttl,
            signature: String::new(),
        };
        token.signature = signer.sign(&token.signing_payload());
        token
    }

    pub fn signing_payload(&self) -> Vec<u8> {
        let scopes = self
            .contract
            .scopes
            .iter()
            .map(Scope::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let ceilings = self
            .contract
            .ceilings
            .values()
            .map(ceiling_field)
            .collect::<Vec<_>>()
            .join(";");
        format!(
            "invite_id={}\nintersection_id={}\ninviter={}\ninvitee={}\ncontract_version={}\nscopes={}\nceilings={}\namendments={},{}\nissued_at={}\nexpires_at={}\n",
            self.id.0,
            self.intersection_id.as_str(),
            self.inviter.as_str(),
            self.invitee.as_str(),
            self.contract.version,
            scopes,
            ceilings,
            self.contract.amendment_policy.allow_scope_additions,
            self.contract.amendment_policy.allow_ceiling_changes,
            self.issued_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.expires_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
        )
        .into_bytes()
    }

    pub fn verify(&self, verifier: &dyn SignatureVerifier) -> Result<(), SignatureError> {
        verifier.verify(&self.inviter, &self.signing_payload(), &self.signature)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

fn ceiling_field(ceiling: &Ceiling) -> String {
    match ceiling {
        Ceiling::MaxDuration { minutes } => format!("max_duration:{minutes}"),
        Ceiling::TimeWindow {
            start_minute,
            end_minute,
        } => format!("time_window:{start_minute}-{end_minute}"),
        Ceiling::SpendCap {
            amount_minor,
            currency,
        } => format!("spend_cap:{amount_minor}:{currency}"),
    }
}
