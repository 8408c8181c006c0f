//! Property tests: an action hash depends on exactly the fields it binds.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use covenant_authority::{
    compute_action_hash, ActionFields, ApprovalArtifact, ApprovalVerifier, Ed25519Keyring,
    Ed25519Signer, RejectionReason, RevocationList,
};
use covenant_conformance::{bob, epoch};
use covenant_types::{ActionId, ContractVersion, IntersectionId, RunMode, Scope};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn arb_mode() -> impl Strategy<Value = RunMode> {
    prop_oneof![
        Just(RunMode::SuggestOnly),
        Just(RunMode::Simulate),
        Just(RunMode::Execute),
    ]
}

fn arb_fields() -> impl Strategy<Value = ActionFields> {
    (
        "[a-z0-9-]{1,12}",
        "[a-z]{1,8}\\.[a-z_]{1,10}",
        "[a-z]{1,10}",
        (0u32..4, 0u32..10),
        arb_mode(),
        prop::collection::vec("[a-z]{1,6}:(read|write)", 1..5),
        prop::collection::btree_map("[a-z_]{1,8}", "[ -~]{0,16}", 0..5),
    )
        .prop_map(
            |(id, action_type, ix, (major, minor), mode, scopes, parameters)| ActionFields {
                action_id: ActionId::new(id),
                action_type,
                intersection_id: IntersectionId::new(ix),
                contract_version: ContractVersion::new(major, minor),
                mode,
                scopes: scopes.into_iter().map(Scope::new).collect(),
                parameters,
            },
        )
}

/// One single-field edit that must move the hash.
#[derive(Clone, Debug)]
enum Edit {
    ActionId,
    ActionType,
    Intersection,
    ContractVersion,
    Mode,
    AddScope,
    ParameterValue,
    AddParameter,
}

fn arb_edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        Just(Edit::ActionId),
        Just(Edit::ActionType),
        Just(Edit::Intersection),
        Just(Edit::ContractVersion),
        Just(Edit::Mode),
        Just(Edit::AddScope),
        Just(Edit::ParameterValue),
        Just(Edit::AddParameter),
    ]
}

fn apply(edit: &Edit, fields: &ActionFields) -> ActionFields {
    let mut out = fields.clone();
    match edit {
        Edit::ActionId => out.action_id = ActionId::new(format!("{}-2", fields.action_id.as_str())),
        Edit::ActionType => out.action_type.push('x'),
        Edit::Intersection => {
            out.intersection_id = IntersectionId::new(format!("{}x", fields.intersection_id.as_str()))
        }
        Edit::ContractVersion => out.contract_version = fields.contract_version.next_minor(),
        Edit::Mode => {
            out.mode = match fields.mode {
                RunMode::Execute => RunMode::Simulate,
                _ => RunMode::Execute,
            }
        }
        // Generated scopes never contain a digit.
        Edit::AddScope => out.scopes.push(Scope::new("extra0:write")),
        Edit::ParameterValue => match out.parameters.iter_mut().next() {
            Some((_, value)) => value.push('!'),
            None => {
                out.parameters.insert("k".into(), "v".into());
            }
        },
        // Generated keys never contain a digit.
        Edit::AddParameter => {
            out.parameters.insert("key0".into(), String::new());
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn hash_is_lowercase_sha256_hex(fields in arb_fields()) {
        let hash = compute_action_hash(&fields);
        prop_assert_eq!(hash.as_str().len(), 64);
        prop_assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn scope_and_parameter_order_do_not_matter(fields in arb_fields(), seed in any::<u64>()) {
        let mut shuffled = fields.clone();
        let n = shuffled.scopes.len();
        shuffled.scopes.rotate_left((seed as usize) % n);
        if seed % 2 == 0 {
            shuffled.scopes.reverse();
        }
        // Duplicates collapse in the canonical form.
        if let Some(first) = fields.scopes.first() {
            shuffled.scopes.push(first.clone());
        }
        let rebuilt: BTreeMap<String, String> = fields
            .parameters
            .iter()
            .rev()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        shuffled.parameters = rebuilt;

        prop_assert_eq!(compute_action_hash(&fields), compute_action_hash(&shuffled));
    }

    #[test]
    fn any_single_field_edit_changes_the_hash(fields in arb_fields(), edit in arb_edit()) {
        let edited = apply(&edit, &fields);
        prop_assert_ne!(
            compute_action_hash(&fields),
            compute_action_hash(&edited),
            "edit {:?} did not move the hash",
            edit
        );
    }

    #[test]
    fn approval_only_verifies_for_its_own_hash(
        fields in arb_fields(),
        edit in arb_edit(),
        minutes in 1i64..120,
    ) {
        let keyring = Arc::new(Ed25519Keyring::new());
        let signer = Ed25519Signer::from_secret(bob(), &[2u8; 32]);
        keyring.register_signer(&signer);
        let verifier = ApprovalVerifier::new(keyring, Arc::new(RevocationList::new()));

        let hash = compute_action_hash(&fields);
        let artifact = ApprovalArtifact::issue(
            &signer,
            hash.clone(),
            fields.scopes.clone(),
            epoch(),
            Duration::minutes(minutes),
        );

        let within = epoch() + Duration::minutes(minutes);
        prop_assert!(verifier.verify_approval(&artifact, &hash, within).is_ok());

        let other = compute_action_hash(&apply(&edit, &fields));
        prop_assert_eq!(
            verifier.verify_approval(&artifact, &other, within),
            Err(RejectionReason::HashMismatch)
        );
        prop_assert_eq!(
            verifier.verify_approval(&artifact, &hash, within + Duration::seconds(1)),
            Err(RejectionReason::Expired)
        );
    }
}
