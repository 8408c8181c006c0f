//! Shared fixtures for the Covenant conformance scenarios.
//!
//! [`Household`] wires every crate together the way a deployment would: one
//! audit ledger, one keyring, one negotiation engine, one authority and a
//! loop orchestrator with recording delegates. Alice invites Bob into the
//! `household` intersection with calendar scopes.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use covenant_audit::{AuditChainStore, AuditLedger, MemoryChainStore};
use covenant_authority::{ApprovalArtifact, Authority, Ed25519Keyring, Ed25519Signer};
use covenant_loop::{
    CircleMemory, CovenantConfig, GovernanceNegotiator, LoopIntent, LoopOrchestrator,
    LoopServices, LoopState, RecordingExecutor, RecordingSettlement,
};
use covenant_negotiation::{ActionSpec, NegotiationEngine};
use covenant_types::{CircleId, Clock, Contract, IntersectionId, ManualClock, RunMode, Scope};
use tracing::debug;

pub const CALENDAR_READ: &str = "calendar:read";
pub const CALENDAR_WRITE: &str = "calendar:write";

pub fn alice() -> CircleId {
    CircleId::new("alice")
}

pub fn bob() -> CircleId {
    CircleId::new("bob")
}

/// Fixed start of every scenario clock.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 18, 0, 0)
        .single()
        .unwrap_or_default()
}

pub fn calendar_contract() -> Contract {
    Contract::new([Scope::new(CALENDAR_READ), Scope::new(CALENDAR_WRITE)])
}

pub fn dinner_action() -> ActionSpec {
    ActionSpec::new("calendar.create_event", CALENDAR_WRITE)
        .with_parameter("title", "Dinner")
        .with_parameter("starts_at", "2026-05-02T19:00:00Z")
}

pub struct Household {
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<AuditLedger>,
    pub keyring: Arc<Ed25519Keyring>,
    pub alice: Ed25519Signer,
    pub bob: Ed25519Signer,
    pub engine: Arc<NegotiationEngine>,
    pub authority: Arc<Authority>,
    pub executor: Arc<RecordingExecutor>,
    pub settlement: Arc<RecordingSettlement>,
    pub memory: Arc<CircleMemory>,
    pub orchestrator: LoopOrchestrator,
    pub intersection: IntersectionId,
}

impl Household {
    pub fn new() -> covenant_negotiation::Result<Self> {
        Self::with_store(Arc::new(MemoryChainStore::new()))
    }

    /// Build the household over the audit backend and policies in `config`.
    pub fn from_config(config: &CovenantConfig) -> covenant_negotiation::Result<Self> {
        Self::build(config, config.audit_store()?)
    }

    /// Build the household over `store` with default policies.
    pub fn with_store(store: Arc<dyn AuditChainStore>) -> covenant_negotiation::Result<Self> {
        Self::build(&CovenantConfig::default(), store)
    }

    /// Wire every service, with Bob already joined.
    fn build(
        config: &CovenantConfig,
        store: Arc<dyn AuditChainStore>,
    ) -> covenant_negotiation::Result<Self> {
        let clock = Arc::new(ManualClock::new(epoch()));
        let ledger = Arc::new(AuditLedger::new(store, clock.clone()));
        let keyring = Arc::new(Ed25519Keyring::new());
        let alice = Ed25519Signer::from_secret(self::alice(), &[1u8; 32]);
        let bob = Ed25519Signer::from_secret(self::bob(), &[2u8; 32]);
        keyring.register_signer(&alice);
        keyring.register_signer(&bob);

        let engine = Arc::new(NegotiationEngine::in_memory(
            keyring.clone(),
            ledger.clone(),
            clock.clone(),
        ));
        let intersection = IntersectionId::new("household");
        let invite = engine.issue_invite(
            &alice,
            intersection.clone(),
            self::bob(),
            calendar_contract(),
            Duration::hours(1),
        )?;
        engine.accept_invite(&invite, &self::bob())?;

        let authority = Arc::new(Authority::new(
            config.envelope_validator(),
            keyring.clone(),
            ledger.clone(),
            clock.clone(),
        ));
        let executor = Arc::new(RecordingExecutor::new());
        let settlement = Arc::new(RecordingSettlement::new());
        let memory = Arc::new(CircleMemory::in_memory());
        let services = LoopServices {
            negotiation: Arc::new(GovernanceNegotiator::new(engine.clone(), clock.clone())),
            authority: authority.clone(),
            executor: executor.clone(),
            settlement: settlement.clone(),
            memory: memory.clone(),
            audit: ledger.clone(),
            clock: clock.clone(),
        };
        debug!(intersection = %intersection, "household fixture ready");

        Ok(Self {
            clock,
            ledger,
            keyring,
            alice,
            bob,
            engine,
            authority,
            executor,
            settlement,
            memory,
            orchestrator: LoopOrchestrator::new(services, config.approvals.clone()),
            intersection,
        })
    }

    /// Alice's dinner intent in `mode`.
    pub fn dinner(&self, mode: RunMode) -> LoopIntent {
        LoopIntent::new(alice(), self.intersection.clone(), dinner_action()).mode(mode)
    }

    /// Bob's approval of the action `state` planned.
    pub fn bob_approves(&self, state: &LoopState) -> Option<ApprovalArtifact> {
        let plan = state.action.as_ref()?;
        Some(ApprovalArtifact::issue(
            &self.bob,
            plan.action_hash.clone(),
            plan.fields.scopes.clone(),
            self.clock.now(),
            Duration::minutes(15),
        ))
    }

    /// Event types on `owner`'s chain, in order. Loops audit to the issuer's
    /// chain, negotiation to the intersection's.
    pub fn events(&self, owner: &str) -> covenant_audit::Result<Vec<String>> {
        Ok(self
            .ledger
            .entries(owner)?
            .into_iter()
            .map(|e| e.event_type)
            .collect())
    }
}
