//! The ledger: shared collaborators for repositories and the engine.

use chrono::{DateTime, SubsecRound, Utc};
use keyledger::{Clock, IdGenerator, SortableIdGenerator, SystemClock};
use std::sync::Arc;

use crate::audit::{AuditEvent, AuditSink};
use crate::lifecycle::LifecycleEngine;
use crate::policy::LifecyclePolicy;
use crate::repository::{CryptoKeyRepository, KeyTypeRepository};

/// Bundles the id generator, clock, audit sink and policy.
///
/// The ledger holds no store. Every operation takes the store handle as an
/// argument, so the caller decides how long a connection lives.
#[derive(Clone)]
pub struct Ledger {
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    policy: LifecyclePolicy,
}

impl Ledger {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            ids: Arc::new(SortableIdGenerator::new()),
            clock: Arc::new(SystemClock),
            audit,
            policy: LifecyclePolicy::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_policy(mut self, policy: LifecyclePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn key_types(&self) -> KeyTypeRepository<'_> {
        KeyTypeRepository::new(self)
    }

    pub fn keys(&self) -> CryptoKeyRepository<'_> {
        CryptoKeyRepository::new(self)
    }

    pub fn lifecycle(&self) -> LifecycleEngine<'_> {
        LifecycleEngine::new(self)
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    /// Current time, truncated to the microsecond precision stores keep.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    pub(crate) fn next_id(&self) -> String {
        self.ids.next_id()
    }

    pub(crate) fn audit(&self, event: AuditEvent) {
        self.audit.record(event);
    }
}
