//! Lifecycle engine: the only path by which a CryptoKey changes state.
//!
//! Every operation reads the key, checks the edge against the state table,
//! and commits the new state together with one history record. Commits are
//! compare-and-set on the key's revision, so when two callers race on the
//! same key the loser re-reads and re-validates against the winner's state.

use chrono::{DateTime, SubsecRound, Utc};
use keyledger::{
    validate_reason, CryptoKey, CryptoKeyId, HistoryRecord, KeyState, LifecycleOp, RotateRequest,
    Validate,
};

use crate::audit::{AuditAction, AuditEvent};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::Ledger;
use crate::storage::{StateChange, Store};

/// Actor recorded for calls that do not name one.
pub const DEFAULT_ACTOR: &str = "operator";

/// Result of a manual or scheduled expiry check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpiryCheck {
    /// The key was due and is now Expired.
    Expired(CryptoKey),
    /// The key is still within its cryptoperiod. Nothing was written.
    NotDue { expires_at: DateTime<Utc> },
}

/// Outcome of a successful rotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rotation {
    /// The old key, now Revoked and pointing at its successor.
    pub predecessor: CryptoKey,
    /// The new Active key, pointing back at the predecessor.
    pub successor: CryptoKey,
    /// History entry appended to the predecessor.
    pub record: HistoryRecord,
}

pub struct LifecycleEngine<'a> {
    ledger: &'a Ledger,
    actor: String,
}

impl<'a> LifecycleEngine<'a> {
    pub(crate) fn new(ledger: &'a Ledger) -> Self {
        Self {
            ledger,
            actor: DEFAULT_ACTOR.into(),
        }
    }

    /// Attribute audit events to `actor`.
    pub fn acting_as(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Active → Suspended.
    pub fn suspend(&self, store: &dyn Store, id: &CryptoKeyId, reason: Option<&str>) -> LedgerResult<CryptoKey> {
        validate_reason(reason, false)?;
        self.transition(store, id, LifecycleOp::Suspend, reason)
    }

    /// Suspended → Active.
    pub fn reactivate(&self, store: &dyn Store, id: &CryptoKeyId, reason: Option<&str>) -> LedgerResult<CryptoKey> {
        validate_reason(reason, false)?;
        self.transition(store, id, LifecycleOp::Reactivate, reason)
    }

    /// Active or Suspended → Revoked. A reason is mandatory.
    pub fn revoke(&self, store: &dyn Store, id: &CryptoKeyId, reason: &str) -> LedgerResult<CryptoKey> {
        validate_reason(Some(reason), true)?;
        self.transition(store, id, LifecycleOp::Revoke, Some(reason))
    }

    /// Any non-terminal state → Destroyed.
    pub fn destroy(&self, store: &dyn Store, id: &CryptoKeyId, reason: Option<&str>) -> LedgerResult<CryptoKey> {
        validate_reason(reason, false)?;
        self.transition(store, id, LifecycleOp::Destroy, reason)
    }

    /// Expire the key if its cryptoperiod has elapsed.
    ///
    /// Keys that are neither Active nor Suspended fail with
    /// InvalidTransition whether or not they are past due.
    pub fn check_expiry(&self, store: &dyn Store, id: &CryptoKeyId) -> LedgerResult<ExpiryCheck> {
        let reason = self.ledger.policy().expiry_reason.as_str();
        self.with_retries(id, || {
            let current = self.load(store, id)?;
            if current.state.can_expire() && !current.is_due(self.ledger.now()) {
                return Ok(ExpiryCheck::NotDue {
                    expires_at: current.expires_at,
                });
            }
            self.commit(store, &current, LifecycleOp::Expire, Some(reason))
                .map(ExpiryCheck::Expired)
        })
    }

    /// Replace an Active key with a fresh successor.
    ///
    /// The successor copies the predecessor's attributes with the request's
    /// overrides applied, and gets a new cryptoperiod from the key type's
    /// current setting. The predecessor ends Revoked.
    pub fn rotate(&self, store: &dyn Store, id: &CryptoKeyId, request: RotateRequest) -> LedgerResult<Rotation> {
        request.validate()?;
        let activation_date = request.activation_date.map(|at| at.trunc_subsecs(6));

        self.with_retries(id, || {
            let current = self.load(store, id)?;
            let to = self.edge(&current, LifecycleOp::Rotate)?;

            let key_type = store
                .get_key_type(&current.key_type_id)?
                .ok_or_else(|| LedgerError::key_type_not_found(&current.key_type_id))?;
            if !key_type.is_active() {
                return Err(LedgerError::Conflict(format!(
                    "key type {} is disabled",
                    key_type.id
                )));
            }

            let mut attributes = current.attributes.clone();
            request.overrides.clone().apply_to(&mut attributes);
            attributes.validate()?;

            let now = self.ledger.now();
            let mut successor = CryptoKey::new(
                CryptoKeyId::from(self.ledger.next_id()),
                &key_type,
                attributes,
                activation_date,
                now,
            )?;
            successor.rotated_from = Some(current.id.clone());

            let mut predecessor = current.clone();
            predecessor.state = to;
            predecessor.revision += 1;
            predecessor.modified_at = now;
            predecessor.superseded_by = Some(successor.id.clone());

            let change = StateChange {
                key: predecessor,
                expected_revision: current.revision,
                operation: LifecycleOp::Rotate,
                from: current.state,
                reason: request.reason.clone(),
            };
            let record = store.commit_rotation(&change, &successor)?;

            tracing::info!(
                key_id = %current.id,
                successor = %successor.id,
                sequence = record.sequence,
                "key rotated"
            );
            self.ledger.audit(
                AuditEvent::key_event(
                    &current.id,
                    &current.key_type_id,
                    now,
                    AuditAction::KeyRotated {
                        successor: successor.id.clone(),
                    },
                )
                .with_actor(self.actor.as_str()),
            );

            Ok(Rotation {
                predecessor: change.key,
                successor,
                record,
            })
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn transition(
        &self,
        store: &dyn Store,
        id: &CryptoKeyId,
        op: LifecycleOp,
        reason: Option<&str>,
    ) -> LedgerResult<CryptoKey> {
        self.with_retries(id, || {
            let current = self.load(store, id)?;
            self.commit(store, &current, op, reason)
        })
    }

    fn load(&self, store: &dyn Store, id: &CryptoKeyId) -> LedgerResult<CryptoKey> {
        store
            .get_crypto_key(id)?
            .ok_or_else(|| LedgerError::key_not_found(id))
    }

    /// Target state of `op` from the key's current state, or InvalidTransition.
    fn edge(&self, current: &CryptoKey, op: LifecycleOp) -> LedgerResult<KeyState> {
        op.apply(current.state).ok_or_else(|| {
            tracing::debug!(key_id = %current.id, operation = %op, state = %current.state, "transition refused");
            self.ledger.audit(
                AuditEvent::key_event(
                    &current.id,
                    &current.key_type_id,
                    self.ledger.now(),
                    AuditAction::KeyTransitioned {
                        operation: op,
                        from: current.state,
                        to: op.target(),
                    },
                )
                .with_actor(self.actor.as_str())
                .with_failure(),
            );
            LedgerError::invalid_transition(&current.id, current.state, op)
        })
    }

    fn commit(
        &self,
        store: &dyn Store,
        current: &CryptoKey,
        op: LifecycleOp,
        reason: Option<&str>,
    ) -> LedgerResult<CryptoKey> {
        let to = self.edge(current, op)?;

        let mut next = current.clone();
        next.state = to;
        next.revision += 1;
        next.modified_at = self.ledger.now();

        let change = StateChange {
            key: next,
            expected_revision: current.revision,
            operation: op,
            from: current.state,
            reason: reason.map(str::to_owned),
        };
        let record = store.commit_transition(&change)?;

        tracing::info!(
            key_id = %current.id,
            operation = %op,
            from = %record.from,
            to = %record.to,
            sequence = record.sequence,
            "key transitioned"
        );
        let mut event = AuditEvent::key_event(
            &current.id,
            &current.key_type_id,
            record.at,
            AuditAction::KeyTransitioned {
                operation: op,
                from: record.from,
                to: record.to,
            },
        )
        .with_actor(self.actor.as_str());
        if let Some(reason) = &record.reason {
            event = event.with_detail(reason.as_str());
        }
        self.ledger.audit(event);

        Ok(change.key)
    }

    /// Re-run `attempt` while it loses compare-and-set races, up to the
    /// policy's retry budget.
    fn with_retries<T>(&self, id: &CryptoKeyId, mut attempt: impl FnMut() -> LedgerResult<T>) -> LedgerResult<T> {
        let budget = self.ledger.policy().max_write_retries;
        let mut retries = 0;
        loop {
            match attempt() {
                Err(LedgerError::Conflict(msg)) if retries < budget => {
                    retries += 1;
                    tracing::debug!(key_id = %id, retries, conflict = %msg, "write race lost, retrying");
                }
                other => return other,
            }
        }
    }
}
