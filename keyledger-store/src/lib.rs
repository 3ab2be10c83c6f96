//! # Keyledger Store
//!
//! Lifecycle management for a cryptographic key inventory.
//!
//! Provides KeyType and CryptoKey repositories, the lifecycle engine that
//! moves keys between Active, Suspended, Revoked, Expired and Destroyed,
//! an expiry sweeper, audit logging, and pluggable storage backends.
//!
//! Built on top of `keyledger` for the data model and state table.
//!
//! ## Quick Start
//!
//! ```rust
//! use keyledger_store::*;
//! use keyledger::{KeyAttributes, KeyState, NewCryptoKey, NewKeyType};
//! use std::sync::Arc;
//!
//! let store = InMemoryStore::new();
//! let ledger = Ledger::new(Arc::new(InMemoryAuditSink::new()));
//!
//! let key_type = ledger.key_types().create(&store, NewKeyType {
//!     name: "Zone PIN Key".into(),
//!     algorithm: "AES".into(),
//!     size_bits: 256,
//!     generated_by: "HSM".into(),
//!     form_factor: "cryptogram".into(),
//!     uniqueness_scope: "per terminal".into(),
//!     cryptoperiod: "1y".into(),
//!     ..NewKeyType::default()
//! }).unwrap();
//!
//! let attributes = KeyAttributes {
//!     description: "ZPK for acquirer link".into(),
//!     generating_entity: "payments-ops".into(),
//!     generation_method: "HSM GenerateKey".into(),
//!     storage_location: "hsm-a".into(),
//!     encryption_under_lmk: "variant 1".into(),
//!     form_factor: "cryptogram".into(),
//!     scope_of_uniqueness: "per link".into(),
//!     usage_purpose: "PIN translation".into(),
//!     operational_environment: "production".into(),
//!     associated_parties: "acquirer".into(),
//!     access_control_mechanisms: "dual control".into(),
//!     compliance_requirements: "PCI PIN".into(),
//!     audit_log_reference: "AUD-1".into(),
//!     backup_and_recovery_details: "split knowledge".into(),
//!     notes: None,
//! };
//! let key = ledger.keys().create(&store, NewCryptoKey {
//!     key_type_id: key_type.id.clone(),
//!     attributes,
//!     activation_date: None,
//! }).unwrap();
//!
//! let suspended = ledger.lifecycle().suspend(&store, &key.id, Some("audit hold")).unwrap();
//! assert_eq!(suspended.state, KeyState::Suspended);
//! assert_eq!(ledger.keys().history(&store, &key.id).unwrap().len(), 1);
//! ```

pub mod audit;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod policy;
pub mod repository;
pub mod sqlite;
pub mod storage;
pub mod sweeper;

// Re-export main types for convenience
pub use audit::{
    verify_chain, AuditAction, AuditEvent, AuditSink, FileAuditSink, InMemoryAuditSink,
    IntegrityChainSink, TracingAuditSink,
};
pub use error::{LedgerError, LedgerResult};
pub use ledger::Ledger;
pub use lifecycle::{ExpiryCheck, LifecycleEngine, Rotation, DEFAULT_ACTOR};
pub use policy::{KeyTypeDeletePolicy, LifecyclePolicy};
pub use repository::{CryptoKeyRepository, KeyTypeDeletion, KeyTypeRepository};
pub use sqlite::SqliteStore;
pub use storage::{InMemoryStore, KeyTypeUsage, StateChange, Store};
pub use sweeper::{ExpirySweeper, SweepOutcome, SweepReport, SweeperConfig, SWEEPER_ACTOR};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use keyledger::{
        CryptoKey, CryptoKeyFilter, CryptoKeyQuery, KeyAttributes, KeyAttributesUpdate, KeyState,
        KeyType, KeyTypeStatus, KeyTypeUpdate, LifecycleOp, ManualClock, NewCryptoKey, NewKeyType,
        RotateRequest, SequentialIdGenerator,
    };
    use std::sync::{Arc, Barrier};

    struct Fixture {
        ledger: Ledger,
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
        audit: Arc<InMemoryAuditSink>,
    }

    fn fixture() -> Fixture {
        fixture_with_policy(LifecyclePolicy::default())
    }

    fn fixture_with_policy(policy: LifecyclePolicy) -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let audit = Arc::new(InMemoryAuditSink::new());
        let ledger = Ledger::new(audit.clone())
            .with_clock(clock.clone())
            .with_ids(Arc::new(SequentialIdGenerator::new("id")))
            .with_policy(policy);
        Fixture {
            ledger,
            store: Arc::new(InMemoryStore::new()),
            clock,
            audit,
        }
    }

    fn new_key_type(name: &str, cryptoperiod: &str) -> NewKeyType {
        NewKeyType {
            name: name.into(),
            description: "test type".into(),
            algorithm: "AES".into(),
            size_bits: 256,
            generated_by: "HSM".into(),
            form_factor: "cryptogram".into(),
            uniqueness_scope: "per link".into(),
            cryptoperiod: cryptoperiod.into(),
        }
    }

    fn attributes(description: &str) -> KeyAttributes {
        KeyAttributes {
            description: description.into(),
            generating_entity: "ops".into(),
            generation_method: "HSM GenerateKey".into(),
            storage_location: "hsm-a".into(),
            encryption_under_lmk: "variant 1".into(),
            form_factor: "cryptogram".into(),
            scope_of_uniqueness: "per link".into(),
            usage_purpose: "PIN translation".into(),
            operational_environment: "production".into(),
            associated_parties: "acquirer".into(),
            access_control_mechanisms: "dual control".into(),
            compliance_requirements: "PCI PIN".into(),
            audit_log_reference: "AUD-1".into(),
            backup_and_recovery_details: "split knowledge".into(),
            notes: None,
        }
    }

    impl Fixture {
        fn key_type(&self, name: &str, cryptoperiod: &str) -> KeyType {
            self.ledger
                .key_types()
                .create(self.store.as_ref(), new_key_type(name, cryptoperiod))
                .unwrap()
        }

        fn key(&self, key_type: &KeyType) -> CryptoKey {
            self.ledger
                .keys()
                .create(
                    self.store.as_ref(),
                    NewCryptoKey {
                        key_type_id: key_type.id.clone(),
                        attributes: attributes("test key"),
                        activation_date: None,
                    },
                )
                .unwrap()
        }

        fn key_in_state(&self, key_type: &KeyType, state: KeyState) -> CryptoKey {
            let key = self.key(key_type);
            let store = self.store.as_ref();
            let engine = self.ledger.lifecycle();
            match state {
                KeyState::Active => key,
                KeyState::Suspended => engine.suspend(store, &key.id, None).unwrap(),
                KeyState::Revoked => engine.revoke(store, &key.id, "compromised").unwrap(),
                KeyState::Destroyed => engine.destroy(store, &key.id, None).unwrap(),
                KeyState::Expired => {
                    self.clock.advance(key_type.cryptoperiod.as_duration());
                    match engine.check_expiry(store, &key.id).unwrap() {
                        ExpiryCheck::Expired(key) => key,
                        other => panic!("expected expiry, got {:?}", other),
                    }
                }
            }
        }

        fn apply(&self, id: &keyledger::CryptoKeyId, op: LifecycleOp) -> LedgerResult<KeyState> {
            let store = self.store.as_ref();
            let engine = self.ledger.lifecycle();
            match op {
                LifecycleOp::Suspend => engine.suspend(store, id, None).map(|k| k.state),
                LifecycleOp::Reactivate => engine.reactivate(store, id, None).map(|k| k.state),
                LifecycleOp::Revoke => engine.revoke(store, id, "policy").map(|k| k.state),
                LifecycleOp::Destroy => engine.destroy(store, id, None).map(|k| k.state),
                LifecycleOp::Expire => {
                    self.clock.advance(Duration::days(31));
                    engine.check_expiry(store, id).map(|check| match check {
                        ExpiryCheck::Expired(k) => k.state,
                        ExpiryCheck::NotDue { .. } => panic!("key not due"),
                    })
                }
                LifecycleOp::Rotate => engine
                    .rotate(store, id, RotateRequest::default())
                    .map(|r| r.predecessor.state),
            }
        }

        fn history_len(&self, id: &keyledger::CryptoKeyId) -> usize {
            self.ledger.keys().history(self.store.as_ref(), id).unwrap().len()
        }
    }

    // === KeyTypes ===

    #[test]
    fn test_create_key_type() {
        let f = fixture();
        let kt = f.key_type("Zone PIN Key", "6m");
        assert_eq!(kt.status, KeyTypeStatus::Active);
        assert_eq!(kt.cryptoperiod.days(), 180);
        assert_eq!(kt.created_at, kt.modified_at);
        assert_eq!(f.ledger.key_types().get(f.store.as_ref(), &kt.id).unwrap(), kt);
    }

    #[test]
    fn test_create_key_type_reports_every_invalid_field() {
        let f = fixture();
        let mut new = new_key_type("bad/name", "0d");
        new.size_bits = 8;
        new.algorithm.clear();
        let err = f.ledger.key_types().create(f.store.as_ref(), new).unwrap_err();
        match err {
            LedgerError::Validation(fields) => {
                let names: Vec<&str> = fields.iter().map(|e| e.field.as_str()).collect();
                for field in ["name", "algorithm", "size_bits", "cryptoperiod"] {
                    assert!(names.contains(&field), "missing {} in {:?}", field, names);
                }
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(f.audit.is_empty());
    }

    #[test]
    fn test_duplicate_key_type_name_conflicts() {
        let f = fixture();
        f.key_type("TMK", "1y");
        let err = f
            .ledger
            .key_types()
            .create(f.store.as_ref(), new_key_type("TMK", "1y"))
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn test_update_key_type_cryptoperiod_leaves_existing_keys() {
        let f = fixture();
        let kt = f.key_type("TMK", "30d");
        let key = f.key(&kt);
        f.clock.advance(Duration::seconds(5));

        let updated = f
            .ledger
            .key_types()
            .update(
                f.store.as_ref(),
                &kt.id,
                KeyTypeUpdate {
                    cryptoperiod: Some("1y".into()),
                    ..KeyTypeUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.cryptoperiod.days(), 365);
        assert!(updated.modified_at > kt.modified_at);

        let reread = f.ledger.keys().get(f.store.as_ref(), &key.id).unwrap();
        assert_eq!(reread.expires_at, key.expires_at);
        assert_eq!(reread.intended_lifetime.to_string(), "30d");
        assert_eq!(f.key(&updated).intended_lifetime.to_string(), "1y");
    }

    #[test]
    fn test_delete_unreferenced_key_type_removes_it() {
        let f = fixture();
        let kt = f.key_type("TMK", "1y");
        let outcome = f.ledger.key_types().delete(f.store.as_ref(), &kt.id, false).unwrap();
        assert_eq!(outcome, KeyTypeDeletion::Removed);
        assert_eq!(
            f.ledger.key_types().get(f.store.as_ref(), &kt.id).unwrap_err().kind(),
            "not_found"
        );
    }

    #[test]
    fn test_delete_key_type_with_live_keys_is_rejected() {
        let f = fixture();
        let kt = f.key_type("TMK", "1y");
        let key = f.key(&kt);
        let err = f.ledger.key_types().delete(f.store.as_ref(), &kt.id, false).unwrap_err();
        assert_eq!(err.kind(), "conflict");

        let reread = f.ledger.keys().get(f.store.as_ref(), &key.id).unwrap();
        assert_eq!(reread.state, KeyState::Active);
        assert_eq!(f.history_len(&key.id), 0);
    }

    #[test]
    fn test_delete_key_type_with_only_destroyed_keys_disables_it() {
        let f = fixture();
        let kt = f.key_type("TMK", "1y");
        f.key_in_state(&kt, KeyState::Destroyed);

        match f.ledger.key_types().delete(f.store.as_ref(), &kt.id, false).unwrap() {
            KeyTypeDeletion::Disabled { key_type, destroyed } => {
                assert_eq!(key_type.status, KeyTypeStatus::Disabled);
                assert!(destroyed.is_empty());
            }
            other => panic!("expected disable, got {:?}", other),
        }
    }

    #[test]
    fn test_forced_delete_cascades_through_the_engine() {
        let f = fixture();
        let kt = f.key_type("TMK", "1y");
        let active = f.key(&kt);
        let revoked = f.key_in_state(&kt, KeyState::Revoked);
        let gone = f.key_in_state(&kt, KeyState::Destroyed);

        let outcome = f.ledger.key_types().delete(f.store.as_ref(), &kt.id, true).unwrap();
        let KeyTypeDeletion::Disabled { destroyed, .. } = outcome else {
            panic!("expected disable");
        };
        assert_eq!(destroyed, vec![active.id.clone(), revoked.id.clone()]);

        for id in [&active.id, &revoked.id, &gone.id] {
            let key = f.ledger.keys().get(f.store.as_ref(), id).unwrap();
            assert_eq!(key.state, KeyState::Destroyed);
        }
        let last = f
            .ledger
            .keys()
            .history(f.store.as_ref(), &active.id)
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(last.operation, LifecycleOp::Destroy);
        assert_eq!(last.reason.as_deref(), Some(format!("key type {} retired", kt.id).as_str()));
    }

    #[test]
    fn test_cascade_policy_applies_without_force() {
        let f = fixture_with_policy(LifecyclePolicy {
            key_type_delete: KeyTypeDeletePolicy::Cascade,
            ..LifecyclePolicy::default()
        });
        let kt = f.key_type("TMK", "1y");
        f.key(&kt);
        assert!(matches!(
            f.ledger.key_types().delete(f.store.as_ref(), &kt.id, false),
            Ok(KeyTypeDeletion::Disabled { .. })
        ));
    }

    #[test]
    fn test_disabled_key_type_rules() {
        let f = fixture();
        let kt = f.key_type("TMK", "1y");
        f.key_in_state(&kt, KeyState::Destroyed);
        f.ledger.key_types().delete(f.store.as_ref(), &kt.id, false).unwrap();

        let store = f.store.as_ref();
        let disabled = f.ledger.key_types().get(store, &kt.id).unwrap();
        assert_eq!(disabled.status, KeyTypeStatus::Disabled);
        assert_eq!(f.ledger.key_types().list(store, &Default::default()).unwrap().len(), 1);

        let update = f.ledger.key_types().update(
            store,
            &kt.id,
            KeyTypeUpdate {
                description: Some("again".into()),
                ..KeyTypeUpdate::default()
            },
        );
        assert_eq!(update.unwrap_err().kind(), "conflict");

        let create = f.ledger.keys().create(
            store,
            NewCryptoKey {
                key_type_id: kt.id.clone(),
                attributes: attributes("late"),
                activation_date: None,
            },
        );
        assert_eq!(create.unwrap_err().kind(), "conflict");

        let again = f.ledger.key_types().delete(store, &kt.id, true);
        assert_eq!(again.unwrap_err().kind(), "not_found");
    }

    // === CryptoKeys ===

    #[test]
    fn test_create_key_computes_expiry() {
        let f = fixture();
        let kt = f.key_type("TMK", "30d");
        let key = f.key(&kt);
        assert_eq!(key.state, KeyState::Active);
        assert_eq!(key.revision, 0);
        assert_eq!(key.activation_date, key.created_at);
        assert_eq!(key.expires_at - key.activation_date, Duration::days(30));
        assert_eq!(f.history_len(&key.id), 0);
    }

    #[test]
    fn test_create_key_with_unknown_type_is_not_found() {
        let f = fixture();
        let err = f
            .ledger
            .keys()
            .create(
                f.store.as_ref(),
                NewCryptoKey {
                    key_type_id: keyledger::KeyTypeId::new("missing"),
                    attributes: attributes("orphan"),
                    activation_date: None,
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_create_key_honours_activation_date() {
        let f = fixture();
        let kt = f.key_type("TMK", "1y");
        let activation = f.ledger.now() - Duration::days(400);
        let key = f
            .ledger
            .keys()
            .create(
                f.store.as_ref(),
                NewCryptoKey {
                    key_type_id: kt.id.clone(),
                    attributes: attributes("backdated"),
                    activation_date: Some(activation),
                },
            )
            .unwrap();
        assert_eq!(key.activation_date, activation);
        assert!(key.is_due(f.ledger.now()));
    }

    #[test]
    fn test_update_key_attributes_bumps_revision() {
        let f = fixture();
        let kt = f.key_type("TMK", "1y");
        let key = f.key(&kt);
        let updated = f
            .ledger
            .keys()
            .update(
                f.store.as_ref(),
                &key.id,
                KeyAttributesUpdate {
                    storage_location: Some("hsm-b".into()),
                    notes: Some("moved".into()),
                    ..KeyAttributesUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.attributes.storage_location, "hsm-b");
        assert_eq!(updated.attributes.notes.as_deref(), Some("moved"));
        assert_eq!(updated.revision, 1);
        assert_eq!(updated.state, KeyState::Active);
        assert_eq!(f.history_len(&key.id), 0);
    }

    #[test]
    fn test_update_and_delete_destroyed_key_fail() {
        let f = fixture();
        let kt = f.key_type("TMK", "1y");
        let key = f.key_in_state(&kt, KeyState::Destroyed);
        let store = f.store.as_ref();

        let update = f.ledger.keys().update(
            store,
            &key.id,
            KeyAttributesUpdate {
                notes: Some("late".into()),
                ..KeyAttributesUpdate::default()
            },
        );
        assert_eq!(update.unwrap_err().kind(), "invalid_transition");
        assert_eq!(f.ledger.keys().delete(store, &key.id).unwrap_err().kind(), "invalid_transition");
    }

    #[test]
    fn test_delete_key_without_history() {
        let f = fixture();
        let kt = f.key_type("TMK", "1y");
        let key = f.key(&kt);
        f.ledger.keys().delete(f.store.as_ref(), &key.id).unwrap();
        assert_eq!(
            f.ledger.keys().get(f.store.as_ref(), &key.id).unwrap_err().kind(),
            "not_found"
        );
    }

    #[test]
    fn test_delete_key_with_history_conflicts() {
        let f = fixture();
        let kt = f.key_type("TMK", "1y");
        let key = f.key_in_state(&kt, KeyState::Suspended);
        let err = f.ledger.keys().delete(f.store.as_ref(), &key.id).unwrap_err();
        assert_eq!(err.kind(), "conflict");
        assert!(f.ledger.keys().get(f.store.as_ref(), &key.id).is_ok());
    }

    #[test]
    fn test_list_keys_by_state() {
        let f = fixture();
        let kt = f.key_type("TMK", "1y");
        f.key(&kt);
        let suspended = f.key_in_state(&kt, KeyState::Suspended);
        let query = CryptoKeyQuery {
            filter: CryptoKeyFilter {
                states: vec![KeyState::Suspended],
                ..CryptoKeyFilter::default()
            },
            ..CryptoKeyQuery::default()
        };
        let listed = f.ledger.keys().list(f.store.as_ref(), &query).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, suspended.id);
    }

    // === State machine ===

    #[test]
    fn test_legal_edges_append_exactly_one_history_record() {
        for from in KeyState::ALL {
            for op in LifecycleOp::ALL {
                let Some(to) = op.apply(from) else { continue };
                let f = fixture();
                let kt = f.key_type("TMK", "30d");
                let key = f.key_in_state(&kt, from);
                let before = f.history_len(&key.id);

                assert_eq!(f.apply(&key.id, op).unwrap(), to, "{} from {}", op, from);

                let history = f.ledger.keys().history(f.store.as_ref(), &key.id).unwrap();
                assert_eq!(history.len(), before + 1);
                let last = history.last().unwrap();
                assert_eq!((last.operation, last.from, last.to), (op, from, to));
                assert_eq!(last.sequence as usize, history.len());
            }
        }
    }

    #[test]
    fn test_illegal_edges_change_nothing() {
        for from in KeyState::ALL {
            for op in LifecycleOp::ALL {
                if op.apply(from).is_some() {
                    continue;
                }
                let f = fixture();
                let kt = f.key_type("TMK", "30d");
                let key = f.key_in_state(&kt, from);
                let before = f.ledger.keys().get(f.store.as_ref(), &key.id).unwrap();
                let history = f.history_len(&key.id);

                let err = f.apply(&key.id, op).unwrap_err();
                assert_eq!(err.kind(), "invalid_transition", "{} from {}", op, from);

                let after = f.ledger.keys().get(f.store.as_ref(), &key.id).unwrap();
                assert_eq!(after, before);
                assert_eq!(f.history_len(&key.id), history);
            }
        }
    }

    #[test]
    fn test_revoked_key_cannot_be_suspended() {
        let f = fixture();
        let kt = f.key_type("TMK", "1y");
        let key = f.key(&kt);
        let revoked = f.ledger.lifecycle().revoke(f.store.as_ref(), &key.id, "compromised").unwrap();
        assert_eq!(revoked.state, KeyState::Revoked);

        let err = f.ledger.lifecycle().suspend(f.store.as_ref(), &key.id, None).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InvalidTransition {
                id: key.id.to_string(),
                from: KeyState::Revoked,
                operation: "suspend".into(),
            }
        );
        let history = f.ledger.keys().history(f.store.as_ref(), &key.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reason.as_deref(), Some("compromised"));
    }

    #[test]
    fn test_revoke_requires_reason() {
        let f = fixture();
        let kt = f.key_type("TMK", "1y");
        let key = f.key(&kt);
        let err = f.ledger.lifecycle().revoke(f.store.as_ref(), &key.id, "  ").unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(f.history_len(&key.id), 0);
    }

    #[test]
    fn test_suspend_and_reactivate_round_trip() {
        let f = fixture();
        let kt = f.key_type("TMK", "1y");
        let key = f.key(&kt);
        let engine = f.ledger.lifecycle();
        engine.suspend(f.store.as_ref(), &key.id, Some("investigation")).unwrap();
        let back = engine.reactivate(f.store.as_ref(), &key.id, None).unwrap();
        assert_eq!(back.state, KeyState::Active);
        assert_eq!(back.revision, 2);
        assert_eq!(back.expires_at, key.expires_at);
        assert_eq!(f.history_len(&key.id), 2);
    }

    #[test]
    fn test_unknown_key_is_not_found() {
        let f = fixture();
        let err = f
            .ledger
            .lifecycle()
            .suspend(f.store.as_ref(), &keyledger::CryptoKeyId::new("nope"), None)
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_concurrent_suspends_have_one_winner() {
        let f = fixture();
        let kt = f.key_type("TMK", "1y");
        let key = f.key(&kt);
        let threads = 8;
        let barrier = Barrier::new(threads);

        let results: Vec<LedgerResult<CryptoKey>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        f.ledger.lifecycle().suspend(f.store.as_ref(), &key.id, None)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for err in results.into_iter().filter_map(Result::err) {
            assert_eq!(err.kind(), "invalid_transition");
        }
        assert_eq!(f.history_len(&key.id), 1);
    }

    #[test]
    fn test_concurrent_suspends_across_sqlite_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let f = fixture();
        let first = SqliteStore::open(&path).unwrap();
        let kt = f.ledger.key_types().create(&first, new_key_type("TMK", "1y")).unwrap();
        let key = f
            .ledger
            .keys()
            .create(
                &first,
                NewCryptoKey {
                    key_type_id: kt.id.clone(),
                    attributes: attributes("shared file"),
                    activation_date: None,
                },
            )
            .unwrap();

        let threads = 8;
        let handles: Vec<SqliteStore> = (0..threads).map(|_| SqliteStore::open(&path).unwrap()).collect();
        let barrier = Barrier::new(threads);

        let results: Vec<LedgerResult<CryptoKey>> = std::thread::scope(|scope| {
            let joins: Vec<_> = handles
                .iter()
                .map(|store| {
                    let (barrier, ledger, id) = (&barrier, &f.ledger, &key.id);
                    scope.spawn(move || {
                        barrier.wait();
                        ledger.lifecycle().suspend(store, id, None)
                    })
                })
                .collect();
            joins.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for err in results.into_iter().filter_map(Result::err) {
            assert_eq!(err.kind(), "invalid_transition");
        }
        assert_eq!(f.ledger.keys().history(&first, &key.id).unwrap().len(), 1);
        assert_eq!(
            f.ledger.keys().get(&first, &key.id).unwrap().state,
            KeyState::Suspended
        );
    }

    #[test]
    fn test_stale_write_is_rejected_by_the_store() {
        let f = fixture();
        let kt = f.key_type("TMK", "1y");
        let key = f.key(&kt);
        f.ledger.lifecycle().suspend(f.store.as_ref(), &key.id, None).unwrap();

        let mut stale = key.clone();
        stale.state = KeyState::Revoked;
        stale.revision = 1;
        let change = StateChange {
            key: stale,
            expected_revision: 0,
            operation: LifecycleOp::Revoke,
            from: KeyState::Active,
            reason: Some("late".into()),
        };
        assert_eq!(f.store.commit_transition(&change).unwrap_err().kind(), "conflict");
        assert_eq!(f.history_len(&key.id), 1);
    }

    // === Expiry ===

    #[test]
    fn test_check_expiry_not_due() {
        let f = fixture();
        let kt = f.key_type("TMK", "30d");
        let key = f.key(&kt);
        let check = f.ledger.lifecycle().check_expiry(f.store.as_ref(), &key.id).unwrap();
        assert_eq!(
            check,
            ExpiryCheck::NotDue {
                expires_at: key.expires_at
            }
        );
        assert_eq!(f.history_len(&key.id), 0);
    }

    #[test]
    fn test_check_expiry_on_revoked_key_is_invalid() {
        let f = fixture();
        let kt = f.key_type("TMK", "30d");
        let key = f.key_in_state(&kt, KeyState::Revoked);
        f.clock.advance(Duration::days(31));
        let err = f.ledger.lifecycle().check_expiry(f.store.as_ref(), &key.id).unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[test]
    fn test_sweep_expires_due_keys_once() {
        let f = fixture();
        let kt = f.key_type("TMK", "30d");
        let active = f.key(&kt);
        let suspended = f.key_in_state(&kt, KeyState::Suspended);
        let revoked = f.key_in_state(&kt, KeyState::Revoked);
        let long_lived = f.key_type("BDK", "1y");
        let fresh = f.key(&long_lived);

        f.clock.advance(Duration::days(31));
        let sweeper = ExpirySweeper::new(f.ledger.clone(), f.store.clone(), SweeperConfig::default());

        let SweepOutcome::Completed(report) = sweeper.sweep().unwrap() else {
            panic!("sweep skipped");
        };
        assert_eq!(report.expired, vec![active.id.clone(), suspended.id.clone()]);
        assert!(report.failed.is_empty());

        for id in [&active.id, &suspended.id] {
            let key = f.ledger.keys().get(f.store.as_ref(), id).unwrap();
            assert_eq!(key.state, KeyState::Expired);
            let last = f.ledger.keys().history(f.store.as_ref(), id).unwrap().pop().unwrap();
            assert_eq!(last.operation, LifecycleOp::Expire);
            assert_eq!(last.reason.as_deref(), Some("cryptoperiod elapsed"));
        }
        assert_eq!(f.history_len(&active.id), 1);
        let revoked_now = f.ledger.keys().get(f.store.as_ref(), &revoked.id).unwrap();
        assert_eq!(revoked_now.state, KeyState::Revoked);
        let fresh_now = f.ledger.keys().get(f.store.as_ref(), &fresh.id).unwrap();
        assert_eq!(fresh_now.state, KeyState::Active);

        let SweepOutcome::Completed(second) = sweeper.sweep().unwrap() else {
            panic!("sweep skipped");
        };
        assert!(second.expired.is_empty());
        assert_eq!(f.history_len(&active.id), 1);
    }

    #[test]
    fn test_sweep_reports_upcoming_expiries() {
        let f = fixture();
        let kt = f.key_type("TMK", "30d");
        let key = f.key(&kt);
        f.clock.advance(Duration::days(25));

        let config = SweeperConfig {
            warn_within: Some(Duration::days(7)),
            ..SweeperConfig::default()
        };
        let sweeper = ExpirySweeper::new(f.ledger.clone(), f.store.clone(), config);
        let SweepOutcome::Completed(report) = sweeper.sweep().unwrap() else {
            panic!("sweep skipped");
        };
        assert!(report.expired.is_empty());
        assert_eq!(report.upcoming, vec![(key.id.clone(), key.expires_at)]);
    }

    #[test]
    fn test_sweep_transitions_are_attributed_to_the_sweeper() {
        let f = fixture();
        let kt = f.key_type("TMK", "30d");
        let key = f.key(&kt);
        f.clock.advance(Duration::days(30));
        ExpirySweeper::new(f.ledger.clone(), f.store.clone(), SweeperConfig::default())
            .sweep()
            .unwrap();

        let events = f.audit.events_for_key(&key.id);
        let expired = events.last().unwrap();
        assert_eq!(expired.actor, SWEEPER_ACTOR);
        assert!(matches!(
            expired.action,
            AuditAction::KeyTransitioned {
                to: KeyState::Expired,
                ..
            }
        ));
        assert!(f
            .audit
            .events()
            .iter()
            .any(|e| matches!(e.action, AuditAction::SweepCompleted { expired: 1, .. })));
    }

    // === Rotation ===

    #[test]
    fn test_rotation_links_predecessor_and_successor() {
        let f = fixture();
        let kt = f.key_type("TMK", "30d");
        let key = f.key(&kt);
        f.clock.advance(Duration::days(10));

        let rotation = f
            .ledger
            .lifecycle()
            .rotate(
                f.store.as_ref(),
                &key.id,
                RotateRequest {
                    reason: Some("scheduled".into()),
                    overrides: KeyAttributesUpdate {
                        storage_location: Some("hsm-b".into()),
                        ..KeyAttributesUpdate::default()
                    },
                    activation_date: None,
                },
            )
            .unwrap();

        let store = f.store.as_ref();
        let old = f.ledger.keys().get(store, &key.id).unwrap();
        let new = f.ledger.keys().get(store, &rotation.successor.id).unwrap();
        assert_eq!(old, rotation.predecessor);
        assert_eq!(new, rotation.successor);

        assert_eq!(old.state, KeyState::Revoked);
        assert_eq!(old.superseded_by.as_ref(), Some(&new.id));
        assert_eq!(new.state, KeyState::Active);
        assert_eq!(new.rotated_from.as_ref(), Some(&old.id));
        assert_eq!(new.attributes.storage_location, "hsm-b");
        assert_eq!(new.attributes.usage_purpose, old.attributes.usage_purpose);
        assert_eq!(new.activation_date, f.ledger.now());
        assert_eq!(new.expires_at - new.activation_date, Duration::days(30));

        assert_eq!(rotation.record.operation, LifecycleOp::Rotate);
        assert_eq!(f.history_len(&old.id), 1);
        assert_eq!(f.history_len(&new.id), 0);

        // lineage blocks hard delete on both ends
        assert_eq!(f.ledger.keys().delete(store, &new.id).unwrap_err().kind(), "conflict");
    }

    #[test]
    fn test_rotation_with_invalid_override_changes_nothing() {
        let f = fixture();
        let kt = f.key_type("TMK", "30d");
        let key = f.key(&kt);
        let err = f
            .ledger
            .lifecycle()
            .rotate(
                f.store.as_ref(),
                &key.id,
                RotateRequest {
                    overrides: KeyAttributesUpdate {
                        usage_purpose: Some(String::new()),
                        ..KeyAttributesUpdate::default()
                    },
                    ..RotateRequest::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(f.ledger.keys().get(f.store.as_ref(), &key.id).unwrap(), key);
        assert_eq!(f.ledger.keys().list(f.store.as_ref(), &Default::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_rotating_a_suspended_key_fails() {
        let f = fixture();
        let kt = f.key_type("TMK", "30d");
        let key = f.key_in_state(&kt, KeyState::Suspended);
        let err = f
            .ledger
            .lifecycle()
            .rotate(f.store.as_ref(), &key.id, RotateRequest::default())
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
        assert_eq!(f.ledger.keys().list(f.store.as_ref(), &Default::default()).unwrap().len(), 1);
    }

    // === Audit ===

    #[test]
    fn test_every_mutation_is_audited() {
        let f = fixture();
        let kt = f.key_type("TMK", "30d");
        let key = f.key(&kt);
        f.ledger.lifecycle().suspend(f.store.as_ref(), &key.id, Some("hold")).unwrap();
        let _ = f.ledger.lifecycle().rotate(f.store.as_ref(), &key.id, RotateRequest::default());

        let events = f.audit.events();
        assert!(matches!(events[0].action, AuditAction::KeyTypeCreated));
        assert!(matches!(events[1].action, AuditAction::KeyCreated));
        assert_eq!(events[2].detail.as_deref(), Some("hold"));
        assert!(events[2].success);
        // refused rotation
        assert!(!events[3].success);
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn test_spawned_sweeper_runs_on_interval() {
        let f = fixture();
        let config = SweeperConfig {
            interval: std::time::Duration::from_millis(40),
            warn_within: None,
        };
        let sweeper = Arc::new(ExpirySweeper::new(f.ledger.clone(), f.store.clone(), config));
        let handle = sweeper.spawn();
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        handle.abort();

        let sweeps = f
            .audit
            .events()
            .iter()
            .filter(|e| matches!(e.action, AuditAction::SweepCompleted { .. }))
            .count();
        assert!(sweeps >= 2, "only {} sweeps ran", sweeps);
    }
}
