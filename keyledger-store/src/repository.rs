//! KeyType and CryptoKey CRUD.
//!
//! Repositories validate input, stamp ids and timestamps, and emit audit
//! events. State changes are not made here; they go through the
//! [`LifecycleEngine`](crate::lifecycle::LifecycleEngine).

use chrono::SubsecRound;
use keyledger::{
    CryptoKey, CryptoKeyId, CryptoKeyQuery, Cryptoperiod, HistoryRecord, KeyAttributesUpdate,
    KeyState, KeyType, KeyTypeId, KeyTypeQuery, KeyTypeStatus, KeyTypeUpdate, NewCryptoKey,
    NewKeyType, Validate,
};

use crate::audit::{AuditAction, AuditEvent};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::Ledger;
use crate::policy::KeyTypeDeletePolicy;
use crate::storage::Store;

fn parse_cryptoperiod(raw: &str) -> LedgerResult<Cryptoperiod> {
    raw.parse()
        .map_err(|e: keyledger::CryptoperiodError| LedgerError::field("cryptoperiod", e.to_string()))
}

fn disabled(id: &KeyTypeId) -> LedgerError {
    LedgerError::Conflict(format!("key type {} is disabled", id))
}

// ---------------------------------------------------------------------------
// KeyTypes
// ---------------------------------------------------------------------------

/// What [`KeyTypeRepository::delete`] did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyTypeDeletion {
    /// No key ever referenced the type; the record is gone.
    Removed,
    /// Keys reference the type, so it was kept as Disabled. Lists the keys
    /// destroyed on the way.
    Disabled {
        key_type: KeyType,
        destroyed: Vec<CryptoKeyId>,
    },
}

pub struct KeyTypeRepository<'a> {
    ledger: &'a Ledger,
}

impl<'a> KeyTypeRepository<'a> {
    pub(crate) fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    pub fn create(&self, store: &dyn Store, new: NewKeyType) -> LedgerResult<KeyType> {
        new.validate()?;
        let cryptoperiod = parse_cryptoperiod(&new.cryptoperiod)?;
        let now = self.ledger.now();

        let key_type = KeyType {
            id: KeyTypeId::from(self.ledger.next_id()),
            name: new.name,
            description: new.description,
            algorithm: new.algorithm,
            size_bits: new.size_bits,
            generated_by: new.generated_by,
            form_factor: new.form_factor,
            uniqueness_scope: new.uniqueness_scope,
            cryptoperiod,
            status: KeyTypeStatus::Active,
            created_at: now,
            modified_at: now,
        };
        store.insert_key_type(&key_type)?;

        tracing::info!(key_type_id = %key_type.id, name = %key_type.name, %cryptoperiod, "key type created");
        self.ledger
            .audit(AuditEvent::key_type_event(&key_type.id, now, AuditAction::KeyTypeCreated));
        Ok(key_type)
    }

    pub fn get(&self, store: &dyn Store, id: &KeyTypeId) -> LedgerResult<KeyType> {
        store
            .get_key_type(id)?
            .ok_or_else(|| LedgerError::key_type_not_found(id))
    }

    pub fn list(&self, store: &dyn Store, query: &KeyTypeQuery) -> LedgerResult<Vec<KeyType>> {
        store.list_key_types(query)
    }

    /// Change descriptive fields or the cryptoperiod.
    ///
    /// A new cryptoperiod applies to keys created afterwards. Existing keys
    /// keep the expiry they were given.
    pub fn update(&self, store: &dyn Store, id: &KeyTypeId, update: KeyTypeUpdate) -> LedgerResult<KeyType> {
        update.validate()?;
        let cryptoperiod = update
            .cryptoperiod
            .as_deref()
            .map(parse_cryptoperiod)
            .transpose()?;

        let mut key_type = self.get(store, id)?;
        if !key_type.is_active() {
            return Err(disabled(id));
        }
        update.apply_to(&mut key_type, cryptoperiod);
        key_type.modified_at = self.ledger.now();
        store.update_key_type(&key_type)?;

        tracing::info!(key_type_id = %id, "key type updated");
        self.ledger.audit(AuditEvent::key_type_event(
            id,
            key_type.modified_at,
            AuditAction::KeyTypeUpdated,
        ));
        Ok(key_type)
    }

    /// Delete a KeyType.
    ///
    /// Unreferenced types are removed outright. Types whose keys are all
    /// Destroyed are disabled. Types with live keys are refused unless
    /// `force` is set or the ledger policy is Cascade, in which case the
    /// live keys are destroyed first.
    pub fn delete(&self, store: &dyn Store, id: &KeyTypeId, force: bool) -> LedgerResult<KeyTypeDeletion> {
        let key_type = self.get(store, id)?;
        if key_type.status == KeyTypeStatus::Disabled {
            return Err(LedgerError::key_type_not_found(id));
        }

        let usage = store.key_type_usage(id)?;
        if usage.total == 0 {
            store.remove_key_type(id)?;
            tracing::info!(key_type_id = %id, "key type removed");
            self.ledger.audit(AuditEvent::key_type_event(
                id,
                self.ledger.now(),
                AuditAction::KeyTypeRemoved,
            ));
            return Ok(KeyTypeDeletion::Removed);
        }

        let policy = if force {
            KeyTypeDeletePolicy::Cascade
        } else {
            self.ledger.policy().key_type_delete
        };
        let mut destroyed = Vec::new();
        if usage.live > 0 {
            if policy == KeyTypeDeletePolicy::Reject {
                return Err(LedgerError::Conflict(format!(
                    "key type {} has {} live keys; destroy them or force the delete",
                    id, usage.live
                )));
            }
            destroyed = self.destroy_live_keys(store, id)?;
        }

        let key_type = store.disable_key_type(id, self.ledger.now())?;
        tracing::info!(key_type_id = %id, destroyed = destroyed.len(), "key type disabled");
        self.ledger.audit(AuditEvent::key_type_event(
            id,
            key_type.modified_at,
            AuditAction::KeyTypeDisabled {
                destroyed_keys: destroyed.len(),
            },
        ));
        Ok(KeyTypeDeletion::Disabled {
            key_type,
            destroyed,
        })
    }

    fn destroy_live_keys(&self, store: &dyn Store, id: &KeyTypeId) -> LedgerResult<Vec<CryptoKeyId>> {
        let reason = format!("key type {} retired", id);
        let engine = self.ledger.lifecycle();
        let mut destroyed = Vec::new();
        for key in store.keys_of_type(id)? {
            if key.state == KeyState::Destroyed {
                continue;
            }
            match engine.destroy(store, &key.id, Some(&reason)) {
                Ok(_) => destroyed.push(key.id),
                // destroyed concurrently
                Err(LedgerError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(destroyed)
    }
}

// ---------------------------------------------------------------------------
// CryptoKeys
// ---------------------------------------------------------------------------

pub struct CryptoKeyRepository<'a> {
    ledger: &'a Ledger,
}

impl<'a> CryptoKeyRepository<'a> {
    pub(crate) fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    /// Register a key against an Active KeyType.
    ///
    /// The key starts Active and expires one cryptoperiod after its
    /// activation date.
    pub fn create(&self, store: &dyn Store, new: NewCryptoKey) -> LedgerResult<CryptoKey> {
        new.validate()?;
        let key_type = store
            .get_key_type(&new.key_type_id)?
            .ok_or_else(|| LedgerError::key_type_not_found(&new.key_type_id))?;
        if !key_type.is_active() {
            return Err(disabled(&key_type.id));
        }

        let key = CryptoKey::new(
            CryptoKeyId::from(self.ledger.next_id()),
            &key_type,
            new.attributes,
            new.activation_date.map(|at| at.trunc_subsecs(6)),
            self.ledger.now(),
        )?;
        store.insert_crypto_key(&key)?;

        tracing::info!(
            key_id = %key.id,
            key_type_id = %key.key_type_id,
            expires_at = %key.expires_at,
            "crypto key created"
        );
        self.ledger.audit(AuditEvent::key_event(
            &key.id,
            &key.key_type_id,
            key.created_at,
            AuditAction::KeyCreated,
        ));
        Ok(key)
    }

    pub fn get(&self, store: &dyn Store, id: &CryptoKeyId) -> LedgerResult<CryptoKey> {
        store
            .get_crypto_key(id)?
            .ok_or_else(|| LedgerError::key_not_found(id))
    }

    pub fn list(&self, store: &dyn Store, query: &CryptoKeyQuery) -> LedgerResult<Vec<CryptoKey>> {
        store.list_crypto_keys(query)
    }

    /// Lifecycle history of a key, oldest first.
    pub fn history(&self, store: &dyn Store, id: &CryptoKeyId) -> LedgerResult<Vec<HistoryRecord>> {
        self.get(store, id)?;
        store.history(id)
    }

    /// Change descriptive attributes. State, dates and lineage are not
    /// writable here.
    pub fn update(&self, store: &dyn Store, id: &CryptoKeyId, update: KeyAttributesUpdate) -> LedgerResult<CryptoKey> {
        update.validate()?;
        let budget = self.ledger.policy().max_write_retries;
        let mut retries = 0;
        loop {
            let current = self.get(store, id)?;
            if current.state == KeyState::Destroyed {
                return Err(LedgerError::invalid_transition(id, current.state, "update"));
            }

            let mut next = current.clone();
            update.clone().apply_to(&mut next.attributes);
            next.revision += 1;
            next.modified_at = self.ledger.now();

            match store.update_crypto_key(&next, current.revision) {
                Ok(()) => {
                    tracing::info!(key_id = %id, revision = next.revision, "crypto key updated");
                    self.ledger.audit(AuditEvent::key_event(
                        id,
                        &next.key_type_id,
                        next.modified_at,
                        AuditAction::KeyUpdated,
                    ));
                    return Ok(next);
                }
                Err(LedgerError::Conflict(msg)) if retries < budget => {
                    retries += 1;
                    tracing::debug!(key_id = %id, retries, conflict = %msg, "write race lost, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Remove a key registered by mistake.
    ///
    /// Only keys with no lifecycle history and no rotation lineage can be
    /// removed. Anything else must be destroyed.
    pub fn delete(&self, store: &dyn Store, id: &CryptoKeyId) -> LedgerResult<()> {
        let key = self.get(store, id)?;
        if key.state == KeyState::Destroyed {
            return Err(LedgerError::invalid_transition(id, key.state, "delete"));
        }
        if key.has_lineage() {
            return Err(LedgerError::Conflict(format!(
                "crypto key {} is part of a rotation chain and must be destroyed instead",
                id
            )));
        }
        store.remove_crypto_key(id)?;

        tracing::info!(key_id = %id, "crypto key removed");
        self.ledger.audit(AuditEvent::key_event(
            id,
            &key.key_type_id,
            self.ledger.now(),
            AuditAction::KeyRemoved,
        ));
        Ok(())
    }
}
