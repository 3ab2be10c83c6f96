//! Storage backends: where KeyTypes, CryptoKeys and history live.

use chrono::{DateTime, Utc};
use keyledger::{
    CryptoKey, CryptoKeyId, CryptoKeyQuery, HistoryRecord, KeyState, KeyType, KeyTypeId,
    KeyTypeQuery, KeyTypeStatus, LifecycleOp,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use crate::error::{LedgerError, LedgerResult};

// ---------------------------------------------------------------------------
// Write descriptors
// ---------------------------------------------------------------------------

/// How many keys reference a KeyType.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyTypeUsage {
    pub total: u64,
    /// Keys not yet Destroyed.
    pub live: u64,
}

/// A state change to commit atomically with its history record.
///
/// `key` is the post-transition record. The store rejects the write with
/// Conflict unless the stored revision still equals `expected_revision`.
#[derive(Clone, Debug)]
pub struct StateChange {
    pub key: CryptoKey,
    pub expected_revision: u64,
    pub operation: LifecycleOp,
    pub from: KeyState,
    pub reason: Option<String>,
}

impl StateChange {
    /// History entry for this change at the given position.
    pub fn record(&self, sequence: u64) -> HistoryRecord {
        HistoryRecord {
            key_id: self.key.id.clone(),
            sequence,
            operation: self.operation,
            from: self.from,
            to: self.key.state,
            at: self.key.modified_at,
            reason: self.reason.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Persistence contract for the inventory.
///
/// Every method is one atomic unit: readers never observe half of a write.
/// Implementations:
/// - InMemoryStore (testing, ephemeral)
/// - SqliteStore (single file, shareable between processes)
pub trait Store: Send + Sync {
    /// Conflict if the name is taken.
    fn insert_key_type(&self, key_type: &KeyType) -> LedgerResult<()>;
    fn get_key_type(&self, id: &KeyTypeId) -> LedgerResult<Option<KeyType>>;
    fn list_key_types(&self, query: &KeyTypeQuery) -> LedgerResult<Vec<KeyType>>;
    /// NotFound if missing, Conflict if the new name is taken.
    /// Descriptive fields and cryptoperiod. Never writes `status`; Conflict
    /// if the stored type is Disabled.
    fn update_key_type(&self, key_type: &KeyType) -> LedgerResult<()>;
    fn key_type_usage(&self, id: &KeyTypeId) -> LedgerResult<KeyTypeUsage>;
    /// Conflict if any key references the type.
    fn remove_key_type(&self, id: &KeyTypeId) -> LedgerResult<()>;
    /// Mark Disabled. Conflict if any live key references the type.
    fn disable_key_type(&self, id: &KeyTypeId, at: DateTime<Utc>) -> LedgerResult<KeyType>;

    /// Conflict unless the referenced KeyType exists and is Active.
    fn insert_crypto_key(&self, key: &CryptoKey) -> LedgerResult<()>;
    fn get_crypto_key(&self, id: &CryptoKeyId) -> LedgerResult<Option<CryptoKey>>;
    fn list_crypto_keys(&self, query: &CryptoKeyQuery) -> LedgerResult<Vec<CryptoKey>>;
    /// Every key of a type, unpaged, in id order.
    fn keys_of_type(&self, id: &KeyTypeId) -> LedgerResult<Vec<CryptoKey>>;
    /// Attribute write guarded by compare-and-set on `revision`.
    fn update_crypto_key(&self, key: &CryptoKey, expected_revision: u64) -> LedgerResult<()>;
    /// State write plus one history append, guarded by compare-and-set.
    fn commit_transition(&self, change: &StateChange) -> LedgerResult<HistoryRecord>;
    /// Predecessor transition, its history append and the successor insert.
    fn commit_rotation(&self, change: &StateChange, successor: &CryptoKey) -> LedgerResult<HistoryRecord>;
    /// Conflict if the key has any history.
    fn remove_crypto_key(&self, id: &CryptoKeyId) -> LedgerResult<()>;
    /// Oldest first.
    fn history(&self, id: &CryptoKeyId) -> LedgerResult<Vec<HistoryRecord>>;

    /// Active or Suspended keys with `expires_at <= at`, soonest first.
    fn due_for_expiry(&self, at: DateTime<Utc>) -> LedgerResult<Vec<CryptoKey>>;
    /// Active or Suspended keys with `after < expires_at <= until`, soonest first.
    fn expiring_between(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> LedgerResult<Vec<CryptoKey>>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tables {
    key_types: BTreeMap<KeyTypeId, KeyType>,
    keys: BTreeMap<CryptoKeyId, CryptoKey>,
    history: HashMap<CryptoKeyId, Vec<HistoryRecord>>,
}

impl Tables {
    fn name_taken(&self, name: &str, except: Option<&KeyTypeId>) -> bool {
        self.key_types
            .values()
            .any(|kt| kt.name == name && Some(&kt.id) != except)
    }

    fn usage(&self, id: &KeyTypeId) -> KeyTypeUsage {
        self.keys
            .values()
            .filter(|k| &k.key_type_id == id)
            .fold(KeyTypeUsage::default(), |mut usage, k| {
                usage.total += 1;
                if k.state != KeyState::Destroyed {
                    usage.live += 1;
                }
                usage
            })
    }

    fn check_revision(&self, id: &CryptoKeyId, expected: u64) -> LedgerResult<()> {
        match self.keys.get(id) {
            None => Err(LedgerError::key_not_found(id)),
            Some(stored) if stored.revision != expected => Err(LedgerError::Conflict(format!(
                "crypto key {} changed concurrently (revision {} != {})",
                id, stored.revision, expected
            ))),
            Some(_) => Ok(()),
        }
    }

    fn check_insertable(&self, key: &CryptoKey) -> LedgerResult<()> {
        if self.keys.contains_key(&key.id) {
            return Err(LedgerError::Conflict(format!("crypto key {} already exists", key.id)));
        }
        match self.key_types.get(&key.key_type_id) {
            Some(kt) if kt.status == KeyTypeStatus::Active => Ok(()),
            Some(_) => Err(LedgerError::Conflict(format!(
                "key type {} is disabled",
                key.key_type_id
            ))),
            None => Err(LedgerError::Conflict(format!(
                "key type {} does not exist",
                key.key_type_id
            ))),
        }
    }

    fn append(&mut self, change: &StateChange) -> HistoryRecord {
        let entries = self.history.entry(change.key.id.clone()).or_default();
        let record = change.record(entries.len() as u64 + 1);
        entries.push(record.clone());
        self.keys.insert(change.key.id.clone(), change.key.clone());
        record
    }

    fn live_expiring(&self, keep: impl Fn(&CryptoKey) -> bool) -> Vec<CryptoKey> {
        let mut keys: Vec<CryptoKey> = self
            .keys
            .values()
            .filter(|k| k.state.can_expire() && keep(k))
            .cloned()
            .collect();
        keys.sort_by(|a, b| a.expires_at.cmp(&b.expires_at).then_with(|| a.id.cmp(&b.id)));
        keys
    }
}

/// In-memory storage (for testing and ephemeral use).
///
/// One lock over all tables, so every write is atomic.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for InMemoryStore {
    fn insert_key_type(&self, key_type: &KeyType) -> LedgerResult<()> {
        let mut tables = self.tables.write();
        if tables.key_types.contains_key(&key_type.id) {
            return Err(LedgerError::Conflict(format!("key type {} already exists", key_type.id)));
        }
        if tables.name_taken(&key_type.name, None) {
            return Err(LedgerError::Conflict(format!(
                "key type name {:?} is already in use",
                key_type.name
            )));
        }
        tables.key_types.insert(key_type.id.clone(), key_type.clone());
        Ok(())
    }

    fn get_key_type(&self, id: &KeyTypeId) -> LedgerResult<Option<KeyType>> {
        Ok(self.tables.read().key_types.get(id).cloned())
    }

    fn list_key_types(&self, query: &KeyTypeQuery) -> LedgerResult<Vec<KeyType>> {
        let tables = self.tables.read();
        Ok(query.apply(tables.key_types.values().cloned()))
    }

    fn update_key_type(&self, key_type: &KeyType) -> LedgerResult<()> {
        let mut tables = self.tables.write();
        match tables.key_types.get(&key_type.id) {
            None => return Err(LedgerError::key_type_not_found(&key_type.id)),
            Some(current) if !current.is_active() => {
                return Err(LedgerError::Conflict(format!("key type {} is disabled", key_type.id)));
            }
            Some(_) => {}
        }
        if tables.name_taken(&key_type.name, Some(&key_type.id)) {
            return Err(LedgerError::Conflict(format!(
                "key type name {:?} is already in use",
                key_type.name
            )));
        }
        let stored = KeyType {
            status: KeyTypeStatus::Active,
            ..key_type.clone()
        };
        tables.key_types.insert(key_type.id.clone(), stored);
        Ok(())
    }

    fn key_type_usage(&self, id: &KeyTypeId) -> LedgerResult<KeyTypeUsage> {
        Ok(self.tables.read().usage(id))
    }

    fn remove_key_type(&self, id: &KeyTypeId) -> LedgerResult<()> {
        let mut tables = self.tables.write();
        let usage = tables.usage(id);
        if usage.total > 0 {
            return Err(LedgerError::Conflict(format!(
                "key type {} is referenced by {} keys",
                id, usage.total
            )));
        }
        tables
            .key_types
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| LedgerError::key_type_not_found(id))
    }

    fn disable_key_type(&self, id: &KeyTypeId, at: DateTime<Utc>) -> LedgerResult<KeyType> {
        let mut tables = self.tables.write();
        let usage = tables.usage(id);
        if usage.live > 0 {
            return Err(LedgerError::Conflict(format!(
                "key type {} is referenced by {} live keys",
                id, usage.live
            )));
        }
        let key_type = tables
            .key_types
            .get_mut(id)
            .ok_or_else(|| LedgerError::key_type_not_found(id))?;
        key_type.status = KeyTypeStatus::Disabled;
        key_type.modified_at = at;
        Ok(key_type.clone())
    }

    fn insert_crypto_key(&self, key: &CryptoKey) -> LedgerResult<()> {
        let mut tables = self.tables.write();
        tables.check_insertable(key)?;
        tables.keys.insert(key.id.clone(), key.clone());
        Ok(())
    }

    fn get_crypto_key(&self, id: &CryptoKeyId) -> LedgerResult<Option<CryptoKey>> {
        Ok(self.tables.read().keys.get(id).cloned())
    }

    fn list_crypto_keys(&self, query: &CryptoKeyQuery) -> LedgerResult<Vec<CryptoKey>> {
        let tables = self.tables.read();
        Ok(query.apply(tables.keys.values().cloned()))
    }

    fn keys_of_type(&self, id: &KeyTypeId) -> LedgerResult<Vec<CryptoKey>> {
        let tables = self.tables.read();
        Ok(tables
            .keys
            .values()
            .filter(|k| &k.key_type_id == id)
            .cloned()
            .collect())
    }

    fn update_crypto_key(&self, key: &CryptoKey, expected_revision: u64) -> LedgerResult<()> {
        let mut tables = self.tables.write();
        tables.check_revision(&key.id, expected_revision)?;
        tables.keys.insert(key.id.clone(), key.clone());
        Ok(())
    }

    fn commit_transition(&self, change: &StateChange) -> LedgerResult<HistoryRecord> {
        let mut tables = self.tables.write();
        tables.check_revision(&change.key.id, change.expected_revision)?;
        Ok(tables.append(change))
    }

    fn commit_rotation(&self, change: &StateChange, successor: &CryptoKey) -> LedgerResult<HistoryRecord> {
        let mut tables = self.tables.write();
        tables.check_revision(&change.key.id, change.expected_revision)?;
        tables.check_insertable(successor)?;
        let record = tables.append(change);
        tables.keys.insert(successor.id.clone(), successor.clone());
        Ok(record)
    }

    fn remove_crypto_key(&self, id: &CryptoKeyId) -> LedgerResult<()> {
        let mut tables = self.tables.write();
        if tables.history.get(id).map_or(false, |h| !h.is_empty()) {
            return Err(LedgerError::Conflict(format!(
                "crypto key {} has lifecycle history and must be destroyed instead",
                id
            )));
        }
        tables
            .keys
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| LedgerError::key_not_found(id))
    }

    fn history(&self, id: &CryptoKeyId) -> LedgerResult<Vec<HistoryRecord>> {
        Ok(self.tables.read().history.get(id).cloned().unwrap_or_default())
    }

    fn due_for_expiry(&self, at: DateTime<Utc>) -> LedgerResult<Vec<CryptoKey>> {
        Ok(self.tables.read().live_expiring(|k| k.expires_at <= at))
    }

    fn expiring_between(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> LedgerResult<Vec<CryptoKey>> {
        Ok(self
            .tables
            .read()
            .live_expiring(|k| k.expires_at > after && k.expires_at <= until))
    }
}
