//! SQLite-backed store for single-file and multi-process deployments.
//!
//! Timestamps are stored as microseconds since the Unix epoch. Descriptive
//! key attributes live in one JSON column; everything that is filtered or
//! sorted on has its own column.

use chrono::{DateTime, Utc};
use keyledger::{
    Cryptoperiod, CryptoKey, CryptoKeyId, CryptoKeyQuery, HistoryRecord, KeyAttributes, KeyState,
    KeyType, KeyTypeId, KeyTypeQuery, KeyTypeStatus, LifecycleOp, SortDirection,
};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

use crate::error::{LedgerError, LedgerResult};
use crate::storage::{KeyTypeUsage, StateChange, Store};

const SCHEMA: &str = r#"
    PRAGMA journal_mode = WAL;
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS key_types (
        id                TEXT PRIMARY KEY,
        name              TEXT NOT NULL UNIQUE,
        description       TEXT NOT NULL,
        algorithm         TEXT NOT NULL,
        size_bits         INTEGER NOT NULL,
        generated_by      TEXT NOT NULL,
        form_factor       TEXT NOT NULL,
        uniqueness_scope  TEXT NOT NULL,
        cryptoperiod_days INTEGER NOT NULL,
        status            TEXT NOT NULL,
        created_at        INTEGER NOT NULL,
        modified_at       INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS crypto_keys (
        id                     TEXT PRIMARY KEY,
        key_type_id            TEXT NOT NULL REFERENCES key_types(id),
        state                  TEXT NOT NULL,
        revision               INTEGER NOT NULL,
        generating_entity      TEXT NOT NULL,
        activation_date        INTEGER NOT NULL,
        expires_at             INTEGER NOT NULL,
        intended_lifetime_days INTEGER NOT NULL,
        rotated_from           TEXT,
        superseded_by          TEXT,
        created_at             INTEGER NOT NULL,
        modified_at            INTEGER NOT NULL,
        attributes             TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS crypto_keys_by_expiry ON crypto_keys (state, expires_at);
    CREATE INDEX IF NOT EXISTS crypto_keys_by_type ON crypto_keys (key_type_id);
    CREATE TABLE IF NOT EXISTS key_history (
        key_id     TEXT NOT NULL REFERENCES crypto_keys(id),
        seq        INTEGER NOT NULL,
        operation  TEXT NOT NULL,
        from_state TEXT NOT NULL,
        to_state   TEXT NOT NULL,
        at         INTEGER NOT NULL,
        reason     TEXT,
        PRIMARY KEY (key_id, seq)
    );
"#;

const KEY_TYPE_COLUMNS: &str = "id, name, description, algorithm, size_bits, generated_by, \
     form_factor, uniqueness_scope, cryptoperiod_days, status, created_at, modified_at";

const CRYPTO_KEY_COLUMNS: &str = "id, key_type_id, state, revision, activation_date, expires_at, \
     intended_lifetime_days, rotated_from, superseded_by, created_at, modified_at, attributes";

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`. `:memory:` gives a private
    /// in-memory database.
    pub fn open<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> LedgerResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> LedgerResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside an IMMEDIATE transaction, committing on success.
    fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> LedgerResult<T>) -> LedgerResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(value: i64) -> LedgerResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(value)
        .ok_or_else(|| LedgerError::storage(format!("timestamp out of range: {}", value)))
}

fn period(days: i64) -> LedgerResult<Cryptoperiod> {
    let days = u32::try_from(days).map_err(LedgerError::storage)?;
    Cryptoperiod::from_days(days).map_err(LedgerError::storage)
}

fn parse<T: std::str::FromStr<Err = String>>(raw: &str) -> LedgerResult<T> {
    raw.parse().map_err(LedgerError::storage)
}

fn status_text(status: KeyTypeStatus) -> &'static str {
    status.as_str()
}

struct KeyTypeRow {
    id: String,
    name: String,
    description: String,
    algorithm: String,
    size_bits: i64,
    generated_by: String,
    form_factor: String,
    uniqueness_scope: String,
    cryptoperiod_days: i64,
    status: String,
    created_at: i64,
    modified_at: i64,
}

impl KeyTypeRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            algorithm: row.get(3)?,
            size_bits: row.get(4)?,
            generated_by: row.get(5)?,
            form_factor: row.get(6)?,
            uniqueness_scope: row.get(7)?,
            cryptoperiod_days: row.get(8)?,
            status: row.get(9)?,
            created_at: row.get(10)?,
            modified_at: row.get(11)?,
        })
    }

    fn into_key_type(self) -> LedgerResult<KeyType> {
        Ok(KeyType {
            id: KeyTypeId::new(self.id),
            name: self.name,
            description: self.description,
            algorithm: self.algorithm,
            size_bits: u32::try_from(self.size_bits).map_err(LedgerError::storage)?,
            generated_by: self.generated_by,
            form_factor: self.form_factor,
            uniqueness_scope: self.uniqueness_scope,
            cryptoperiod: period(self.cryptoperiod_days)?,
            status: parse(&self.status)?,
            created_at: from_micros(self.created_at)?,
            modified_at: from_micros(self.modified_at)?,
        })
    }
}

struct CryptoKeyRow {
    id: String,
    key_type_id: String,
    state: String,
    revision: i64,
    activation_date: i64,
    expires_at: i64,
    intended_lifetime_days: i64,
    rotated_from: Option<String>,
    superseded_by: Option<String>,
    created_at: i64,
    modified_at: i64,
    attributes: String,
}

impl CryptoKeyRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            key_type_id: row.get(1)?,
            state: row.get(2)?,
            revision: row.get(3)?,
            activation_date: row.get(4)?,
            expires_at: row.get(5)?,
            intended_lifetime_days: row.get(6)?,
            rotated_from: row.get(7)?,
            superseded_by: row.get(8)?,
            created_at: row.get(9)?,
            modified_at: row.get(10)?,
            attributes: row.get(11)?,
        })
    }

    fn into_crypto_key(self) -> LedgerResult<CryptoKey> {
        let attributes: KeyAttributes = serde_json::from_str(&self.attributes)?;
        Ok(CryptoKey {
            id: CryptoKeyId::new(self.id),
            key_type_id: KeyTypeId::new(self.key_type_id),
            attributes,
            state: parse(&self.state)?,
            revision: u64::try_from(self.revision).map_err(LedgerError::storage)?,
            activation_date: from_micros(self.activation_date)?,
            expires_at: from_micros(self.expires_at)?,
            intended_lifetime: period(self.intended_lifetime_days)?,
            rotated_from: self.rotated_from.map(CryptoKeyId::new),
            superseded_by: self.superseded_by.map(CryptoKeyId::new),
            created_at: from_micros(self.created_at)?,
            modified_at: from_micros(self.modified_at)?,
        })
    }
}

fn collect<R, T>(
    rows: impl Iterator<Item = rusqlite::Result<R>>,
    convert: impl Fn(R) -> LedgerResult<T>,
) -> LedgerResult<Vec<T>> {
    rows.map(|row| convert(row?)).collect()
}

fn select_key_type(conn: &Connection, id: &KeyTypeId) -> LedgerResult<Option<KeyType>> {
    conn.query_row(
        &format!("SELECT {} FROM key_types WHERE id = ?1", KEY_TYPE_COLUMNS),
        params![id.as_str()],
        KeyTypeRow::read,
    )
    .optional()?
    .map(KeyTypeRow::into_key_type)
    .transpose()
}

fn select_crypto_key(conn: &Connection, id: &CryptoKeyId) -> LedgerResult<Option<CryptoKey>> {
    conn.query_row(
        &format!("SELECT {} FROM crypto_keys WHERE id = ?1", CRYPTO_KEY_COLUMNS),
        params![id.as_str()],
        CryptoKeyRow::read,
    )
    .optional()?
    .map(CryptoKeyRow::into_crypto_key)
    .transpose()
}

fn select_keys(conn: &Connection, clause: &str, values: Vec<Value>) -> LedgerResult<Vec<CryptoKey>> {
    let sql = format!("SELECT {} FROM crypto_keys {}", CRYPTO_KEY_COLUMNS, clause);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), CryptoKeyRow::read)?;
    collect(rows, CryptoKeyRow::into_crypto_key)
}

fn usage(conn: &Connection, id: &KeyTypeId) -> LedgerResult<KeyTypeUsage> {
    let (total, live): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(state != 'Destroyed'), 0) FROM crypto_keys WHERE key_type_id = ?1",
        params![id.as_str()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(KeyTypeUsage {
        total: total as u64,
        live: live as u64,
    })
}

fn check_revision(tx: &Transaction<'_>, id: &CryptoKeyId, expected: u64) -> LedgerResult<()> {
    let stored: Option<i64> = tx
        .query_row(
            "SELECT revision FROM crypto_keys WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    match stored {
        None => Err(LedgerError::key_not_found(id)),
        Some(rev) if rev as u64 != expected => Err(LedgerError::Conflict(format!(
            "crypto key {} changed concurrently (revision {} != {})",
            id, rev, expected
        ))),
        Some(_) => Ok(()),
    }
}

fn check_key_type_active(tx: &Transaction<'_>, id: &KeyTypeId) -> LedgerResult<()> {
    match select_key_type(tx, id)? {
        Some(kt) if kt.is_active() => Ok(()),
        Some(_) => Err(LedgerError::Conflict(format!("key type {} is disabled", id))),
        None => Err(LedgerError::Conflict(format!("key type {} does not exist", id))),
    }
}

fn insert_key(tx: &Transaction<'_>, key: &CryptoKey) -> LedgerResult<()> {
    check_key_type_active(tx, &key.key_type_id)?;
    let attributes = serde_json::to_string(&key.attributes)?;
    tx.execute(
        &format!(
            "INSERT INTO crypto_keys ({}, generating_entity) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            CRYPTO_KEY_COLUMNS
        ),
        params![
            key.id.as_str(),
            key.key_type_id.as_str(),
            key.state.as_str(),
            key.revision as i64,
            micros(key.activation_date),
            micros(key.expires_at),
            i64::from(key.intended_lifetime.days()),
            key.rotated_from.as_ref().map(CryptoKeyId::as_str),
            key.superseded_by.as_ref().map(CryptoKeyId::as_str),
            micros(key.created_at),
            micros(key.modified_at),
            attributes,
            key.attributes.generating_entity,
        ],
    )?;
    Ok(())
}

/// Overwrite every mutable column of an existing key.
fn overwrite_key(tx: &Transaction<'_>, key: &CryptoKey) -> LedgerResult<()> {
    let attributes = serde_json::to_string(&key.attributes)?;
    tx.execute(
        "UPDATE crypto_keys SET state = ?2, revision = ?3, superseded_by = ?4, modified_at = ?5, \
         attributes = ?6, generating_entity = ?7 WHERE id = ?1",
        params![
            key.id.as_str(),
            key.state.as_str(),
            key.revision as i64,
            key.superseded_by.as_ref().map(CryptoKeyId::as_str),
            micros(key.modified_at),
            attributes,
            key.attributes.generating_entity,
        ],
    )?;
    Ok(())
}

fn append_history(tx: &Transaction<'_>, change: &StateChange) -> LedgerResult<HistoryRecord> {
    let last: i64 = tx.query_row(
        "SELECT COALESCE(MAX(seq), 0) FROM key_history WHERE key_id = ?1",
        params![change.key.id.as_str()],
        |row| row.get(0),
    )?;
    let record = change.record(last as u64 + 1);
    tx.execute(
        "INSERT INTO key_history (key_id, seq, operation, from_state, to_state, at, reason) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            record.key_id.as_str(),
            record.sequence as i64,
            record.operation.as_str(),
            record.from.as_str(),
            record.to.as_str(),
            micros(record.at),
            record.reason,
        ],
    )?;
    Ok(record)
}

fn direction(direction: SortDirection) -> &'static str {
    match direction {
        SortDirection::Ascending => "ASC",
        SortDirection::Descending => "DESC",
    }
}

// ---------------------------------------------------------------------------
// Store implementation
// ---------------------------------------------------------------------------

impl Store for SqliteStore {
    fn insert_key_type(&self, key_type: &KeyType) -> LedgerResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO key_types ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                KEY_TYPE_COLUMNS
            ),
            params![
                key_type.id.as_str(),
                key_type.name,
                key_type.description,
                key_type.algorithm,
                key_type.size_bits,
                key_type.generated_by,
                key_type.form_factor,
                key_type.uniqueness_scope,
                key_type.cryptoperiod.days(),
                status_text(key_type.status),
                micros(key_type.created_at),
                micros(key_type.modified_at),
            ],
        )?;
        Ok(())
    }

    fn get_key_type(&self, id: &KeyTypeId) -> LedgerResult<Option<KeyType>> {
        select_key_type(&self.conn.lock(), id)
    }

    fn list_key_types(&self, query: &KeyTypeQuery) -> LedgerResult<Vec<KeyType>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        let filter = &query.filter;
        if let Some(name) = &filter.name {
            clauses.push("name = ?");
            values.push(Value::Text(name.clone()));
        }
        if let Some(algorithm) = &filter.algorithm {
            clauses.push("algorithm = ?");
            values.push(Value::Text(algorithm.clone()));
        }
        if let Some(size_bits) = filter.size_bits {
            clauses.push("size_bits = ?");
            values.push(Value::Integer(i64::from(size_bits)));
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(Value::Text(status_text(status).into()));
        }

        let mut sql = format!("SELECT {} FROM key_types", KEY_TYPE_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        if let Some(order) = query.order {
            sql.push_str(&format!("{} {}, ", order.field.column(), direction(order.direction)));
        }
        sql.push_str("id ASC LIMIT ? OFFSET ?");
        values.push(Value::Integer(query.page.limit as i64));
        values.push(Value::Integer(query.page.offset as i64));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), KeyTypeRow::read)?;
        collect(rows, KeyTypeRow::into_key_type)
    }

    fn update_key_type(&self, key_type: &KeyType) -> LedgerResult<()> {
        self.write(|tx| {
            let changed = tx.execute(
                "UPDATE key_types SET name = ?2, description = ?3, algorithm = ?4, size_bits = ?5, \
                 generated_by = ?6, form_factor = ?7, uniqueness_scope = ?8, cryptoperiod_days = ?9, \
                 modified_at = ?10 WHERE id = ?1 AND status = ?11",
                params![
                    key_type.id.as_str(),
                    key_type.name,
                    key_type.description,
                    key_type.algorithm,
                    key_type.size_bits,
                    key_type.generated_by,
                    key_type.form_factor,
                    key_type.uniqueness_scope,
                    key_type.cryptoperiod.days(),
                    micros(key_type.modified_at),
                    status_text(KeyTypeStatus::Active),
                ],
            )?;
            if changed > 0 {
                return Ok(());
            }
            match select_key_type(tx, &key_type.id)? {
                Some(_) => Err(LedgerError::Conflict(format!("key type {} is disabled", key_type.id))),
                None => Err(LedgerError::key_type_not_found(&key_type.id)),
            }
        })
    }

    fn key_type_usage(&self, id: &KeyTypeId) -> LedgerResult<KeyTypeUsage> {
        usage(&self.conn.lock(), id)
    }

    fn remove_key_type(&self, id: &KeyTypeId) -> LedgerResult<()> {
        self.write(|tx| {
            let usage = usage(tx, id)?;
            if usage.total > 0 {
                return Err(LedgerError::Conflict(format!(
                    "key type {} is referenced by {} keys",
                    id, usage.total
                )));
            }
            let removed = tx.execute("DELETE FROM key_types WHERE id = ?1", params![id.as_str()])?;
            if removed == 0 {
                return Err(LedgerError::key_type_not_found(id));
            }
            Ok(())
        })
    }

    fn disable_key_type(&self, id: &KeyTypeId, at: DateTime<Utc>) -> LedgerResult<KeyType> {
        self.write(|tx| {
            let usage = usage(tx, id)?;
            if usage.live > 0 {
                return Err(LedgerError::Conflict(format!(
                    "key type {} is referenced by {} live keys",
                    id, usage.live
                )));
            }
            let changed = tx.execute(
                "UPDATE key_types SET status = ?2, modified_at = ?3 WHERE id = ?1",
                params![id.as_str(), status_text(KeyTypeStatus::Disabled), micros(at)],
            )?;
            if changed == 0 {
                return Err(LedgerError::key_type_not_found(id));
            }
            select_key_type(tx, id)?.ok_or_else(|| LedgerError::key_type_not_found(id))
        })
    }

    fn insert_crypto_key(&self, key: &CryptoKey) -> LedgerResult<()> {
        self.write(|tx| insert_key(tx, key))
    }

    fn get_crypto_key(&self, id: &CryptoKeyId) -> LedgerResult<Option<CryptoKey>> {
        select_crypto_key(&self.conn.lock(), id)
    }

    fn list_crypto_keys(&self, query: &CryptoKeyQuery) -> LedgerResult<Vec<CryptoKey>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values = Vec::new();
        let filter = &query.filter;
        if !filter.states.is_empty() {
            let marks = vec!["?"; filter.states.len()].join(", ");
            clauses.push(format!("state IN ({})", marks));
            values.extend(filter.states.iter().map(|s| Value::Text(s.as_str().into())));
        }
        if let Some(key_type_id) = &filter.key_type_id {
            clauses.push("key_type_id = ?".into());
            values.push(Value::Text(key_type_id.as_str().into()));
        }
        if let Some(entity) = &filter.generating_entity {
            clauses.push("generating_entity = ?".into());
            values.push(Value::Text(entity.clone()));
        }
        let bounds = [
            ("created_at >= ?", filter.created_from),
            ("created_at <= ?", filter.created_to),
            ("expires_at >= ?", filter.expires_from),
            ("expires_at <= ?", filter.expires_to),
        ];
        for (clause, bound) in bounds {
            if let Some(at) = bound {
                clauses.push(clause.into());
                values.push(Value::Integer(micros(at)));
            }
        }

        let mut clause = String::new();
        if !clauses.is_empty() {
            clause.push_str("WHERE ");
            clause.push_str(&clauses.join(" AND "));
        }
        clause.push_str(" ORDER BY ");
        if let Some(order) = query.order {
            clause.push_str(&format!("{} {}, ", order.field.column(), direction(order.direction)));
        }
        clause.push_str("id ASC LIMIT ? OFFSET ?");
        values.push(Value::Integer(query.page.limit as i64));
        values.push(Value::Integer(query.page.offset as i64));

        select_keys(&self.conn.lock(), &clause, values)
    }

    fn keys_of_type(&self, id: &KeyTypeId) -> LedgerResult<Vec<CryptoKey>> {
        select_keys(
            &self.conn.lock(),
            "WHERE key_type_id = ? ORDER BY id ASC",
            vec![Value::Text(id.as_str().into())],
        )
    }

    fn update_crypto_key(&self, key: &CryptoKey, expected_revision: u64) -> LedgerResult<()> {
        self.write(|tx| {
            check_revision(tx, &key.id, expected_revision)?;
            overwrite_key(tx, key)
        })
    }

    fn commit_transition(&self, change: &StateChange) -> LedgerResult<HistoryRecord> {
        self.write(|tx| {
            check_revision(tx, &change.key.id, change.expected_revision)?;
            overwrite_key(tx, &change.key)?;
            append_history(tx, change)
        })
    }

    fn commit_rotation(&self, change: &StateChange, successor: &CryptoKey) -> LedgerResult<HistoryRecord> {
        self.write(|tx| {
            check_revision(tx, &change.key.id, change.expected_revision)?;
            insert_key(tx, successor)?;
            overwrite_key(tx, &change.key)?;
            append_history(tx, change)
        })
    }

    fn remove_crypto_key(&self, id: &CryptoKeyId) -> LedgerResult<()> {
        self.write(|tx| {
            let entries: i64 = tx.query_row(
                "SELECT COUNT(*) FROM key_history WHERE key_id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )?;
            if entries > 0 {
                return Err(LedgerError::Conflict(format!(
                    "crypto key {} has lifecycle history and must be destroyed instead",
                    id
                )));
            }
            let removed = tx.execute("DELETE FROM crypto_keys WHERE id = ?1", params![id.as_str()])?;
            if removed == 0 {
                return Err(LedgerError::key_not_found(id));
            }
            Ok(())
        })
    }

    fn history(&self, id: &CryptoKeyId) -> LedgerResult<Vec<HistoryRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT key_id, seq, operation, from_state, to_state, at, reason \
             FROM key_history WHERE key_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;
        collect(rows, |(key_id, seq, operation, from, to, at, reason)| {
            Ok(HistoryRecord {
                key_id: CryptoKeyId::new(key_id),
                sequence: seq as u64,
                operation: parse::<LifecycleOp>(&operation)?,
                from: parse::<KeyState>(&from)?,
                to: parse::<KeyState>(&to)?,
                at: from_micros(at)?,
                reason,
            })
        })
    }

    fn due_for_expiry(&self, at: DateTime<Utc>) -> LedgerResult<Vec<CryptoKey>> {
        select_keys(
            &self.conn.lock(),
            "WHERE state IN ('Active', 'Suspended') AND expires_at <= ? ORDER BY expires_at ASC, id ASC",
            vec![Value::Integer(micros(at))],
        )
    }

    fn expiring_between(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> LedgerResult<Vec<CryptoKey>> {
        select_keys(
            &self.conn.lock(),
            "WHERE state IN ('Active', 'Suspended') AND expires_at > ? AND expires_at <= ? \
             ORDER BY expires_at ASC, id ASC",
            vec![Value::Integer(micros(after)), Value::Integer(micros(until))],
        )
    }
}
