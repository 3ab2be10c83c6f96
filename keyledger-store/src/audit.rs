//! Audit logging: every inventory mutation emits a structured event.

use chrono::{DateTime, Utc};
use keyledger::{CryptoKeyId, KeyState, KeyTypeId, LifecycleOp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Audit events
// ---------------------------------------------------------------------------

/// What happened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    KeyTypeCreated,
    KeyTypeUpdated,
    KeyTypeRemoved,
    KeyTypeDisabled { destroyed_keys: usize },
    KeyCreated,
    KeyUpdated,
    KeyRemoved,
    KeyTransitioned {
        operation: LifecycleOp,
        from: KeyState,
        to: KeyState,
    },
    KeyRotated { successor: CryptoKeyId },
    SweepCompleted {
        expired: usize,
        skipped: usize,
        failed: usize,
        upcoming: usize,
    },
}

/// A structured audit event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_type_id: Option<KeyTypeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<CryptoKeyId>,
    pub action: AuditAction,
    /// Who or what triggered this.
    pub actor: String,
    pub success: bool,
    pub detail: Option<String>,
    /// Monotonic sequence number (populated by integrity chain sink).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// SHA-256 of the previous event's JSON (populated by integrity chain sink).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
}

impl AuditEvent {
    fn base(timestamp: DateTime<Utc>, action: AuditAction) -> Self {
        Self {
            timestamp,
            key_type_id: None,
            key_id: None,
            action,
            actor: "system".into(),
            success: true,
            detail: None,
            sequence: None,
            prev_hash: None,
        }
    }

    pub fn key_type_event(id: &KeyTypeId, timestamp: DateTime<Utc>, action: AuditAction) -> Self {
        Self {
            key_type_id: Some(id.clone()),
            ..Self::base(timestamp, action)
        }
    }

    pub fn key_event(
        id: &CryptoKeyId,
        key_type_id: &KeyTypeId,
        timestamp: DateTime<Utc>,
        action: AuditAction,
    ) -> Self {
        Self {
            key_type_id: Some(key_type_id.clone()),
            key_id: Some(id.clone()),
            ..Self::base(timestamp, action)
        }
    }

    pub fn system_event(timestamp: DateTime<Utc>, action: AuditAction) -> Self {
        Self::base(timestamp, action)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.success = false;
        self
    }
}

// ---------------------------------------------------------------------------
// Audit sink trait
// ---------------------------------------------------------------------------

/// Where audit events go.
///
/// Synchronous: the engine runs on blocking threads. Sinks must not fail
/// the operation that produced the event.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

// ---------------------------------------------------------------------------
// Built-in sinks
// ---------------------------------------------------------------------------

/// Logs events via the `tracing` crate.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "keyledger_store::audit",
            timestamp = %event.timestamp,
            key_type_id = ?event.key_type_id,
            key_id = ?event.key_id,
            action = ?event.action,
            actor = %event.actor,
            success = event.success,
            detail = ?event.detail,
            "audit"
        );
    }
}

/// Collects events in memory.
#[derive(Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn events_for_key(&self, id: &CryptoKeyId) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.key_id.as_ref() == Some(id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

/// Appends one JSON object per line to a file.
pub struct FileAuditSink {
    path: PathBuf,
    // serializes appends from concurrent request threads
    write_lock: Mutex<()>,
}

impl FileAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "audit event not serializable");
                return;
            }
        };
        let _guard = self.write_lock.lock();
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{}", json));
        if let Err(e) = result {
            tracing::error!(path = %self.path.display(), error = %e, "audit write failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Integrity chain sink (tamper-evident audit log)
// ---------------------------------------------------------------------------

const GENESIS_SEED: &[u8] = b"keyledger-audit-genesis";

/// Wraps any [`AuditSink`] and adds a SHA-256 hash chain.
///
/// Each event gets a monotonic `sequence` number and a `prev_hash` holding
/// the hex SHA-256 of the previous event's JSON, sequence and prev_hash
/// included. The first event links to `SHA-256("keyledger-audit-genesis")`.
pub struct IntegrityChainSink {
    inner: Arc<dyn AuditSink>,
    state: Mutex<ChainState>,
}

struct ChainState {
    sequence: u64,
    prev_hash: String,
}

impl IntegrityChainSink {
    pub fn new(inner: Arc<dyn AuditSink>) -> Self {
        Self {
            inner,
            state: Mutex::new(ChainState {
                sequence: 0,
                prev_hash: genesis_hash(),
            }),
        }
    }
}

fn genesis_hash() -> String {
    hex::encode(Sha256::digest(GENESIS_SEED))
}

impl AuditSink for IntegrityChainSink {
    fn record(&self, mut event: AuditEvent) {
        let mut state = self.state.lock();

        event.sequence = Some(state.sequence);
        event.prev_hash = Some(state.prev_hash.clone());

        if let Ok(json) = serde_json::to_string(&event) {
            state.prev_hash = hex::encode(Sha256::digest(json.as_bytes()));
        }
        state.sequence += 1;

        drop(state);
        self.inner.record(event);
    }
}

/// Check that `events` form an unbroken chain starting at genesis.
///
/// Returns the sequence number of the first event that does not link.
pub fn verify_chain(events: &[AuditEvent]) -> Result<(), u64> {
    let mut expected = genesis_hash();
    for (index, event) in events.iter().enumerate() {
        let index = index as u64;
        if event.sequence != Some(index) || event.prev_hash.as_deref() != Some(expected.as_str()) {
            return Err(index);
        }
        let json = serde_json::to_string(event).map_err(|_| index)?;
        expected = hex::encode(Sha256::digest(json.as_bytes()));
    }
    Ok(())
}
