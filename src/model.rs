//! Entity records: KeyType, CryptoKey and their history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cryptoperiod::Cryptoperiod;
use crate::error::FieldError;
use crate::ids::{CryptoKeyId, KeyTypeId};
use crate::state::{KeyState, LifecycleOp};

// ---------------------------------------------------------------------------
// KeyType
// ---------------------------------------------------------------------------

/// Whether a KeyType can still be referenced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyTypeStatus {
    Active,
    /// Soft-deleted. Readable, but no longer usable for new keys.
    Disabled,
}

impl KeyTypeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyTypeStatus::Active => "Active",
            KeyTypeStatus::Disabled => "Disabled",
        }
    }
}

impl fmt::Display for KeyTypeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KeyTypeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("active") {
            Ok(KeyTypeStatus::Active)
        } else if s.eq_ignore_ascii_case("disabled") {
            Ok(KeyTypeStatus::Disabled)
        } else {
            Err(format!("unknown key type status: {}", s))
        }
    }
}

/// A reusable definition of key attributes shared by many keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyType {
    pub id: KeyTypeId,
    pub name: String,
    pub description: String,
    pub algorithm: String,
    pub size_bits: u32,
    pub generated_by: String,
    pub form_factor: String,
    pub uniqueness_scope: String,
    pub cryptoperiod: Cryptoperiod,
    pub status: KeyTypeStatus,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl KeyType {
    pub fn is_active(&self) -> bool {
        self.status == KeyTypeStatus::Active
    }
}

/// Request to create a KeyType.
///
/// Every field defaults to empty so that missing values surface as field
/// errors from validation rather than as deserialization failures.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewKeyType {
    pub name: String,
    pub description: String,
    pub algorithm: String,
    pub size_bits: u32,
    pub generated_by: String,
    pub form_factor: String,
    pub uniqueness_scope: String,
    /// Textual cryptoperiod such as `30d`, `6m` or `1y`.
    pub cryptoperiod: String,
}

/// Partial update of a KeyType. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyTypeUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub algorithm: Option<String>,
    pub size_bits: Option<u32>,
    pub generated_by: Option<String>,
    pub form_factor: Option<String>,
    pub uniqueness_scope: Option<String>,
    pub cryptoperiod: Option<String>,
}

impl KeyTypeUpdate {
    /// Apply to `key_type`. The cryptoperiod is passed already parsed.
    pub fn apply_to(self, key_type: &mut KeyType, cryptoperiod: Option<Cryptoperiod>) {
        if let Some(name) = self.name {
            key_type.name = name;
        }
        if let Some(description) = self.description {
            key_type.description = description;
        }
        if let Some(algorithm) = self.algorithm {
            key_type.algorithm = algorithm;
        }
        if let Some(size_bits) = self.size_bits {
            key_type.size_bits = size_bits;
        }
        if let Some(generated_by) = self.generated_by {
            key_type.generated_by = generated_by;
        }
        if let Some(form_factor) = self.form_factor {
            key_type.form_factor = form_factor;
        }
        if let Some(uniqueness_scope) = self.uniqueness_scope {
            key_type.uniqueness_scope = uniqueness_scope;
        }
        if let Some(cryptoperiod) = cryptoperiod {
            key_type.cryptoperiod = cryptoperiod;
        }
    }
}

// ---------------------------------------------------------------------------
// CryptoKey
// ---------------------------------------------------------------------------

/// Static descriptive metadata of a key. Copied forward on rotation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyAttributes {
    pub description: String,
    pub generating_entity: String,
    pub generation_method: String,
    pub storage_location: String,
    pub encryption_under_lmk: String,
    pub form_factor: String,
    pub scope_of_uniqueness: String,
    pub usage_purpose: String,
    pub operational_environment: String,
    pub associated_parties: String,
    pub access_control_mechanisms: String,
    pub compliance_requirements: String,
    pub audit_log_reference: String,
    pub backup_and_recovery_details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Partial update of [`KeyAttributes`].
///
/// An empty `notes` string clears the notes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyAttributesUpdate {
    pub description: Option<String>,
    pub generating_entity: Option<String>,
    pub generation_method: Option<String>,
    pub storage_location: Option<String>,
    pub encryption_under_lmk: Option<String>,
    pub form_factor: Option<String>,
    pub scope_of_uniqueness: Option<String>,
    pub usage_purpose: Option<String>,
    pub operational_environment: Option<String>,
    pub associated_parties: Option<String>,
    pub access_control_mechanisms: Option<String>,
    pub compliance_requirements: Option<String>,
    pub audit_log_reference: Option<String>,
    pub backup_and_recovery_details: Option<String>,
    pub notes: Option<String>,
}

impl KeyAttributesUpdate {
    pub fn is_empty(&self) -> bool {
        self == &KeyAttributesUpdate::default()
    }

    pub fn apply_to(self, attrs: &mut KeyAttributes) {
        macro_rules! set {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field {
                    attrs.$field = value;
                })*
            };
        }
        set!(
            description,
            generating_entity,
            generation_method,
            storage_location,
            encryption_under_lmk,
            form_factor,
            scope_of_uniqueness,
            usage_purpose,
            operational_environment,
            associated_parties,
            access_control_mechanisms,
            compliance_requirements,
            audit_log_reference,
            backup_and_recovery_details,
        );
        if let Some(notes) = self.notes {
            attrs.notes = if notes.is_empty() { None } else { Some(notes) };
        }
    }
}

/// Request to register a CryptoKey.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewCryptoKey {
    pub key_type_id: KeyTypeId,
    #[serde(flatten)]
    pub attributes: KeyAttributes,
    /// Start of the cryptoperiod. Defaults to the creation time.
    pub activation_date: Option<DateTime<Utc>>,
}

/// Request to rotate a key into a successor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotateRequest {
    pub reason: Option<String>,
    /// Attributes that differ from the predecessor.
    pub overrides: KeyAttributesUpdate,
    /// Start of the successor's cryptoperiod. Defaults to the rotation time.
    pub activation_date: Option<DateTime<Utc>>,
}

/// Metadata and lifecycle of one tracked key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoKey {
    pub id: CryptoKeyId,
    pub key_type_id: KeyTypeId,
    #[serde(flatten)]
    pub attributes: KeyAttributes,
    pub state: KeyState,
    /// Bumped on every write. Used for compare-and-set.
    pub revision: u64,
    pub activation_date: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Cryptoperiod of the key type when this key was created.
    pub intended_lifetime: Cryptoperiod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotated_from: Option<CryptoKeyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<CryptoKeyId>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl CryptoKey {
    /// Build a fresh Active key. Expiry is `activation_date + cryptoperiod`.
    ///
    /// Fails on `activation_date` when the expiry falls outside the
    /// representable date range.
    pub fn new(
        id: CryptoKeyId,
        key_type: &KeyType,
        attributes: KeyAttributes,
        activation_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self, FieldError> {
        let activation_date = activation_date.unwrap_or(now);
        let expires_at = activation_date
            .checked_add_signed(key_type.cryptoperiod.as_duration())
            .ok_or_else(|| {
                FieldError::new(
                    "activation_date",
                    format!("expiry after a {} cryptoperiod is out of range", key_type.cryptoperiod),
                )
            })?;
        Ok(Self {
            id,
            key_type_id: key_type.id.clone(),
            attributes,
            state: KeyState::Active,
            revision: 0,
            activation_date,
            expires_at,
            intended_lifetime: key_type.cryptoperiod,
            rotated_from: None,
            superseded_by: None,
            created_at: now,
            modified_at: now,
        })
    }

    /// Cryptoperiod has elapsed as of `at`.
    pub fn is_due(&self, at: DateTime<Utc>) -> bool {
        self.expires_at <= at
    }

    /// Part of a rotation chain in either direction.
    pub fn has_lineage(&self) -> bool {
        self.rotated_from.is_some() || self.superseded_by.is_some()
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// One immutable state-change entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub key_id: CryptoKeyId,
    /// 1-based and dense per key.
    pub sequence: u64,
    pub operation: LifecycleOp,
    pub from: KeyState,
    pub to: KeyState,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
