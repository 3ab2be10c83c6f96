//! Policy knobs for the lifecycle engine and key type retirement.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What deleting a still-referenced KeyType does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyTypeDeletePolicy {
    /// Refuse while live keys reference the type.
    #[default]
    Reject,
    /// Destroy every live key of the type, then disable it.
    Cascade,
}

impl fmt::Display for KeyTypeDeletePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyTypeDeletePolicy::Reject => write!(f, "reject"),
            KeyTypeDeletePolicy::Cascade => write!(f, "cascade"),
        }
    }
}

impl FromStr for KeyTypeDeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(KeyTypeDeletePolicy::Reject),
            "cascade" => Ok(KeyTypeDeletePolicy::Cascade),
            other => Err(format!("expected reject or cascade, got {:?}", other)),
        }
    }
}

/// Engine behaviour that deployments may tune.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    /// Re-reads after a lost compare-and-set before giving up with Conflict.
    pub max_write_retries: u32,
    /// Applied when a delete request does not force cascading.
    pub key_type_delete: KeyTypeDeletePolicy,
    /// Reason recorded when the sweeper expires a key.
    pub expiry_reason: String,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            max_write_retries: 3,
            key_type_delete: KeyTypeDeletePolicy::Reject,
            expiry_reason: "cryptoperiod elapsed".into(),
        }
    }
}
