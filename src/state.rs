//! The CryptoKey lifecycle state machine.
//!
//! ```text
//!            suspend            revoke / rotate
//!   ACTIVE ─────────▶ SUSPENDED ─────────────▶ REVOKED ─┐
//!     ▲  ◀─────────      │                              │
//!     │   reactivate     │ expire                       │ destroy
//!     │                  ▼                              ▼
//!     └──── expire ──▶ EXPIRED ──────── destroy ──▶ DESTROYED
//! ```
//!
//! Revoked and Expired are never reversible. Destroyed is terminal.
//! Rotation is only legal from Active and leaves the predecessor Revoked.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a CryptoKey.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyState {
    /// In use. Initial state of every key.
    Active,
    /// Temporarily on hold, may be reactivated.
    Suspended,
    /// No longer trusted.
    Revoked,
    /// Cryptoperiod elapsed.
    Expired,
    /// Key material considered gone. Terminal.
    Destroyed,
}

impl KeyState {
    pub const ALL: [KeyState; 5] = [
        KeyState::Active,
        KeyState::Suspended,
        KeyState::Revoked,
        KeyState::Expired,
        KeyState::Destroyed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyState::Active => "Active",
            KeyState::Suspended => "Suspended",
            KeyState::Revoked => "Revoked",
            KeyState::Expired => "Expired",
            KeyState::Destroyed => "Destroyed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, KeyState::Destroyed)
    }

    /// Subject to the expiry sweep.
    pub fn can_expire(&self) -> bool {
        matches!(self, KeyState::Active | KeyState::Suspended)
    }

    /// States reachable in one legal edge.
    pub fn valid_transitions(&self) -> &'static [KeyState] {
        match self {
            KeyState::Active => &[
                KeyState::Suspended,
                KeyState::Revoked,
                KeyState::Expired,
                KeyState::Destroyed,
            ],
            KeyState::Suspended => &[
                KeyState::Active,
                KeyState::Revoked,
                KeyState::Expired,
                KeyState::Destroyed,
            ],
            KeyState::Revoked => &[KeyState::Destroyed],
            KeyState::Expired => &[KeyState::Destroyed],
            KeyState::Destroyed => &[],
        }
    }

    pub fn can_transition_to(&self, target: KeyState) -> bool {
        self.valid_transitions().contains(&target)
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown key state: {}", s))
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// A state-changing request against one key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleOp {
    Suspend,
    Reactivate,
    Revoke,
    Expire,
    Destroy,
    Rotate,
}

impl LifecycleOp {
    pub const ALL: [LifecycleOp; 6] = [
        LifecycleOp::Suspend,
        LifecycleOp::Reactivate,
        LifecycleOp::Revoke,
        LifecycleOp::Expire,
        LifecycleOp::Destroy,
        LifecycleOp::Rotate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleOp::Suspend => "suspend",
            LifecycleOp::Reactivate => "reactivate",
            LifecycleOp::Revoke => "revoke",
            LifecycleOp::Expire => "expire",
            LifecycleOp::Destroy => "destroy",
            LifecycleOp::Rotate => "rotate",
        }
    }

    /// State a key lands in when this operation succeeds.
    pub fn target(&self) -> KeyState {
        match self {
            LifecycleOp::Suspend => KeyState::Suspended,
            LifecycleOp::Reactivate => KeyState::Active,
            LifecycleOp::Revoke | LifecycleOp::Rotate => KeyState::Revoked,
            LifecycleOp::Expire => KeyState::Expired,
            LifecycleOp::Destroy => KeyState::Destroyed,
        }
    }

    /// Whether the operation may start from `from`.
    pub fn allowed_from(&self, from: KeyState) -> bool {
        match self {
            LifecycleOp::Rotate => from == KeyState::Active,
            op => from.can_transition_to(op.target()),
        }
    }

    /// Target state if the edge is legal.
    pub fn apply(&self, from: KeyState) -> Option<KeyState> {
        self.allowed_from(from).then(|| self.target())
    }
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LifecycleOp::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown lifecycle operation: {}", s))
    }
}
