//! Error types for the data model.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a cryptoperiod string or day count was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoperiodError {
    #[error("invalid cryptoperiod format {0:?}, expected e.g. 30d, 6m or 1y")]
    Format(String),
    #[error("cryptoperiod must be greater than zero")]
    Zero,
    #[error("cryptoperiod of {days} days exceeds the maximum of {} days", crate::cryptoperiod::MAX_DAYS)]
    TooLong { days: u64 },
}

/// One failed field constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
