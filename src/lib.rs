//! # Keyledger
//!
//! Data model for tracking cryptographic key metadata through its lifecycle.
//!
//! This crate holds the records and rules only: identifiers, the
//! cryptoperiod type, KeyType and CryptoKey records, the lifecycle state
//! table, listing queries and field validation. Persistence, the lifecycle
//! engine and the expiry sweeper live in `keyledger-store`.
//!
//! ## Quick Start
//!
//! ```rust
//! use keyledger::{Cryptoperiod, KeyState, LifecycleOp, NewKeyType, Validate};
//!
//! let period: Cryptoperiod = "6m".parse().unwrap();
//! assert_eq!(period.days(), 180);
//!
//! assert_eq!(LifecycleOp::Suspend.apply(KeyState::Active), Some(KeyState::Suspended));
//! assert_eq!(LifecycleOp::Reactivate.apply(KeyState::Expired), None);
//!
//! let errors = NewKeyType::default().validate().unwrap_err();
//! assert!(errors.iter().any(|e| e.field == "name"));
//! ```
//!
//! ## What's NOT Provided
//!
//! - Key material. Only metadata about keys is tracked.
//! - Storage or scheduling.

#![deny(unsafe_code)]

pub mod clock;
pub mod cryptoperiod;
pub mod error;
pub mod ids;
pub mod model;
pub mod query;
pub mod state;
pub mod validate;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cryptoperiod::Cryptoperiod;
pub use error::{CryptoperiodError, FieldError};
pub use ids::{CryptoKeyId, IdGenerator, KeyTypeId, SequentialIdGenerator, SortableIdGenerator};
pub use model::{
    CryptoKey, HistoryRecord, KeyAttributes, KeyAttributesUpdate, KeyType, KeyTypeStatus,
    KeyTypeUpdate, NewCryptoKey, NewKeyType, RotateRequest,
};
pub use query::{
    CryptoKeyFilter, CryptoKeyQuery, CryptoKeySortField, KeyTypeFilter, KeyTypeQuery,
    KeyTypeSortField, Page, SortDirection, SortOrder,
};
pub use state::{KeyState, LifecycleOp};
pub use validate::{validate_reason, Validate, Validator};
