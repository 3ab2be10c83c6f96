//! Listing: filters, ordering and pagination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

use crate::error::FieldError;
use crate::ids::KeyTypeId;
use crate::model::{CryptoKey, KeyType, KeyTypeStatus};
use crate::state::KeyState;

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// Offset/limit window over an ordered listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Result<Self, FieldError> {
        if limit == 0 || limit > MAX_LIMIT {
            return Err(FieldError::new(
                "limit",
                format!("must be between 1 and {}", MAX_LIMIT),
            ));
        }
        Ok(Self { offset, limit })
    }

    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.offset).take(self.limit).collect()
    }
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// `field` or `-field`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortOrder<F> {
    pub field: F,
    pub direction: SortDirection,
}

impl<F> SortOrder<F> {
    pub fn ascending(field: F) -> Self {
        Self {
            field,
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(field: F) -> Self {
        Self {
            field,
            direction: SortDirection::Descending,
        }
    }

    fn orient(&self, ordering: Ordering) -> Ordering {
        match self.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

impl<F: FromStr<Err = String>> FromStr for SortOrder<F> {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (direction, name) = match s.strip_prefix('-') {
            Some(rest) => (SortDirection::Descending, rest),
            None => (SortDirection::Ascending, s),
        };
        let field = name.parse().map_err(|e| FieldError::new("order_by", e))?;
        Ok(Self { field, direction })
    }
}

/// Sortable KeyType columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyTypeSortField {
    Name,
    Algorithm,
    SizeBits,
    CreatedAt,
}

impl KeyTypeSortField {
    pub fn column(&self) -> &'static str {
        match self {
            KeyTypeSortField::Name => "name",
            KeyTypeSortField::Algorithm => "algorithm",
            KeyTypeSortField::SizeBits => "size_bits",
            KeyTypeSortField::CreatedAt => "created_at",
        }
    }

    fn compare(&self, a: &KeyType, b: &KeyType) -> Ordering {
        match self {
            KeyTypeSortField::Name => a.name.cmp(&b.name),
            KeyTypeSortField::Algorithm => a.algorithm.cmp(&b.algorithm),
            KeyTypeSortField::SizeBits => a.size_bits.cmp(&b.size_bits),
            KeyTypeSortField::CreatedAt => a.created_at.cmp(&b.created_at),
        }
    }
}

impl FromStr for KeyTypeSortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(KeyTypeSortField::Name),
            "algorithm" => Ok(KeyTypeSortField::Algorithm),
            "size_bits" => Ok(KeyTypeSortField::SizeBits),
            "created_at" => Ok(KeyTypeSortField::CreatedAt),
            other => Err(format!("cannot order key types by {:?}", other)),
        }
    }
}

/// Sortable CryptoKey columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CryptoKeySortField {
    CreatedAt,
    ModifiedAt,
    ExpiresAt,
    State,
}

impl CryptoKeySortField {
    pub fn column(&self) -> &'static str {
        match self {
            CryptoKeySortField::CreatedAt => "created_at",
            CryptoKeySortField::ModifiedAt => "modified_at",
            CryptoKeySortField::ExpiresAt => "expires_at",
            CryptoKeySortField::State => "state",
        }
    }

    fn compare(&self, a: &CryptoKey, b: &CryptoKey) -> Ordering {
        match self {
            CryptoKeySortField::CreatedAt => a.created_at.cmp(&b.created_at),
            CryptoKeySortField::ModifiedAt => a.modified_at.cmp(&b.modified_at),
            CryptoKeySortField::ExpiresAt => a.expires_at.cmp(&b.expires_at),
            CryptoKeySortField::State => a.state.as_str().cmp(b.state.as_str()),
        }
    }
}

impl FromStr for CryptoKeySortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created_at" => Ok(CryptoKeySortField::CreatedAt),
            "modified_at" => Ok(CryptoKeySortField::ModifiedAt),
            "expires_at" => Ok(CryptoKeySortField::ExpiresAt),
            "state" => Ok(CryptoKeySortField::State),
            other => Err(format!("cannot order keys by {:?}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Exact-match filters over KeyTypes. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyTypeFilter {
    pub name: Option<String>,
    pub algorithm: Option<String>,
    pub size_bits: Option<u32>,
    pub status: Option<KeyTypeStatus>,
}

impl KeyTypeFilter {
    pub fn matches(&self, key_type: &KeyType) -> bool {
        self.name.as_ref().map_or(true, |n| *n == key_type.name)
            && self.algorithm.as_ref().map_or(true, |a| *a == key_type.algorithm)
            && self.size_bits.map_or(true, |s| s == key_type.size_bits)
            && self.status.map_or(true, |s| s == key_type.status)
    }
}

/// Filters over CryptoKeys. Date bounds are inclusive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CryptoKeyFilter {
    /// Any of these states. Empty matches all.
    pub states: Vec<KeyState>,
    pub key_type_id: Option<KeyTypeId>,
    pub generating_entity: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub expires_from: Option<DateTime<Utc>>,
    pub expires_to: Option<DateTime<Utc>>,
}

impl CryptoKeyFilter {
    pub fn matches(&self, key: &CryptoKey) -> bool {
        (self.states.is_empty() || self.states.contains(&key.state))
            && self.key_type_id.as_ref().map_or(true, |id| *id == key.key_type_id)
            && self
                .generating_entity
                .as_ref()
                .map_or(true, |g| *g == key.attributes.generating_entity)
            && self.created_from.map_or(true, |t| key.created_at >= t)
            && self.created_to.map_or(true, |t| key.created_at <= t)
            && self.expires_from.map_or(true, |t| key.expires_at >= t)
            && self.expires_to.map_or(true, |t| key.expires_at <= t)
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyTypeQuery {
    pub filter: KeyTypeFilter,
    /// Falls back to id order.
    pub order: Option<SortOrder<KeyTypeSortField>>,
    pub page: Page,
}

impl KeyTypeQuery {
    /// Filter, order and page an unordered collection.
    pub fn apply(&self, items: impl IntoIterator<Item = KeyType>) -> Vec<KeyType> {
        let mut matched: Vec<KeyType> = items.into_iter().filter(|k| self.filter.matches(k)).collect();
        matched.sort_by(|a, b| {
            self.order
                .map_or(Ordering::Equal, |o| o.orient(o.field.compare(a, b)))
                .then_with(|| a.id.cmp(&b.id))
        });
        self.page.slice(matched)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CryptoKeyQuery {
    pub filter: CryptoKeyFilter,
    pub order: Option<SortOrder<CryptoKeySortField>>,
    pub page: Page,
}

impl CryptoKeyQuery {
    pub fn apply(&self, items: impl IntoIterator<Item = CryptoKey>) -> Vec<CryptoKey> {
        let mut matched: Vec<CryptoKey> = items.into_iter().filter(|k| self.filter.matches(k)).collect();
        matched.sort_by(|a, b| {
            self.order
                .map_or(Ordering::Equal, |o| o.orient(o.field.compare(a, b)))
                .then_with(|| a.id.cmp(&b.id))
        });
        self.page.slice(matched)
    }
}
