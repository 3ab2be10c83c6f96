//! Query-string parameters for the listing endpoints.
//!
//! Everything arrives as text so that malformed values come back as field
//! errors alongside the rest, instead of as extractor rejections.

use chrono::{DateTime, Utc};
use keyledger::query::DEFAULT_LIMIT;
use keyledger::{
    CryptoKeyFilter, CryptoKeyQuery, FieldError, KeyState, KeyTypeFilter, KeyTypeId, KeyTypeQuery,
    Page, SortOrder,
};
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct KeyTypeListParams {
    pub name: Option<String>,
    pub algorithm: Option<String>,
    pub size_bits: Option<String>,
    pub status: Option<String>,
    pub order_by: Option<String>,
    pub offset: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CryptoKeyListParams {
    /// Comma-separated states.
    pub state: Option<String>,
    pub key_type_id: Option<String>,
    pub generating_entity: Option<String>,
    pub created_from: Option<String>,
    pub created_to: Option<String>,
    pub expires_from: Option<String>,
    pub expires_to: Option<String>,
    pub order_by: Option<String>,
    pub offset: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeleteParams {
    pub force: bool,
}

/// Collects field errors while parsing so all of them are reported together.
#[derive(Default)]
struct Parser {
    errors: Vec<FieldError>,
}

impl Parser {
    fn value<T>(&mut self, field: &str, raw: Option<&str>) -> Option<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = raw?.trim();
        match raw.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                self.errors.push(FieldError::new(field, e.to_string()));
                None
            }
        }
    }

    fn timestamp(&mut self, field: &str, raw: Option<&str>) -> Option<DateTime<Utc>> {
        let raw = raw?.trim();
        match DateTime::parse_from_rfc3339(raw) {
            Ok(at) => Some(at.with_timezone(&Utc)),
            Err(_) => {
                self.errors.push(FieldError::new(field, "must be an RFC 3339 timestamp"));
                None
            }
        }
    }

    fn order<F>(&mut self, raw: Option<&str>) -> Option<SortOrder<F>>
    where
        SortOrder<F>: FromStr<Err = FieldError>,
    {
        match raw?.parse() {
            Ok(order) => Some(order),
            Err(e) => {
                self.errors.push(e);
                None
            }
        }
    }

    fn page(&mut self, offset: Option<&str>, limit: Option<&str>) -> Page {
        let offset = self.value::<usize>("offset", offset).unwrap_or(0);
        let limit = self.value::<usize>("limit", limit).unwrap_or(DEFAULT_LIMIT);
        Page::new(offset, limit).unwrap_or_else(|e| {
            self.errors.push(e);
            Page::default()
        })
    }

    fn finish<T>(self, value: T) -> Result<T, Vec<FieldError>> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self.errors)
        }
    }
}

impl KeyTypeListParams {
    pub fn into_query(self) -> Result<KeyTypeQuery, Vec<FieldError>> {
        let mut p = Parser::default();
        let filter = KeyTypeFilter {
            size_bits: p.value("size_bits", self.size_bits.as_deref()),
            status: p.value("status", self.status.as_deref()),
            name: self.name,
            algorithm: self.algorithm,
        };
        let order = p.order(self.order_by.as_deref());
        let page = p.page(self.offset.as_deref(), self.limit.as_deref());
        p.finish(KeyTypeQuery { filter, order, page })
    }
}

impl CryptoKeyListParams {
    pub fn into_query(self) -> Result<CryptoKeyQuery, Vec<FieldError>> {
        let mut p = Parser::default();
        let states = self
            .state
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .filter_map(|s| p.value::<KeyState>("state", Some(s)))
                    .collect()
            })
            .unwrap_or_default();
        let filter = CryptoKeyFilter {
            states,
            key_type_id: self.key_type_id.map(KeyTypeId::new),
            generating_entity: self.generating_entity,
            created_from: p.timestamp("created_from", self.created_from.as_deref()),
            created_to: p.timestamp("created_to", self.created_to.as_deref()),
            expires_from: p.timestamp("expires_from", self.expires_from.as_deref()),
            expires_to: p.timestamp("expires_to", self.expires_to.as_deref()),
        };
        let order = p.order(self.order_by.as_deref());
        let page = p.page(self.offset.as_deref(), self.limit.as_deref());
        p.finish(CryptoKeyQuery { filter, order, page })
    }
}
