//! Field validation, run before anything reaches a store.
//!
//! Every check records its failure and keeps going, so a caller sees all
//! bad fields in one response.

use std::ops::RangeInclusive;

use crate::cryptoperiod::Cryptoperiod;
use crate::error::FieldError;
use crate::model::{KeyAttributes, KeyAttributesUpdate, KeyTypeUpdate, NewCryptoKey, NewKeyType, RotateRequest};

pub const NAME_MAX: usize = 100;
pub const DESCRIPTION_MAX: usize = 250;
pub const ALGORITHM_MAX: usize = 50;
pub const SHORT_TEXT_MAX: usize = 100;
pub const LONG_TEXT_MAX: usize = 250;
pub const NOTES_MAX: usize = 500;
pub const REASON_MAX: usize = 500;
pub const SIZE_BITS: RangeInclusive<u32> = 64..=4096;

/// Types that can check their own field constraints.
pub trait Validate {
    fn validate(&self) -> Result<(), Vec<FieldError>>;
}

/// Accumulates field errors.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Non-blank and at most `max` characters.
    pub fn required(&mut self, field: &str, value: &str, max: usize) {
        if value.trim().is_empty() {
            self.push(field, "is required");
        } else {
            self.max_len(field, value, max);
        }
    }

    pub fn max_len(&mut self, field: &str, value: &str, max: usize) {
        let len = value.chars().count();
        if len > max {
            self.push(field, format!("must be at most {} characters, got {}", max, len));
        }
    }

    /// Like [`required`](Self::required) but only when present.
    pub fn required_if_set(&mut self, field: &str, value: Option<&str>, max: usize) {
        if let Some(value) = value {
            self.required(field, value, max);
        }
    }

    pub fn in_range(&mut self, field: &str, value: u32, range: RangeInclusive<u32>) {
        if !range.contains(&value) {
            self.push(
                field,
                format!("must be between {} and {}", range.start(), range.end()),
            );
        }
    }

    pub fn cryptoperiod(&mut self, field: &str, raw: &str) -> Option<Cryptoperiod> {
        match raw.parse::<Cryptoperiod>() {
            Ok(period) => Some(period),
            Err(e) => {
                self.push(field, e.to_string());
                None
            }
        }
    }

    /// Letters, digits, spaces and hyphens.
    pub fn key_type_name(&mut self, field: &str, value: &str) {
        self.required(field, value, NAME_MAX);
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-')
        {
            self.push(field, "may only contain letters, digits, spaces and hyphens");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(self) -> Result<(), Vec<FieldError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

impl Validate for NewKeyType {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut v = Validator::new();
        v.key_type_name("name", &self.name);
        v.max_len("description", &self.description, DESCRIPTION_MAX);
        v.required("algorithm", &self.algorithm, ALGORITHM_MAX);
        v.in_range("size_bits", self.size_bits, SIZE_BITS);
        v.required("generated_by", &self.generated_by, SHORT_TEXT_MAX);
        v.required("form_factor", &self.form_factor, SHORT_TEXT_MAX);
        v.required("uniqueness_scope", &self.uniqueness_scope, SHORT_TEXT_MAX);
        v.cryptoperiod("cryptoperiod", &self.cryptoperiod);
        v.finish()
    }
}

impl Validate for KeyTypeUpdate {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut v = Validator::new();
        if let Some(name) = &self.name {
            v.key_type_name("name", name);
        }
        if let Some(description) = &self.description {
            v.max_len("description", description, DESCRIPTION_MAX);
        }
        v.required_if_set("algorithm", self.algorithm.as_deref(), ALGORITHM_MAX);
        if let Some(size_bits) = self.size_bits {
            v.in_range("size_bits", size_bits, SIZE_BITS);
        }
        v.required_if_set("generated_by", self.generated_by.as_deref(), SHORT_TEXT_MAX);
        v.required_if_set("form_factor", self.form_factor.as_deref(), SHORT_TEXT_MAX);
        v.required_if_set("uniqueness_scope", self.uniqueness_scope.as_deref(), SHORT_TEXT_MAX);
        if let Some(raw) = &self.cryptoperiod {
            v.cryptoperiod("cryptoperiod", raw);
        }
        v.finish()
    }
}

/// `(field, value, max)` for every required attribute, in declaration order.
fn attribute_limits(attrs: &KeyAttributes) -> [(&'static str, &str, usize); 14] {
    [
        ("description", attrs.description.as_str(), DESCRIPTION_MAX),
        ("generating_entity", attrs.generating_entity.as_str(), SHORT_TEXT_MAX),
        ("generation_method", attrs.generation_method.as_str(), ALGORITHM_MAX),
        ("storage_location", attrs.storage_location.as_str(), SHORT_TEXT_MAX),
        ("encryption_under_lmk", attrs.encryption_under_lmk.as_str(), ALGORITHM_MAX),
        ("form_factor", attrs.form_factor.as_str(), SHORT_TEXT_MAX),
        ("scope_of_uniqueness", attrs.scope_of_uniqueness.as_str(), SHORT_TEXT_MAX),
        ("usage_purpose", attrs.usage_purpose.as_str(), SHORT_TEXT_MAX),
        ("operational_environment", attrs.operational_environment.as_str(), SHORT_TEXT_MAX),
        ("associated_parties", attrs.associated_parties.as_str(), LONG_TEXT_MAX),
        ("access_control_mechanisms", attrs.access_control_mechanisms.as_str(), LONG_TEXT_MAX),
        ("compliance_requirements", attrs.compliance_requirements.as_str(), LONG_TEXT_MAX),
        ("audit_log_reference", attrs.audit_log_reference.as_str(), SHORT_TEXT_MAX),
        ("backup_and_recovery_details", attrs.backup_and_recovery_details.as_str(), LONG_TEXT_MAX),
    ]
}

impl Validate for KeyAttributes {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut v = Validator::new();
        for (field, value, max) in attribute_limits(self) {
            v.required(field, value, max);
        }
        if let Some(notes) = &self.notes {
            v.max_len("notes", notes, NOTES_MAX);
        }
        v.finish()
    }
}

impl Validate for KeyAttributesUpdate {
    /// Only fields present in the update are checked.
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut patched = KeyAttributes::default();
        self.clone().apply_to(&mut patched);

        let mut v = Validator::new();
        let present = [
            self.description.is_some(),
            self.generating_entity.is_some(),
            self.generation_method.is_some(),
            self.storage_location.is_some(),
            self.encryption_under_lmk.is_some(),
            self.form_factor.is_some(),
            self.scope_of_uniqueness.is_some(),
            self.usage_purpose.is_some(),
            self.operational_environment.is_some(),
            self.associated_parties.is_some(),
            self.access_control_mechanisms.is_some(),
            self.compliance_requirements.is_some(),
            self.audit_log_reference.is_some(),
            self.backup_and_recovery_details.is_some(),
        ];
        for ((field, value, max), present) in attribute_limits(&patched).into_iter().zip(present) {
            if present {
                v.required(field, value, max);
            }
        }
        if let Some(notes) = &self.notes {
            v.max_len("notes", notes, NOTES_MAX);
        }
        v.finish()
    }
}

impl Validate for NewCryptoKey {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if self.key_type_id.as_str().trim().is_empty() {
            errors.push(FieldError::new("key_type_id", "is required"));
        }
        if let Err(attr_errors) = self.attributes.validate() {
            errors.extend(attr_errors);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Validate for RotateRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if let Some(reason) = &self.reason {
            let mut v = Validator::new();
            v.max_len("reason", reason, REASON_MAX);
            if let Err(e) = v.finish() {
                errors.extend(e);
            }
        }
        if let Err(e) = self.overrides.validate() {
            errors.extend(e);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Reason text for a lifecycle operation. `required` rejects blanks.
pub fn validate_reason(reason: Option<&str>, required: bool) -> Result<(), Vec<FieldError>> {
    let mut v = Validator::new();
    match reason {
        Some(text) if required => v.required("reason", text, REASON_MAX),
        Some(text) => v.max_len("reason", text, REASON_MAX),
        None if required => v.push("reason", "is required"),
        None => {}
    }
    v.finish()
}
