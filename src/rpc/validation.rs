//! Structural payload validation helpers.

use serde_json::{Map, Value};
use uuid::Uuid;

use super::status::Status;

/// A payload that failed structural validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    /// Offending field (`payload` for the body as a whole).
    pub field: String,
    /// What is wrong with it.
    pub reason: String,
}

impl ValidationError {
    /// New validation error.
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<ValidationError> for Status {
    fn from(err: ValidationError) -> Self {
        Status::invalid_argument(err.to_string())
    }
}

/// Per-method payload rules, looked up by fully-qualified method name.
pub trait PayloadValidator: Send + Sync {
    /// Check `payload` for `method`.
    fn validate(&self, method: &str, payload: &Value) -> Result<(), ValidationError>;
}

/// The payload must be a JSON object.
pub fn require_object(payload: &Value) -> Result<&Map<String, Value>, ValidationError> {
    payload
        .as_object()
        .ok_or_else(|| ValidationError::new("payload", "must be a JSON object"))
}

/// `field` must be a non-empty string.
pub fn require_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str, ValidationError> {
    match payload.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(Value::String(_)) => Err(ValidationError::new(field, "must not be empty")),
        Some(_) => Err(ValidationError::new(field, "must be a string")),
        None => Err(ValidationError::new(field, "is required")),
    }
}

/// `field` must be a UUID string.
pub fn require_uuid(payload: &Value, field: &str) -> Result<Uuid, ValidationError> {
    let raw = require_str(payload, field)?;
    Uuid::parse_str(raw).map_err(|_| ValidationError::new(field, format!("'{raw}' is not a UUID")))
}

/// `field` must be a JSON object.
pub fn require_object_field<'a>(
    payload: &'a Value,
    field: &str,
) -> Result<&'a Map<String, Value>, ValidationError> {
    match payload.get(field) {
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(ValidationError::new(field, "must be an object")),
        None => Err(ValidationError::new(field, "is required")),
    }
}

/// `field`, when present, must be a non-negative integer.
pub fn optional_u64(payload: &Value, field: &str) -> Result<Option<u64>, ValidationError> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| ValidationError::new(field, "must be a non-negative integer")),
    }
}
