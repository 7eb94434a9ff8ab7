//! Value normalizers supplied by matching rules.
//!
//! Every normalizer must be idempotent: feeding its own output back in
//! yields the same value.

use std::fmt;

use crate::error::{Error, Result};
use crate::value::Value;

/// Canonicalizes attribute values for one matching rule.
pub trait Normalizer: Send + Sync + fmt::Debug {
    /// Returns the canonical form of `value`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Encoding` when a text normalizer receives bytes that
    /// are not UTF-8.
    fn normalize(&self, value: &Value) -> Result<Value>;
}

/// Returns values unchanged. Used when an attribute type has no equality
/// matching rule, and for octet-string matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpNormalizer;

impl Normalizer for NoOpNormalizer {
    fn normalize(&self, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }
}

/// Trims surrounding whitespace and collapses inner runs to one space.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeepTrimNormalizer;

impl Normalizer for DeepTrimNormalizer {
    fn normalize(&self, value: &Value) -> Result<Value> {
        Ok(Value::Text(deep_trim(text_of(value)?)))
    }
}

/// [`DeepTrimNormalizer`] followed by lower-casing.
///
/// # Examples
///
/// ```
/// use directory_core::{DeepTrimToLowerNormalizer, Normalizer, Value};
///
/// let out = DeepTrimToLowerNormalizer.normalize(&Value::from("  John   SMITH ")).unwrap();
/// assert_eq!(out, Value::from("john smith"));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DeepTrimToLowerNormalizer;

impl Normalizer for DeepTrimToLowerNormalizer {
    fn normalize(&self, value: &Value) -> Result<Value> {
        Ok(Value::Text(deep_trim(text_of(value)?).to_lowercase()))
    }
}

/// Removes every space character (numericStringMatch).
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericStringNormalizer;

impl Normalizer for NumericStringNormalizer {
    fn normalize(&self, value: &Value) -> Result<Value> {
        Ok(Value::Text(
            text_of(value)?.chars().filter(|c| *c != ' ').collect(),
        ))
    }
}

fn text_of(value: &Value) -> Result<&str> {
    match value {
        Value::Text(s) => Ok(s),
        Value::Binary(bytes) => std::str::from_utf8(bytes)
            .map_err(|e| Error::encoding(format!("value is not valid UTF-8: {}", e))),
    }
}

fn deep_trim(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
